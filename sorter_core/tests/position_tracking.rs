use std::sync::Arc;

use rstest::rstest;
use sorter_core::tracker::CartPositionTracker;
use sorter_core::types::{CartId, RingSnapshot};

fn ring(len: u32) -> Arc<RingSnapshot> {
    Arc::new(RingSnapshot::new((0..len).map(CartId).collect()))
}

#[rstest]
#[case(10, 9, 9)]
#[case(10, 10, 0)]
#[case(10, 23, 3)]
#[case(10, 0, 0)]
#[case(3, 100, 1)]
fn origin_index_is_pulse_count_modulo_ring_length(
    #[case] len: u32,
    #[case] pulses: u64,
    #[case] expected: u32,
) {
    let tracker = CartPositionTracker::new();
    tracker.install_ring(ring(len));
    let mut index = 0;
    for n in 0..pulses {
        index = tracker.on_cart_passed(n * 10).expect("ring installed");
    }
    assert_eq!(index, expected);
    if pulses > 0 {
        assert!(tracker.is_ring_ready());
        let view = tracker.view().expect("ready");
        assert_eq!(view.origin_index, expected);
        assert_eq!(view.ring.cart_at(expected), Some(CartId(expected)));
    } else {
        assert!(!tracker.is_ring_ready());
    }
}

#[test]
fn view_pairs_ring_and_index_consistently() {
    let tracker = CartPositionTracker::new();
    tracker.install_ring(ring(6));
    tracker.on_cart_passed(10);
    tracker.on_cart_passed(20);
    let view = tracker.view().expect("ready");
    assert_eq!(view.ring.len(), 6);
    assert_eq!(view.origin_index, 2);
    assert_eq!(view.pulses, 2);

    // Replacing the ring invalidates the old pairing atomically: the new view
    // only appears once a pulse re-establishes the index.
    tracker.install_ring(ring(9));
    assert!(tracker.view().is_none());
    tracker.on_cart_passed(30);
    let view = tracker.view().expect("ready again");
    assert_eq!(view.ring.len(), 9);
    assert_eq!(view.origin_index, 1);
}

#[test]
fn concurrent_pulses_and_readers_do_not_tear() {
    let tracker = Arc::new(CartPositionTracker::new());
    tracker.install_ring(ring(10));

    let writer = {
        let tracker = tracker.clone();
        std::thread::spawn(move || {
            for n in 0..1_000u64 {
                tracker.on_cart_passed(n);
            }
        })
    };
    let reader = {
        let tracker = tracker.clone();
        std::thread::spawn(move || {
            for _ in 0..1_000 {
                if let Some(view) = tracker.view() {
                    // Index must always be valid for the paired ring.
                    assert!(view.origin_index < view.ring.len());
                }
            }
        })
    };
    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(tracker.view().unwrap().origin_index, 0); // 1000 % 10
}
