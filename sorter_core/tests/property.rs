use std::sync::Arc;

use proptest::prelude::*;
use sorter_core::eject_planner::{EjectCfg, EjectPlanner};
use sorter_core::ring::{RingBuilder, RingEvent};
use sorter_core::topology::TrackTopology;
use sorter_core::tracker::CartPositionTracker;
use sorter_core::types::{CartId, ChuteId, ParcelId, RingSnapshot};
use sorter_traits::OriginEdge;

fn edge(first_sensor: bool, rising: bool, at_ms: u64) -> OriginEdge {
    OriginEdge {
        first_sensor,
        rising,
        at_ms,
    }
}

/// Drive one cart past the origin sensors.
fn pass_cart(b: &mut RingBuilder, t: &mut u64, marked: bool) -> Option<Arc<RingSnapshot>> {
    let mut done = None;
    let mut feed = |builder: &mut RingBuilder, e: OriginEdge| {
        if let RingEvent::Completed(s) = builder.on_origin_edge(e) {
            done = Some(s);
        }
    };
    feed(b, edge(true, true, *t));
    if marked {
        feed(b, edge(false, true, *t + 1));
        feed(b, edge(false, false, *t + 5));
    }
    feed(b, edge(true, false, *t + 8));
    *t += 50;
    done
}

proptest! {
    #[test]
    fn tracker_index_is_always_pulses_mod_len(len in 2u32..60, pulses in 0u64..300) {
        let tracker = CartPositionTracker::new();
        tracker.install_ring(Arc::new(RingSnapshot::new((0..len).map(CartId).collect())));
        for n in 0..pulses {
            let idx = tracker.on_cart_passed(n).expect("ring installed");
            prop_assert_eq!(u64::from(idx), (n + 1) % u64::from(len));
        }
        prop_assert_eq!(tracker.is_ring_ready(), pulses > 0);
        if let Some(view) = tracker.view() {
            prop_assert_eq!(u64::from(view.origin_index), pulses % u64::from(len));
            prop_assert!(view.origin_index < view.ring.len());
        }
    }

    #[test]
    fn ring_discovery_is_deterministic_for_any_length(n in 2u32..50) {
        let mut builder = RingBuilder::new(2);
        let mut t = 0u64;
        let mut snapshots = Vec::new();
        // One full revolution: marked cart, n-1 plain carts, marked again.
        if let Some(s) = pass_cart(&mut builder, &mut t, true) {
            snapshots.push(s);
        }
        for _ in 0..n - 1 {
            if let Some(s) = pass_cart(&mut builder, &mut t, false) {
                snapshots.push(s);
            }
        }
        if let Some(s) = pass_cart(&mut builder, &mut t, true) {
            snapshots.push(s);
        }
        prop_assert_eq!(snapshots.len(), 1, "exactly one snapshot published");
        let snap = &snapshots[0];
        prop_assert_eq!(snap.len(), n);
        prop_assert_eq!(snap.index_of(snap.zero_cart()), Some(0));
        // Identities are unique.
        let mut ids: Vec<u32> = snap.carts().iter().map(|c| c.0).collect();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len() as u32, n);
    }

    #[test]
    fn eject_windows_are_symmetric_and_ordered(
        len in 4u32..80,
        origin in 0u32..80,
        cart in 0u32..80,
        offset in 0u32..80,
        tol in 1u64..500,
        speed in 100.0f64..4000.0,
    ) {
        let origin = origin % len;
        let cart = cart % len;
        let topology = Arc::new(
            TrackTopology::new(250, 1000, 0, 2, vec![(ChuteId(1), offset)], None).unwrap(),
        );
        let planner = EjectPlanner::new(
            topology,
            EjectCfg { horizon_ms: u64::MAX / 4, timing_tolerance_ms: tol },
        );
        let tracker = CartPositionTracker::new();
        tracker.install_ring(Arc::new(RingSnapshot::new((0..len).map(CartId).collect())));
        let pulses = if origin == 0 { len } else { origin };
        for n in 0..pulses {
            tracker.on_cart_passed(n.into());
        }
        let view = tracker.view().expect("ready");
        let now = 10_000u64;
        let plan = planner
            .calculate_divert_plan(&view, speed, ParcelId(1), CartId(cart), ChuteId(1), now, false)
            .expect("plannable");
        prop_assert_eq!(plan.window_ms(), 2 * tol);
        prop_assert!(plan.window_end_ms >= now);
        // The arrival is never more than a full lap away.
        let lap_ms = (f64::from(len) * 250.0 / speed * 1000.0).ceil() as u64;
        prop_assert!(plan.window_end_ms - tol <= now + lap_ms + 1);
    }
}
