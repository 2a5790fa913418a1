//! Cart ring discovery from origin sensor edges.
//!
//! Two sensors straddle the origin: the count sensor fires for every cart,
//! the marker sensor only for the physically marked zero cart, and only while
//! the count sensor is high. One full revolution between two coincidences
//! yields the ring length and the passage order of all carts.

use std::sync::Arc;

use sorter_traits::OriginEdge;

use crate::types::{CartId, RingSnapshot};

/// Outcome of feeding one edge into the builder.
#[derive(Debug, Clone)]
pub enum RingEvent {
    /// Nothing to report (level bookkeeping, bounce, pre-start edge).
    None,
    /// First coincidence seen; counting has begun at the zero cart.
    CountingStarted,
    /// A new cart passed the origin and received an identity.
    CartCounted(CartId),
    /// A debounced count pulse after the ring completed; feed this to the
    /// position tracker.
    CartPassed,
    /// Two coincidences closed an implausibly short ring; the window was
    /// discarded and counting restarted from the new coincidence.
    Discarded { counted: u32 },
    /// A full revolution closed a plausible ring.
    Completed(Arc<RingSnapshot>),
}

#[derive(Debug)]
enum BuildPhase {
    /// Waiting for the first coincidence; count edges are ignored.
    Armed,
    /// Collecting cart identities in passage order; index 0 is the zero cart.
    Counting { carts: Vec<CartId> },
    /// A ring has been published; edges only keep level bookkeeping.
    Complete,
}

/// Consumes raw origin edges and discovers the ring exactly once.
///
/// Call `relearn()` to discard the published ring and restart discovery
/// (physical startup / maintenance re-learn).
#[derive(Debug)]
pub struct RingBuilder {
    min_ring_len: u32,
    count_high: bool,
    marker_high: bool,
    phase: BuildPhase,
    next_cart_id: u32,
    snapshot: Option<Arc<RingSnapshot>>,
}

impl RingBuilder {
    pub fn new(min_ring_len: u32) -> Self {
        Self {
            min_ring_len: min_ring_len.max(2),
            count_high: false,
            marker_high: false,
            phase: BuildPhase::Armed,
            next_cart_id: 0,
            snapshot: None,
        }
    }

    /// The published ring, if discovery has completed.
    pub fn snapshot(&self) -> Option<Arc<RingSnapshot>> {
        self.snapshot.clone()
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.phase, BuildPhase::Complete)
    }

    /// Discard any published ring and restart discovery from scratch.
    pub fn relearn(&mut self) {
        self.phase = BuildPhase::Armed;
        self.snapshot = None;
    }

    fn fresh_cart_id(&mut self) -> CartId {
        let id = CartId(self.next_cart_id);
        self.next_cart_id += 1;
        id
    }

    /// Feed one origin edge. Falling edges only debounce; counting happens on
    /// rising edges of the count sensor; a marker rising edge inside the
    /// count-sensor high window is the zero-cart coincidence.
    pub fn on_origin_edge(&mut self, edge: OriginEdge) -> RingEvent {
        if edge.first_sensor {
            if !edge.rising {
                self.count_high = false;
                return RingEvent::None;
            }
            if self.count_high {
                // Repeated rising edge without a falling edge in between:
                // sensor bounce, never a cart.
                tracing::trace!(at_ms = edge.at_ms, "count sensor bounce ignored");
                return RingEvent::None;
            }
            self.count_high = true;
            return self.on_cart_edge(edge.at_ms);
        }

        if !edge.rising {
            self.marker_high = false;
            return RingEvent::None;
        }
        if self.marker_high {
            tracing::trace!(at_ms = edge.at_ms, "marker sensor bounce ignored");
            return RingEvent::None;
        }
        self.marker_high = true;
        if !self.count_high {
            // Marker pulse outside the coincidence window carries no cart.
            tracing::trace!(at_ms = edge.at_ms, "marker edge outside coincidence window");
            return RingEvent::None;
        }
        self.on_coincidence(edge.at_ms)
    }

    fn on_cart_edge(&mut self, at_ms: u64) -> RingEvent {
        match &mut self.phase {
            BuildPhase::Armed => RingEvent::None,
            BuildPhase::Complete => RingEvent::CartPassed,
            BuildPhase::Counting { carts } => {
                let id = CartId(self.next_cart_id);
                self.next_cart_id += 1;
                carts.push(id);
                tracing::trace!(%id, at_ms, counted = carts.len(), "cart counted");
                RingEvent::CartCounted(id)
            }
        }
    }

    fn on_coincidence(&mut self, at_ms: u64) -> RingEvent {
        match std::mem::replace(&mut self.phase, BuildPhase::Armed) {
            BuildPhase::Complete => {
                self.phase = BuildPhase::Complete;
                RingEvent::None
            }
            BuildPhase::Armed => {
                let zero = self.fresh_cart_id();
                self.phase = BuildPhase::Counting { carts: vec![zero] };
                tracing::info!(at_ms, "zero cart coincidence; ring counting started");
                RingEvent::CountingStarted
            }
            BuildPhase::Counting { mut carts } => {
                // The count edge for this (marker) cart preceded the marker
                // edge and has already been appended: it is the zero cart
                // arriving again, not a new cart.
                let marker_again = carts.pop();
                let ring_len = carts.len() as u32;
                if ring_len < self.min_ring_len {
                    tracing::warn!(
                        counted = ring_len,
                        min_ring_len = self.min_ring_len,
                        at_ms,
                        "implausibly short ring discarded; restarting count"
                    );
                    // The cart under the sensors is the new index 0.
                    let zero = marker_again.unwrap_or_else(|| self.fresh_cart_id());
                    self.phase = BuildPhase::Counting { carts: vec![zero] };
                    return RingEvent::Discarded { counted: ring_len };
                }
                let snapshot = Arc::new(RingSnapshot::new(carts));
                tracing::info!(
                    ring_len,
                    zero_cart = %snapshot.zero_cart(),
                    at_ms,
                    "cart ring discovered"
                );
                self.phase = BuildPhase::Complete;
                self.snapshot = Some(snapshot.clone());
                RingEvent::Completed(snapshot)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rise_a(at_ms: u64) -> OriginEdge {
        OriginEdge {
            first_sensor: true,
            rising: true,
            at_ms,
        }
    }
    fn fall_a(at_ms: u64) -> OriginEdge {
        OriginEdge {
            first_sensor: true,
            rising: false,
            at_ms,
        }
    }
    fn rise_b(at_ms: u64) -> OriginEdge {
        OriginEdge {
            first_sensor: false,
            rising: true,
            at_ms,
        }
    }
    fn fall_b(at_ms: u64) -> OriginEdge {
        OriginEdge {
            first_sensor: false,
            rising: false,
            at_ms,
        }
    }

    /// Feed one full cart passage; marked carts pulse the marker sensor while
    /// the count sensor is high.
    fn pass_cart(b: &mut RingBuilder, t: &mut u64, marked: bool) -> Vec<RingEvent> {
        let mut out = Vec::new();
        out.push(b.on_origin_edge(rise_a(*t)));
        if marked {
            out.push(b.on_origin_edge(rise_b(*t + 2)));
            out.push(b.on_origin_edge(fall_b(*t + 6)));
        }
        out.push(b.on_origin_edge(fall_a(*t + 10)));
        *t += 100;
        out
    }

    fn build_ring(n: u32, min_len: u32) -> (RingBuilder, Option<Arc<RingSnapshot>>) {
        let mut b = RingBuilder::new(min_len);
        let mut t = 0u64;
        // marked cart passes, then n-1 plain carts, then the marked cart again
        pass_cart(&mut b, &mut t, true);
        for _ in 0..n - 1 {
            pass_cart(&mut b, &mut t, false);
        }
        let events = pass_cart(&mut b, &mut t, true);
        let snap = events.iter().find_map(|e| match e {
            RingEvent::Completed(s) => Some(s.clone()),
            _ => None,
        });
        (b, snap)
    }

    #[test]
    fn discovers_ring_of_n_carts_exactly_once() {
        let (b, snap) = build_ring(10, 2);
        let snap = snap.expect("ring should complete");
        assert_eq!(snap.len(), 10);
        assert_eq!(snap.index_of(snap.zero_cart()), Some(0));
        assert!(b.is_complete());
    }

    #[test]
    fn carts_are_ordered_by_passage() {
        let (_, snap) = build_ring(5, 2);
        let snap = snap.unwrap();
        let ids: Vec<u32> = snap.carts().iter().map(|c| c.0).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn edges_before_first_coincidence_are_ignored() {
        let mut b = RingBuilder::new(2);
        let mut t = 0u64;
        // Three unmarked carts drift past before the zero cart shows up.
        for _ in 0..3 {
            for e in pass_cart(&mut b, &mut t, false) {
                assert!(matches!(e, RingEvent::None));
            }
        }
        let events = pass_cart(&mut b, &mut t, true);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, RingEvent::CountingStarted))
        );
    }

    #[test]
    fn short_ring_is_discarded_and_restarted() {
        let mut b = RingBuilder::new(8);
        let mut t = 0u64;
        pass_cart(&mut b, &mut t, true);
        for _ in 0..2 {
            pass_cart(&mut b, &mut t, false);
        }
        // Bounce-induced early coincidence: only 3 carts counted.
        let events = pass_cart(&mut b, &mut t, true);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, RingEvent::Discarded { counted: 3 }))
        );
        assert!(b.snapshot().is_none());

        // A clean revolution from the restart still completes.
        for _ in 0..9 {
            pass_cart(&mut b, &mut t, false);
        }
        let events = pass_cart(&mut b, &mut t, true);
        let snap = events
            .iter()
            .find_map(|e| match e {
                RingEvent::Completed(s) => Some(s.clone()),
                _ => None,
            })
            .expect("ring completes after restart");
        assert_eq!(snap.len(), 10);
    }

    #[test]
    fn rising_bounce_does_not_count_twice() {
        let mut b = RingBuilder::new(2);
        let mut t = 0u64;
        pass_cart(&mut b, &mut t, true);
        // One cart with a double rising edge (no falling in between).
        assert!(matches!(
            b.on_origin_edge(rise_a(t)),
            RingEvent::CartCounted(_)
        ));
        assert!(matches!(b.on_origin_edge(rise_a(t + 1)), RingEvent::None));
        b.on_origin_edge(fall_a(t + 10));
        t += 100;
        pass_cart(&mut b, &mut t, false);
        let events = pass_cart(&mut b, &mut t, true);
        let snap = events
            .iter()
            .find_map(|e| match e {
                RingEvent::Completed(s) => Some(s.clone()),
                _ => None,
            })
            .expect("ring completes");
        assert_eq!(snap.len(), 3);
    }

    #[test]
    fn marker_outside_coincidence_window_is_noise() {
        let mut b = RingBuilder::new(2);
        // Marker fires while the count sensor is low: no start.
        assert!(matches!(b.on_origin_edge(rise_b(5)), RingEvent::None));
        b.on_origin_edge(fall_b(6));
        let mut t = 10u64;
        let events = pass_cart(&mut b, &mut t, true);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, RingEvent::CountingStarted))
        );
    }

    #[test]
    fn completed_builder_reports_pulses_until_relearn() {
        let (mut b, snap) = build_ring(4, 2);
        assert!(snap.is_some());
        let mut t = 10_000u64;
        // Further passages only surface debounced pulses, never re-learning.
        let events = pass_cart(&mut b, &mut t, true);
        assert!(
            events
                .iter()
                .all(|e| matches!(e, RingEvent::None | RingEvent::CartPassed))
        );
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, RingEvent::CartPassed))
                .count(),
            1
        );
        b.relearn();
        assert!(b.snapshot().is_none());
        let events = pass_cart(&mut b, &mut t, true);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, RingEvent::CountingStarted))
        );
    }
}
