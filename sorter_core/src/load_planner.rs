//! Prediction of which cart a newly fed package lands on.
//!
//! Cart passage at the drop point is periodic, so the landing cart is a fixed
//! pitch offset from whichever cart sits at the origin when the infeed
//! triggers — no forward simulation needed; only the index arithmetic shifts.

use std::sync::Arc;

use crate::topology::TrackTopology;
use crate::tracker::CartPositionTracker;
use crate::types::CartId;
use crate::util::travel_time_ms;

/// Outcome of one load prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadPrediction {
    pub cart: CartId,
    pub cart_index: u32,
    /// When the package reaches the drop point; `None` when the belt speed is
    /// unknown (the landing cart itself does not depend on speed).
    pub estimated_load_at_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LoadPlanner {
    topology: Arc<TrackTopology>,
}

impl LoadPlanner {
    pub fn new(topology: Arc<TrackTopology>) -> Self {
        Self { topology }
    }

    /// Predict the cart the package triggered at `infeed_at_ms` will land on.
    ///
    /// Returns `None` — deliberately not an error — while no ring is ready;
    /// the caller keeps the parcel in `WaitingForRouting`.
    pub fn predict_loaded_cart(
        &self,
        tracker: &CartPositionTracker,
        speed_mmps: f64,
        infeed_at_ms: u64,
    ) -> Option<LoadPrediction> {
        let view = tracker.view()?;
        let len = i64::from(view.ring.len());
        let offset = self.topology.infeed_offset_pitches();
        let index = (i64::from(view.origin_index) + offset).rem_euclid(len) as u32;
        let cart = view.ring.cart_at(index)?;

        let estimated_load_at_ms =
            travel_time_ms(u64::from(self.topology.infeed_to_mainline_mm()), speed_mmps)
                .map(|t| infeed_at_ms + t);

        tracing::debug!(
            %cart,
            cart_index = index,
            origin_index = view.origin_index,
            offset_pitches = offset,
            infeed_at_ms,
            "load prediction"
        );
        Some(LoadPrediction {
            cart,
            cart_index: index,
            estimated_load_at_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChuteId, RingSnapshot};

    fn topology(calibration: i32) -> Arc<TrackTopology> {
        // 1750 mm over 250 mm pitches = 7 pitches to the drop point.
        Arc::new(
            TrackTopology::new(250, 1750, calibration, 4, vec![(ChuteId(1), 4)], None).unwrap(),
        )
    }

    fn tracker_with_ring(len: u32, pulses: u32) -> CartPositionTracker {
        let t = CartPositionTracker::new();
        t.install_ring(Arc::new(RingSnapshot::new((0..len).map(CartId).collect())));
        for n in 0..pulses {
            t.on_cart_passed(u64::from(n) * 100);
        }
        t
    }

    #[test]
    fn no_ring_means_no_prediction() {
        let planner = LoadPlanner::new(topology(0));
        let tracker = CartPositionTracker::new();
        assert!(
            planner
                .predict_loaded_cart(&tracker, 2000.0, 0)
                .is_none()
        );
    }

    #[test]
    fn geometric_offset_applies_from_current_origin_cart() {
        let planner = LoadPlanner::new(topology(0));
        // 10 pulses on a ring of 10: cart 0 back at the origin.
        let tracker = tracker_with_ring(10, 10);
        let p = planner
            .predict_loaded_cart(&tracker, 2000.0, 5_000)
            .expect("ring ready");
        assert_eq!(p.cart_index, 7);
        assert_eq!(p.cart, CartId(7));
        // 1750 mm at 2000 mm/s = 875 ms of travel.
        assert_eq!(p.estimated_load_at_ms, Some(5_875));
    }

    #[test]
    fn calibration_shifts_the_landing_index() {
        let planner = LoadPlanner::new(topology(3));
        let tracker = tracker_with_ring(12, 12);
        let p = planner
            .predict_loaded_cart(&tracker, 2000.0, 0)
            .expect("ring ready");
        assert_eq!(p.cart_index, 10); // 7 + 3
        let planner = LoadPlanner::new(topology(-7));
        let p = planner
            .predict_loaded_cart(&tracker, 2000.0, 0)
            .expect("ring ready");
        assert_eq!(p.cart_index, 0);
    }

    #[test]
    fn landing_index_wraps_modulo_ring() {
        let planner = LoadPlanner::new(topology(0));
        // Origin at index 5 on a ring of 10: 5 + 7 = 12 -> index 2.
        let tracker = tracker_with_ring(10, 5);
        let p = planner
            .predict_loaded_cart(&tracker, 2000.0, 0)
            .expect("ring ready");
        assert_eq!(p.cart_index, 2);
    }

    #[test]
    fn unknown_speed_degrades_only_the_timestamp() {
        let planner = LoadPlanner::new(topology(0));
        let tracker = tracker_with_ring(10, 10);
        let p = planner
            .predict_loaded_cart(&tracker, 0.0, 0)
            .expect("prediction is pure geometry");
        assert_eq!(p.cart, CartId(7));
        assert_eq!(p.estimated_load_at_ms, None);
    }
}
