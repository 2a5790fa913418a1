//! Eject window computation and idempotent plan bookkeeping.
//!
//! For a bound cart and target chute, the planner converts the remaining cart
//! pitches into a physical distance, divides by the measured belt speed, and
//! brackets the arrival with the configured timing tolerance. The execution
//! layer consumes plans once; the planner keeps the active set so re-planning
//! the same parcel is a no-op.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PlanError;
use crate::parcel::{ParcelStore, RouteState, SortingOutcome};
use crate::topology::TrackTopology;
use crate::tracker::{CartPositionTracker, TrackerView};
use crate::types::{CartId, ChuteId, ParcelId};
use crate::util::travel_time_ms;

/// Planner configuration.
#[derive(Debug, Clone, Copy)]
pub struct EjectCfg {
    /// Plans are only emitted for arrivals inside [now, now + horizon].
    pub horizon_ms: u64,
    /// Half-width of the eject window; absorbs speed-measurement jitter.
    pub timing_tolerance_ms: u64,
}

impl Default for EjectCfg {
    fn default() -> Self {
        Self {
            horizon_ms: 10_000,
            timing_tolerance_ms: 40,
        }
    }
}

/// One scheduled divert: fire the chute while the window is open.
/// Ephemeral — consumed once by the execution layer, then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivertPlan {
    pub parcel: ParcelId,
    pub cart: CartId,
    pub chute: ChuteId,
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    pub is_force_eject: bool,
}

impl DivertPlan {
    pub fn window_ms(&self) -> u64 {
        self.window_end_ms.saturating_sub(self.window_start_ms)
    }

    pub fn contains(&self, now_ms: u64) -> bool {
        (self.window_start_ms..=self.window_end_ms).contains(&now_ms)
    }
}

/// Cart pitches the cart still has to travel to reach the chute.
///
/// `downstream = (origin_index - cart_index) mod len` is how far the cart has
/// already moved past the origin; the remainder to the chute wraps around the
/// ring when the cart has passed it.
fn pitches_to_chute(ring_len: u32, origin_index: u32, cart_index: u32, chute_offset: u32) -> u64 {
    let len = i64::from(ring_len);
    let downstream = (i64::from(origin_index) - i64::from(cart_index)).rem_euclid(len);
    (i64::from(chute_offset) - downstream).rem_euclid(len) as u64
}

#[derive(Debug)]
pub struct EjectPlanner {
    topology: Arc<TrackTopology>,
    cfg: EjectCfg,
    active: HashMap<ParcelId, DivertPlan>,
}

impl EjectPlanner {
    pub fn new(topology: Arc<TrackTopology>, cfg: EjectCfg) -> Self {
        Self {
            topology,
            cfg,
            active: HashMap::new(),
        }
    }

    /// Compute the eject window for one cart/chute pair.
    pub fn calculate_divert_plan(
        &self,
        view: &TrackerView,
        speed_mmps: f64,
        parcel: ParcelId,
        cart: CartId,
        chute: ChuteId,
        now_ms: u64,
        is_force_eject: bool,
    ) -> Result<DivertPlan, PlanError> {
        let chute_offset = self
            .topology
            .chute_offset(chute)
            .ok_or(PlanError::UnknownChute(chute))?;
        let cart_index = view
            .ring
            .index_of(cart)
            .ok_or(PlanError::CartNotInRing(cart))?;
        let pitches = pitches_to_chute(view.ring.len(), view.origin_index, cart_index, chute_offset);
        let distance_mm = self.topology.pitches_to_mm(pitches);
        let travel_ms =
            travel_time_ms(distance_mm, speed_mmps).ok_or(PlanError::SpeedUnavailable)?;
        let arrival = now_ms + travel_ms;
        let tol = self.cfg.timing_tolerance_ms;
        Ok(DivertPlan {
            parcel,
            cart,
            chute,
            window_start_ms: arrival.saturating_sub(tol),
            window_end_ms: arrival + tol,
            is_force_eject,
        })
    }

    /// One planning cycle: expire stale plans, then emit at most one new plan
    /// per plannable parcel with an arrival inside the horizon.
    ///
    /// Never fails; per-parcel problems are logged and skipped so one bad
    /// parcel cannot starve the rest of the cycle.
    pub fn plan_ejects(
        &mut self,
        store: &ParcelStore,
        tracker: &CartPositionTracker,
        speed_mmps: f64,
        now_ms: u64,
    ) -> Vec<DivertPlan> {
        let view = tracker.view();
        let mut emitted = Vec::new();

        self.expire_stale(store, view.as_ref(), speed_mmps, now_ms, &mut emitted);

        let Some(view) = view else {
            tracing::trace!("eject planning idle: ring not ready");
            return emitted;
        };

        let parcels = store.get_all();

        // Two parcels on one cart is an upstream invariant violation; both
        // still get independent plans, but it must be surfaced.
        let mut by_cart: HashMap<CartId, Vec<ParcelId>> = HashMap::new();
        for p in parcels.iter().filter(|p| !p.state.is_terminal()) {
            if let Some(cart) = p.bound_cart {
                by_cart.entry(cart).or_default().push(p.id);
            }
        }
        for (cart, ids) in by_cart.iter().filter(|(_, ids)| ids.len() > 1) {
            tracing::error!(%cart, parcels = ?ids, "multiple parcels bound to one cart");
        }

        for p in &parcels {
            if !matches!(p.state, RouteState::Loaded | RouteState::Sorting) {
                continue;
            }
            if self.active.contains_key(&p.id) {
                // Idempotent re-planning: an unexecuted plan stays active.
                continue;
            }
            let (Some(cart), Some(chute)) = (p.bound_cart, p.target_chute) else {
                continue;
            };
            let plan =
                match self.calculate_divert_plan(&view, speed_mmps, p.id, cart, chute, now_ms, false)
                {
                    Ok(plan) => plan,
                    Err(PlanError::SpeedUnavailable) => {
                        tracing::trace!(parcel = %p.id, "eject planning deferred: no belt speed");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(parcel = %p.id, error = %e, "divert plan failed");
                        continue;
                    }
                };
            let arrival = plan.window_end_ms - self.cfg.timing_tolerance_ms;
            if arrival > now_ms + self.cfg.horizon_ms {
                tracing::debug!(
                    parcel = %p.id,
                    arrival_ms = arrival,
                    horizon_ms = self.cfg.horizon_ms,
                    "arrival beyond horizon; plan deferred"
                );
                continue;
            }
            if p.state == RouteState::Loaded
                && let Err(e) = store.begin_sorting(p.id, now_ms)
            {
                tracing::warn!(parcel = %p.id, error = %e, "begin sorting rejected");
                continue;
            }
            tracing::debug!(
                parcel = %plan.parcel,
                cart = %plan.cart,
                chute = %plan.chute,
                window_start_ms = plan.window_start_ms,
                window_end_ms = plan.window_end_ms,
                "divert planned"
            );
            self.active.insert(p.id, plan.clone());
            emitted.push(plan);
        }
        emitted
    }

    /// Handle active plans whose window fully elapsed without execution:
    /// replan once to the exception chute as a force eject, otherwise give
    /// the parcel up as unprocessed.
    fn expire_stale(
        &mut self,
        store: &ParcelStore,
        view: Option<&TrackerView>,
        speed_mmps: f64,
        now_ms: u64,
        emitted: &mut Vec<DivertPlan>,
    ) {
        let expired: Vec<ParcelId> = self
            .active
            .iter()
            .filter(|(_, plan)| plan.window_end_ms < now_ms)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            let Some(stale) = self.active.remove(&id) else {
                continue;
            };
            let exception = self.topology.exception_chute();
            let replan = match (stale.is_force_eject, exception, view) {
                // A missed force eject is the end of the line.
                (true, _, _) | (false, None, _) | (false, _, None) => None,
                (false, Some(exc), Some(view)) => self
                    .calculate_divert_plan(view, speed_mmps, id, stale.cart, exc, now_ms, true)
                    .ok(),
            };
            match replan {
                Some(plan) => {
                    tracing::warn!(
                        parcel = %id,
                        missed_chute = %stale.chute,
                        exception_chute = %plan.chute,
                        "eject window missed; force ejecting"
                    );
                    self.active.insert(id, plan.clone());
                    emitted.push(plan);
                }
                None => {
                    tracing::warn!(parcel = %id, "eject window missed; parcel unprocessed");
                    if let Err(e) = store.complete(id, SortingOutcome::Unprocessed, now_ms) {
                        tracing::warn!(parcel = %id, error = %e, "unprocessed completion rejected");
                    }
                }
            }
        }
    }

    pub fn active_plan(&self, parcel: ParcelId) -> Option<&DivertPlan> {
        self.active.get(&parcel)
    }

    pub fn active_plans(&self) -> impl Iterator<Item = &DivertPlan> {
        self.active.values()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// The execution layer fired this plan; drop it from the active set.
    pub fn mark_executed(&mut self, parcel: ParcelId) -> Option<DivertPlan> {
        self.active.remove(&parcel)
    }

    /// Abandon a plan without executing it (parcel failed upstream).
    pub fn release(&mut self, parcel: ParcelId) {
        self.active.remove(&parcel);
    }
}

#[cfg(test)]
mod pitch_tests {
    use super::pitches_to_chute;

    #[test]
    fn cart_at_origin_travels_full_chute_offset() {
        assert_eq!(pitches_to_chute(10, 3, 3, 4), 4);
    }

    #[test]
    fn downstream_cart_has_less_to_go() {
        // Cart index 2 with origin at 3: one pitch downstream, three to go.
        assert_eq!(pitches_to_chute(10, 3, 2, 4), 3);
        // Exactly at the chute.
        assert_eq!(pitches_to_chute(10, 6, 2, 4), 0);
    }

    #[test]
    fn cart_past_the_chute_wraps_around_the_ring() {
        // Cart index 2 with origin at 7: five pitches downstream, chute at 4
        // already passed -> 10 - 1 = 9 pitches around.
        assert_eq!(pitches_to_chute(10, 7, 2, 4), 9);
    }

    #[test]
    fn indices_wrap_modulo_ring() {
        // Origin index 1, cart index 9 on a ring of 10: downstream 2.
        assert_eq!(pitches_to_chute(10, 1, 9, 4), 2);
    }
}
