use std::sync::Arc;

use sorter_core::eject_planner::{EjectCfg, EjectPlanner};
use sorter_core::parcel::{ParcelStore, RouteState, SortingOutcome};
use sorter_core::topology::TrackTopology;
use sorter_core::tracker::CartPositionTracker;
use sorter_core::types::{CartId, ChuteId, ParcelId, RingSnapshot};
use sorter_core::PlanError;

const SPEED: f64 = 1000.0; // mm/s over 250 mm pitches: 250 ms per pitch

fn topology(exception: Option<u16>) -> Arc<TrackTopology> {
    Arc::new(
        TrackTopology::new(
            250,
            1750,
            0,
            4,
            vec![(ChuteId(1), 4), (ChuteId(2), 7), (ChuteId(9), 12)],
            exception.map(ChuteId),
        )
        .expect("valid topology"),
    )
}

fn tracker_at(len: u32, origin_index: u32) -> CartPositionTracker {
    let tracker = CartPositionTracker::new();
    tracker.install_ring(Arc::new(RingSnapshot::new((0..len).map(CartId).collect())));
    let pulses = if origin_index == 0 { len } else { origin_index };
    for n in 0..pulses {
        tracker.on_cart_passed(u64::from(n) * 10);
    }
    tracker
}

fn planner(exception: Option<u16>) -> EjectPlanner {
    EjectPlanner::new(
        topology(exception),
        EjectCfg {
            horizon_ms: 10_000,
            timing_tolerance_ms: 40,
        },
    )
}

/// Parcel in `Loaded` with a cart and a target chute: plannable.
fn plannable_parcel(store: &ParcelStore, cart: CartId, chute: ChuteId) -> ParcelId {
    let p = store.create(None, 0);
    store.bind_cart(p.id, cart, 0).expect("bind");
    store.set_target_chute(p.id, chute).expect("chute");
    p.id
}

#[test]
fn window_brackets_the_arrival_with_the_configured_tolerance() {
    let planner = planner(None);
    let tracker = tracker_at(10, 0);
    let view = tracker.view().expect("ready");
    // Cart 0 at the origin, chute 1 four pitches downstream: 1000 mm at
    // 1000 mm/s = 1000 ms to arrival.
    let plan = planner
        .calculate_divert_plan(&view, SPEED, ParcelId(0), CartId(0), ChuteId(1), 5_000, false)
        .expect("plannable");
    assert_eq!(plan.window_start_ms, 5_960);
    assert_eq!(plan.window_end_ms, 6_040);
    assert_eq!(plan.window_ms(), 80);
    assert!(!plan.is_force_eject);
}

#[test]
fn downstream_progress_shortens_the_window_arrival() {
    let planner = planner(None);
    // Cart 0 is two pitches downstream (origin index 2).
    let tracker = tracker_at(10, 2);
    let view = tracker.view().expect("ready");
    let plan = planner
        .calculate_divert_plan(&view, SPEED, ParcelId(0), CartId(0), ChuteId(1), 0, false)
        .expect("plannable");
    // Two of four pitches already covered: 500 ms to arrival.
    assert_eq!(plan.window_end_ms - 40, 500);
}

#[test]
fn unknown_chute_and_foreign_cart_are_typed_errors() {
    let planner = planner(None);
    let tracker = tracker_at(10, 0);
    let view = tracker.view().expect("ready");
    assert_eq!(
        planner
            .calculate_divert_plan(&view, SPEED, ParcelId(0), CartId(0), ChuteId(77), 0, false)
            .expect_err("unknown chute"),
        PlanError::UnknownChute(ChuteId(77))
    );
    assert_eq!(
        planner
            .calculate_divert_plan(&view, SPEED, ParcelId(0), CartId(99), ChuteId(1), 0, false)
            .expect_err("cart not in ring"),
        PlanError::CartNotInRing(CartId(99))
    );
    assert_eq!(
        planner
            .calculate_divert_plan(&view, 0.0, ParcelId(0), CartId(0), ChuteId(1), 0, false)
            .expect_err("no speed"),
        PlanError::SpeedUnavailable
    );
}

#[test]
fn planning_is_idempotent_per_parcel() {
    let mut planner = planner(None);
    let tracker = tracker_at(10, 0);
    let store = ParcelStore::new();
    let id = plannable_parcel(&store, CartId(0), ChuteId(1));

    let first = planner.plan_ejects(&store, &tracker, SPEED, 0);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].parcel, id);
    assert_eq!(store.get(id).unwrap().state, RouteState::Sorting);

    // Re-planning inside the same horizon without execution: no new plan.
    let second = planner.plan_ejects(&store, &tracker, SPEED, 100);
    assert!(second.is_empty());
    assert_eq!(planner.active_len(), 1);

    // Once executed, the slot frees up (the parcel is terminal by then, so
    // nothing is re-emitted either).
    planner.mark_executed(id);
    store.complete(id, SortingOutcome::NormalSort, 1_000).unwrap();
    assert!(planner.plan_ejects(&store, &tracker, SPEED, 1_100).is_empty());
}

#[test]
fn arrivals_beyond_the_horizon_are_deferred() {
    let mut planner = EjectPlanner::new(
        topology(None),
        EjectCfg {
            horizon_ms: 500,
            timing_tolerance_ms: 40,
        },
    );
    let tracker = tracker_at(10, 0);
    let store = ParcelStore::new();
    // Chute 2 is seven pitches out: 1750 ms arrival, past the 500 ms horizon.
    let id = plannable_parcel(&store, CartId(0), ChuteId(2));

    assert!(planner.plan_ejects(&store, &tracker, SPEED, 0).is_empty());
    assert_eq!(planner.active_len(), 0);
    // Deferred, not dropped: the parcel stays Loaded for the next cycle.
    assert_eq!(store.get(id).unwrap().state, RouteState::Loaded);
}

#[test]
fn duplicate_cart_binding_still_plans_both_parcels() {
    let mut planner = planner(None);
    let tracker = tracker_at(10, 0);
    let store = ParcelStore::new();
    let a = plannable_parcel(&store, CartId(3), ChuteId(1));
    let b = plannable_parcel(&store, CartId(3), ChuteId(2));

    let plans = planner.plan_ejects(&store, &tracker, SPEED, 0);
    assert_eq!(plans.len(), 2, "conflict surfaced, nothing dropped");
    let parcels: Vec<ParcelId> = plans.iter().map(|p| p.parcel).collect();
    assert!(parcels.contains(&a) && parcels.contains(&b));
}

#[test]
fn missed_window_force_ejects_to_the_exception_chute() {
    let mut planner = planner(Some(9));
    let tracker = tracker_at(10, 0);
    let store = ParcelStore::new();
    let id = plannable_parcel(&store, CartId(0), ChuteId(1));

    let plans = planner.plan_ejects(&store, &tracker, SPEED, 0);
    assert_eq!(plans.len(), 1);
    let window_end = plans[0].window_end_ms;

    // The execution layer never fired; the window fully elapses.
    let replans = planner.plan_ejects(&store, &tracker, SPEED, window_end + 1);
    assert_eq!(replans.len(), 1);
    assert!(replans[0].is_force_eject);
    assert_eq!(replans[0].chute, ChuteId(9));
    assert_eq!(replans[0].parcel, id);
    // The parcel is still in flight, not failed.
    assert_eq!(store.get(id).unwrap().state, RouteState::Sorting);
}

#[test]
fn missed_window_without_exception_chute_is_unprocessed() {
    let mut planner = planner(None);
    let tracker = tracker_at(10, 0);
    let store = ParcelStore::new();
    let id = plannable_parcel(&store, CartId(0), ChuteId(1));

    let plans = planner.plan_ejects(&store, &tracker, SPEED, 0);
    let window_end = plans[0].window_end_ms;

    let replans = planner.plan_ejects(&store, &tracker, SPEED, window_end + 1);
    assert!(replans.is_empty());
    let snap = store.get(id).unwrap();
    assert_eq!(snap.state, RouteState::Failed);
    assert_eq!(snap.outcome, Some(SortingOutcome::Unprocessed));
}

#[test]
fn missed_force_eject_gives_up_as_unprocessed() {
    let mut planner = planner(Some(9));
    let tracker = tracker_at(10, 0);
    let store = ParcelStore::new();
    let id = plannable_parcel(&store, CartId(0), ChuteId(1));

    let first = planner.plan_ejects(&store, &tracker, SPEED, 0);
    let force = planner.plan_ejects(&store, &tracker, SPEED, first[0].window_end_ms + 1);
    assert!(force[0].is_force_eject);

    // The force window elapses too: one replan only, then unprocessed.
    let after = planner.plan_ejects(&store, &tracker, SPEED, force[0].window_end_ms + 1);
    assert!(after.is_empty());
    assert_eq!(
        store.get(id).unwrap().outcome,
        Some(SortingOutcome::Unprocessed)
    );
}

#[test]
fn no_ring_defers_all_planning() {
    let mut planner = planner(None);
    let tracker = CartPositionTracker::new();
    let store = ParcelStore::new();
    plannable_parcel(&store, CartId(0), ChuteId(1));
    assert!(planner.plan_ejects(&store, &tracker, SPEED, 0).is_empty());
}
