//! Session orchestration: sensors in, chute actuations out.
//!
//! `run_line` wires the pumps, ring discovery, position tracking, speed
//! control, planners, and the execution edge together for one bounded
//! sorting session. Per-tick failures are logged and absorbed; only
//! cancellation or the session deadline end the loop, and teardown always
//! leaves the hardware safe (zero setpoint, chutes closed).

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sorter_traits::clock::MonotonicClock;
use sorter_traits::{ChuteBank, Drive, InfeedSensor, OriginSensor};

use crate::eject_planner::{DivertPlan, EjectCfg, EjectPlanner};
use crate::error::Result;
use crate::events::{InfeedPump, OriginPump};
use crate::hw_error::map_hw_error;
use crate::load_planner::LoadPlanner;
use crate::mainline::{MainLineControl, MainLineService};
use crate::parcel::{ParcelSnapshot, ParcelStore, SortingOutcome};
use crate::ring::{RingBuilder, RingEvent};
use crate::topology::TrackTopology;
use crate::tracker::CartPositionTracker;
use crate::types::{ChuteId, ParcelId};

/// Session pacing and housekeeping knobs.
#[derive(Debug, Clone, Copy)]
pub struct SessionCfg {
    /// Stop after this long; `None` runs until cancelled.
    pub duration_ms: Option<u64>,
    /// Planning/execution loop period.
    pub plan_period_ms: u64,
    pub origin_timeout_ms: u64,
    pub infeed_timeout_ms: u64,
    pub completed_ttl_ms: u64,
}

impl Default for SessionCfg {
    fn default() -> Self {
        Self {
            duration_ms: None,
            plan_period_ms: 50,
            origin_timeout_ms: 20,
            infeed_timeout_ms: 50,
            completed_ttl_ms: 60_000,
        }
    }
}

/// What happened during one session.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionReport {
    pub ring_len: Option<u32>,
    pub parcels_created: u64,
    pub sorted: u64,
    pub force_ejected: u64,
    pub failed: u64,
    pub pending: u64,
    pub final_speed_mmps: f64,
    pub speed_stable: bool,
}

/// Run one sorting session until cancellation or the configured deadline.
///
/// `route` stands in for the upstream rule engine: given a parcel snapshot it
/// may resolve a target chute; `None` keeps the parcel waiting.
#[allow(clippy::too_many_arguments)]
pub fn run_line<O, I, C, D, R>(
    origin: O,
    infeed: I,
    mut chutes: C,
    control: MainLineControl<D>,
    topology: Arc<TrackTopology>,
    eject_cfg: EjectCfg,
    session: SessionCfg,
    route: R,
    shutdown: Arc<AtomicBool>,
) -> Result<SessionReport>
where
    O: OriginSensor + Send + 'static,
    I: InfeedSensor + Send + 'static,
    C: ChuteBank,
    D: Drive + Send + 'static,
    R: Fn(&ParcelSnapshot) -> Option<ChuteId>,
{
    let clock = control.clock_handle();
    let epoch = clock.now();
    let shared = control.shared();
    let period = Duration::from_millis(session.plan_period_ms.max(1));

    let mut builder = RingBuilder::new(topology.min_ring_len());
    let tracker = CartPositionTracker::new();
    let load_planner = LoadPlanner::new(topology.clone());
    let mut planner = EjectPlanner::new(topology, eject_cfg);
    let store = ParcelStore::new();

    let service = MainLineService::spawn(control);
    let origin_pump = OriginPump::spawn(
        origin,
        Duration::from_millis(session.origin_timeout_ms),
        MonotonicClock::new(),
    );
    let infeed_pump = InfeedPump::spawn(infeed, Duration::from_millis(session.infeed_timeout_ms));

    let mut report = SessionReport::default();
    let mut counted: HashSet<ParcelId> = HashSet::new();
    let mut next_seq: Option<u64> = None;
    // Belt stalls show up as origin silence; warn once per quiet spell.
    let origin_stall_ms = session.plan_period_ms.saturating_mul(20).max(1_000);
    let mut origin_quiet_warned = false;

    tracing::info!(
        duration_ms = ?session.duration_ms,
        period_ms = session.plan_period_ms,
        "sorting session started"
    );

    loop {
        let now = clock.ms_since(epoch);
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("sorting session cancelled");
            break;
        }
        if let Some(limit) = session.duration_ms
            && now >= limit
        {
            tracing::info!("sorting session deadline reached");
            break;
        }

        // 1) Origin edges, in strict sequence order.
        let edges = origin_pump.drain();
        if !edges.is_empty() {
            origin_quiet_warned = false;
        } else if builder.is_complete()
            && !origin_quiet_warned
            && origin_pump.stalled_for_now() > origin_stall_ms
        {
            tracing::warn!(
                stalled_ms = origin_pump.stalled_for_now(),
                "no origin pulses; position estimate is aging"
            );
            origin_quiet_warned = true;
        }
        for seq_edge in edges {
            if let Some(expected) = next_seq
                && seq_edge.seq != expected
            {
                tracing::warn!(
                    expected,
                    got = seq_edge.seq,
                    "origin pulse sequence gap"
                );
            }
            next_seq = Some(seq_edge.seq + 1);
            match builder.on_origin_edge(seq_edge.edge) {
                RingEvent::Completed(snapshot) => {
                    report.ring_len = Some(snapshot.len());
                    tracker.install_ring(snapshot);
                }
                RingEvent::CartPassed => {
                    tracker.on_cart_passed(seq_edge.edge.at_ms);
                }
                RingEvent::None
                | RingEvent::CountingStarted
                | RingEvent::CartCounted(_)
                | RingEvent::Discarded { .. } => {}
            }
        }

        // 2) New packages at the infeed.
        for event in infeed_pump.drain() {
            let snap = store.create(event.barcode.clone(), event.at_ms);
            report.parcels_created += 1;
            match load_planner.predict_loaded_cart(&tracker, shared.current_mmps(), event.at_ms) {
                Some(pred) => {
                    if let Err(e) = store.set_predicted_cart(snap.id, pred.cart) {
                        tracing::warn!(parcel = %snap.id, error = %e, "predicted cart rejected");
                    }
                    let loaded_at = pred.estimated_load_at_ms.unwrap_or(event.at_ms);
                    if let Err(e) = store.bind_cart(snap.id, pred.cart, loaded_at) {
                        tracing::warn!(parcel = %snap.id, error = %e, "cart binding rejected");
                    }
                }
                None => {
                    tracing::debug!(parcel = %snap.id, "no ring yet; parcel waiting for routing");
                }
            }
        }

        // 3) Resolve target chutes for parcels still missing one.
        for p in store.get_all() {
            if p.state.is_terminal() || p.target_chute.is_some() {
                continue;
            }
            if let Some(chute) = route(&p)
                && let Err(e) = store.set_target_chute(p.id, chute)
            {
                tracing::warn!(parcel = %p.id, error = %e, "target chute rejected");
            }
        }

        // 4) Fire plans whose window is open.
        let due: Vec<DivertPlan> = planner
            .active_plans()
            .filter(|plan| plan.contains(now))
            .cloned()
            .collect();
        for plan in due {
            let open_for = Duration::from_millis(plan.window_end_ms.saturating_sub(now).max(1));
            match chutes.open_window(plan.chute.0, open_for) {
                Ok(()) => {
                    planner.mark_executed(plan.parcel);
                    if let Err(e) = store.mark_diverted(plan.parcel, now) {
                        tracing::warn!(parcel = %plan.parcel, error = %e, "divert mark rejected");
                    }
                    let outcome = if plan.is_force_eject {
                        SortingOutcome::ForceEject
                    } else {
                        SortingOutcome::NormalSort
                    };
                    if let Err(e) = store.complete(plan.parcel, outcome, now) {
                        tracing::warn!(parcel = %plan.parcel, error = %e, "completion rejected");
                    }
                }
                Err(e) => {
                    // Absorbed: the plan stays active; a fully missed window
                    // is handled by the planner's force-eject path.
                    tracing::warn!(
                        parcel = %plan.parcel,
                        chute = %plan.chute,
                        error = %map_hw_error(&*e),
                        "chute actuation failed"
                    );
                }
            }
        }

        // 5) Plan new ejects and expire stale ones.
        planner.plan_ejects(&store, &tracker, shared.current_mmps(), now);

        // 6) Housekeeping.
        tally(&store, &mut counted, &mut report);
        store.evict_completed(now, session.completed_ttl_ms);

        clock.sleep(period);
    }

    // Safe state before reporting: stop the speed loop (zero setpoint), then
    // make sure no chute is left open.
    drop(origin_pump);
    drop(infeed_pump);
    service.stop();
    if let Err(e) = chutes.close_all() {
        tracing::warn!(error = %map_hw_error(&*e), "failed to close chutes on shutdown");
    }

    tally(&store, &mut counted, &mut report);
    report.pending = store
        .get_all()
        .iter()
        .filter(|p| !p.state.is_terminal())
        .count() as u64;
    report.final_speed_mmps = shared.current_mmps();
    report.speed_stable = shared.is_speed_stable();

    tracing::info!(
        created = report.parcels_created,
        sorted = report.sorted,
        force_ejected = report.force_ejected,
        failed = report.failed,
        pending = report.pending,
        ring_len = ?report.ring_len,
        "sorting session finished"
    );
    Ok(report)
}

/// Count each terminal parcel exactly once, surviving later eviction.
fn tally(store: &ParcelStore, counted: &mut HashSet<ParcelId>, report: &mut SessionReport) {
    for p in store.get_all() {
        if !p.state.is_terminal() || !counted.insert(p.id) {
            continue;
        }
        match p.outcome {
            Some(SortingOutcome::NormalSort) => report.sorted += 1,
            Some(SortingOutcome::ForceEject) => report.force_ejected += 1,
            Some(SortingOutcome::Missort) | Some(SortingOutcome::Unprocessed) => {
                report.failed += 1
            }
            None => {
                // Terminal without an outcome would be a store bug.
                tracing::warn!(parcel = %p.id, "terminal parcel without outcome");
                report.failed += 1;
            }
        }
    }
}
