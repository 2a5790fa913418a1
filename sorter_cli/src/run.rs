//! Session assembly: config mapping, simulated hardware, routing stand-in.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use eyre::WrapErr;
use sorter_config::Config;
use sorter_core::error::Result as CoreResult;
use sorter_core::mainline::MainLineControl;
use sorter_core::runner::{SessionCfg, SessionReport, run_line};
use sorter_core::topology::TrackTopology;
use sorter_core::types::ChuteId;
use sorter_hardware::{SimLineCfg, SimulatedLine};
use sorter_traits::clock::{Clock, MonotonicClock};

use crate::cli::RtLock;
use crate::rt::setup_rt_once;

pub struct RunOpts {
    pub duration_s: u64,
    pub parcels: u32,
    pub ring_len: u32,
    pub rt: bool,
    pub rt_prio: Option<i32>,
    pub rt_lock: Option<RtLock>,
}

/// Demo chute layout used when the config lists none, so `sorter run` works
/// out of the box.
fn demo_chutes() -> Vec<(u16, u32)> {
    vec![(1, 4), (2, 7), (3, 10)]
}

pub fn run_session(cfg: &Config, opts: &RunOpts) -> CoreResult<(SessionReport, SimulatedLine)> {
    setup_rt_once(opts.rt, opts.rt_prio, opts.rt_lock.unwrap_or(RtLock::os_default()));

    let mut topo_cfg = cfg.topology.clone();
    if topo_cfg.chutes.is_empty() {
        tracing::info!("no chutes configured; using the demo layout");
        topo_cfg.chutes = demo_chutes();
    }
    let topology: TrackTopology = (&topo_cfg)
        .try_into()
        .map_err(eyre::Report::new)
        .wrap_err("invalid topology")?;
    let topology = Arc::new(topology);

    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let line = SimulatedLine::new(
        SimLineCfg {
            ring_len: opts.ring_len.max(topo_cfg.min_ring_len),
            cart_spacing_mm: topo_cfg.cart_spacing_mm,
            accel_mmps2: 2500.0,
            initial_speed_mmps: 0.0,
        },
        clock.clone(),
    );

    // Feed packages once spin-up and ring discovery are comfortably done:
    // one marked-to-marked revolution at target speed plus a start margin.
    let ring_len = u64::from(opts.ring_len.max(topo_cfg.min_ring_len));
    let revolution_ms = ((ring_len + 1) * u64::from(topo_cfg.cart_spacing_mm) * 1000)
        / (cfg.line.target_mmps as u64).max(1);
    let lead_in_ms = revolution_ms + 2_000;
    for i in 0..opts.parcels {
        line.feed_parcel_at(lead_in_ms + u64::from(i) * 500, Some(&format!("PKG-{i}")));
    }

    let control = MainLineControl::with_clock(line.drive(), (&cfg.line).into(), clock)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
        })
        .wrap_err("install ctrl-c handler")?;
    }

    // Routing stand-in for the upstream rule engine: round-robin over the
    // configured chutes, skipping the exception outlet.
    let targets: Vec<ChuteId> = topology
        .chutes()
        .map(|(chute, _)| chute)
        .filter(|chute| Some(*chute) != topology.exception_chute())
        .collect();
    let next_target = AtomicUsize::new(0);
    let route = move |_parcel: &sorter_core::parcel::ParcelSnapshot| -> Option<ChuteId> {
        if targets.is_empty() {
            return None;
        }
        let n = next_target.fetch_add(1, Ordering::Relaxed);
        Some(targets[n % targets.len()])
    };

    let report = run_line(
        line.origin_sensor(),
        line.infeed_sensor(),
        line.chutes(),
        control,
        topology,
        (&cfg.planner).into(),
        SessionCfg {
            duration_ms: Some(opts.duration_s.saturating_mul(1000)),
            plan_period_ms: cfg.planner.plan_period_ms,
            origin_timeout_ms: cfg.sensors.origin_timeout_ms,
            infeed_timeout_ms: cfg.sensors.infeed_timeout_ms,
            completed_ttl_ms: cfg.parcels.completed_ttl_ms,
        },
        route,
        shutdown,
    )?;
    Ok((report, line))
}

/// Quick health check: every simulated port answers.
pub fn self_check() -> CoreResult<()> {
    use sorter_traits::{ChuteBank, Drive};

    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let line = SimulatedLine::new(SimLineCfg::default(), clock);
    let mut drive = line.drive();
    drive
        .set_target_speed(100.0)
        .map_err(|e| eyre::eyre!("drive setpoint: {e}"))?;
    let _ = drive
        .current_speed(std::time::Duration::from_millis(10))
        .map_err(|e| eyre::eyre!("drive feedback: {e}"))?;
    let mut chutes = line.chutes();
    chutes
        .open_window(1, std::time::Duration::from_millis(10))
        .map_err(|e| eyre::eyre!("chute bank: {e}"))?;
    chutes
        .close_all()
        .map_err(|e| eyre::eyre!("chute bank close: {e}"))?;
    Ok(())
}
