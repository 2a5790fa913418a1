//! Closed-loop main-line speed control.
//!
//! `MainLineControl` is a pure step function over an injected clock so the
//! control behavior is testable without real timers; `MainLineService` runs
//! it on the loop period in a background thread and publishes the measured
//! state through lock-free atomics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use sorter_traits::Drive;
use sorter_traits::clock::{Clock, MonotonicClock};

use crate::error::{BuildError, Result};
use crate::hw_error::map_hw_error;
use crate::pid::{PidGains, PidState, pid_step};

/// Speed loop configuration.
#[derive(Debug, Clone)]
pub struct MainLineCfg {
    /// Commanded belt speed (mm/s).
    pub target_mmps: f64,
    /// Control loop period in milliseconds.
    pub loop_period_ms: u64,
    pub gains: PidGains,
    /// Reported stable while |measured − target| stays inside this band...
    pub stable_deadband_mmps: f64,
    /// ...for at least this long.
    pub stable_hold_ms: u64,
    /// Wider band for the sustained-excursion warning.
    pub unstable_deadband_mmps: f64,
    pub unstable_hold_ms: u64,
    /// Bound on a single feedback read (ms).
    pub feedback_timeout_ms: u64,
    /// Consecutive feedback failures before the loop is flagged degraded.
    pub feedback_fail_limit: u32,
}

impl Default for MainLineCfg {
    fn default() -> Self {
        Self {
            target_mmps: 2000.0,
            loop_period_ms: 100,
            // The integral term alone must be able to hold the setpoint:
            // ki * integral_limit comfortably above out_max.
            gains: PidGains {
                kp: 0.2,
                ki: 4.0,
                kd: 0.0,
                integral_limit: 900.0,
                out_min: 0.0,
                out_max: 3200.0,
            },
            stable_deadband_mmps: 25.0,
            stable_hold_ms: 1500,
            unstable_deadband_mmps: 150.0,
            unstable_hold_ms: 5000,
            feedback_timeout_ms: 50,
            feedback_fail_limit: 5,
        }
    }
}

/// State the planners and diagnostics read: current speed, stability flag,
/// feedback health. All lock-free.
#[derive(Debug)]
pub struct SpeedShared {
    mmps_bits: AtomicU64,
    stable: AtomicBool,
    feedback_unavailable: AtomicBool,
}

impl Default for SpeedShared {
    fn default() -> Self {
        Self {
            mmps_bits: AtomicU64::new(0.0_f64.to_bits()),
            stable: AtomicBool::new(false),
            feedback_unavailable: AtomicBool::new(false),
        }
    }
}

impl SpeedShared {
    pub fn current_mmps(&self) -> f64 {
        f64::from_bits(self.mmps_bits.load(Ordering::Relaxed))
    }

    pub fn is_speed_stable(&self) -> bool {
        self.stable.load(Ordering::Relaxed)
    }

    pub fn feedback_unavailable(&self) -> bool {
        self.feedback_unavailable.load(Ordering::Relaxed)
    }

    fn publish(&self, mmps: f64, stable: bool, degraded: bool) {
        self.mmps_bits.store(mmps.to_bits(), Ordering::Relaxed);
        self.stable.store(stable, Ordering::Relaxed);
        self.feedback_unavailable.store(degraded, Ordering::Relaxed);
    }
}

/// Result of one control tick, for observability and tests.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub measured_mmps: Option<f64>,
    pub output_mmps: f64,
    pub speed_stable: bool,
    pub feedback_unavailable: bool,
}

pub struct MainLineControl<D: Drive> {
    drive: D,
    cfg: MainLineCfg,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,

    pid: PidState,
    shared: Arc<SpeedShared>,
    last_output_mmps: f64,
    last_measured_mmps: Option<f64>,
    last_tick_ms: Option<u64>,

    stable_since_ms: Option<u64>,
    speed_stable: bool,
    unstable_since_ms: Option<u64>,

    feedback_failures: u32,
    feedback_unavailable: bool,
}

impl<D: Drive> core::fmt::Debug for MainLineControl<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MainLineControl")
            .field("target_mmps", &self.cfg.target_mmps)
            .field("last_output_mmps", &self.last_output_mmps)
            .field("speed_stable", &self.speed_stable)
            .field("feedback_unavailable", &self.feedback_unavailable)
            .finish()
    }
}

impl<D: Drive> MainLineControl<D> {
    pub fn new(drive: D, cfg: MainLineCfg) -> Result<Self> {
        Self::with_clock(drive, cfg, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(
        drive: D,
        cfg: MainLineCfg,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Result<Self> {
        if cfg.loop_period_ms == 0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "loop_period_ms must be >= 1",
            )));
        }
        if !(cfg.target_mmps.is_finite() && cfg.target_mmps > 0.0) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "target_mmps must be > 0",
            )));
        }
        if !(cfg.stable_deadband_mmps > 0.0) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "stable_deadband_mmps must be > 0",
            )));
        }
        if cfg.unstable_deadband_mmps < cfg.stable_deadband_mmps {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "unstable_deadband_mmps must be >= stable_deadband_mmps",
            )));
        }
        if cfg.gains.out_min >= cfg.gains.out_max {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "output clamps must satisfy out_min < out_max",
            )));
        }
        if cfg.feedback_fail_limit == 0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "feedback_fail_limit must be >= 1",
            )));
        }
        let epoch = clock.now();
        Ok(Self {
            drive,
            cfg,
            clock,
            epoch,
            pid: PidState::default(),
            shared: Arc::new(SpeedShared::default()),
            last_output_mmps: 0.0,
            last_measured_mmps: None,
            last_tick_ms: None,
            stable_since_ms: None,
            speed_stable: false,
            unstable_since_ms: None,
            feedback_failures: 0,
            feedback_unavailable: false,
        })
    }

    pub fn cfg(&self) -> &MainLineCfg {
        &self.cfg
    }

    pub fn shared(&self) -> Arc<SpeedShared> {
        self.shared.clone()
    }

    pub(crate) fn clock_handle(&self) -> Arc<dyn Clock + Send + Sync> {
        self.clock.clone()
    }

    pub fn is_speed_stable(&self) -> bool {
        self.speed_stable
    }

    pub fn feedback_unavailable(&self) -> bool {
        self.feedback_unavailable
    }

    pub fn current_speed_mmps(&self) -> Option<f64> {
        self.last_measured_mmps
    }

    /// One control tick. Never fails: hardware errors are counted and
    /// absorbed so one bad read cannot stop the loop.
    pub fn step(&mut self) -> Tick {
        let now = self.clock.ms_since(self.epoch);
        let timeout = Duration::from_millis(self.cfg.feedback_timeout_ms);

        let measured = match self.drive.current_speed(timeout) {
            Ok(v) if v.is_finite() => Some(v),
            Ok(v) => {
                tracing::warn!(value = v, "non-finite speed feedback discarded");
                None
            }
            Err(e) => {
                tracing::debug!(error = %map_hw_error(&*e), "speed feedback read failed");
                None
            }
        };

        let tick = match measured {
            Some(mmps) => self.on_feedback(now, mmps),
            None => self.on_feedback_failure(),
        };
        self.last_tick_ms = Some(now);
        // Planners keep reading the last measured speed; the degraded flag
        // carries the quality signal.
        self.shared.publish(
            self.last_measured_mmps.unwrap_or(0.0),
            tick.speed_stable,
            tick.feedback_unavailable,
        );
        tick
    }

    fn on_feedback(&mut self, now: u64, measured: f64) -> Tick {
        if self.feedback_unavailable {
            tracing::info!(measured_mmps = measured, "speed feedback recovered");
        }
        self.feedback_unavailable = false;
        self.feedback_failures = 0;

        let dt = match self.last_tick_ms {
            Some(prev) if now > prev => (now - prev) as f64 / 1000.0,
            _ => self.cfg.loop_period_ms as f64 / 1000.0,
        };
        let error = self.cfg.target_mmps - measured;
        let output = pid_step(&mut self.pid, &self.cfg.gains, error, dt);
        if let Err(e) = self.drive.set_target_speed(output) {
            tracing::warn!(error = %map_hw_error(&*e), "drive setpoint write failed");
        }
        self.last_output_mmps = output;
        self.last_measured_mmps = Some(measured);
        self.track_stability(now, error.abs());

        Tick {
            measured_mmps: Some(measured),
            output_mmps: output,
            speed_stable: self.speed_stable,
            feedback_unavailable: false,
        }
    }

    fn on_feedback_failure(&mut self) -> Tick {
        self.feedback_failures = self.feedback_failures.saturating_add(1);
        if self.feedback_failures >= self.cfg.feedback_fail_limit && !self.feedback_unavailable {
            self.feedback_unavailable = true;
            tracing::warn!(
                consecutive_failures = self.feedback_failures,
                "speed feedback unavailable; holding last setpoint"
            );
        }
        // Degraded mode: keep driving the last-known-good setpoint.
        if let Err(e) = self.drive.set_target_speed(self.last_output_mmps) {
            tracing::warn!(error = %map_hw_error(&*e), "drive write failed while degraded");
        }
        // Without a measurement, stability cannot be asserted.
        self.stable_since_ms = None;
        self.speed_stable = false;

        Tick {
            measured_mmps: None,
            output_mmps: self.last_output_mmps,
            speed_stable: false,
            feedback_unavailable: self.feedback_unavailable,
        }
    }

    fn track_stability(&mut self, now: u64, abs_err: f64) {
        if abs_err <= self.cfg.stable_deadband_mmps {
            let since = *self.stable_since_ms.get_or_insert(now);
            if now.saturating_sub(since) >= self.cfg.stable_hold_ms {
                if !self.speed_stable {
                    tracing::info!(held_ms = now - since, "main line speed stable");
                }
                self.speed_stable = true;
            }
        } else {
            self.stable_since_ms = None;
            if self.speed_stable {
                tracing::info!(err_mmps = abs_err, "main line speed left deadband");
            }
            self.speed_stable = false;
        }

        if abs_err > self.cfg.unstable_deadband_mmps {
            let since = *self.unstable_since_ms.get_or_insert(now);
            if now.saturating_sub(since) >= self.cfg.unstable_hold_ms {
                tracing::warn!(
                    err_mmps = abs_err,
                    held_ms = now - since,
                    "main line speed excursion sustained"
                );
                // Re-arm: the warning repeats at the hold cadence while the
                // excursion persists.
                self.unstable_since_ms = Some(now);
            }
        } else {
            self.unstable_since_ms = None;
        }
    }

    /// Safe state: zero setpoint. Called by the service on teardown.
    pub fn shutdown(&mut self) -> Result<()> {
        self.pid.reset();
        self.drive
            .set_target_speed(0.0)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
    }
}

/// Background loop over `MainLineControl::step` with safe-state teardown.
///
/// Safety: exactly one thread is spawned and it is shut down (setpoint
/// zeroed, thread joined) on `stop()` or `Drop`.
pub struct MainLineService {
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
    shared: Arc<SpeedShared>,
}

impl MainLineService {
    pub fn spawn<D: Drive + Send + 'static>(mut control: MainLineControl<D>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let shared = control.shared();
        let clock = control.clock_handle();
        let period = Duration::from_millis(control.cfg().loop_period_ms);

        let join_handle = std::thread::spawn(move || {
            tracing::info!(
                target_mmps = control.cfg().target_mmps,
                period_ms = period.as_millis() as u64,
                "main line control started"
            );
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("main line control received shutdown signal");
                    break;
                }
                let _ = control.step();
                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                clock.sleep(period);
            }
            if let Err(e) = control.shutdown() {
                tracing::warn!(error = %e, "failed to zero main line setpoint on shutdown");
            } else {
                tracing::info!("main line setpoint zeroed");
            }
        });

        Self {
            shutdown,
            join_handle: Some(join_handle),
            shared,
        }
    }

    pub fn shared(&self) -> Arc<SpeedShared> {
        self.shared.clone()
    }

    /// Stop the loop and wait for the safe-state teardown.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("main line control thread joined"),
                Err(e) => tracing::warn!(?e, "main line control thread panicked during shutdown"),
            }
        }
    }
}

impl Drop for MainLineService {
    fn drop(&mut self) {
        self.stop_inner();
    }
}
