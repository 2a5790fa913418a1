#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Hardware ports for the sorter line.
//!
//! The simulated line is always available and models the physical system the
//! core estimates: a ring of carts on a belt, one marked cart, a drive with
//! finite acceleration, origin sensor pulses, scripted infeed events and a
//! chute bank. Real GPIO-backed sensors live behind the `hardware` feature.

pub mod error;
pub mod util;

#[cfg(feature = "hardware")]
pub mod gpio;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use sorter_traits::clock::Clock;
use sorter_traits::{ChuteBank, Drive, InfeedEvent, InfeedSensor, OriginEdge, OriginSensor};

/// Shape of the simulated line.
#[derive(Debug, Clone, Copy)]
pub struct SimLineCfg {
    pub ring_len: u32,
    pub cart_spacing_mm: u32,
    /// Drive slew rate toward the setpoint.
    pub accel_mmps2: f64,
    pub initial_speed_mmps: f64,
}

impl Default for SimLineCfg {
    fn default() -> Self {
        Self {
            ring_len: 16,
            cart_spacing_mm: 250,
            accel_mmps2: 1500.0,
            initial_speed_mmps: 0.0,
        }
    }
}

#[derive(Debug)]
struct SimState {
    cfg: SimLineCfg,
    target_mmps: f64,
    speed_mmps: f64,
    pos_mm: f64,
    next_pulse_mm: f64,
    carts_passed: u64,
    last_at_ms: u64,
    edges: VecDeque<OriginEdge>,
    infeed: VecDeque<InfeedEvent>,
    opened_windows: Vec<(u16, u64, u64)>,
    chutes_closed: bool,
}

impl SimState {
    /// Integrate belt motion up to `now_ms`, generating origin edges for
    /// every cart passage crossed on the way.
    fn advance_to(&mut self, now_ms: u64) {
        if now_ms <= self.last_at_ms {
            return;
        }
        let dt_s = (now_ms - self.last_at_ms) as f64 / 1000.0;

        // Slew toward the setpoint with bounded acceleration; the new speed
        // is treated as constant over the interval, which is plenty for a
        // simulation advanced every few milliseconds.
        let max_delta = self.cfg.accel_mmps2 * dt_s;
        let delta = (self.target_mmps - self.speed_mmps).clamp(-max_delta, max_delta);
        self.speed_mmps = (self.speed_mmps + delta).max(0.0);

        let start_pos = self.pos_mm;
        let new_pos = start_pos + self.speed_mmps * dt_s;
        if self.speed_mmps > 0.0 {
            while self.next_pulse_mm <= new_pos {
                let frac = (self.next_pulse_mm - start_pos) / (new_pos - start_pos).max(1e-9);
                let t = self.last_at_ms + (frac * (now_ms - self.last_at_ms) as f64) as u64;
                self.emit_passage(t);
                self.next_pulse_mm += f64::from(self.cfg.cart_spacing_mm);
            }
        }
        self.pos_mm = new_pos;
        self.last_at_ms = now_ms;
    }

    fn emit_passage(&mut self, t_ms: u64) {
        let marked = self.carts_passed % u64::from(self.cfg.ring_len.max(1)) == 0;
        self.carts_passed += 1;

        // Count sensor stays high for roughly a fifth of a pitch period.
        let pitch_ms = f64::from(self.cfg.cart_spacing_mm) / self.speed_mmps.max(1.0) * 1000.0;
        let pulse_ms = ((pitch_ms / 5.0) as u64).clamp(4, 1_000);

        self.edges.push_back(OriginEdge {
            first_sensor: true,
            rising: true,
            at_ms: t_ms,
        });
        if marked {
            self.edges.push_back(OriginEdge {
                first_sensor: false,
                rising: true,
                at_ms: t_ms + 1,
            });
            self.edges.push_back(OriginEdge {
                first_sensor: false,
                rising: false,
                at_ms: t_ms + pulse_ms - 1,
            });
        }
        self.edges.push_back(OriginEdge {
            first_sensor: true,
            rising: false,
            at_ms: t_ms + pulse_ms,
        });
    }
}

/// Handle to one simulated line; clones share the same physical state.
#[derive(Clone)]
pub struct SimulatedLine {
    inner: Arc<Mutex<SimState>>,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
}

impl SimulatedLine {
    pub fn new(cfg: SimLineCfg, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let epoch = clock.now();
        let state = SimState {
            target_mmps: cfg.initial_speed_mmps,
            speed_mmps: cfg.initial_speed_mmps,
            pos_mm: 0.0,
            next_pulse_mm: f64::from(cfg.cart_spacing_mm),
            carts_passed: 0,
            last_at_ms: 0,
            edges: VecDeque::new(),
            infeed: VecDeque::new(),
            opened_windows: Vec::new(),
            chutes_closed: false,
            cfg,
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
            clock,
            epoch,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    fn advanced(&self) -> MutexGuard<'_, SimState> {
        let now = self.now_ms();
        let mut st = self.lock();
        st.advance_to(now);
        st
    }

    pub fn drive(&self) -> SimDrive {
        SimDrive(self.clone())
    }

    pub fn origin_sensor(&self) -> SimOriginSensor {
        SimOriginSensor(self.clone())
    }

    pub fn infeed_sensor(&self) -> SimInfeedSensor {
        SimInfeedSensor(self.clone())
    }

    pub fn chutes(&self) -> SimChuteBank {
        SimChuteBank(self.clone())
    }

    /// Script a package detection at an absolute sim time.
    pub fn feed_parcel_at(&self, at_ms: u64, barcode: Option<&str>) {
        self.lock().infeed.push_back(InfeedEvent {
            at_ms,
            barcode: barcode.map(str::to_owned),
        });
    }

    // ── Inspection for tests and the CLI summary ────────────────────────

    pub fn current_speed_mmps(&self) -> f64 {
        self.advanced().speed_mmps
    }

    pub fn carts_passed(&self) -> u64 {
        self.advanced().carts_passed
    }

    pub fn opened_windows(&self) -> Vec<(u16, u64, u64)> {
        self.advanced().opened_windows.clone()
    }

    pub fn chutes_closed(&self) -> bool {
        self.lock().chutes_closed
    }
}

pub struct SimDrive(SimulatedLine);

impl Drive for SimDrive {
    fn set_target_speed(
        &mut self,
        mmps: f64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut st = self.0.advanced();
        st.target_mmps = mmps.max(0.0);
        Ok(())
    }

    fn current_speed(
        &mut self,
        _timeout: Duration,
    ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.0.advanced().speed_mmps)
    }

    fn is_ready(&mut self) -> bool {
        true
    }
}

pub struct SimOriginSensor(SimulatedLine);

impl OriginSensor for SimOriginSensor {
    fn next_edge(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<OriginEdge>, Box<dyn std::error::Error + Send + Sync>> {
        let start = self.0.clock.now();
        loop {
            if let Some(edge) = self.0.advanced().edges.pop_front() {
                return Ok(Some(edge));
            }
            if self.0.clock.ms_since(start) >= timeout.as_millis() as u64 {
                return Ok(None);
            }
            self.0.clock.sleep(Duration::from_millis(1));
        }
    }
}

pub struct SimInfeedSensor(SimulatedLine);

impl InfeedSensor for SimInfeedSensor {
    fn next_parcel(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<InfeedEvent>, Box<dyn std::error::Error + Send + Sync>> {
        let start = self.0.clock.now();
        loop {
            {
                let now = self.0.now_ms();
                let mut st = self.0.advanced();
                if st.infeed.front().is_some_and(|e| e.at_ms <= now) {
                    return Ok(st.infeed.pop_front());
                }
            }
            if self.0.clock.ms_since(start) >= timeout.as_millis() as u64 {
                return Ok(None);
            }
            self.0.clock.sleep(Duration::from_millis(1));
        }
    }
}

pub struct SimChuteBank(SimulatedLine);

impl ChuteBank for SimChuteBank {
    fn open_window(
        &mut self,
        chute: u16,
        duration: Duration,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let now = self.0.now_ms();
        let mut st = self.0.advanced();
        tracing::debug!(chute, at_ms = now, duration_ms = duration.as_millis() as u64, "chute window opened");
        st.opened_windows
            .push((chute, now, duration.as_millis() as u64));
        st.chutes_closed = false;
        Ok(())
    }

    fn close_all(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.0.lock().chutes_closed = true;
        Ok(())
    }
}
