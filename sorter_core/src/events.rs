//! Background sensor event pumps.
//!
//! Each pump spawns a thread that owns its sensor port and forwards events
//! over a crossbeam channel. Origin pulses are lossless and strictly ordered:
//! the pump tags every edge with a monotonic sequence number before delivery,
//! so index arithmetic downstream can rely on cumulative ordering.
//!
//! Safety: each pump spawns exactly one thread that is automatically shut
//! down when the pump is dropped, preventing thread leaks.

use crossbeam_channel as xch;
use sorter_traits::clock::Clock;
use sorter_traits::{InfeedEvent, InfeedSensor, OriginEdge, OriginSensor};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// An origin edge with its delivery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencedEdge {
    pub seq: u64,
    pub edge: OriginEdge,
}

pub struct OriginPump {
    rx: xch::Receiver<SequencedEdge>,
    last_ok: Arc<AtomicU64>,
    epoch: Instant,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl OriginPump {
    pub fn spawn<S: OriginSensor + Send + 'static, C: Clock + Send + Sync + 'static>(
        mut sensor: S,
        timeout: Duration,
        clock: C,
    ) -> Self {
        let (tx, rx) = xch::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let last_ok = Arc::new(AtomicU64::new(0));
        let last_ok_clone = last_ok.clone();
        let epoch = clock.now();

        let join_handle = std::thread::spawn(move || {
            let mut seq: u64 = 0;
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("origin pump received shutdown signal");
                    break;
                }
                match sensor.next_edge(timeout) {
                    Ok(Some(edge)) => {
                        if tx.send(SequencedEdge { seq, edge }).is_err() {
                            tracing::debug!("origin pump consumer disconnected, exiting thread");
                            break;
                        }
                        seq += 1;
                        let now = clock.ms_since(epoch);
                        last_ok_clone.store(now, Ordering::Relaxed);
                    }
                    Ok(None) => {
                        // Quiet line; keep polling.
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "origin sensor read failed");
                    }
                }
            }
            tracing::trace!("origin pump thread exiting cleanly");
        });

        Self {
            rx,
            last_ok,
            epoch,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// All edges delivered so far, in sequence order. Never drops.
    pub fn drain(&self) -> Vec<SequencedEdge> {
        self.rx.try_iter().collect()
    }

    /// Stall time using this pump's epoch against a real monotonic clock.
    pub fn stalled_for_now(&self) -> u64 {
        let now_ms = {
            let dur = Instant::now().saturating_duration_since(self.epoch);
            let ms = dur.as_millis();
            (ms.min(u128::from(u64::MAX))) as u64
        };
        now_ms.saturating_sub(self.last_ok.load(Ordering::Relaxed))
    }
}

impl Drop for OriginPump {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // The thread exits once the in-flight next_edge() call returns
        // (bounded by the sensor timeout).
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("origin pump thread joined"),
                Err(e) => tracing::warn!(?e, "origin pump thread panicked during shutdown"),
            }
        }
    }
}

pub struct InfeedPump {
    rx: xch::Receiver<InfeedEvent>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl InfeedPump {
    pub fn spawn<S: InfeedSensor + Send + 'static>(mut sensor: S, timeout: Duration) -> Self {
        let (tx, rx) = xch::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("infeed pump received shutdown signal");
                    break;
                }
                match sensor.next_parcel(timeout) {
                    Ok(Some(event)) => {
                        if tx.send(event).is_err() {
                            tracing::debug!("infeed pump consumer disconnected, exiting thread");
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "infeed sensor read failed");
                    }
                }
            }
            tracing::trace!("infeed pump thread exiting cleanly");
        });

        Self {
            rx,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    pub fn drain(&self) -> Vec<InfeedEvent> {
        self.rx.try_iter().collect()
    }
}

impl Drop for InfeedPump {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("infeed pump thread joined"),
                Err(e) => tracing::warn!(?e, "infeed pump thread panicked during shutdown"),
            }
        }
    }
}
