//! Live origin cart index, advanced by origin pulses modulo ring length.
//!
//! Single writer, mutex-guarded, short critical sections. Position is only
//! known exactly at pulse time; there is deliberately no interpolation here —
//! callers needing time-based estimates combine the index with the eject
//! planner's arithmetic.

use std::sync::{Arc, Mutex};

use crate::types::RingSnapshot;

#[derive(Debug, Default)]
struct TrackerState {
    ring: Option<Arc<RingSnapshot>>,
    origin_index: u32,
    pulses: u64,
    last_pulse_at_ms: u64,
}

/// Atomically consistent `(ring, index)` pair. Never a torn read.
#[derive(Debug, Clone)]
pub struct TrackerView {
    pub ring: Arc<RingSnapshot>,
    pub origin_index: u32,
    pub pulses: u64,
}

#[derive(Debug, Default)]
pub struct CartPositionTracker {
    inner: Mutex<TrackerState>,
}

impl CartPositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a freshly discovered ring, replacing any previous one.
    ///
    /// The ring is published at the closing coincidence, i.e. with the zero
    /// cart physically at the origin, so the index baseline is 0.
    pub fn install_ring(&self, ring: Arc<RingSnapshot>) {
        let mut st = self.lock();
        tracing::info!(ring_len = ring.len(), "ring installed; origin index reset");
        st.ring = Some(ring);
        st.origin_index = 0;
        st.pulses = 0;
    }

    /// One cart passed the origin. Returns the new origin index, or `None`
    /// while no ring is installed (pre-discovery pulses are ignored).
    pub fn on_cart_passed(&self, at_ms: u64) -> Option<u32> {
        let mut st = self.lock();
        let len = st.ring.as_ref()?.len();
        if at_ms < st.last_pulse_at_ms {
            tracing::warn!(
                at_ms,
                last_at_ms = st.last_pulse_at_ms,
                "origin pulse timestamp went backwards"
            );
        }
        st.last_pulse_at_ms = at_ms;
        st.origin_index = (st.origin_index + 1) % len;
        st.pulses += 1;
        tracing::trace!(origin_index = st.origin_index, at_ms, "origin pulse");
        Some(st.origin_index)
    }

    /// True once a ring exists and at least one pulse established the index.
    pub fn is_ring_ready(&self) -> bool {
        let st = self.lock();
        st.ring.is_some() && st.pulses > 0
    }

    /// Consistent snapshot of ring and index, or `None` until ready.
    pub fn view(&self) -> Option<TrackerView> {
        let st = self.lock();
        let ring = st.ring.clone()?;
        if st.pulses == 0 {
            return None;
        }
        Some(TrackerView {
            ring,
            origin_index: st.origin_index,
            pulses: st.pulses,
        })
    }

    /// The installed ring regardless of pulse state (diagnostics).
    pub fn ring(&self) -> Option<Arc<RingSnapshot>> {
        self.lock().ring.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        // A poisoned tracker mutex means a panic mid-update; the state is a
        // few integers and still internally consistent, so keep serving.
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
