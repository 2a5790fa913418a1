//! In-memory parcel lifecycle: creation to terminal outcome.
//!
//! Every mutation is guarded; transitions out of terminal states and double
//! cart bindings are rejected with a typed error instead of silently
//! overwriting. Readers get value snapshots, never references into the store.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::ParcelError;
use crate::types::{CartId, ChuteId, ParcelId};

/// Route state machine:
/// `WaitingForRouting → Loaded → Sorting → {Sorted | ForceEjected | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    WaitingForRouting,
    Loaded,
    Sorting,
    Sorted,
    ForceEjected,
    Failed,
}

impl RouteState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sorted | Self::ForceEjected | Self::Failed)
    }
}

/// Final disposition of a parcel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortingOutcome {
    NormalSort,
    ForceEject,
    Missort,
    Unprocessed,
}

impl SortingOutcome {
    fn terminal_state(self) -> RouteState {
        match self {
            Self::NormalSort => RouteState::Sorted,
            Self::ForceEject => RouteState::ForceEjected,
            Self::Missort | Self::Unprocessed => RouteState::Failed,
        }
    }
}

/// Read-only view of one parcel.
///
/// Invariants: `bound_cart` set ⇒ `loaded_at_ms` set; `outcome` set ⇒ state
/// is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParcelSnapshot {
    pub id: ParcelId,
    pub barcode: Option<String>,
    pub state: RouteState,
    pub target_chute: Option<ChuteId>,
    pub bound_cart: Option<CartId>,
    pub predicted_cart: Option<CartId>,
    pub created_at_ms: u64,
    pub loaded_at_ms: Option<u64>,
    pub divert_planned_at_ms: Option<u64>,
    pub diverted_at_ms: Option<u64>,
    pub sorted_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    pub outcome: Option<SortingOutcome>,
}

#[derive(Debug, Default)]
struct ParcelTable {
    next_id: u64,
    parcels: HashMap<ParcelId, ParcelSnapshot>,
}

/// Mutex-guarded parcel registry shared between planners and execution.
#[derive(Debug, Default)]
pub struct ParcelStore {
    inner: Mutex<ParcelTable>,
}

type ParcelResult = Result<ParcelSnapshot, ParcelError>;

impl ParcelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a package detected at the infeed.
    pub fn create(&self, barcode: Option<String>, now_ms: u64) -> ParcelSnapshot {
        let mut tbl = self.lock();
        let id = ParcelId(tbl.next_id);
        tbl.next_id += 1;
        let snap = ParcelSnapshot {
            id,
            barcode,
            state: RouteState::WaitingForRouting,
            target_chute: None,
            bound_cart: None,
            predicted_cart: None,
            created_at_ms: now_ms,
            loaded_at_ms: None,
            divert_planned_at_ms: None,
            diverted_at_ms: None,
            sorted_at_ms: None,
            completed_at_ms: None,
            outcome: None,
        };
        tbl.parcels.insert(id, snap.clone());
        tracing::debug!(%id, created_at_ms = now_ms, "parcel created");
        snap
    }

    /// Record the load planner's prediction (informational, pre-binding).
    pub fn set_predicted_cart(&self, id: ParcelId, cart: CartId) -> ParcelResult {
        self.mutate(id, "set predicted cart", |p| {
            p.predicted_cart = Some(cart);
            Ok(())
        })
    }

    /// Bind the physical cart carrying this parcel; transitions to `Loaded`.
    pub fn bind_cart(&self, id: ParcelId, cart: CartId, now_ms: u64) -> ParcelResult {
        self.mutate(id, "bind cart", |p| {
            if let Some(bound) = p.bound_cart {
                return Err(ParcelError::CartAlreadyBound {
                    parcel: p.id,
                    bound,
                });
            }
            if p.state != RouteState::WaitingForRouting {
                return Err(ParcelError::InvalidTransition {
                    parcel: p.id,
                    state: p.state,
                    op: "bind cart",
                });
            }
            p.bound_cart = Some(cart);
            p.loaded_at_ms = Some(now_ms);
            p.state = RouteState::Loaded;
            Ok(())
        })
    }

    /// Record the target chute resolved upstream.
    pub fn set_target_chute(&self, id: ParcelId, chute: ChuteId) -> ParcelResult {
        self.mutate(id, "set target chute", |p| {
            p.target_chute = Some(chute);
            Ok(())
        })
    }

    /// A divert plan exists for this parcel; transitions to `Sorting`.
    pub fn begin_sorting(&self, id: ParcelId, now_ms: u64) -> ParcelResult {
        self.mutate(id, "begin sorting", |p| {
            if p.state != RouteState::Loaded {
                return Err(ParcelError::InvalidTransition {
                    parcel: p.id,
                    state: p.state,
                    op: "begin sorting",
                });
            }
            if p.target_chute.is_none() {
                return Err(ParcelError::MissingTargetChute(p.id));
            }
            p.divert_planned_at_ms = Some(now_ms);
            p.state = RouteState::Sorting;
            Ok(())
        })
    }

    /// The chute actuator fired for this parcel.
    pub fn mark_diverted(&self, id: ParcelId, now_ms: u64) -> ParcelResult {
        self.mutate(id, "mark diverted", |p| {
            if p.state != RouteState::Sorting {
                return Err(ParcelError::InvalidTransition {
                    parcel: p.id,
                    state: p.state,
                    op: "mark diverted",
                });
            }
            p.diverted_at_ms = Some(now_ms);
            Ok(())
        })
    }

    /// Terminal transition with the final outcome.
    pub fn complete(&self, id: ParcelId, outcome: SortingOutcome, now_ms: u64) -> ParcelResult {
        self.mutate(id, "complete", |p| {
            p.outcome = Some(outcome);
            p.state = outcome.terminal_state();
            p.completed_at_ms = Some(now_ms);
            if outcome == SortingOutcome::NormalSort {
                p.sorted_at_ms = Some(now_ms);
            }
            Ok(())
        })
    }

    pub fn get(&self, id: ParcelId) -> Option<ParcelSnapshot> {
        self.lock().parcels.get(&id).cloned()
    }

    /// Snapshot of every live parcel, in creation order.
    pub fn get_all(&self) -> Vec<ParcelSnapshot> {
        let tbl = self.lock();
        let mut out: Vec<ParcelSnapshot> = tbl.parcels.values().cloned().collect();
        out.sort_by_key(|p| p.id);
        out
    }

    pub fn len(&self) -> usize {
        self.lock().parcels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().parcels.is_empty()
    }

    /// Evict terminal parcels completed more than `ttl_ms` ago; returns the
    /// number removed.
    pub fn evict_completed(&self, now_ms: u64, ttl_ms: u64) -> usize {
        let mut tbl = self.lock();
        let before = tbl.parcels.len();
        tbl.parcels.retain(|_, p| {
            !(p.state.is_terminal()
                && p.completed_at_ms
                    .is_some_and(|done| now_ms.saturating_sub(done) >= ttl_ms))
        });
        let evicted = before - tbl.parcels.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted completed parcels");
        }
        evicted
    }

    fn mutate(
        &self,
        id: ParcelId,
        op: &'static str,
        f: impl FnOnce(&mut ParcelSnapshot) -> Result<(), ParcelError>,
    ) -> ParcelResult {
        let mut tbl = self.lock();
        let p = tbl
            .parcels
            .get_mut(&id)
            .ok_or(ParcelError::NotFound(id))?;
        if p.state.is_terminal() {
            return Err(ParcelError::TerminalState {
                parcel: id,
                state: p.state,
                op,
            });
        }
        f(p)?;
        Ok(p.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ParcelTable> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
