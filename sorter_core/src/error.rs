use crate::parcel::RouteState;
use crate::types::{CartId, ChuteId, ParcelId};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum SorterError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("timeout waiting for sensor")]
    Timeout,
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing drive")]
    MissingDrive,
    #[error("missing chute bank")]
    MissingChuteBank,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

/// Why a divert plan could not be produced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("no cart ring learned yet")]
    RingNotReady,
    #[error("belt speed unavailable")]
    SpeedUnavailable,
    #[error("unknown chute {0}")]
    UnknownChute(ChuteId),
    #[error("cart {0} is not in the current ring")]
    CartNotInRing(CartId),
}

/// Guarded parcel mutations reject instead of silently overwriting.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParcelError {
    #[error("parcel {0} not found")]
    NotFound(ParcelId),
    #[error("parcel {parcel} is already bound to cart {bound}")]
    CartAlreadyBound { parcel: ParcelId, bound: CartId },
    #[error("parcel {parcel} is terminal ({state:?}); cannot {op}")]
    TerminalState {
        parcel: ParcelId,
        state: RouteState,
        op: &'static str,
    },
    #[error("parcel {parcel} cannot {op} from state {state:?}")]
    InvalidTransition {
        parcel: ParcelId,
        state: RouteState,
        op: &'static str,
    },
    #[error("parcel {0} has no target chute")]
    MissingTargetChute(ParcelId),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
