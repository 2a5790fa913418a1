#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core sorter logic (hardware-agnostic).
//!
//! This crate provides the physical state estimation and timing control for a
//! narrow-belt diverter sorter. All hardware interactions go through the
//! `sorter_traits` port traits.
//!
//! ## Architecture
//!
//! - **Topology**: static track geometry and chute offsets (`topology` module)
//! - **Ring discovery**: origin sensor edges to `RingSnapshot` (`ring` module)
//! - **Position tracking**: live origin cart index, modulo ring length
//!   (`tracker` module)
//! - **Speed control**: PID loop with stability dwell tracking (`pid`,
//!   `mainline` modules)
//! - **Planning**: load prediction and eject window computation
//!   (`load_planner`, `eject_planner` modules)
//! - **Lifecycle**: guarded per-parcel state machine (`parcel` module)
//!
//! ## Units
//!
//! Geometry is in integer millimetres and whole cart pitches; time is in
//! integer milliseconds measured from a per-run epoch via the injected
//! `Clock`. Only the PID math runs in `f64`.

pub mod conversions;
pub mod eject_planner;
pub mod error;
pub mod events;
pub mod load_planner;
pub mod mainline;
pub mod mocks;
pub mod parcel;
pub mod pid;
pub mod ring;
pub mod runner;
pub mod topology;
pub mod tracker;
pub mod types;
pub mod util;

mod hw_error;

pub use eject_planner::{DivertPlan, EjectCfg, EjectPlanner};
pub use error::{BuildError, ParcelError, PlanError, SorterError};
pub use load_planner::{LoadPlanner, LoadPrediction};
pub use mainline::{MainLineCfg, MainLineControl, MainLineService, SpeedShared};
pub use parcel::{ParcelSnapshot, ParcelStore, RouteState, SortingOutcome};
pub use ring::{RingBuilder, RingEvent};
pub use topology::TrackTopology;
pub use tracker::{CartPositionTracker, TrackerView};
pub use types::{CartId, ChuteId, ParcelId, RingSnapshot};
