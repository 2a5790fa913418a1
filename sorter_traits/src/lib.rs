pub mod clock;

pub use clock::{Clock, MonotonicClock};

use std::time::Duration;

/// One electrical edge seen at the origin sensor pair.
///
/// `first_sensor` is the per-cart count sensor; the other sensor only fires
/// for the physically marked zero cart while the count sensor is high.
/// `at_ms` is milliseconds since the line epoch, stamped by the sensor source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginEdge {
    pub first_sensor: bool,
    pub rising: bool,
    pub at_ms: u64,
}

/// A package detected at the infeed sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfeedEvent {
    pub at_ms: u64,
    pub barcode: Option<String>,
}

/// Main-line drive: setpoint out, measured belt speed back.
pub trait Drive {
    fn set_target_speed(
        &mut self,
        mmps: f64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn current_speed(
        &mut self,
        timeout: Duration,
    ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>>;
    fn is_ready(&mut self) -> bool;
}

/// Chute actuator bank addressed by chute number.
pub trait ChuteBank {
    fn open_window(
        &mut self,
        chute: u16,
        duration: Duration,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    /// Drive every chute closed. Part of the safe-state contract on shutdown.
    fn close_all(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Origin sensor pair. Blocks until the next edge or timeout (`Ok(None)`).
pub trait OriginSensor {
    fn next_edge(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<OriginEdge>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Infeed light barrier / barcode gate. Blocks until the next package or
/// timeout (`Ok(None)`).
pub trait InfeedSensor {
    fn next_parcel(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<InfeedEvent>, Box<dyn std::error::Error + Send + Sync>>;
}
