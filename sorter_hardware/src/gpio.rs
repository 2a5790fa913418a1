//! GPIO-backed sensors (Raspberry Pi class controllers, `hardware` feature).
//!
//! Level-change polling keeps the wiring trivial: two inputs for the origin
//! pair, one for the infeed barrier. Timestamps are stamped at detection,
//! which is within one poll interval of the physical edge.

use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, InputPin};
use tracing::trace;

use crate::error::{HwError, Result};
use sorter_traits::{InfeedEvent, InfeedSensor, OriginEdge, OriginSensor};

const DEFAULT_POLL: Duration = Duration::from_micros(500);

fn input_pin(gpio: &Gpio, pin: u8) -> Result<InputPin> {
    Ok(gpio
        .get(pin)
        .map_err(|e| HwError::Gpio(format!("open pin {pin}: {e}")))?
        .into_input_pulldown())
}

pub struct GpioOriginSensor {
    count: InputPin,
    marker: InputPin,
    count_high: bool,
    marker_high: bool,
    epoch: Instant,
    poll: Duration,
}

impl GpioOriginSensor {
    pub fn new(count_pin: u8, marker_pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let count = input_pin(&gpio, count_pin)?;
        let marker = input_pin(&gpio, marker_pin)?;
        let count_high = count.is_high();
        let marker_high = marker.is_high();
        Ok(Self {
            count,
            marker,
            count_high,
            marker_high,
            epoch: Instant::now(),
            poll: DEFAULT_POLL,
        })
    }

    fn at_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

impl OriginSensor for GpioOriginSensor {
    fn next_edge(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<Option<OriginEdge>, Box<dyn std::error::Error + Send + Sync>> {
        let deadline = Instant::now() + timeout;
        loop {
            let count = self.count.is_high();
            if count != self.count_high {
                self.count_high = count;
                let edge = OriginEdge {
                    first_sensor: true,
                    rising: count,
                    at_ms: self.at_ms(),
                };
                trace!(?edge, "origin count edge");
                return Ok(Some(edge));
            }
            let marker = self.marker.is_high();
            if marker != self.marker_high {
                self.marker_high = marker;
                let edge = OriginEdge {
                    first_sensor: false,
                    rising: marker,
                    at_ms: self.at_ms(),
                };
                trace!(?edge, "origin marker edge");
                return Ok(Some(edge));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(self.poll);
        }
    }
}

pub struct GpioInfeedSensor {
    barrier: InputPin,
    high: bool,
    epoch: Instant,
    poll: Duration,
}

impl GpioInfeedSensor {
    pub fn new(barrier_pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let barrier = input_pin(&gpio, barrier_pin)?;
        let high = barrier.is_high();
        Ok(Self {
            barrier,
            high,
            epoch: Instant::now(),
            poll: DEFAULT_POLL,
        })
    }
}

impl InfeedSensor for GpioInfeedSensor {
    fn next_parcel(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<Option<InfeedEvent>, Box<dyn std::error::Error + Send + Sync>> {
        let deadline = Instant::now() + timeout;
        loop {
            let high = self.barrier.is_high();
            let was = self.high;
            self.high = high;
            // Rising edge = package breaking the light barrier. Barcode
            // acquisition is a separate device; not wired here.
            if high && !was {
                let at_ms = self.epoch.elapsed().as_millis() as u64;
                trace!(at_ms, "infeed barrier edge");
                return Ok(Some(InfeedEvent {
                    at_ms,
                    barcode: None,
                }));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(self.poll);
        }
    }
}
