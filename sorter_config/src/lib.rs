#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas for the sorter line.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Geometry lives in `[topology]`, the speed loop in `[line]`, the eject
//!   planner in `[planner]`.
use serde::Deserialize;
use serde::de::Deserializer;

/// Main-line speed loop configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LineCfg {
    /// Commanded belt speed (mm/s).
    pub target_mmps: f64,
    /// Control loop period in milliseconds.
    pub loop_period_ms: u64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Clamp on the integral accumulator (same unit as output, mm/s).
    pub integral_limit: f64,
    pub min_output_mmps: f64,
    pub max_output_mmps: f64,
    /// Reported stable if |measured - target| stays within this band (mm/s)
    pub stable_deadband_mmps: f64,
    /// ... for at least this long.
    pub stable_hold_ms: u64,
    /// Wider band for the sustained-excursion warning (mm/s).
    pub unstable_deadband_mmps: f64,
    pub unstable_hold_ms: u64,
    /// Max time to wait for a speed feedback read (ms). Also accepts alias
    /// "sensor_ms".
    #[serde(alias = "sensor_ms")]
    pub feedback_timeout_ms: u64,
    /// Consecutive feedback failures before flagging the loop degraded.
    pub feedback_fail_limit: u32,
}

impl Default for LineCfg {
    fn default() -> Self {
        Self {
            target_mmps: 2000.0,
            loop_period_ms: 100,
            kp: 0.2,
            ki: 4.0,
            kd: 0.0,
            integral_limit: 900.0,
            min_output_mmps: 0.0,
            max_output_mmps: 3200.0,
            stable_deadband_mmps: 25.0,
            stable_hold_ms: 1500,
            unstable_deadband_mmps: 150.0,
            unstable_hold_ms: 5000,
            feedback_timeout_ms: 50,
            feedback_fail_limit: 5,
        }
    }
}

/// One chute and its distance from the origin in cart pitches.
/// Accepts either an array of tables or an array of `[chute, pitches]` pairs.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(untagged)]
enum ChuteToml {
    Tuple((u16, u32)),
    Table { chute: u16, pitches: u32 },
}

fn de_chutes<'de, D>(deserializer: D) -> Result<Vec<(u16, u32)>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<Vec<ChuteToml>> = Option::deserialize(deserializer)?;
    let mut out = Vec::new();
    if let Some(items) = opt {
        for c in items {
            match c {
                ChuteToml::Tuple((chute, pitches)) => out.push((chute, pitches)),
                ChuteToml::Table { chute, pitches } => out.push((chute, pitches)),
            }
        }
    }
    Ok(out)
}

/// Static track geometry.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TopologyCfg {
    /// Centre-to-centre cart pitch (mm).
    pub cart_spacing_mm: u32,
    /// Infeed sensor to main-line drop point along the transport path (mm).
    pub infeed_to_mainline_mm: u32,
    /// Signed correction, in whole cart pitches, applied to load prediction.
    pub cart_offset_calibration: i32,
    /// Rings shorter than this are sensor bounce and get discarded.
    pub min_ring_len: u32,
    /// Chute positions as cart pitches downstream of the origin.
    #[serde(default, deserialize_with = "de_chutes")]
    pub chutes: Vec<(u16, u32)>,
    /// Where force ejects go. Must be one of `chutes` when set.
    pub exception_chute: Option<u16>,
}

impl Default for TopologyCfg {
    fn default() -> Self {
        Self {
            cart_spacing_mm: 250,
            infeed_to_mainline_mm: 1750,
            cart_offset_calibration: 0,
            min_ring_len: 8,
            chutes: Vec::new(),
            exception_chute: None,
        }
    }
}

/// Eject planner configuration.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct PlannerCfg {
    /// Planning period (ms).
    pub plan_period_ms: u64,
    /// Plans are only emitted for arrivals inside [now, now + horizon].
    pub horizon_ms: u64,
    /// Half-width of the eject window (ms); absorbs speed-measurement jitter.
    pub timing_tolerance_ms: u64,
}

impl Default for PlannerCfg {
    fn default() -> Self {
        Self {
            plan_period_ms: 50,
            horizon_ms: 10_000,
            timing_tolerance_ms: 40,
        }
    }
}

/// Parcel store housekeeping.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ParcelCfg {
    /// Completed parcels are evicted after this long (ms).
    pub completed_ttl_ms: u64,
}

impl Default for ParcelCfg {
    fn default() -> Self {
        Self {
            completed_ttl_ms: 60_000,
        }
    }
}

/// Sensor poll timeouts.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SensorCfg {
    pub origin_timeout_ms: u64,
    pub infeed_timeout_ms: u64,
}

impl Default for SensorCfg {
    fn default() -> Self {
        Self {
            origin_timeout_ms: 20,
            infeed_timeout_ms: 50,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub line: LineCfg,
    pub topology: TopologyCfg,
    pub planner: PlannerCfg,
    pub parcels: ParcelCfg,
    pub sensors: SensorCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Line
        if !(self.line.target_mmps.is_finite() && self.line.target_mmps > 0.0) {
            eyre::bail!("line.target_mmps must be > 0");
        }
        if self.line.loop_period_ms == 0 {
            eyre::bail!("line.loop_period_ms must be >= 1");
        }
        if self.line.loop_period_ms > 5_000 {
            eyre::bail!("line.loop_period_ms is unreasonably large (>5s)");
        }
        for (name, v) in [
            ("line.kp", self.line.kp),
            ("line.ki", self.line.ki),
            ("line.kd", self.line.kd),
        ] {
            if !v.is_finite() || v < 0.0 {
                eyre::bail!("{name} must be finite and >= 0");
            }
        }
        if !(self.line.integral_limit.is_finite() && self.line.integral_limit >= 0.0) {
            eyre::bail!("line.integral_limit must be >= 0");
        }
        if !(self.line.min_output_mmps.is_finite() && self.line.max_output_mmps.is_finite()) {
            eyre::bail!("line output clamps must be finite");
        }
        if self.line.min_output_mmps >= self.line.max_output_mmps {
            eyre::bail!("line.min_output_mmps must be < line.max_output_mmps");
        }
        if self.line.max_output_mmps < self.line.target_mmps {
            eyre::bail!("line.max_output_mmps must reach line.target_mmps");
        }
        if !(self.line.stable_deadband_mmps > 0.0) {
            eyre::bail!("line.stable_deadband_mmps must be > 0");
        }
        if self.line.unstable_deadband_mmps < self.line.stable_deadband_mmps {
            eyre::bail!("line.unstable_deadband_mmps must be >= line.stable_deadband_mmps");
        }
        if self.line.feedback_timeout_ms == 0 {
            eyre::bail!("line.feedback_timeout_ms must be >= 1");
        }
        if self.line.feedback_fail_limit == 0 {
            eyre::bail!("line.feedback_fail_limit must be >= 1");
        }

        // Topology
        if self.topology.cart_spacing_mm == 0 {
            eyre::bail!("topology.cart_spacing_mm must be > 0");
        }
        if self.topology.min_ring_len < 2 {
            eyre::bail!("topology.min_ring_len must be >= 2");
        }
        let mut seen = std::collections::BTreeSet::new();
        for (chute, _pitches) in &self.topology.chutes {
            if !seen.insert(*chute) {
                eyre::bail!("topology.chutes contains duplicate chute {chute}");
            }
        }
        if let Some(exc) = self.topology.exception_chute
            && !seen.contains(&exc)
        {
            eyre::bail!("topology.exception_chute {exc} is not listed in topology.chutes");
        }

        // Planner
        if self.planner.plan_period_ms == 0 {
            eyre::bail!("planner.plan_period_ms must be >= 1");
        }
        if self.planner.horizon_ms == 0 {
            eyre::bail!("planner.horizon_ms must be >= 1");
        }
        if self.planner.timing_tolerance_ms == 0 {
            eyre::bail!("planner.timing_tolerance_ms must be >= 1");
        }
        if self.planner.timing_tolerance_ms * 2 >= self.planner.horizon_ms {
            eyre::bail!("planner.timing_tolerance_ms must be well inside planner.horizon_ms");
        }

        // Parcels
        if self.parcels.completed_ttl_ms == 0 {
            eyre::bail!("parcels.completed_ttl_ms must be >= 1");
        }

        // Sensors
        if self.sensors.origin_timeout_ms == 0 {
            eyre::bail!("sensors.origin_timeout_ms must be >= 1");
        }
        if self.sensors.infeed_timeout_ms == 0 {
            eyre::bail!("sensors.infeed_timeout_ms must be >= 1");
        }

        Ok(())
    }
}
