//! Mappings from `sorter_config` schemas into core structs.

use crate::eject_planner::EjectCfg;
use crate::mainline::MainLineCfg;
use crate::pid::PidGains;
use crate::topology::TrackTopology;
use crate::types::ChuteId;

impl TryFrom<&sorter_config::TopologyCfg> for TrackTopology {
    type Error = crate::error::BuildError;

    fn try_from(cfg: &sorter_config::TopologyCfg) -> Result<Self, Self::Error> {
        TrackTopology::new(
            cfg.cart_spacing_mm,
            cfg.infeed_to_mainline_mm,
            cfg.cart_offset_calibration,
            cfg.min_ring_len,
            cfg.chutes
                .iter()
                .map(|(chute, pitches)| (ChuteId(*chute), *pitches)),
            cfg.exception_chute.map(ChuteId),
        )
    }
}

impl From<&sorter_config::LineCfg> for MainLineCfg {
    fn from(cfg: &sorter_config::LineCfg) -> Self {
        MainLineCfg {
            target_mmps: cfg.target_mmps,
            loop_period_ms: cfg.loop_period_ms,
            gains: PidGains {
                kp: cfg.kp,
                ki: cfg.ki,
                kd: cfg.kd,
                integral_limit: cfg.integral_limit,
                out_min: cfg.min_output_mmps,
                out_max: cfg.max_output_mmps,
            },
            stable_deadband_mmps: cfg.stable_deadband_mmps,
            stable_hold_ms: cfg.stable_hold_ms,
            unstable_deadband_mmps: cfg.unstable_deadband_mmps,
            unstable_hold_ms: cfg.unstable_hold_ms,
            feedback_timeout_ms: cfg.feedback_timeout_ms,
            feedback_fail_limit: cfg.feedback_fail_limit,
        }
    }
}

impl From<&sorter_config::PlannerCfg> for EjectCfg {
    fn from(cfg: &sorter_config::PlannerCfg) -> Self {
        EjectCfg {
            horizon_ms: cfg.horizon_ms,
            timing_tolerance_ms: cfg.timing_tolerance_ms,
        }
    }
}
