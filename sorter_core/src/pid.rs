//! PID controller for the main-line speed loop.
//!
//! Integral is accumulated with a hard clamp (anti-windup); derivative comes
//! from the error delta over the tick period; the output is clamped to the
//! drive's span. Zero Ki disables integral; zero Kd disables derivative.

/// PID gains and clamps.
#[derive(Debug, Clone, Copy)]
pub struct PidGains {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain (0 = disabled).
    pub ki: f64,
    /// Derivative gain (0 = disabled).
    pub kd: f64,
    /// Clamp on the integral accumulator (error·seconds).
    pub integral_limit: f64,
    /// Output clamp, low side [mm/s].
    pub out_min: f64,
    /// Output clamp, high side [mm/s].
    pub out_max: f64,
}

/// Internal state preserved across ticks. Reset on loop restart.
#[derive(Debug, Clone, Copy, Default)]
pub struct PidState {
    /// Integral accumulator (error·seconds), clamped.
    integral: f64,
    /// Previous error, for the derivative term. `None` on the first tick.
    prev_error: Option<f64>,
}

impl PidState {
    /// Reset all internal state to zero.
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[cfg(test)]
    pub(crate) fn integral(&self) -> f64 {
        self.integral
    }
}

/// Compute one PID cycle.
///
/// - `error`: target − measured [mm/s].
/// - `dt`: tick period [s]; non-positive dt returns the clamped P-only term.
///
/// Returns the clamped output [mm/s].
#[inline]
pub fn pid_step(state: &mut PidState, gains: &PidGains, error: f64, dt: f64) -> f64 {
    let p_term = gains.kp * error;

    if dt <= 0.0 || !dt.is_finite() {
        return p_term.clamp(gains.out_min, gains.out_max);
    }

    let i_term = if gains.ki != 0.0 {
        let limit = gains.integral_limit.abs();
        state.integral = (state.integral + error * dt).clamp(-limit, limit);
        gains.ki * state.integral
    } else {
        state.integral = 0.0;
        0.0
    };

    let d_term = if gains.kd != 0.0 {
        match state.prev_error {
            Some(prev) => gains.kd * (error - prev) / dt,
            None => 0.0,
        }
    } else {
        0.0
    };
    state.prev_error = Some(error);

    (p_term + i_term + d_term).clamp(gains.out_min, gains.out_max)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.1; // 10 Hz loop

    fn gains(kp: f64, ki: f64, kd: f64) -> PidGains {
        PidGains {
            kp,
            ki,
            kd,
            integral_limit: 1_000.0,
            out_min: -3_000.0,
            out_max: 3_000.0,
        }
    }

    #[test]
    fn pure_proportional() {
        let mut s = PidState::default();
        let out = pid_step(&mut s, &gains(2.0, 0.0, 0.0), 100.0, DT);
        assert!((out - 200.0).abs() < 1e-12);
    }

    #[test]
    fn integral_accumulates_error_times_dt() {
        let mut s = PidState::default();
        let g = gains(0.0, 1.0, 0.0);
        for _ in 0..10 {
            pid_step(&mut s, &g, 50.0, DT);
        }
        // 10 ticks * 50 mm/s * 0.1 s = 50
        assert!((s.integral() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn integral_clamps_at_limit() {
        let mut s = PidState::default();
        let mut g = gains(0.0, 1.0, 0.0);
        g.integral_limit = 10.0;
        for _ in 0..10_000 {
            pid_step(&mut s, &g, 500.0, DT);
        }
        assert!((s.integral() - 10.0).abs() < 1e-9);
        // And symmetric on the negative side.
        for _ in 0..10_000 {
            pid_step(&mut s, &g, -500.0, DT);
        }
        assert!((s.integral() + 10.0).abs() < 1e-9);
    }

    #[test]
    fn derivative_responds_to_error_change() {
        let mut s = PidState::default();
        let g = gains(0.0, 0.0, 1.0);
        // First tick has no previous error: derivative off.
        let out1 = pid_step(&mut s, &g, 10.0, DT);
        assert!(out1.abs() < 1e-12);
        // Second tick: (30 - 10) / 0.1 = 200
        let out2 = pid_step(&mut s, &g, 30.0, DT);
        assert!((out2 - 200.0).abs() < 1e-9);
    }

    #[test]
    fn output_is_clamped() {
        let mut s = PidState::default();
        let mut g = gains(100.0, 0.0, 0.0);
        g.out_max = 250.0;
        g.out_min = 0.0;
        assert_eq!(pid_step(&mut s, &g, 1_000.0, DT), 250.0);
        assert_eq!(pid_step(&mut s, &g, -1_000.0, DT), 0.0);
    }

    #[test]
    fn zero_dt_falls_back_to_proportional() {
        let mut s = PidState::default();
        let out = pid_step(&mut s, &gains(2.0, 5.0, 5.0), 10.0, 0.0);
        assert!((out - 20.0).abs() < 1e-12);
        assert_eq!(s.integral(), 0.0);
    }

    #[test]
    fn reset_clears_state() {
        let mut s = PidState::default();
        let g = gains(1.0, 1.0, 1.0);
        for _ in 0..5 {
            pid_step(&mut s, &g, 42.0, DT);
        }
        assert!(s.integral().abs() > 0.0);
        s.reset();
        assert_eq!(s.integral(), 0.0);
    }
}
