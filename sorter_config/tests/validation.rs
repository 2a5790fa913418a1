use sorter_config::load_toml;

const BASE: &str = r#"
[line]
target_mmps = 2000.0
loop_period_ms = 100
kp = 0.6
ki = 0.8
kd = 0.0

[topology]
cart_spacing_mm = 250
infeed_to_mainline_mm = 1750
min_ring_len = 8
chutes = [[1, 4], [2, 7], [9, 12]]
exception_chute = 9

[planner]
plan_period_ms = 50
horizon_ms = 10000
timing_tolerance_ms = 40
"#;

#[test]
fn accepts_complete_config() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
}

#[test]
fn defaults_fill_missing_tables() {
    let cfg = load_toml("").expect("parse empty TOML");
    cfg.validate().expect("defaults are valid");
    assert_eq!(cfg.line.loop_period_ms, 100);
    assert_eq!(cfg.planner.timing_tolerance_ms, 40);
}

#[test]
fn rejects_zero_cart_spacing() {
    let toml = BASE.replace("cart_spacing_mm = 250", "cart_spacing_mm = 0");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject cart_spacing_mm=0");
    assert!(format!("{err}").contains("cart_spacing_mm must be > 0"));
}

#[test]
fn rejects_duplicate_chutes() {
    let toml = BASE.replace("[[1, 4], [2, 7], [9, 12]]", "[[1, 4], [1, 7], [9, 12]]");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject duplicate chute");
    assert!(format!("{err}").contains("duplicate chute 1"));
}

#[test]
fn rejects_unknown_exception_chute() {
    let toml = BASE.replace("exception_chute = 9", "exception_chute = 42");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject unknown exception chute");
    assert!(format!("{err}").contains("exception_chute 42"));
}

#[test]
fn rejects_unreachable_target_speed() {
    let toml = BASE.replace("kd = 0.0", "kd = 0.0\nmax_output_mmps = 1000.0");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject clamp below target");
    assert!(format!("{err}").contains("max_output_mmps"));
}

#[test]
fn chutes_accept_table_form() {
    let toml = BASE.replace(
        "chutes = [[1, 4], [2, 7], [9, 12]]",
        "chutes = [{ chute = 1, pitches = 4 }, { chute = 9, pitches = 12 }]",
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    cfg.validate().expect("table-form chutes should pass");
    assert_eq!(cfg.topology.chutes, vec![(1, 4), (9, 12)]);
}

#[test]
fn feedback_timeout_accepts_sensor_ms_alias() {
    let toml = BASE.replace("loop_period_ms = 100", "loop_period_ms = 100\nsensor_ms = 75");
    let cfg = load_toml(&toml).expect("parse TOML");
    assert_eq!(cfg.line.feedback_timeout_ms, 75);
}

#[test]
fn rejects_tolerance_wider_than_horizon() {
    let toml = BASE.replace("timing_tolerance_ms = 40", "timing_tolerance_ms = 6000");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject huge tolerance");
    assert!(format!("{err}").contains("timing_tolerance_ms"));
}
