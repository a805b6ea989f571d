use mixer_config::load_toml;

const BASE: &str = r#"
[pins]
valve_pins = [40, 41, 42, 43]
pump_pin = 14
hx711_dt = 60
hx711_sck = 59
"#;

#[test]
fn defaults_fill_missing_sections() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("defaults should validate");
    assert_eq!(cfg.engine.empty_window_ms, 5_000);
    assert!((cfg.session.reference_mass_g - 500.0).abs() < f64::EPSILON);
    assert!((cfg.session.run_on_seed_g - 5.0).abs() < f64::EPSILON);
}

#[test]
fn rejects_empty_valve_list() {
    let toml = r#"
[pins]
valve_pins = []
pump_pin = 14
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject empty valve list");
    assert!(format!("{err}").contains("at least one valve"));
}

#[test]
fn rejects_pin_assigned_twice() {
    let toml = r#"
[pins]
valve_pins = [40, 41]
pump_pin = 41
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject reused pin");
    assert!(format!("{err}").contains("assigned twice"));
}

#[test]
fn rejects_zero_sample_period() {
    let toml = format!(
        "{BASE}
[engine]
sample_period_ms = 0
"
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject sample_period_ms=0");
    assert!(format!("{err}").contains("sample_period_ms must be >= 1"));
}

#[test]
fn rejects_sample_period_above_one_second() {
    let toml = format!(
        "{BASE}
[engine]
sample_period_ms = 1500
"
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject slow sampling");
    assert!(format!("{err}").contains("cancellation"));
}

#[test]
fn rejects_non_positive_glass_weight() {
    let toml = format!(
        "{BASE}
[engine]
glass_weight_g = 0.0
"
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject glass_weight_g=0");
    assert!(format!("{err}").contains("glass_weight_g"));
}

#[test]
fn rejects_zero_calibration_ratio() {
    let toml = format!(
        "{BASE}
[calibration]
offset_raw = 8200.0
counts_per_gram = 0.0
"
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject zero ratio");
    assert!(format!("{err}").contains("counts_per_gram"));
}

#[test]
fn rejects_negative_run_on_seed() {
    let toml = format!(
        "{BASE}
[session]
run_on_seed_g = -1.0
"
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject negative seed");
    assert!(format!("{err}").contains("run_on_seed_g"));
}
