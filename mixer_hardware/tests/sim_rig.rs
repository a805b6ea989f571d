use std::time::Duration;

use mixer_hardware::SimRig;
use mixer_traits::{PinBank, PinLevel, Scale};
use rstest::rstest;

const VALVE_PINS: [u8; 3] = [40, 41, 42];
const PUMP_PIN: u8 = 14;

fn rig() -> SimRig {
    SimRig::new(VALVE_PINS.to_vec(), PUMP_PIN)
}

#[rstest]
fn empty_cell_reads_near_zero() {
    let rig = rig();
    let mut scale = rig.scale();
    let w = scale.read_grams(Duration::from_millis(50)).unwrap();
    assert!(w.abs() < 1.0, "no glass, no weight: {w}");
}

#[rstest]
fn glass_weight_appears_when_placed() {
    let rig = rig();
    rig.shared().lock().unwrap().glass_on = true;
    let mut scale = rig.scale();
    let w = scale.read_grams(Duration::from_millis(50)).unwrap();
    assert!((w - 350.0).abs() < 1.0, "glass weight expected: {w}");
}

#[rstest]
fn open_valve_and_pump_make_weight_climb() {
    let rig = rig();
    {
        let shared = rig.shared();
        let mut state = shared.lock().unwrap();
        state.glass_on = true;
        state.flow_g_per_s = 2_000.0;
    }
    let mut pins = rig.pins();
    let mut scale = rig.scale();

    pins.set_pin(VALVE_PINS[0], PinLevel::High).unwrap();
    pins.set_pin(PUMP_PIN, PinLevel::High).unwrap();
    let before = scale.read_grams(Duration::from_millis(50)).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let after = scale.read_grams(Duration::from_millis(50)).unwrap();
    assert!(
        after > before + 1.0,
        "flow should raise the reading: {before} -> {after}"
    );
}

#[rstest]
fn pump_alone_does_not_flow() {
    let rig = rig();
    {
        let shared = rig.shared();
        let mut state = shared.lock().unwrap();
        state.glass_on = true;
        state.flow_g_per_s = 2_000.0;
    }
    let mut pins = rig.pins();
    let mut scale = rig.scale();

    pins.set_pin(PUMP_PIN, PinLevel::High).unwrap();
    let before = scale.read_grams(Duration::from_millis(50)).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let after = scale.read_grams(Duration::from_millis(50)).unwrap();
    assert!(
        (after - before).abs() < 1.0,
        "no valve selected, nothing should flow: {before} -> {after}"
    );
}

#[rstest]
fn empty_valve_stops_flowing() {
    let rig = rig();
    {
        let shared = rig.shared();
        let mut state = shared.lock().unwrap();
        state.glass_on = true;
        state.flow_g_per_s = 2_000.0;
        state.empty_valves.insert(1);
    }
    let mut pins = rig.pins();
    let mut scale = rig.scale();

    pins.set_pin(VALVE_PINS[1], PinLevel::High).unwrap();
    pins.set_pin(PUMP_PIN, PinLevel::High).unwrap();
    let before = scale.read_grams(Duration::from_millis(50)).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let after = scale.read_grams(Duration::from_millis(50)).unwrap();
    assert!(
        (after - before).abs() < 1.0,
        "a dry source must not gain weight: {before} -> {after}"
    );
}

#[rstest]
fn average_raw_tracks_calibration_transform() {
    let rig = rig();
    rig.shared().lock().unwrap().glass_on = true;
    let mut scale = rig.scale();
    scale.set_offset(1_000.0);
    scale.set_ratio(2.0);
    let raw = scale.average_raw(Duration::from_millis(50)).unwrap();
    assert!((raw - (350.0 * 2.0 + 1_000.0)).abs() < 2.0, "raw: {raw}");
}
