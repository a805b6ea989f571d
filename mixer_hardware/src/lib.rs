//! Rig adapters: a scriptable simulated rig for development and tests, and
//! HX711/GPIO-backed hardware adapters behind the `hardware` feature.

pub mod error;
pub mod util;

#[cfg(feature = "hardware")]
pub mod hx711;

pub use error::HwError;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mixer_traits::{Indicator, LightEffect, PinBank, PinLevel, Scale};

/// Shared state of the simulated rig: pin levels, glass presence and the
/// liquid poured so far. The scale and the pin bank both hold a handle, so
/// opening a valve makes the simulated weight climb on the next read.
#[derive(Debug)]
pub struct RigState {
    levels: HashMap<u8, PinLevel>,
    valve_pins: Vec<u8>,
    pump_pin: u8,
    /// Whether a glass sits on the load cell.
    pub glass_on: bool,
    /// Empty weight of the glass (g).
    pub glass_weight_g: f64,
    /// Liquid dispensed into the glass so far (g).
    pub poured_g: f64,
    /// Valves whose ingredient source has run dry; they stop flowing.
    pub empty_valves: HashSet<u8>,
    /// Flow rate while the pump and a valve are driven (g/s).
    pub flow_g_per_s: f64,
    last_advance: Instant,
}

impl RigState {
    fn new(valve_pins: Vec<u8>, pump_pin: u8) -> Self {
        Self {
            levels: HashMap::new(),
            valve_pins,
            pump_pin,
            glass_on: false,
            glass_weight_g: 350.0,
            poured_g: 0.0,
            empty_valves: HashSet::new(),
            flow_g_per_s: 12.0,
            last_advance: Instant::now(),
        }
    }

    fn level(&self, pin: u8) -> PinLevel {
        self.levels.get(&pin).copied().unwrap_or(PinLevel::Low)
    }

    /// Valve index currently flowing, if the pump is on and the valve's
    /// source has not run dry.
    fn flowing_valve(&self) -> Option<u8> {
        if self.level(self.pump_pin) != PinLevel::High {
            return None;
        }
        self.valve_pins
            .iter()
            .enumerate()
            .find(|(idx, pin)| {
                self.level(**pin) == PinLevel::High && !self.empty_valves.contains(&(*idx as u8))
            })
            .map(|(idx, _)| idx as u8)
    }

    /// Integrate flow up to `now`. Called lazily from every read and pin
    /// write, so the physics track wall time without a dedicated thread.
    fn advance(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.last_advance);
        self.last_advance = now;
        if self.glass_on && self.flowing_valve().is_some() {
            self.poured_g += self.flow_g_per_s * dt.as_secs_f64();
        }
    }

    /// Calibrated weight on the cell right now.
    pub fn weight_g(&self) -> f64 {
        if self.glass_on {
            self.glass_weight_g + self.poured_g
        } else {
            0.0
        }
    }
}

/// Handle that vends the simulated scale and pin bank over one shared
/// state.
#[derive(Clone)]
pub struct SimRig {
    state: Arc<Mutex<RigState>>,
}

impl SimRig {
    pub fn new(valve_pins: Vec<u8>, pump_pin: u8) -> Self {
        Self {
            state: Arc::new(Mutex::new(RigState::new(valve_pins, pump_pin))),
        }
    }

    pub fn scale(&self) -> SimScale {
        SimScale {
            state: Arc::clone(&self.state),
            offset_raw: 0.0,
            counts_per_gram: 1.0,
            ripple: 0,
        }
    }

    pub fn pins(&self) -> SimPins {
        SimPins {
            state: Arc::clone(&self.state),
        }
    }

    /// Direct access for operator commands (glass on/off, empty valves).
    pub fn shared(&self) -> Arc<Mutex<RigState>> {
        Arc::clone(&self.state)
    }
}

/// Simulated load cell. Readings follow the rig physics plus a small
/// deterministic ripple so loops see realistic jitter.
pub struct SimScale {
    state: Arc<Mutex<RigState>>,
    offset_raw: f64,
    counts_per_gram: f64,
    ripple: u32,
}

impl Scale for SimScale {
    fn read_grams(
        &mut self,
        _timeout: Duration,
    ) -> std::result::Result<f64, Box<dyn std::error::Error + Send + Sync>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| HwError::Gpio("sim rig poisoned".into()))?;
        state.advance(Instant::now());
        self.ripple = self.ripple.wrapping_add(1);
        let ripple = f64::from(self.ripple % 5) * 0.01 - 0.02;
        Ok(state.weight_g() + ripple)
    }

    fn average_raw(
        &mut self,
        _timeout: Duration,
    ) -> std::result::Result<f64, Box<dyn std::error::Error + Send + Sync>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| HwError::Gpio("sim rig poisoned".into()))?;
        state.advance(Instant::now());
        Ok(state.weight_g() * self.counts_per_gram + self.offset_raw)
    }

    fn set_offset(&mut self, offset_raw: f64) {
        self.offset_raw = offset_raw;
    }

    fn set_ratio(&mut self, counts_per_gram: f64) {
        self.counts_per_gram = counts_per_gram;
    }
}

/// Simulated digital pin bank.
pub struct SimPins {
    state: Arc<Mutex<RigState>>,
}

impl PinBank for SimPins {
    fn set_pin(
        &mut self,
        pin: u8,
        level: PinLevel,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| HwError::Gpio("sim rig poisoned".into()))?;
        // Settle flow for the old pin state before switching.
        state.advance(Instant::now());
        state.levels.insert(pin, level);
        tracing::trace!(pin, ?level, "sim pin write");
        Ok(())
    }
}

/// Indicator that reports effect changes to the log stream.
#[derive(Debug, Default)]
pub struct ConsoleLight {
    last: Option<LightEffect>,
}

impl Indicator for ConsoleLight {
    fn apply(&mut self, effect: LightEffect) {
        if self.last != Some(effect) {
            tracing::debug!(?effect, "status light");
            self.last = Some(effect);
        }
    }

    fn tick(&mut self) {}
}

#[cfg(feature = "hardware")]
pub use hardware::{GpioPins, HardwareScale};

#[cfg(feature = "hardware")]
mod hardware {
    use super::*;
    use crate::error::Result;
    use crate::hx711::Hx711;

    /// HX711-backed load cell applying the linear offset/ratio transform.
    pub struct HardwareScale {
        hx711: Hx711,
        offset_raw: f64,
        counts_per_gram: f64,
        avg_samples: u32,
    }

    impl HardwareScale {
        pub fn try_new(dt_pin: u8, sck_pin: u8, gain_pulses: u8) -> Result<Self> {
            let gpio = rppal::gpio::Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
            let dt = gpio
                .get(dt_pin)
                .map_err(|e| HwError::Gpio(e.to_string()))?
                .into_input();
            let sck = gpio
                .get(sck_pin)
                .map_err(|e| HwError::Gpio(e.to_string()))?
                .into_output();
            Ok(Self {
                hx711: Hx711::new(dt, sck, gain_pulses)?,
                offset_raw: 0.0,
                counts_per_gram: 1.0,
                avg_samples: 10,
            })
        }
    }

    impl Scale for HardwareScale {
        fn read_grams(
            &mut self,
            timeout: Duration,
        ) -> std::result::Result<f64, Box<dyn std::error::Error + Send + Sync>> {
            let raw = self.hx711.read_with_timeout(timeout)?;
            let ratio = if self.counts_per_gram == 0.0 {
                1.0
            } else {
                self.counts_per_gram
            };
            Ok((f64::from(raw) - self.offset_raw) / ratio)
        }

        fn average_raw(
            &mut self,
            timeout: Duration,
        ) -> std::result::Result<f64, Box<dyn std::error::Error + Send + Sync>> {
            let mut sum = 0.0;
            for _ in 0..self.avg_samples {
                sum += f64::from(self.hx711.read_with_timeout(timeout)?);
            }
            Ok(sum / f64::from(self.avg_samples))
        }

        fn set_offset(&mut self, offset_raw: f64) {
            self.offset_raw = offset_raw;
        }

        fn set_ratio(&mut self, counts_per_gram: f64) {
            self.counts_per_gram = counts_per_gram;
        }
    }

    /// GPIO output bank for the pump and valve pins.
    pub struct GpioPins {
        pins: std::collections::HashMap<u8, rppal::gpio::OutputPin>,
    }

    impl GpioPins {
        pub fn try_new(pin_numbers: &[u8]) -> Result<Self> {
            let gpio = rppal::gpio::Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
            let mut pins = std::collections::HashMap::new();
            for &n in pin_numbers {
                let mut pin = gpio
                    .get(n)
                    .map_err(|e| HwError::Gpio(e.to_string()))?
                    .into_output();
                pin.set_low();
                pins.insert(n, pin);
            }
            Ok(Self { pins })
        }
    }

    impl PinBank for GpioPins {
        fn set_pin(
            &mut self,
            pin: u8,
            level: PinLevel,
        ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            let out = self
                .pins
                .get_mut(&pin)
                .ok_or_else(|| HwError::Gpio(format!("pin {pin} not claimed")))?;
            match level {
                PinLevel::High => out.set_high(),
                PinLevel::Low => out.set_low(),
            }
            Ok(())
        }
    }
}
