pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Calibrated weight sensor (load cell behind a serial bridge or ADC).
///
/// Readings are in grams after the linear offset/ratio transform has been
/// applied. `average_raw` returns a rolling-average *uncalibrated* sample;
/// tare and scale calibration are computed from it.
pub trait Scale {
    fn read_grams(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>>;

    /// Averaged raw sample for tare/calibration.
    fn average_raw(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>>;

    /// Raw-counts zero point subtracted from every sample.
    fn set_offset(&mut self, offset_raw: f64);

    /// Raw counts per gram.
    fn set_ratio(&mut self, counts_per_gram: f64);
}

/// Logic level of one digital output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    High,
    Low,
}

/// Bank of binary digital outputs on the actuator bridge.
///
/// The pump and each valve map to one pin each; no PWM.
pub trait PinBank {
    fn set_pin(
        &mut self,
        pin: u8,
        level: PinLevel,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Status-light effect. Latched by `Indicator::apply`; animated effects
/// advance on `Indicator::tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightEffect {
    Solid(Rgb),
    Fade { color: Rgb, ms: u32 },
    Blink { color: Rgb, period_ms: u32 },
    Pulse { color: Rgb, period_ms: u32 },
    Rainbow { period_ms: u32 },
}

/// Status light. Purely cosmetic feedback; implementations must not fail
/// the control loop, so the interface is infallible.
pub trait Indicator {
    /// Latch a new effect. Re-applying the current effect is a no-op.
    fn apply(&mut self, effect: LightEffect);

    /// Advance animations; called once per control-loop iteration.
    fn tick(&mut self);
}
