//! Valve and pump actuation over a digital pin bank.

use crate::error::{MixerError, Result, map_adapter_error};
use eyre::WrapErr;
use mixer_traits::{PinBank, PinLevel};

/// Maps internal valve indices to output pins and drives them together with
/// the shared pump pin.
///
/// At most one valve is open at a time. Opening an already-open valve is a
/// no-op, so a repeated resume after stall recovery never double-actuates.
pub struct ValveBank<P: PinBank> {
    pins: P,
    valve_pins: Vec<u8>,
    pump_pin: u8,
    open: Option<u8>,
}

impl<P: PinBank> ValveBank<P> {
    pub fn new(pins: P, valve_pins: Vec<u8>, pump_pin: u8) -> Self {
        Self {
            pins,
            valve_pins,
            pump_pin,
            open: None,
        }
    }

    pub fn valve_count(&self) -> usize {
        self.valve_pins.len()
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }

    /// Currently-open valve index, if any.
    pub fn open_valve(&self) -> Option<u8> {
        self.open
    }

    /// Select the valve, then drive the pump.
    pub fn open(&mut self, valve: u8) -> Result<()> {
        if self.open == Some(valve) {
            return Ok(());
        }
        if self.open.is_some() {
            self.close()?;
        }
        let pin = *self
            .valve_pins
            .get(usize::from(valve))
            .ok_or_else(|| eyre::Report::new(MixerError::UnknownValve(valve)))?;
        let pump = self.pump_pin;
        self.set(pin, PinLevel::High)?;
        self.set(pump, PinLevel::High)?;
        self.open = Some(valve);
        tracing::trace!(valve, "valve open, pump on");
        Ok(())
    }

    /// Pump off first, then the valve, so the manifold is never driven
    /// against a closed path. A no-op when nothing is open. Both pins are
    /// written even if the first write fails.
    pub fn close(&mut self) -> Result<()> {
        let Some(valve) = self.open else {
            return Ok(());
        };
        let pin = self.valve_pins[usize::from(valve)];
        let pump = self.pump_pin;
        let pump_res = self.set(pump, PinLevel::Low);
        let valve_res = self.set(pin, PinLevel::Low);
        self.open = None;
        pump_res?;
        valve_res?;
        tracing::trace!(valve, "pump off, valve closed");
        Ok(())
    }

    fn set(&mut self, pin: u8, level: PinLevel) -> Result<()> {
        self.pins
            .set_pin(pin, level)
            .map_err(|e| eyre::Report::new(map_adapter_error(&*e)))
            .wrap_err("set pin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::RecordingPins;

    fn bank() -> ValveBank<RecordingPins> {
        ValveBank::new(RecordingPins::default(), vec![40, 41, 42], 14)
    }

    #[test]
    fn open_drives_valve_then_pump() {
        let mut bank = bank();
        bank.open(1).unwrap();
        assert_eq!(
            bank.pins.writes,
            vec![(41, PinLevel::High), (14, PinLevel::High)]
        );
        assert_eq!(bank.open_valve(), Some(1));
    }

    #[test]
    fn close_drives_pump_then_valve() {
        let mut bank = bank();
        bank.open(0).unwrap();
        bank.pins.writes.clear();
        bank.close().unwrap();
        assert_eq!(
            bank.pins.writes,
            vec![(14, PinLevel::Low), (40, PinLevel::Low)]
        );
        assert_eq!(bank.open_valve(), None);
    }

    #[test]
    fn reopening_same_valve_is_a_no_op() {
        let mut bank = bank();
        bank.open(2).unwrap();
        let writes_after_first = bank.pins.writes.len();
        bank.open(2).unwrap();
        assert_eq!(bank.pins.writes.len(), writes_after_first);
    }

    #[test]
    fn close_without_open_touches_no_pins() {
        let mut bank = bank();
        bank.close().unwrap();
        assert!(bank.pins.writes.is_empty());
    }

    #[test]
    fn unknown_valve_is_rejected_before_any_pin_write() {
        let mut bank = bank();
        let err = bank.open(7).expect_err("valve 7 of 3 should fail");
        assert!(format!("{err}").contains("unknown valve 7"));
        assert!(bank.pins.writes.is_empty());
    }

    #[test]
    fn switching_valves_closes_the_first() {
        let mut bank = bank();
        bank.open(0).unwrap();
        bank.open(1).unwrap();
        assert_eq!(
            bank.pins.writes,
            vec![
                (40, PinLevel::High),
                (14, PinLevel::High),
                (14, PinLevel::Low),
                (40, PinLevel::Low),
                (41, PinLevel::High),
                (14, PinLevel::High),
            ]
        );
    }
}
