use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum MixerError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("timeout waiting for sensor")]
    Timeout,
    #[error("unknown valve {0}")]
    UnknownValve(u8),
    #[error("job source error: {0}")]
    JobSource(String),
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

/// Map a boxed adapter error to a typed MixerError, with special handling
/// for hardware errors when the `hardware-errors` feature is on.
pub(crate) fn map_adapter_error(e: &(dyn std::error::Error + 'static)) -> MixerError {
    #[cfg(feature = "hardware-errors")]
    if let Some(hw) = e.downcast_ref::<mixer_hardware::HwError>() {
        return match hw {
            mixer_hardware::HwError::Timeout | mixer_hardware::HwError::DataReadyTimeout => {
                MixerError::Timeout
            }
            other => MixerError::HardwareFault(other.to_string()),
        };
    }
    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        MixerError::Timeout
    } else {
        MixerError::Hardware(s)
    }
}
