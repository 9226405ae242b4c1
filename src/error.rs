use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimerError {
    #[error("invalid slot count {requested}, max = {max}")]
    CapacityExceeded { requested: usize, max: usize },

    #[error("invalid histogram range: min={min} max={max} bin_width={bin_width}")]
    InvalidRange { min: f64, max: f64, bin_width: f64 },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TimerError>;
