use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configured duration is NaN or out of range, or an alert gap is not positive.
    /// Schedule gaps may be zero or negative; such a rule is simply skipped.
    #[error("Invalid duration for {field}: {value}")]
    InvalidDuration { field: &'static str, value: f64 },
}

pub type Result<T> = std::result::Result<T, CoreError>;
