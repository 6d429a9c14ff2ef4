use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid time zone: {0}")]
    InvalidTimeZone(String),

    #[error("Invalid send time '{value}': {reason}")]
    InvalidSendTime { value: String, reason: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
