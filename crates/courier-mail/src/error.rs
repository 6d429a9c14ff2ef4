/// Failure reported by a [`MailTransport`](crate::MailTransport).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("mail transport not configured: {0}")]
    NotConfigured(String),

    #[error("authorization failed: {0}")]
    Unauthorized(String),

    #[error("message rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("send timed out after {0}s")]
    Timeout(u64),
}

impl TransportError {
    /// True when no further message in the run can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NotConfigured(_) | Self::Unauthorized(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConfigured(_) => "not_configured",
            Self::Unauthorized(_) => "unauthorized",
            Self::Rejected { .. } => "rejected",
            Self::Transient(_) => "transient",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Classify an HTTP status from the send endpoint.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(format!("HTTP {status}: {message}")),
            429 | 500..=599 => Self::Transient(format!("HTTP {status}: {message}")),
            _ => Self::Rejected { status, message },
        }
    }
}

/// Outcome class of one delivery attempt, as the pipeline sees it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The run must stop; remaining documents are left for the next run.
    #[error("{0}")]
    Fatal(TransportError),

    /// Only this message failed.
    #[error("{0}")]
    Message(TransportError),
}

impl From<TransportError> for DeliveryError {
    fn from(e: TransportError) -> Self {
        if e.is_fatal() {
            Self::Fatal(e)
        } else {
            Self::Message(e)
        }
    }
}
