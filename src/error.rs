use thiserror::Error;

/// Errors surfaced to the UI layer.
///
/// Timeouts and user cancellation of a transfer payment are not errors; they
/// are reported as [`crate::payment::PaymentOutcome`] variants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PosError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Network(String),

    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },

    #[error("Invalid response from {source_name}: {detail}")]
    InvalidResponse { source_name: String, detail: String },

    #[error("Another transfer payment is already waiting for the customer")]
    PaymentBusy,

    #[error("A shift is already open ({0})")]
    ShiftAlreadyOpen(i64),

    #[error("No open shift. Open a shift before recording sales")]
    NoOpenShift,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential store error: {0}")]
    Credential(String),
}

impl PosError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        PosError::Validation(msg.into())
    }

    pub(crate) fn invalid_response(source: &str, detail: impl std::fmt::Display) -> Self {
        PosError::InvalidResponse {
            source_name: source.to_string(),
            detail: detail.to_string(),
        }
    }

    /// True for failures raised before any network call was attempted.
    pub fn is_validation(&self) -> bool {
        matches!(self, PosError::Validation(_))
    }
}

impl From<PosError> for String {
    fn from(err: PosError) -> String {
        err.to_string()
    }
}

pub type Result<T> = std::result::Result<T, PosError>;
