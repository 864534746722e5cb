// Error taxonomy for the transport engine.
//
// Every recoverable condition is reported through `TransportError`, a code
// plus a human readable message. Nothing is stored globally: callers that want
// an "unhandled error" policy pass an `ErrorHandler` explicitly.

use thiserror::Error;

/// Classification of a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Accuracy or cutoff value outside of its valid range.
    AccuracyError,
    /// Missing, negative or non finite density returned by the medium.
    DensityError,
    /// Initial direction is not a unit vector.
    DirectionError,
    /// A randomised mode was requested without a random source.
    MissingRandom,
    /// Decay mode incompatible with the other transport settings.
    DecayError,
    /// Any other inconsistent combination of transport settings.
    ConfigurationError,
    /// The geometry oracle returned an unusable answer.
    MediumError,
    /// Physics tables failed their construction time checks.
    TableError,
    /// A physical input value (energy, limit, ...) is out of range.
    ValueError,
    /// A differential cross section model could not be resolved.
    ModelError,
    /// Serialised data could not be parsed.
    FormatError,
}

/// Error returned by the transport engine.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code:?}: {message}")]
pub struct TransportError {
    pub code: ErrorCode,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn accuracy(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AccuracyError, message)
    }

    pub fn density(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DensityError, message)
    }

    pub fn direction(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DirectionError, message)
    }

    pub fn missing_random(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MissingRandom, message)
    }

    pub fn decay(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DecayError, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message)
    }

    pub fn medium(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MediumError, message)
    }

    pub fn table(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TableError, message)
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValueError, message)
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ModelError, message)
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::FormatError, message)
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::format(err.to_string())
    }
}

/// Policy applied to errors that the caller chose not to handle inline.
pub trait ErrorHandler {
    fn handle(&self, error: &TransportError);
}

/// Reports errors through the `log` facade and lets the caller continue.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl ErrorHandler for LogHandler {
    fn handle(&self, error: &TransportError) {
        log::error!("transport failed: {}", error);
    }
}

/// Aborts the current thread on the first error.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicHandler;

impl ErrorHandler for PanicHandler {
    fn handle(&self, error: &TransportError) {
        panic!("transport failed: {}", error);
    }
}
