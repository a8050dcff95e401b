pub use message::ErrorCode;

/// Error pairs a wire-stable [`ErrorCode`] with a human-readable message.
/// Synchronous API failures return it directly; asynchronous failures reach
/// their caller as a CmdResult carrying the same code.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn invalid_graph(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidGraph, message)
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RuntimeClosed, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProtocolError, message)
    }
}

fn value_code(err: &value::Error) -> ErrorCode {
    match err {
        value::Error::TypeMismatch { .. } => ErrorCode::InvalidType,
        value::Error::OutOfRange { .. } => ErrorCode::InvalidArgument,
        value::Error::PathNotFound(_) => ErrorCode::ValueNotFound,
        value::Error::InvalidPath(_) => ErrorCode::InvalidArgument,
        value::Error::Json(_) | value::Error::NonFiniteNumber(_) => ErrorCode::InvalidJson,
        value::Error::UnserializableProperty => ErrorCode::UnserializableProperty,
        value::Error::InvalidWire(_) | value::Error::Io(_) => ErrorCode::ProtocolError,
    }
}

impl From<value::Error> for Error {
    fn from(err: value::Error) -> Self {
        Self::new(value_code(&err), err.to_string())
    }
}

impl From<message::Error> for Error {
    fn from(err: message::Error) -> Self {
        let code = match &err {
            message::Error::MessageInUse => ErrorCode::MessageInUse,
            message::Error::InvalidName(_)
            | message::Error::NoSuchField(..)
            | message::Error::BufferLocked
            | message::Error::BufferNotLocked
            | message::Error::WrongLockToken => ErrorCode::InvalidArgument,
            message::Error::InvalidWire(_) | message::Error::Io(_) => ErrorCode::ProtocolError,
            message::Error::Value(err) => value_code(err),
        };
        Self::new(code, err.to_string())
    }
}

impl From<models::Error> for Error {
    fn from(err: models::Error) -> Self {
        let code = match &err {
            models::Error::InvalidGraph(_) => ErrorCode::InvalidGraph,
            models::Error::InvalidManifest(_) => ErrorCode::InvalidManifest,
            models::Error::Json(_) => ErrorCode::InvalidJson,
        };
        Self::new(code, err.to_string())
    }
}
