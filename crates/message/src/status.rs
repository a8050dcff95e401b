use serde::{Deserialize, Serialize};

/// StatusCode is the coarse outcome of a command, carried by every result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok = 0,
    Error = 1,
}

impl StatusCode {
    pub fn from_wire(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(StatusCode::Ok),
            1 => Some(StatusCode::Error),
            _ => None,
        }
    }
}

/// ErrorCode refines an Error status. Codes are wire-stable: new members are
/// appended, never renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Generic = 1,
    InvalidJson = 2,
    InvalidArgument = 3,
    InvalidType = 4,
    InvalidGraph = 5,
    RuntimeClosed = 6,
    MsgNotConnected = 7,
    ValueNotFound = 8,
    Timeout = 9,
    ExtensionNotReady = 10,
    AppClosed = 11,
    ProtocolError = 12,
    UnserializableProperty = 13,
    MessageInUse = 14,
    InvalidManifest = 15,
}

impl ErrorCode {
    pub fn from_wire(tag: u8) -> Option<Self> {
        use ErrorCode::*;

        Some(match tag {
            1 => Generic,
            2 => InvalidJson,
            3 => InvalidArgument,
            4 => InvalidType,
            5 => InvalidGraph,
            6 => RuntimeClosed,
            7 => MsgNotConnected,
            8 => ValueNotFound,
            9 => Timeout,
            10 => ExtensionNotReady,
            11 => AppClosed,
            12 => ProtocolError,
            13 => UnserializableProperty,
            14 => MessageInUse,
            15 => InvalidManifest,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
