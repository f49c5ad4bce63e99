use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error category reported to clients in the `kind` field of an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidParameter,
    DeviceUnavailable,
    Timeout,
    Busy,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidParameter => "invalid_parameter",
            ErrorKind::DeviceUnavailable => "device_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Busy => "busy",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Step of a sample request in which a device-level error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting in the FIFO queue for the device lock
    Lock,
    Configure,
    Acquire,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Lock => "lock",
            Phase::Configure => "configure",
            Phase::Acquire => "acquire",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Device busy: {0}")]
    Busy(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("{phase} failed: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: Box<DaqError>,
    },
    #[error("IO error: {source} ({context})")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Server error ({kind}): {message}")]
    Remote {
        kind: ErrorKind,
        phase: Option<Phase>,
        message: String,
    },
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl DaqError {
    /// Wrap an error with the phase it happened in. An error that is already
    /// tagged keeps its original phase.
    pub fn in_phase(self, phase: Phase) -> Self {
        match self {
            tagged @ DaqError::Phase { .. } => tagged,
            other => DaqError::Phase {
                phase,
                source: Box::new(other),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DaqError::InvalidParameter(_) | DaqError::Protocol(_) => ErrorKind::InvalidParameter,
            DaqError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            DaqError::Timeout(_) => ErrorKind::Timeout,
            DaqError::Busy(_) => ErrorKind::Busy,
            DaqError::Phase { source, .. } => source.kind(),
            DaqError::Remote { kind, .. } => *kind,
            DaqError::Io { source, .. } => match source.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ErrorKind::Timeout,
                _ => ErrorKind::Internal,
            },
            DaqError::Internal(_) | DaqError::Config(_) => ErrorKind::Internal,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            DaqError::Phase { phase, .. } => Some(*phase),
            DaqError::Remote { phase, .. } => *phase,
            _ => None,
        }
    }

    /// Message without the phase prefix, for the wire `message` field.
    pub fn detail(&self) -> String {
        match self {
            DaqError::Phase { source, .. } => source.detail(),
            DaqError::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub(crate) fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        DaqError::Io {
            source,
            context: context.into(),
        }
    }
}

impl From<std::io::Error> for DaqError {
    fn from(source: std::io::Error) -> Self {
        DaqError::Io {
            source,
            context: "socket I/O".to_string(),
        }
    }
}

impl From<serde_json::Error> for DaqError {
    fn from(e: serde_json::Error) -> Self {
        DaqError::Protocol(e.to_string())
    }
}
