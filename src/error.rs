//! Error taxonomy for glasscast.
//!
//! Every failure a cast session can end with maps onto an [`ErrorKind`], so a
//! caller always receives a specific reason rather than a bare failure. The
//! segment server derives its HTTP status from [`Error::http_status`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::dlna::UpnpFault;

/// Copyable classification of an [`Error`], reported in session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CaptureUnavailable,
    EncoderCrashed,
    SegmentEvicted,
    SegmentNotFound,
    DiscoveryTimeout,
    DeviceUnreachable,
    DeviceRejected,
    ProtocolMalformed,
    SourceNotSet,
    InvalidTransition,
    Config,
    Io,
    Tool,
    ShuttingDown,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::CaptureUnavailable => "capture_unavailable",
            ErrorKind::EncoderCrashed => "encoder_crashed",
            ErrorKind::SegmentEvicted => "segment_evicted",
            ErrorKind::SegmentNotFound => "segment_not_found",
            ErrorKind::DiscoveryTimeout => "discovery_timeout",
            ErrorKind::DeviceUnreachable => "device_unreachable",
            ErrorKind::DeviceRejected => "device_rejected",
            ErrorKind::ProtocolMalformed => "protocol_malformed",
            ErrorKind::SourceNotSet => "source_not_set",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::Tool => "tool",
            ErrorKind::ShuttingDown => "shutting_down",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Unified error type covering capture, encoding, serving and device control.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The capture region is invalid or no display is available.
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// The encoder child process exited without being asked to.
    #[error("Encoder crashed ({})", describe_exit(.code))]
    EncoderCrashed {
        /// Exit code, `None` when the process was killed by a signal.
        code: Option<i32>,
    },

    /// The requested segment was produced but has left the retention window.
    #[error("Segment {sequence} has been evicted")]
    SegmentEvicted { sequence: u64 },

    /// The requested segment does not exist and did not appear in time.
    #[error("Segment {sequence} not found")]
    SegmentNotFound { sequence: u64 },

    /// No renderer answered within the scan window.
    #[error("No renderers responded within {0:?}")]
    DiscoveryTimeout(Duration),

    /// A renderer could not be reached (connect failure, timeout, reset).
    #[error("Device unreachable [{device}]: {message}")]
    DeviceUnreachable { device: String, message: String },

    /// A renderer answered a control command with an error response.
    #[error("Device rejected {action} [{device}]: HTTP {status}{}", describe_fault(.fault))]
    DeviceRejected {
        device: String,
        action: String,
        status: u16,
        fault: Option<UpnpFault>,
    },

    /// A discovery or description response could not be parsed.
    #[error("Malformed response from {origin}: {message}")]
    ProtocolMalformed { origin: String, message: String },

    /// `Play` was requested before the renderer accepted a stream source.
    #[error("Play refused: no stream source accepted by {0}")]
    SourceNotSet(String),

    /// A session transition that the state machine does not allow.
    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Configuration failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// An external tool could not be located or started.
    #[error("Tool error [{tool}]: {message}")]
    Tool { tool: String, message: String },

    /// The segment server no longer accepts waits.
    #[error("Segment server is shutting down")]
    ShuttingDown,

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn describe_fault(fault: &Option<UpnpFault>) -> String {
    match fault {
        Some(fault) => format!(", UPnP error {} ({})", fault.code, fault.description),
        None => String::new(),
    }
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CaptureUnavailable(_) => ErrorKind::CaptureUnavailable,
            Error::EncoderCrashed { .. } => ErrorKind::EncoderCrashed,
            Error::SegmentEvicted { .. } => ErrorKind::SegmentEvicted,
            Error::SegmentNotFound { .. } => ErrorKind::SegmentNotFound,
            Error::DiscoveryTimeout(_) => ErrorKind::DiscoveryTimeout,
            Error::DeviceUnreachable { .. } => ErrorKind::DeviceUnreachable,
            Error::DeviceRejected { .. } => ErrorKind::DeviceRejected,
            Error::ProtocolMalformed { .. } => ErrorKind::ProtocolMalformed,
            Error::SourceNotSet(_) => ErrorKind::SourceNotSet,
            Error::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Error::Config(_) => ErrorKind::Config,
            Error::Io { .. } => ErrorKind::Io,
            Error::Tool { .. } => ErrorKind::Tool,
            Error::ShuttingDown => ErrorKind::ShuttingDown,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the control retry layer may repeat the failed operation.
    ///
    /// Only renderer communication failures qualify: unreachable devices and
    /// server-side (5xx) rejections. Encoder crashes and capture failures are
    /// never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::DeviceUnreachable { .. } => true,
            Error::DeviceRejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Map this error to the status the segment server responds with.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::SegmentEvicted { .. } => 410,
            Error::SegmentNotFound { .. } => 404,
            Error::ShuttingDown => 503,
            Error::Config(_) => 400,
            _ => 500,
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::ProtocolMalformed`].
    pub fn malformed(origin: impl fmt::Display, message: impl Into<String>) -> Self {
        Error::ProtocolMalformed {
            origin: origin.to_string(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::DeviceUnreachable`].
    pub fn unreachable(device: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::DeviceUnreachable {
            device: device.into(),
            message: message.to_string(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_crashed_display() {
        let err = Error::EncoderCrashed { code: Some(1) };
        assert_eq!(err.to_string(), "Encoder crashed (exit code 1)");
        assert_eq!(err.kind(), ErrorKind::EncoderCrashed);

        let killed = Error::EncoderCrashed { code: None };
        assert_eq!(killed.to_string(), "Encoder crashed (terminated by signal)");
    }

    #[test]
    fn device_rejected_display_with_fault() {
        let err = Error::DeviceRejected {
            device: "Living Room TV".into(),
            action: "Play".into(),
            status: 500,
            fault: Some(UpnpFault {
                code: 701,
                description: "Transition not available".into(),
            }),
        };
        assert_eq!(
            err.to_string(),
            "Device rejected Play [Living Room TV]: HTTP 500, UPnP error 701 (Transition not available)"
        );
        assert!(err.is_transient());
    }

    #[test]
    fn segment_errors_map_to_distinct_statuses() {
        assert_eq!(Error::SegmentEvicted { sequence: 3 }.http_status(), 410);
        assert_eq!(Error::SegmentNotFound { sequence: 3 }.http_status(), 404);
        assert_eq!(Error::ShuttingDown.http_status(), 503);
    }

    #[test]
    fn fatal_errors_are_not_transient() {
        assert!(!Error::EncoderCrashed { code: Some(1) }.is_transient());
        assert!(!Error::CaptureUnavailable("gone".into()).is_transient());
        assert!(!Error::SourceNotSet("tv".into()).is_transient());
        assert!(Error::unreachable("tv", "connection refused").is_transient());

        let bad_request = Error::DeviceRejected {
            device: "tv".into(),
            action: "SetAVTransportURI".into(),
            status: 400,
            fault: None,
        };
        assert!(!bad_request.is_transient());
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = Error::from(io_err);
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn kind_display_is_snake_case() {
        assert_eq!(ErrorKind::DeviceUnreachable.to_string(), "device_unreachable");
        assert_eq!(
            serde_json::to_string(&ErrorKind::EncoderCrashed).unwrap(),
            "\"encoder_crashed\""
        );
    }
}
