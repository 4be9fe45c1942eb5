//! Error types for CIPDIP replay

use crate::MacAddr;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Result type alias for replay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for CIPDIP replay
#[derive(Error, Debug)]
pub enum Error {
    /// File or network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Capture file magic is neither pcap nor pcapng
    #[error("Unsupported capture format: {0}")]
    UnsupportedFormat(String),

    /// A block or record header claims more bytes than the file holds
    #[error("Truncated capture at byte {offset}: {needed} more bytes expected")]
    TruncatedCapture { offset: usize, needed: usize },

    /// Capture structure is recognized but a block could not be decoded
    #[error("Malformed capture: {0}")]
    MalformedCapture(String),

    /// Link-layer resolution exhausted every attempt
    #[error("Target {target} unreachable after {attempts} ARP attempt(s)")]
    TargetUnreachable { target: Ipv4Addr, attempts: u32 },

    /// Rewrite would corrupt the frame's payload framing
    #[error("Unsupported rewrite: {0}")]
    UnsupportedRewrite(String),

    /// Resolved MAC of the target changed during the run; `current` is
    /// `None` when no replacement could be resolved
    #[error(
        "Target drifted from {previous} to {}",
        .current.as_ref().map_or_else(|| "an unresolvable address".to_string(), |mac| mac.to_string())
    )]
    TargetDrifted { previous: MacAddr, current: Option<MacAddr> },

    /// Invalid parameter error
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Interface not found
    #[error("Interface '{0}' not found")]
    InterfaceNotFound(String),

    /// Interface error
    #[error("Interface error: {0}")]
    Interface(String),

    /// Live capture error
    #[error("Packet capture error: {0}")]
    Capture(String),

    /// Packet parsing error
    #[error("Packet parsing error: {0}")]
    PacketParsing(String),

    /// Not implemented
    #[error("Feature not implemented: {0}")]
    NotImplemented(String),

    /// Operation interrupted
    #[error("Operation interrupted: {0}")]
    Interrupted(String),
}

impl Error {
    /// Create an invalid parameter error
    pub fn invalid_parameter<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Error::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an unsupported rewrite error with a custom message
    pub fn unsupported_rewrite<S: Into<String>>(msg: S) -> Self {
        Error::UnsupportedRewrite(msg.into())
    }

    /// Create a malformed capture error with a custom message
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Error::MalformedCapture(msg.into())
    }

    /// The capture input itself is unusable; retrying cannot help
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedFormat(_) | Error::TruncatedCapture { .. } | Error::MalformedCapture(_)
        )
    }

    /// Detectable before the first frame is transmitted
    pub fn is_pre_transmission(&self) -> bool {
        self.is_input_error()
            || matches!(
                self,
                Error::UnsupportedRewrite(_)
                    | Error::InvalidParameter { .. }
                    | Error::NotImplemented(_)
                    | Error::TargetUnreachable { .. }
            )
    }
}
