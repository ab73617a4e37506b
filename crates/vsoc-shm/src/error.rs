//! Error kinds exposed by the runtime.

use std::io;

use vsoc_endpoint::EndpointError;

/// Recoverable failures of the construction and per-call paths.
///
/// Invariant violations never appear here: they abort (see the crate docs).
#[derive(Debug)]
pub enum Error {
    /// Region name absent in the shared-file layout.
    NotFound(String),
    /// Shared-file major version disagrees with ours.
    VersionMismatch { expected: u16, found: u16 },
    /// Endpoint server socket could not be reached.
    ServerUnreachable(io::Error),
    /// Short or malformed frame during the endpoint handshake.
    HandshakeFailed(&'static str),
    /// mmap failure.
    MapFailed(io::Error),
    /// FD-scoped permission denied: the owner slot is already occupied.
    Busy,
    /// Operation not supported on this side.
    Unsupported,
    /// Internal invariant violation. Call sites treat this as fatal.
    Protocol(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "region {:?} not found", name),
            Self::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "layout major version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Self::ServerUnreachable(e) => write!(f, "endpoint server unreachable: {}", e),
            Self::HandshakeFailed(msg) => write!(f, "endpoint handshake failed: {}", msg),
            Self::MapFailed(e) => write!(f, "mmap failed: {}", e),
            Self::Busy => write!(f, "owner slot already held"),
            Self::Unsupported => write!(f, "not supported on this side"),
            Self::Protocol(msg) => write!(f, "protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ServerUnreachable(e) | Self::MapFailed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EndpointError> for Error {
    fn from(e: EndpointError) -> Self {
        match e {
            EndpointError::Unreachable(io) => Self::ServerUnreachable(io),
            EndpointError::Handshake(msg) => Self::HandshakeFailed(msg),
            EndpointError::Io(_) => Self::HandshakeFailed("i/o failed mid-handshake"),
            EndpointError::UnknownRegion(name) => Self::NotFound(name),
        }
    }
}
