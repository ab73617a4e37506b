//! Error type for the endpoint handshake.

use std::io;

/// Errors from connecting to or serving the endpoint socket.
#[derive(Debug)]
pub enum EndpointError {
    /// The server socket could not be reached.
    Unreachable(io::Error),
    /// A frame was short, malformed, or carried an unsupported version.
    Handshake(&'static str),
    /// I/O failed mid-handshake.
    Io(io::Error),
    /// The requested region name is not served.
    UnknownRegion(String),
}

impl std::fmt::Display for EndpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable(e) => write!(f, "endpoint server unreachable: {}", e),
            Self::Handshake(msg) => write!(f, "endpoint handshake failed: {}", msg),
            Self::Io(e) => write!(f, "endpoint i/o error: {}", e),
            Self::UnknownRegion(name) => write!(f, "unknown region {:?}", name),
        }
    }
}

impl std::error::Error for EndpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Unreachable(e) | Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EndpointError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
