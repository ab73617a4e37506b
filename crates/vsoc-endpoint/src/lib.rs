//! vsoc-endpoint: the endpoint-server wire protocol.
//!
//! A host-side participant obtains its shared-memory file descriptor and its
//! two interrupt endpoints for a named region by talking to the endpoint
//! server over a local stream socket. This crate implements both ends of that
//! handshake plus the primitives they share.
//!
//! # Wire protocol
//!
//! ```text
//! server → client   u32le protocol_version
//! client → server   u16le name_length, then name_length bytes of region name
//! server → client   u64le control_data
//!                   + SCM_RIGHTS: [incoming_interrupt, outgoing_interrupt, shared_memory]
//! ```
//!
//! Closing the socket is the only disconnect signal; there is no orderly
//! teardown. Any short read or write is fatal for the connection on both
//! ends.
//!
//! The interrupt endpoints are eventfds: writing any nonzero 64-bit value
//! delivers one interrupt, reading blocks until at least one is pending and
//! returns the coalesced count.

#![forbid(unsafe_op_in_unsafe_fn)]

mod client;
mod error;
mod fdpass;
mod interrupt;
mod path;
mod server;

pub use client::{connect, RegionEndpoints};
pub use error::EndpointError;
pub use interrupt::InterruptEndpoint;
pub use path::{default_domain, socket_path};
pub use server::{EndpointServer, RegionEntry};

/// Protocol version sent by the server as the first frame.
///
/// A client that sees a version greater than this closes the connection.
pub const PROTOCOL_VERSION: u32 = 0;

/// Upper bound on the region-name frame, matching the descriptor capacity
/// in the shared file (16 bytes including the terminating null).
pub const MAX_NAME_LEN: usize = 15;
