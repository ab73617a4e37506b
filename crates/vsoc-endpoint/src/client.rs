//! Client side of the endpoint handshake.

use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::AsFd;
use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::error::EndpointError;
use crate::fdpass::recv_with_fds;
use crate::interrupt::InterruptEndpoint;
use crate::{MAX_NAME_LEN, PROTOCOL_VERSION};

/// Everything a host-side participant needs to operate a region.
pub struct RegionEndpoints {
    /// Opaque word forwarded from the server, currently zero.
    pub control_data: u64,
    /// Interrupts from the peer land here.
    pub incoming: InterruptEndpoint,
    /// Interrupts to the peer go out here.
    pub outgoing: InterruptEndpoint,
    /// The laid-out shared-memory file.
    pub shared_memory: File,
}

/// Run the handshake for `region_name` against the server at `socket`.
///
/// Connect failures surface as [`EndpointError::Unreachable`]; everything
/// that goes wrong after the connection is established is fatal for this
/// open attempt and surfaces as a handshake or I/O error.
pub fn connect(socket: &Path, region_name: &str) -> Result<RegionEndpoints, EndpointError> {
    if region_name.is_empty() || region_name.len() > MAX_NAME_LEN {
        return Err(EndpointError::Handshake("region name length out of range"));
    }

    let mut stream = UnixStream::connect(socket).map_err(EndpointError::Unreachable)?;

    let mut version = [0u8; 4];
    stream
        .read_exact(&mut version)
        .map_err(|_| EndpointError::Handshake("short version frame"))?;
    let version = u32::from_le_bytes(version);
    if version > PROTOCOL_VERSION {
        return Err(EndpointError::Handshake("server protocol too new"));
    }

    let name = region_name.as_bytes();
    stream.write_all(&(name.len() as u16).to_le_bytes())?;
    stream.write_all(name)?;

    let mut control = [0u8; 8];
    let mut fds = recv_with_fds(stream.as_fd(), &mut control, 3)
        .map_err(|_| EndpointError::Handshake("short control frame"))?;
    if fds.len() != 3 {
        return Err(EndpointError::Handshake("expected exactly three descriptors"));
    }
    let shared_memory = File::from(fds.pop().expect("three fds"));
    let outgoing = InterruptEndpoint::from_owned(fds.pop().expect("two fds"));
    let incoming = InterruptEndpoint::from_owned(fds.pop().expect("one fd"));

    Ok(RegionEndpoints {
        control_data: u64::from_le_bytes(control),
        incoming,
        outgoing,
        shared_memory,
    })
}
