//! Server side of the endpoint handshake.
//!
//! The server is launcher-owned: it holds the laid-out shared-memory file
//! and, per region, the two interrupt endpoints wired to the guest side. A
//! connecting participant names a region and receives duplicates of those
//! descriptors. The socket is drained by a single thread; opens never run
//! concurrently.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::{AsFd, AsRawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

use crate::error::EndpointError;
use crate::fdpass::send_with_fds;
use crate::interrupt::InterruptEndpoint;
use crate::{MAX_NAME_LEN, PROTOCOL_VERSION};

/// Per-region descriptors the server vends.
///
/// `incoming`/`outgoing` are from the connecting participant's perspective:
/// the participant reads `incoming` and writes `outgoing`.
pub struct RegionEntry {
    pub incoming: InterruptEndpoint,
    pub outgoing: InterruptEndpoint,
}

/// Iterative endpoint server for one launcher instance.
pub struct EndpointServer {
    listener: UnixListener,
    shared_memory: File,
    regions: HashMap<String, RegionEntry>,
}

impl EndpointServer {
    /// Bind the server socket. A stale socket file from a previous launcher
    /// run is removed first.
    pub fn bind(
        socket: &Path,
        shared_memory: File,
        regions: HashMap<String, RegionEntry>,
    ) -> std::io::Result<Self> {
        if let Some(dir) = socket.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let _ = std::fs::remove_file(socket);
        let listener = UnixListener::bind(socket)?;
        Ok(Self {
            listener,
            shared_memory,
            regions,
        })
    }

    /// Accept one connection and run the handshake to completion.
    ///
    /// Handshake failures poison only that connection; the server stays up.
    pub fn serve_one(&self) -> Result<(), EndpointError> {
        let (stream, _) = self.listener.accept().map_err(EndpointError::Io)?;
        self.handshake(stream)
    }

    /// Serve connections until accept fails, logging per-connection errors.
    pub fn run(&self) {
        loop {
            match self.serve_one() {
                Ok(()) => {}
                Err(EndpointError::Io(e)) => {
                    tracing::warn!("endpoint server accept/serve failed: {}", e);
                    return;
                }
                Err(e) => tracing::warn!("endpoint handshake failed: {}", e),
            }
        }
    }

    fn handshake(&self, mut stream: UnixStream) -> Result<(), EndpointError> {
        stream.write_all(&PROTOCOL_VERSION.to_le_bytes())?;

        let mut len = [0u8; 2];
        stream
            .read_exact(&mut len)
            .map_err(|_| EndpointError::Handshake("short name-length frame"))?;
        let len = u16::from_le_bytes(len) as usize;
        if len == 0 || len > MAX_NAME_LEN {
            return Err(EndpointError::Handshake("region name length out of range"));
        }

        let mut name = vec![0u8; len];
        stream
            .read_exact(&mut name)
            .map_err(|_| EndpointError::Handshake("short name frame"))?;
        let name = String::from_utf8(name)
            .map_err(|_| EndpointError::Handshake("region name is not utf-8"))?;

        let entry = self
            .regions
            .get(&name)
            .ok_or(EndpointError::UnknownRegion(name))?;

        let control_data = 0u64;
        send_with_fds(
            stream.as_fd(),
            &control_data.to_le_bytes(),
            &[
                entry.incoming.as_raw_fd(),
                entry.outgoing.as_raw_fd(),
                self.shared_memory.as_raw_fd(),
            ],
        )
        .map_err(EndpointError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::connect;
    use std::io::{Seek, SeekFrom, Write as _};

    fn scratch_file(contents: &[u8]) -> File {
        let path = std::env::temp_dir().join(format!(
            "vsoc-endpoint-test-{}-{:p}",
            std::process::id(),
            &contents
        ));
        let mut f = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        let _ = std::fs::remove_file(&path);
        f.write_all(contents).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        f
    }

    #[test]
    fn handshake_round_trip() {
        let dir = std::env::temp_dir().join(format!("vsoc-hs-{}", std::process::id()));
        let socket = socket_in(&dir);

        let mut regions = HashMap::new();
        regions.insert(
            "input".to_owned(),
            RegionEntry {
                incoming: InterruptEndpoint::new().unwrap(),
                outgoing: InterruptEndpoint::new().unwrap(),
            },
        );
        let server =
            EndpointServer::bind(&socket, scratch_file(b"vsoc-shared"), regions).unwrap();

        let handle = std::thread::spawn(move || server.serve_one());
        let endpoints = connect(&socket, "input").unwrap();
        handle.join().unwrap().unwrap();

        assert_eq!(endpoints.control_data, 0);
        assert_eq!(
            endpoints.shared_memory.metadata().unwrap().len(),
            b"vsoc-shared".len() as u64
        );

        // The vended endpoints alias the server's: a signal on the client's
        // outgoing fd is observable via its own duplicate.
        endpoints.outgoing.signal().unwrap();
        assert_eq!(endpoints.outgoing.wait().unwrap(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unknown_region_fails_both_ends() {
        let dir = std::env::temp_dir().join(format!("vsoc-hs-unk-{}", std::process::id()));
        let socket = socket_in(&dir);

        let server =
            EndpointServer::bind(&socket, scratch_file(b""), HashMap::new()).unwrap();
        let handle = std::thread::spawn(move || server.serve_one());

        assert!(connect(&socket, "absent").is_err());
        assert!(matches!(
            handle.join().unwrap(),
            Err(EndpointError::UnknownRegion(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    fn socket_in(dir: &Path) -> std::path::PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        dir.join("endpoint.sock")
    }
}
