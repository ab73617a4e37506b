//! Host-side control backend.
//!
//! The host participant holds the shared file plus the two interrupt
//! endpoints vended by the endpoint server. The mapping covers exactly the
//! region's byte range within the file.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::ptr;

use vsoc_endpoint::InterruptEndpoint;

pub(super) struct HostBackend {
    shared_memory: File,
    incoming: InterruptEndpoint,
    outgoing: InterruptEndpoint,
}

impl HostBackend {
    pub(super) fn new(
        shared_memory: File,
        incoming: InterruptEndpoint,
        outgoing: InterruptEndpoint,
    ) -> Self {
        Self {
            shared_memory,
            incoming,
            outgoing,
        }
    }

    pub(super) fn map(&self, len: usize, file_offset: u32) -> io::Result<*mut u8> {
        // SAFETY: the fd is open; the kernel validates the range. A region's
        // begin offset is page-aligned by construction.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.shared_memory.as_raw_fd(),
                file_offset as libc::off_t,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(addr.cast())
    }

    pub(super) fn interrupt_peer(&self) {
        if let Err(e) = self.outgoing.signal() {
            tracing::warn!("peer interrupt failed: {}", e);
        }
    }

    pub(super) fn self_interrupt(&self) {
        // Writing our own incoming endpoint wakes our reader.
        if let Err(e) = self.incoming.signal() {
            tracing::warn!("self interrupt failed: {}", e);
        }
    }

    pub(super) fn wait(&self) -> io::Result<u64> {
        self.incoming.wait()
    }
}
