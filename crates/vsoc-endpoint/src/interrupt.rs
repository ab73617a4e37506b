//! Interrupt endpoints.
//!
//! One endpoint per direction per region. Backed by an eventfd: a write of
//! any nonzero 64-bit value delivers one interrupt, a blocking read returns
//! the coalesced count since the last read.

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// One direction of the interrupt channel between the two sides of a region.
pub struct InterruptEndpoint {
    fd: OwnedFd,
}

impl InterruptEndpoint {
    /// Create a fresh endpoint (launcher side).
    pub fn new() -> io::Result<Self> {
        // SAFETY: eventfd takes no pointers.
        let raw = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: eventfd succeeded; raw is a fresh descriptor we own.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(raw) },
        })
    }

    /// Adopt an endpoint received over the handshake.
    pub fn from_owned(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Deliver one interrupt to whoever reads this endpoint.
    pub fn signal(&self) -> io::Result<()> {
        let buf = 1u64.to_ne_bytes();
        loop {
            // SAFETY: fd is open, buf is 8 valid bytes.
            let ret = unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    buf.as_ptr().cast(),
                    buf.len(),
                )
            };
            if ret == buf.len() as isize {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Block until at least one interrupt is pending; return the coalesced
    /// count. Returns 0 only when the peer end of a stream-backed endpoint
    /// has closed, which the caller treats as shutdown.
    pub fn wait(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        loop {
            // SAFETY: fd is open, buf is 8 writable bytes.
            let ret = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                )
            };
            if ret == buf.len() as isize {
                return Ok(u64::from_ne_bytes(buf));
            }
            if ret == 0 {
                return Ok(0);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Duplicate the endpoint, e.g. to vend it over the handshake while
    /// keeping the original.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            fd: self.fd.try_clone()?,
        })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl std::fmt::Debug for InterruptEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptEndpoint")
            .field("fd", &self.fd.as_raw_fd())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_then_wait() {
        let ep = InterruptEndpoint::new().unwrap();
        ep.signal().unwrap();
        assert_eq!(ep.wait().unwrap(), 1);
    }

    #[test]
    fn signals_coalesce() {
        let ep = InterruptEndpoint::new().unwrap();
        ep.signal().unwrap();
        ep.signal().unwrap();
        ep.signal().unwrap();
        assert_eq!(ep.wait().unwrap(), 3);
    }

    #[test]
    fn clone_shares_the_counter() {
        let ep = InterruptEndpoint::new().unwrap();
        let other = ep.try_clone().unwrap();
        other.signal().unwrap();
        assert_eq!(ep.wait().unwrap(), 1);
    }
}
