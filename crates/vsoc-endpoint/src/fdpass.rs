//! SCM_RIGHTS file-descriptor passing over a stream socket.
//!
//! The control frame of the handshake carries exactly three descriptors as
//! ancillary data. These helpers wrap `sendmsg(2)`/`recvmsg(2)` and keep the
//! cmsg pointer arithmetic in one place.

use std::io;
use std::mem;
use std::os::unix::io::{BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

/// Send `bytes` together with `fds` as a single SCM_RIGHTS message.
///
/// A short write is reported as an error; the frame is all-or-nothing at the
/// protocol level.
pub fn send_with_fds(sock: BorrowedFd<'_>, bytes: &[u8], fds: &[RawFd]) -> io::Result<()> {
    let mut iov = libc::iovec {
        iov_base: bytes.as_ptr() as *mut libc::c_void,
        iov_len: bytes.len(),
    };

    let fd_bytes = mem::size_of_val(fds);
    // SAFETY: CMSG_SPACE is a pure size computation.
    let space = unsafe { libc::CMSG_SPACE(fd_bytes as u32) } as usize;
    let mut cbuf = vec![0u8; space];

    // SAFETY: zeroed msghdr is a valid "empty" message.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cbuf.as_mut_ptr().cast();
    msg.msg_controllen = space as _;

    // SAFETY: msg_control points at `space` zeroed bytes, so the first cmsg
    // header is in bounds and writable.
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(fd_bytes as u32) as _;
        ptr::copy_nonoverlapping(
            fds.as_ptr().cast::<u8>(),
            libc::CMSG_DATA(cmsg),
            fd_bytes,
        );
    }

    let n = loop {
        // SAFETY: msg and its buffers stay alive across the call.
        let ret = unsafe { libc::sendmsg(fd_raw(sock), &msg, 0) };
        if ret >= 0 {
            break ret as usize;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    };

    if n != bytes.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            "short write on control frame",
        ));
    }
    Ok(())
}

/// Receive exactly `buf.len()` bytes plus up to `max_fds` descriptors.
///
/// Returns the descriptors in the order the peer sent them. Descriptors are
/// received with CLOEXEC set.
pub fn recv_with_fds(
    sock: BorrowedFd<'_>,
    buf: &mut [u8],
    max_fds: usize,
) -> io::Result<Vec<OwnedFd>> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };

    // SAFETY: CMSG_SPACE is a pure size computation.
    let space = unsafe { libc::CMSG_SPACE((max_fds * mem::size_of::<RawFd>()) as u32) } as usize;
    let mut cbuf = vec![0u8; space];

    // SAFETY: zeroed msghdr is a valid "empty" message.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cbuf.as_mut_ptr().cast();
    msg.msg_controllen = space as _;

    let n = loop {
        // SAFETY: msg and its buffers stay alive across the call.
        let ret = unsafe { libc::recvmsg(fd_raw(sock), &mut msg, libc::MSG_CMSG_CLOEXEC) };
        if ret >= 0 {
            break ret as usize;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    };

    if n != buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "short read on control frame",
        ));
    }

    let mut fds = Vec::new();
    // SAFETY: recvmsg filled msg_control; CMSG_* walk the buffer it points
    // at and we only read within cmsg_len of each header.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data_len = (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                let count = data_len / mem::size_of::<RawFd>();
                let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                for i in 0..count {
                    let raw = ptr::read_unaligned(data.add(i));
                    fds.push(OwnedFd::from_raw_fd(raw));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "ancillary data truncated",
        ));
    }

    Ok(fds)
}

fn fd_raw(fd: BorrowedFd<'_>) -> RawFd {
    use std::os::unix::io::AsRawFd;
    fd.as_raw_fd()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::os::unix::io::AsFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn bytes_and_fds_round_trip() {
        let (a, b) = UnixStream::pair().unwrap();

        let mut payload = tempfile();
        payload.write_all(b"hello").unwrap();
        payload.flush().unwrap();

        use std::os::unix::io::AsRawFd;
        send_with_fds(a.as_fd(), &42u64.to_le_bytes(), &[payload.as_raw_fd()]).unwrap();

        let mut buf = [0u8; 8];
        let fds = recv_with_fds(b.as_fd(), &mut buf, 3).unwrap();
        assert_eq!(u64::from_le_bytes(buf), 42);
        assert_eq!(fds.len(), 1);

        // The received fd references the same file description.
        let mut received = std::fs::File::from(fds.into_iter().next().unwrap());
        received.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = String::new();
        received.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello");
    }

    #[test]
    fn short_peer_close_is_an_error() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(a);
        let mut buf = [0u8; 8];
        assert!(recv_with_fds(b.as_fd(), &mut buf, 3).is_err());
    }

    fn tempfile() -> std::fs::File {
        // tmpfile(3) semantics without a path to clean up.
        let dir = std::env::temp_dir();
        let path = dir.join(format!("vsoc-fdpass-{}", std::process::id()));
        let f = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        let _ = std::fs::remove_file(&path);
        f
    }
}
