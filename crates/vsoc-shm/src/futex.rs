//! Futex wrappers over words in shared memory.
//!
//! The words live in a `MAP_SHARED` mapping visible to both sides, so the
//! operations deliberately do NOT use `FUTEX_PRIVATE_FLAG`: wake-ups must
//! cross the process (and VM) boundary through the kernel's shared-futex
//! path.

use std::io;
use std::ptr;
use std::sync::atomic::AtomicU32;

/// Sleep on `word` while its value equals `expected`.
///
/// Returns when woken, or immediately if the value already differs. Spurious
/// returns are allowed; callers re-check the word and retry.
pub fn wait(word: &AtomicU32, expected: u32) {
    loop {
        // SAFETY: `word` is a valid, 4-byte-aligned u32 for the duration of
        // the call; the futex syscall only reads it.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_futex,
                word.as_ptr(),
                libc::FUTEX_WAIT,
                expected,
                ptr::null::<libc::timespec>(),
            )
        };
        if ret == 0 {
            return;
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            // Value changed before we went to sleep.
            Some(libc::EAGAIN) => return,
            Some(libc::EINTR) => continue,
            _ => {
                tracing::warn!("futex wait failed: {}", err);
                return;
            }
        }
    }
}

/// Wake every thread currently sleeping on `word`. Returns the number of
/// threads woken.
pub fn wake_all(word: &AtomicU32) -> u32 {
    // SAFETY: `word` is a valid, 4-byte-aligned u32; FUTEX_WAKE does not
    // dereference the address, it only keys the wait queue.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE,
            i32::MAX,
        )
    };
    if ret < 0 {
        tracing::warn!("futex wake failed: {}", io::Error::last_os_error());
        return 0;
    }
    ret as u32
}
