//! Userland emulation of FD-scoped permissions.
//!
//! The real mechanism lives in the guest kernel driver: the grant ioctl
//! claims the owner slot and returns a descriptor whose mmap is confined to
//! the granted range while the slot holds the owned value. Userland cannot
//! confine a descriptor, so the emulation performs the same claim and the
//! same checks in the map call itself — identical semantics for everything
//! the tests observe: first-writer-wins claims, range confinement, liveness
//! re-checks on every mapping attempt, and no retroactive revocation of
//! live mappings.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::ptr;
use std::sync::atomic::AtomicU32;

use vsoc_shm::perm::{claim_owner_slot, grant_is_live};
use vsoc_shm::{Error, FdScopedPermission, RegionDescriptor};

/// An emulated permission descriptor over a sub-range of a managed region.
///
/// Borrows the owner slot from the manager region's mapping; the grant
/// cannot outlive the manager view that produced it.
pub struct EmulatedPermissionFd<'a> {
    file: File,
    managed_begin: u32,
    managed_size: u32,
    perm: FdScopedPermission,
    owner_slot: &'a AtomicU32,
}

impl<'a> EmulatedPermissionFd<'a> {
    /// Claim `perm.owner_offset`'s slot and produce the scoped descriptor.
    ///
    /// `file` is the shared file, `managed` the descriptor of the region the
    /// grant carves, `owner_slot` the manager-region word the driver would
    /// write. Occupied slots yield [`Error::Busy`].
    pub fn grant(
        file: File,
        managed: &RegionDescriptor,
        owner_slot: &'a AtomicU32,
        perm: FdScopedPermission,
    ) -> Result<Self, Error> {
        if perm.begin_offset > perm.end_offset || perm.end_offset > managed.region_size() {
            return Err(Error::Protocol("grant range outside the managed region"));
        }
        claim_owner_slot(owner_slot, perm.owned_value)?;
        Ok(Self {
            file,
            managed_begin: managed.begin_offset,
            managed_size: managed.region_size(),
            perm,
            owner_slot,
        })
    }

    /// The grant this descriptor enforces.
    pub fn permission(&self) -> &FdScopedPermission {
        &self.perm
    }

    /// Map `len` bytes at `offset` within the managed region.
    ///
    /// Fails when the grant is no longer live or the range leaves
    /// `[begin_offset, end_offset)` — the checks the driver would apply to
    /// the mmap. Mappings that already exist are unaffected by later
    /// revocation.
    pub fn map(&self, offset: u32, len: u32) -> Result<PermMapping, Error> {
        if !grant_is_live(self.owner_slot, &self.perm) {
            return Err(Error::MapFailed(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "grant revoked: owner slot overwritten",
            )));
        }
        if len == 0 || !self.perm.contains(offset, len) {
            return Err(Error::MapFailed(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "offset outside the granted range",
            )));
        }
        debug_assert!(offset + len <= self.managed_size);

        let file_offset = self.managed_begin as u64 + offset as u64;
        if file_offset % 4096 != 0 {
            return Err(Error::MapFailed(io::Error::new(
                io::ErrorKind::InvalidInput,
                "mapping offset is not page aligned",
            )));
        }
        // SAFETY: the fd is open and the kernel validates the range; we map
        // fresh pages, unmapped in PermMapping::drop.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len as usize,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.file.as_raw_fd(),
                file_offset as libc::off_t,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(Error::MapFailed(io::Error::last_os_error()));
        }
        Ok(PermMapping {
            addr: addr.cast(),
            len: len as usize,
        })
    }
}

/// A live mapping produced by an emulated permission descriptor.
pub struct PermMapping {
    addr: *mut u8,
    len: usize,
}

// SAFETY: the mapping is private to its owner; the bytes it aliases belong
// to the managed region, which tests access from one thread at a time.
unsafe impl Send for PermMapping {}

impl PermMapping {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy `bytes` into the mapping at `offset`.
    pub fn write(&self, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= self.len);
        // SAFETY: range asserted in-bounds; the mapping is writable.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.addr.add(offset), bytes.len());
        }
    }

    /// Copy `out.len()` bytes out of the mapping at `offset`.
    pub fn read(&self, offset: usize, out: &mut [u8]) {
        assert!(offset + out.len() <= self.len);
        // SAFETY: range asserted in-bounds; the mapping is readable.
        unsafe {
            ptr::copy_nonoverlapping(self.addr.add(offset), out.as_mut_ptr(), out.len());
        }
    }
}

impl Drop for PermMapping {
    fn drop(&mut self) {
        // SAFETY: addr/len came from a successful mmap, unmapped once.
        unsafe {
            libc::munmap(self.addr.cast(), self.len);
        }
    }
}
