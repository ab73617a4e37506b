//! FD-scoped permissions.
//!
//! A *manager* region carves sub-ranges of a *managed* region into grants: a
//! 32-bit owner slot in the manager's layout is claimed with the grant's
//! `owned_value`, and the guest driver returns a descriptor that can mmap
//! only `[begin_offset, end_offset)` of the managed region while the slot
//! still holds that value. Overwriting the slot kills future mappings; live
//! mappings stay until unmapped.
//!
//! Claiming is first-writer-wins: a slot already holding a different value
//! yields [`crate::Error::Busy`] and the caller picks another slot.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::Error;

/// One grant over a managed region, as passed to the driver.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FdScopedPermission {
    /// First byte of the managed region the grant may map.
    pub begin_offset: u32,
    /// One past the last byte the grant may map.
    pub end_offset: u32,
    /// Region-relative offset of the owner slot in the manager region.
    pub owner_offset: u32,
    /// Value that must sit in the owner slot for the grant to be live.
    pub owned_value: u32,
}

const _: () = assert!(core::mem::size_of::<FdScopedPermission>() == 16);

impl FdScopedPermission {
    /// Bytes covered by the grant.
    pub fn len(&self) -> u32 {
        self.end_offset - self.begin_offset
    }

    /// True for the degenerate empty grant.
    pub fn is_empty(&self) -> bool {
        self.end_offset == self.begin_offset
    }

    /// Whether `[offset, offset + len)` falls inside the granted range.
    pub fn contains(&self, offset: u32, len: u32) -> bool {
        offset >= self.begin_offset
            && offset < self.end_offset
            && len <= self.end_offset - offset
    }
}

/// Claim an owner slot for `owned_value`.
///
/// First-writer-wins: succeeds when the slot is empty, is idempotent for
/// the same value, and reports [`Error::Busy`] for a different one. The
/// guest driver performs this claim in `create_fd_scoped_permission`; the
/// testkit's userland emulation calls it directly.
pub fn claim_owner_slot(slot: &AtomicU32, owned_value: u32) -> Result<(), Error> {
    match slot.compare_exchange(0, owned_value, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => Ok(()),
        Err(current) if current == owned_value => Ok(()),
        Err(_) => Err(Error::Busy),
    }
}

/// Whether the grant is still live: exactly `owned_value` at the owner slot.
pub fn grant_is_live(slot: &AtomicU32, perm: &FdScopedPermission) -> bool {
    slot.load(Ordering::Acquire) == perm.owned_value
}
