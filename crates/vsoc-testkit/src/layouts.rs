//! Example region layouts used across the test suite.
//!
//! Real layouts (framebuffers, input queues) live with their subsystems;
//! these exist to exercise the runtime. Every mutable field is an atomic
//! word per the [`RegionLayout`] contract.

use std::sync::atomic::{AtomicU32, AtomicU8};

use vsoc_shm::builder::{FileBuilder, RegionPlan};
use vsoc_shm::{GuestAndHostLock, RegionLayout};

/// Bytes in each per-side fill buffer.
pub const FILL_BUFFER_LEN: usize = 16;

/// Fill records per stress region.
pub const FILL_RECORDS: usize = 8;

/// Owner slots in the manager layout.
pub const OWNER_SLOTS: usize = 4;

/// One record of the fill stress layouts: a buffer per writing side.
#[repr(C)]
pub struct FillRecord {
    pub host_writable: [AtomicU8; FILL_BUFFER_LEN],
    pub guest_writable: [AtomicU8; FILL_BUFFER_LEN],
}

impl FillRecord {
    /// Copy `pattern` into one buffer, truncating or zero-padding to fit.
    pub fn write(buffer: &[AtomicU8; FILL_BUFFER_LEN], pattern: &[u8]) {
        for (i, slot) in buffer.iter().enumerate() {
            slot.store(
                pattern.get(i).copied().unwrap_or(0),
                std::sync::atomic::Ordering::Release,
            );
        }
    }

    /// Read one buffer back.
    pub fn read(buffer: &[AtomicU8; FILL_BUFFER_LEN]) -> [u8; FILL_BUFFER_LEN] {
        let mut out = [0u8; FILL_BUFFER_LEN];
        for (i, slot) in buffer.iter().enumerate() {
            out[i] = slot.load(std::sync::atomic::Ordering::Acquire);
        }
        out
    }
}

macro_rules! fill_layout {
    ($name:ident, $region:literal) => {
        #[repr(C)]
        pub struct $name {
            pub host_status: AtomicU32,
            pub guest_status: AtomicU32,
            pub records: [FillRecord; FILL_RECORDS],
        }

        // SAFETY: repr(C), all-zero bytes are valid, every field is atomic.
        unsafe impl RegionLayout for $name {
            const REGION_NAME: &'static str = $region;
        }
    };
}

fill_layout!(PrimaryFillLayout, "primary");
fill_layout!(SecondaryFillLayout, "secondary");

/// Layout for lock contention tests: the lock plus a witness counter that
/// must never leave 0 or 1 while the lock is honored.
#[repr(C)]
pub struct LockTestLayout {
    pub lock: GuestAndHostLock,
    pub counter: AtomicU32,
}

// SAFETY: repr(C), all-zero bytes are the unlocked/zero state, all fields
// atomic.
unsafe impl RegionLayout for LockTestLayout {
    const REGION_NAME: &'static str = "locktest";
}

/// Layout for signal round-trip tests: one futex word.
#[repr(C)]
pub struct BounceLayout {
    pub word: AtomicU32,
}

// SAFETY: repr(C), all-zero bytes valid, atomic field.
unsafe impl RegionLayout for BounceLayout {
    const REGION_NAME: &'static str = "bounce";
}

/// Manager layout: owner slots for FD-scoped permission grants over the
/// "managed" region.
#[repr(C)]
pub struct ManagerLayout {
    pub owner_slots: [AtomicU32; OWNER_SLOTS],
}

// SAFETY: repr(C), all-zero bytes valid, atomic fields.
unsafe impl RegionLayout for ManagerLayout {
    const REGION_NAME: &'static str = "manager";
}

/// Name of the raw managed region the manager grants ranges of.
pub const MANAGED_REGION: &str = "managed";

/// A file plan carrying every example region.
pub fn standard_builder() -> FileBuilder {
    FileBuilder::new()
        .region(RegionPlan::new(
            PrimaryFillLayout::REGION_NAME,
            core::mem::size_of::<PrimaryFillLayout>() as u32,
            4,
        ))
        .region(RegionPlan::new(
            SecondaryFillLayout::REGION_NAME,
            core::mem::size_of::<SecondaryFillLayout>() as u32,
            4,
        ))
        .region(RegionPlan::new(
            LockTestLayout::REGION_NAME,
            core::mem::size_of::<LockTestLayout>() as u32,
            4,
        ))
        .region(RegionPlan::new(
            BounceLayout::REGION_NAME,
            core::mem::size_of::<BounceLayout>() as u32,
            4,
        ))
        .region(RegionPlan::new(
            ManagerLayout::REGION_NAME,
            core::mem::size_of::<ManagerLayout>() as u32,
            2,
        ))
        // Three pages of raw bytes for permission grants to carve.
        .region(RegionPlan::new(MANAGED_REGION, 3 * 4096, 0))
}
