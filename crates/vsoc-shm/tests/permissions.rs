//! FD-scoped permissions: grant, map, remap, busy slots, revocation — via
//! the testkit's userland emulation of the guest driver, plus the host
//! side's hard "not supported".

use std::sync::atomic::Ordering;

use vsoc_shm::layout;
use vsoc_shm::{Error, FdScopedPermission, RegionLayout};
use vsoc_testkit::perm_emu::EmulatedPermissionFd;
use vsoc_testkit::{standard_world, ManagerLayout, MANAGED_REGION};

const MARKER: &[u8] = b"vsoc-perm-marker";

#[test]
fn grant_map_remap_and_regrant() {
    let world = standard_world();
    let (manager, _guest_manager) = world.view_pair::<ManagerLayout>();
    let managed = layout::find_region(world.file(), MANAGED_REGION).unwrap();

    let slot0 = &manager.layout().owner_slots[0];
    let perm = FdScopedPermission {
        begin_offset: 4096,
        end_offset: 8192,
        owner_offset: 0,
        owned_value: 65,
    };
    let fd = EmulatedPermissionFd::grant(world.dup_file(), &managed, slot0, perm).unwrap();
    assert_eq!(slot0.load(Ordering::Acquire), 65);

    // Write a marker through one mapping, read it back through a fresh one.
    {
        let mapping = fd.map(4096, 4096).unwrap();
        mapping.write(0, MARKER);
    }
    {
        let mapping = fd.map(4096, 4096).unwrap();
        let mut seen = [0u8; 16];
        mapping.read(0, &mut seen);
        assert_eq!(&seen[..], MARKER);
    }

    // Offsets outside the granted range fail in every direction.
    assert!(matches!(fd.map(0, 4096), Err(Error::MapFailed(_))));
    assert!(matches!(fd.map(8192, 4096), Err(Error::MapFailed(_))));
    assert!(matches!(fd.map(4096, 8192), Err(Error::MapFailed(_))));

    // A different owned value on the held slot is refused.
    let contender = FdScopedPermission {
        owned_value: 66,
        ..perm
    };
    assert!(matches!(
        EmulatedPermissionFd::grant(world.dup_file(), &managed, slot0, contender),
        Err(Error::Busy)
    ));
    assert_eq!(slot0.load(Ordering::Acquire), 65);

    // Same owner, different range: a fresh grant over fresh bytes.
    let shifted = FdScopedPermission {
        begin_offset: 8192,
        end_offset: 12288,
        ..perm
    };
    let fd2 = EmulatedPermissionFd::grant(world.dup_file(), &managed, slot0, shifted).unwrap();
    assert_eq!(slot0.load(Ordering::Acquire), 65);
    let mapping = fd2.map(8192, 4096).unwrap();
    let mut seen = [0u8; 16];
    mapping.read(0, &mut seen);
    assert_eq!(seen, [0u8; 16], "the old marker must not leak into the new range");
}

#[test]
fn revocation_blocks_new_mappings_but_not_live_ones() {
    let world = standard_world();
    let (manager, _guest_manager) = world.view_pair::<ManagerLayout>();
    let managed = layout::find_region(world.file(), MANAGED_REGION).unwrap();

    let slot = &manager.layout().owner_slots[1];
    let perm = FdScopedPermission {
        begin_offset: 4096,
        end_offset: 8192,
        owner_offset: 4,
        owned_value: 7,
    };
    let fd = EmulatedPermissionFd::grant(world.dup_file(), &managed, slot, perm).unwrap();

    let live = fd.map(4096, 4096).unwrap();
    live.write(0, b"still-mapped");

    // Another writer takes over the owner slot.
    slot.store(99, Ordering::Release);

    // New mappings die; the live one keeps working until unmapped.
    assert!(matches!(fd.map(4096, 4096), Err(Error::MapFailed(_))));
    let mut seen = [0u8; 12];
    live.read(0, &mut seen);
    assert_eq!(&seen[..], b"still-mapped");
}

#[test]
fn host_side_reports_unsupported() {
    let world = standard_world();
    let (host_control, _guest_control) = world.control_pair(ManagerLayout::REGION_NAME);

    let perm = FdScopedPermission {
        begin_offset: 0,
        end_offset: 4096,
        owner_offset: 0,
        owned_value: 1,
    };
    assert!(matches!(
        host_control.create_fd_scoped_permission(MANAGED_REGION, perm),
        Err(Error::Unsupported)
    ));
}
