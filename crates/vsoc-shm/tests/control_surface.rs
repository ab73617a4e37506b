//! Control-level contract: idempotent mapping, interrupt coalescing, and
//! the self-interrupt path, exercised without views or workers.

use vsoc_shm::RegionLayout;
use vsoc_testkit::{standard_world, BounceLayout};

#[test]
fn map_is_idempotent() {
    let world = standard_world();
    let (host, guest) = world.control_pair(BounceLayout::REGION_NAME);

    let first = host.map();
    let again = host.map();
    assert_eq!(first, again);

    // Both sides see the same bytes: write through one mapping, read
    // through the other.
    let host_base = host.map();
    let guest_base = guest.map();
    let data_offset = host.descriptor().data_offset_in_region() as usize;
    // SAFETY: data area is in-bounds on both mappings; the test is the only
    // writer.
    unsafe {
        let word = host_base.add(data_offset).cast::<std::sync::atomic::AtomicU32>();
        (*word).store(0xDEAD_BEEF, std::sync::atomic::Ordering::Release);
        let peer_word = guest_base.add(data_offset).cast::<std::sync::atomic::AtomicU32>();
        assert_eq!(
            (*peer_word).load(std::sync::atomic::Ordering::Acquire),
            0xDEAD_BEEF
        );
    }
}

#[test]
fn peer_interrupts_coalesce_until_drained() {
    let world = standard_world();
    let (host, guest) = world.control_pair(BounceLayout::REGION_NAME);

    assert!(!guest.has_incoming_interrupt());

    // First delivery raises the flag; repeats coalesce.
    assert!(host.peer_interrupt());
    assert!(!host.peer_interrupt());
    assert!(!host.peer_interrupt());
    assert!(guest.has_incoming_interrupt());

    // The guest drains one interrupt and clears the flag.
    assert!(guest.wait_for_interrupt().unwrap());
    assert!(!guest.has_incoming_interrupt());

    // After the drain the next delivery interrupts again.
    assert!(host.peer_interrupt());
    assert!(guest.wait_for_interrupt().unwrap());
}

#[test]
fn self_interrupt_wakes_our_own_wait() {
    let world = standard_world();
    let (host, _guest) = world.control_pair(BounceLayout::REGION_NAME);

    host.self_interrupt();
    // No peer involvement: the wait returns on our own endpoint write.
    assert!(host.wait_for_interrupt().unwrap());
}

#[test]
fn region_sizes_come_from_the_descriptor() {
    let world = standard_world();
    let (host, _guest) = world.control_pair(BounceLayout::REGION_NAME);

    let desc = host.descriptor();
    assert_eq!(host.region_size(), desc.end_offset - desc.begin_offset);
    assert_eq!(
        host.region_data_size(),
        desc.end_offset - desc.offset_of_region_data
    );
    assert!(host.region_data_size() >= core::mem::size_of::<BounceLayout>() as u32);
}
