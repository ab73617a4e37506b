//! Endpoint handshake end-to-end, plus singleton acquisition through it.

use std::os::unix::fs::FileExt;

use vsoc_shm::layout::{LAYOUT_MAJOR_VERSION, LAYOUT_MINOR_VERSION};
use vsoc_shm::{RegionLayout, ViewRegistry};
use vsoc_testkit::{standard_world, BounceLayout};

#[test]
fn handshake_vends_the_shared_file_and_endpoints() {
    let world = standard_world();
    let domain = world.spawn_server(&[BounceLayout::REGION_NAME], 1);

    let socket = vsoc_endpoint::socket_path(&domain);
    let endpoints = vsoc_endpoint::connect(&socket, BounceLayout::REGION_NAME).unwrap();

    assert_eq!(endpoints.control_data, 0);

    // The vended shared-memory fd is the launcher's laid-out file.
    let expected_size = world.file().metadata().unwrap().len();
    assert_eq!(
        endpoints.shared_memory.metadata().unwrap().len(),
        expected_size
    );

    // Its first bytes reproduce the global header.
    let mut head = [0u8; 8];
    endpoints.shared_memory.read_exact_at(&mut head, 0).unwrap();
    assert_eq!(
        u16::from_ne_bytes([head[0], head[1]]),
        LAYOUT_MAJOR_VERSION
    );
    assert_eq!(
        u16::from_ne_bytes([head[2], head[3]]),
        LAYOUT_MINOR_VERSION
    );
    let region_count = u32::from_ne_bytes([head[4], head[5], head[6], head[7]]);
    assert!(region_count >= 1);

    // The interrupt endpoints are live eventfds.
    endpoints.outgoing.signal().unwrap();
    endpoints.incoming.signal().unwrap();
    assert_eq!(endpoints.incoming.wait().unwrap(), 1);
}

#[test]
fn get_instance_is_a_per_domain_singleton() {
    let world = standard_world();
    // One handshake: the second get_instance must come from the cache.
    let domain = world.spawn_server(&[BounceLayout::REGION_NAME], 1);

    let registry = ViewRegistry::new_host();
    let first = registry
        .get_instance::<BounceLayout>(Some(&domain))
        .expect("first open succeeds");
    let second = registry
        .get_instance::<BounceLayout>(Some(&domain))
        .expect("cached open succeeds");
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}

#[test]
fn unreachable_server_is_a_recoverable_failure() {
    let registry = ViewRegistry::new_host();
    let domain = std::path::Path::new("/nonexistent/vsoc-no-launcher");
    assert!(registry.get_instance::<BounceLayout>(Some(domain)).is_none());
    // The failed open did not populate the cache; a retry re-attempts.
    assert!(registry.get_instance::<BounceLayout>(Some(domain)).is_none());
}
