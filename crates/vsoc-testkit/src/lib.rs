//! vsoc-testkit: drive both sides of a region from one process.
//!
//! A [`TestWorld`] plays the launcher: it lays out a real shared file in a
//! temp directory and wires interrupt endpoints so that a host-side and a
//! guest-side control see each other exactly as they would across the VM
//! boundary — same file, same signal tables, crossed eventfds. Tests then
//! exercise real mapped memory, real futexes, and real interrupts without a
//! kernel driver.
//!
//! The guest driver's FD-scoped permissions are covered by a userland
//! emulation ([`perm_emu`]) that performs the same owner-slot claim and the
//! same range/liveness checks at map time.

mod layouts;
pub mod perm_emu;

pub use layouts::{
    standard_builder, BounceLayout, FillRecord, LockTestLayout, ManagerLayout,
    PrimaryFillLayout, SecondaryFillLayout, FILL_BUFFER_LEN, FILL_RECORDS, MANAGED_REGION,
    OWNER_SLOTS,
};

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use vsoc_endpoint::{EndpointServer, InterruptEndpoint, RegionEntry};
use vsoc_shm::builder::FileBuilder;
use vsoc_shm::{RegionControl, RegionLayout, RegionView, Side};

static WORLD_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A launcher stand-in: one laid-out shared file plus the wiring to hand
/// out both sides of any region in it.
pub struct TestWorld {
    dir: PathBuf,
    file: File,
}

impl TestWorld {
    /// Lay out a fresh shared file from `builder` in a private temp dir.
    pub fn new(builder: FileBuilder) -> Self {
        let dir = std::env::temp_dir().join(format!(
            "vsoc-world-{}-{}",
            std::process::id(),
            WORLD_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).expect("create test world dir");
        let file = builder
            .build(&dir.join("shared.mem"))
            .expect("lay out shared file");
        Self { dir, file }
    }

    /// The shared file.
    pub fn file(&self) -> &File {
        &self.file
    }

    /// A fresh descriptor to the shared file, as a participant would hold.
    pub fn dup_file(&self) -> File {
        self.file.try_clone().expect("dup shared file")
    }

    /// The world's private directory; usable as a host-side domain.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open both sides of `region`: `(host, guest)` controls over the same
    /// file with crossed interrupt endpoints.
    pub fn control_pair(&self, region: &str) -> (Arc<RegionControl>, Arc<RegionControl>) {
        let guest_to_host = InterruptEndpoint::new().expect("eventfd");
        let host_to_guest = InterruptEndpoint::new().expect("eventfd");

        let host = RegionControl::open_with_endpoints(
            Side::Host,
            region,
            self.dup_file(),
            guest_to_host.try_clone().expect("dup endpoint"),
            host_to_guest.try_clone().expect("dup endpoint"),
        )
        .expect("open host control");
        let guest = RegionControl::open_with_endpoints(
            Side::Guest,
            region,
            self.dup_file(),
            host_to_guest,
            guest_to_host,
        )
        .expect("open guest control");

        (Arc::new(host), Arc::new(guest))
    }

    /// Open both sides of the layout's region as views, workers running.
    pub fn view_pair<L: RegionLayout>(&self) -> (RegionView<L>, RegionView<L>) {
        let (host, guest) = self.control_pair(L::REGION_NAME);
        (
            RegionView::from_control(host).expect("host view"),
            RegionView::from_control(guest).expect("guest view"),
        )
    }

    /// Start an endpoint server for this world's file, serving exactly
    /// `connections` handshakes on a background thread. Returns the domain
    /// to hand to host-side opens.
    ///
    /// Per served region the server also owns the guest ends of the
    /// interrupt channels; tests that only exercise the handshake let them
    /// idle.
    pub fn spawn_server(&self, regions: &[&str], connections: usize) -> PathBuf {
        let mut entries = std::collections::HashMap::new();
        for name in regions {
            entries.insert(
                (*name).to_owned(),
                RegionEntry {
                    incoming: InterruptEndpoint::new().expect("eventfd"),
                    outgoing: InterruptEndpoint::new().expect("eventfd"),
                },
            );
        }
        let server = EndpointServer::bind(
            &vsoc_endpoint::socket_path(&self.dir),
            self.dup_file(),
            entries,
        )
        .expect("bind endpoint server");

        let domain = self.dir.clone();
        std::thread::spawn(move || {
            for _ in 0..connections {
                if let Err(e) = server.serve_one() {
                    eprintln!("testkit endpoint server: {}", e);
                }
            }
        });
        domain
    }
}

impl Drop for TestWorld {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// The builder used by most of the suite: every example layout's region in
/// one file.
pub fn standard_world() -> TestWorld {
    TestWorld::new(layouts::standard_builder())
}
