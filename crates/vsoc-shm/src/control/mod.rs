//! Region controls.
//!
//! A [`RegionControl`] is the low-level, side-tagged handle to one region:
//! it owns the interrupt endpoints (or the guest device standing in for
//! them), locates the region's descriptor, and provides the idempotent
//! mapping everything typed is built on. It does not interpret region
//! contents; that is the view's job.
//!
//! The two concrete cases are a tagged variant, not a trait object: the side
//! is decided when the control is opened and never changes.

mod guest;
mod host;

pub use guest::FdScopedPermissionArg;

use std::fs::File;
use std::os::unix::io::OwnedFd;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use vsoc_endpoint::InterruptEndpoint;

use crate::error::Error;
use crate::layout::{self, LayoutError, RegionDescriptor, SignalTableLayout};
use crate::perm::FdScopedPermission;

use guest::GuestBackend;
use host::HostBackend;

/// The two participants sharing the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Host,
    Guest,
}

impl Side {
    /// The opposite participant.
    pub fn other(self) -> Self {
        match self {
            Self::Host => Self::Guest,
            Self::Guest => Self::Host,
        }
    }
}

enum Backend {
    Host(HostBackend),
    Guest(GuestBackend),
}

struct Mapping {
    addr: *mut u8,
    len: usize,
}

// SAFETY: the mapping address is only handed out as a raw pointer; all
// shared-memory access through it is atomic.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: addr/len came from a successful mmap and are unmapped
        // exactly once.
        let ret = unsafe { libc::munmap(self.addr.cast(), self.len) };
        if ret != 0 {
            tracing::warn!("munmap failed: {}", std::io::Error::last_os_error());
        }
    }
}

/// Side-tagged low-level handle to one region.
pub struct RegionControl {
    side: Side,
    desc: RegionDescriptor,
    backend: Backend,
    mapping: OnceLock<Mapping>,
}

impl RegionControl {
    /// Open a region on the host side by handshaking with the endpoint
    /// server of `domain`.
    ///
    /// A missing region or a layout version mismatch is fatal; socket and
    /// handshake failures are returned.
    pub fn open_host(name: &str, domain: &Path) -> Result<Self, Error> {
        let socket = vsoc_endpoint::socket_path(domain);
        let endpoints = vsoc_endpoint::connect(&socket, name)?;
        Self::open_with_endpoints(
            Side::Host,
            name,
            endpoints.shared_memory,
            endpoints.incoming,
            endpoints.outgoing,
        )
    }

    /// Open a region with pre-vended endpoints and the shared file itself.
    ///
    /// This is the host-side open with the handshake already done; the
    /// launcher (and the testkit acting as one) uses it to wire participants
    /// directly. `side` tags which direction tables are ours.
    pub fn open_with_endpoints(
        side: Side,
        name: &str,
        shared_memory: File,
        incoming: InterruptEndpoint,
        outgoing: InterruptEndpoint,
    ) -> Result<Self, Error> {
        let desc = match layout::find_region(&shared_memory, name) {
            Ok(desc) => desc,
            Err(LayoutError::NameNotFound(name)) => fatal!("region {:?} not found", name),
            Err(LayoutError::VersionMismatch { expected, found }) => {
                fatal!(
                    "layout major version mismatch: expected {}, found {}",
                    expected,
                    found
                )
            }
            Err(e) => fatal!("unreadable shared-file layout: {}", e),
        };
        Ok(Self {
            side,
            desc,
            backend: Backend::Host(HostBackend::new(shared_memory, incoming, outgoing)),
            mapping: OnceLock::new(),
        })
    }

    /// Open a region on the guest side through its character device at
    /// `/dev/<name>`.
    pub fn open_guest(name: &str) -> Result<Self, Error> {
        let backend = GuestBackend::open(name)?;
        let desc = backend.describe()?;
        if desc.name() != name {
            fatal!(
                "device for region {:?} described region {:?}",
                name,
                desc.name()
            );
        }
        Ok(Self {
            side: Side::Guest,
            desc,
            backend: Backend::Guest(backend),
            mapping: OnceLock::new(),
        })
    }

    /// Which side this control speaks for.
    pub fn side(&self) -> Side {
        self.side
    }

    /// The region name from the descriptor.
    pub fn name(&self) -> &str {
        self.desc.name()
    }

    /// The descriptor copied out of the shared file at open time.
    pub fn descriptor(&self) -> &RegionDescriptor {
        &self.desc
    }

    /// Total region size, signal tables included.
    pub fn region_size(&self) -> u32 {
        self.desc.region_size()
    }

    /// Size of the typed user-data area.
    pub fn region_data_size(&self) -> u32 {
        self.desc.region_data_size()
    }

    /// Layout of the table carrying signals *to* us.
    pub fn incoming_layout(&self) -> SignalTableLayout {
        match self.side {
            Side::Host => self.desc.guest_to_host,
            Side::Guest => self.desc.host_to_guest,
        }
    }

    /// Layout of the table carrying signals *to the peer*.
    pub fn outgoing_layout(&self) -> SignalTableLayout {
        match self.side {
            Side::Host => self.desc.host_to_guest,
            Side::Guest => self.desc.guest_to_host,
        }
    }

    /// Map the region. Idempotent: the first call establishes the mapping,
    /// later calls return the same address. Mapping failure is fatal.
    pub fn map(&self) -> *mut u8 {
        self.mapping.get_or_init(|| self.map_region()).addr
    }

    fn map_region(&self) -> Mapping {
        let len = self.region_size() as usize;
        let result = match &self.backend {
            Backend::Host(h) => h.map(len, self.desc.begin_offset),
            Backend::Guest(g) => g.map(len),
        };
        match result {
            Ok(addr) => Mapping { addr, len },
            Err(e) => fatal!("cannot map region {:?}: {}", self.name(), e),
        }
    }

    /// Deliver one coalesced interrupt to the peer.
    ///
    /// Returns false iff the peer's interrupt-pending flag was already set,
    /// in which case no kernel interrupt is sent.
    pub fn peer_interrupt(&self) -> bool {
        if self.pending_flag(self.outgoing_layout()).swap(1, Ordering::AcqRel) != 0 {
            return false;
        }
        match &self.backend {
            Backend::Host(h) => h.interrupt_peer(),
            Backend::Guest(g) => g.interrupt_peer(),
        }
        true
    }

    /// Wake our own worker. Used only during shutdown.
    pub fn self_interrupt(&self) {
        match &self.backend {
            Backend::Host(h) => h.self_interrupt(),
            Backend::Guest(g) => g.self_interrupt(),
        }
    }

    /// Block until at least one interrupt is pending from the peer, then
    /// clear the pending flag.
    ///
    /// Returns `Ok(false)` when the interrupt endpoint reports the peer is
    /// gone; the worker treats that as clean shutdown.
    pub fn wait_for_interrupt(&self) -> std::io::Result<bool> {
        let delivered = match &self.backend {
            Backend::Host(h) => h.wait()?,
            Backend::Guest(g) => g.wait()?,
        };
        if delivered == 0 {
            return Ok(false);
        }
        self.pending_flag(self.incoming_layout()).swap(0, Ordering::AcqRel);
        Ok(true)
    }

    /// Non-blocking probe of the incoming interrupt-pending flag.
    pub fn has_incoming_interrupt(&self) -> bool {
        self.pending_flag(self.incoming_layout()).load(Ordering::Acquire) != 0
    }

    /// Grant an FD that can only map `[perm.begin_offset, perm.end_offset)`
    /// of the named managed region, while `perm.owned_value` stays at
    /// `perm.owner_offset` in this (manager) region.
    ///
    /// Only the guest-side kernel driver implements this; the host returns
    /// [`Error::Unsupported`].
    pub fn create_fd_scoped_permission(
        &self,
        managed_region_name: &str,
        perm: FdScopedPermission,
    ) -> Result<OwnedFd, Error> {
        match &self.backend {
            Backend::Host(_) => Err(Error::Unsupported),
            Backend::Guest(g) => g.create_fd_scoped_permission(managed_region_name, perm),
        }
    }

    fn pending_flag(&self, table: SignalTableLayout) -> &AtomicU32 {
        let base = self.map();
        // SAFETY: the flag offset is validated against the region bounds at
        // layout time, the mapping covers the whole region and lives as long
        // as self.
        unsafe {
            &*base
                .add(table.interrupt_signalled_offset as usize)
                .cast::<AtomicU32>()
        }
    }
}

impl std::fmt::Debug for RegionControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionControl")
            .field("side", &self.side)
            .field("region", &self.name())
            .field("size", &self.region_size())
            .finish()
    }
}
