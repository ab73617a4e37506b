//! Region views.
//!
//! A [`RegionView`] overlays a typed layout on a mapped region and owns the
//! signal plumbing: the per-region worker thread that drains the incoming
//! signal table, and the `send_signal`/`wait_for_signal` pair everything
//! above (locks, queues, frame posting) is built from.
//!
//! # Worker discipline
//!
//! The worker blocks in `wait_for_interrupt`, which clears the pending flag,
//! then drains the incoming table exactly once per delivered interrupt. For
//! every pending offset it wakes all local futex waiters; round-trip entries
//! are re-posted to the peer only after the wake has run. Handlers never
//! send signals for the same region from inside the drain.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::control::{RegionControl, Side};
use crate::error::Error;
use crate::futex;
use crate::signal::SignalTable;

/// A typed overlay for a region's user-data area.
///
/// # Safety
///
/// Implementors guarantee:
/// - the type is `repr(C)` and fully initialized by all-zero bytes (regions
///   start zeroed);
/// - every field mutated while the region is shared is an atomic word —
///   the other side writes concurrently, so non-atomic mutable access is a
///   data race;
/// - `REGION_NAME` names the region whose data area carries this layout.
pub unsafe trait RegionLayout: Send + Sync + Sized + 'static {
    /// Name of the region this layout belongs to.
    const REGION_NAME: &'static str;
}

/// Which waiters a signal should reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sides {
    /// Only waiters on this side: a plain local futex wake.
    Local,
    /// Only waiters on the other side.
    Peer,
    /// Both sides. The peer is signalled with the round-trip flag and the
    /// bounce wakes local waiters; no direct local wake is issued.
    Both,
}

/// The signal surface a region exposes to primitives living inside it.
///
/// Implemented by [`RegionView`]; the guest-and-host lock takes this instead
/// of a concrete view so it stays independent of the layout type.
pub trait RegionSignals {
    /// Which side of the region we are.
    fn side(&self) -> Side;
    /// Wake waiters on `word` on the given sides.
    fn send_signal(&self, sides: Sides, word: &AtomicU32);
    /// Sleep on `word` while it equals `expected`.
    fn wait_for_signal(&self, word: &AtomicU32, expected: u32);
}

/// A mapped, typed handle to one region.
pub struct RegionView<L: RegionLayout> {
    control: Arc<RegionControl>,
    base: *mut u8,
    data: *const L,
    stopping: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    _layout: std::marker::PhantomData<L>,
}

// SAFETY: `base`/`data` point into a shared mapping that outlives the view;
// all access through them is atomic per the RegionLayout contract.
unsafe impl<L: RegionLayout> Send for RegionView<L> {}
unsafe impl<L: RegionLayout> Sync for RegionView<L> {}

impl<L: RegionLayout> RegionView<L> {
    /// Open the layout's region on the host side. `domain` selects the
    /// launcher instance (its endpoint-server socket path prefix).
    pub fn open_host(domain: &Path) -> Result<Self, Error> {
        let control = RegionControl::open_host(L::REGION_NAME, domain)?;
        Self::from_control(Arc::new(control))
    }

    /// Open the layout's region on the guest side via its character device.
    pub fn open_guest() -> Result<Self, Error> {
        let control = RegionControl::open_guest(L::REGION_NAME)?;
        Self::from_control(Arc::new(control))
    }

    /// Build a view over an already-opened control, map the region, and
    /// start the signal worker.
    pub fn from_control(control: Arc<RegionControl>) -> Result<Self, Error> {
        if control.name() != L::REGION_NAME {
            fatal!(
                "layout {:?} overlaid on region {:?}",
                L::REGION_NAME,
                control.name()
            );
        }
        let data_size = control.region_data_size() as usize;
        if core::mem::size_of::<L>() > data_size {
            fatal!(
                "layout for region {:?} needs {} bytes, region data holds {}",
                L::REGION_NAME,
                core::mem::size_of::<L>(),
                data_size
            );
        }

        let base = control.map();
        let data_offset = control.descriptor().data_offset_in_region() as usize;
        if data_offset % core::mem::align_of::<L>() != 0 {
            fatal!("region {:?} data area is misaligned for its layout", L::REGION_NAME);
        }
        // SAFETY: offset checked against the region above; the mapping
        // covers the whole region.
        let data = unsafe { base.add(data_offset) }.cast::<L>();

        let stopping = Arc::new(AtomicBool::new(false));
        let worker = SignalWorker {
            control: Arc::clone(&control),
            // SAFETY: the layouts come from a validated descriptor and the
            // mapping lives until the control drops, which the worker's Arc
            // prevents while it runs.
            incoming: unsafe { SignalTable::from_raw(base, control.incoming_layout()) },
            outgoing: unsafe { SignalTable::from_raw(base, control.outgoing_layout()) },
            base: base as usize,
            region_size: control.region_size(),
            stopping: Arc::clone(&stopping),
        };
        let handle = match std::thread::Builder::new()
            .name(format!("vsoc-{}", control.name()))
            .spawn(move || worker.run())
        {
            Ok(handle) => handle,
            Err(e) => fatal!("cannot spawn signal worker for {:?}: {}", L::REGION_NAME, e),
        };

        Ok(Self {
            control,
            base,
            data,
            stopping,
            worker: Mutex::new(Some(handle)),
            _layout: std::marker::PhantomData,
        })
    }

    /// The typed layout at the region's data offset.
    ///
    /// The layout is shared with the peer by design; mutation goes through
    /// its atomic fields.
    pub fn layout(&self) -> &L {
        // SAFETY: data points at a properly aligned L inside the mapping,
        // initialized (all-zero) by the layout builder.
        unsafe { &*self.data }
    }

    /// The control this view is built on.
    pub fn control(&self) -> &Arc<RegionControl> {
        &self.control
    }

    /// Region-relative byte offset of a word inside this region.
    ///
    /// A word outside the region, misaligned, or at offset 0 is a caller
    /// bug of the memory-corruption class and aborts.
    pub fn region_offset(&self, word: &AtomicU32) -> u32 {
        let addr = word as *const AtomicU32 as usize;
        let base = self.base as usize;
        let size = self.control.region_size() as usize;
        if addr < base || addr + 4 > base + size {
            fatal!("signal word outside region {:?}", self.control.name());
        }
        let offset = addr - base;
        if offset == 0 {
            fatal!("offset 0 of region {:?} is not a valid signal target", self.control.name());
        }
        debug_assert!(offset % 4 == 0, "atomics are naturally aligned");
        offset as u32
    }

    /// The word at a region-relative offset.
    ///
    /// # Safety
    ///
    /// `offset` must be 4-byte aligned and inside the region, and the bytes
    /// there must be used exclusively as a 32-bit atomic by both sides.
    pub unsafe fn word_at_offset(&self, offset: u32) -> &AtomicU32 {
        debug_assert!(offset % 4 == 0 && offset + 4 <= self.control.region_size());
        // SAFETY: caller upholds bounds and aliasing per above.
        unsafe { &*self.base.add(offset as usize).cast::<AtomicU32>() }
    }

    /// Post `word` on the outgoing signal table and interrupt the peer if
    /// the entry was newly stored.
    pub fn send_signal_to_peer(&self, word: &AtomicU32, round_trip: bool) {
        let offset = self.region_offset(word);
        // SAFETY: layouts validated at open; mapping lives as long as self.
        let outgoing = unsafe { SignalTable::from_raw(self.base, self.control.outgoing_layout()) };
        if outgoing.post(offset, round_trip) {
            self.control.peer_interrupt();
        }
    }

    /// True while the incoming interrupt-pending flag is raised.
    pub fn has_incoming_interrupt(&self) -> bool {
        self.control.has_incoming_interrupt()
    }
}

impl<L: RegionLayout> RegionSignals for RegionView<L> {
    fn side(&self) -> Side {
        self.control.side()
    }

    fn send_signal(&self, sides: Sides, word: &AtomicU32) {
        match sides {
            Sides::Local => {
                futex::wake_all(word);
            }
            Sides::Peer => self.send_signal_to_peer(word, false),
            Sides::Both => self.send_signal_to_peer(word, true),
        }
    }

    fn wait_for_signal(&self, word: &AtomicU32, expected: u32) {
        // Validates the word belongs to this region before sleeping on it.
        self.region_offset(word);
        futex::wait(word, expected);
    }
}

impl<L: RegionLayout> Drop for RegionView<L> {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::Release);
        self.control.self_interrupt();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl<L: RegionLayout> std::fmt::Debug for RegionView<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionView")
            .field("region", &self.control.name())
            .field("side", &self.control.side())
            .finish()
    }
}

/// State the worker thread carries; everything here is either `Send` or a
/// pointer into the mapping the worker's control keeps alive.
struct SignalWorker {
    control: Arc<RegionControl>,
    incoming: SignalTable,
    outgoing: SignalTable,
    base: usize,
    region_size: u32,
    stopping: Arc<AtomicBool>,
}

impl SignalWorker {
    fn run(self) {
        tracing::debug!(region = self.control.name(), "signal worker started");
        loop {
            match self.control.wait_for_interrupt() {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(region = self.control.name(), "interrupt endpoint closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(region = self.control.name(), "interrupt wait failed: {}", e);
                    break;
                }
            }
            if self.stopping.load(Ordering::Acquire) {
                break;
            }
            let stats = self.incoming.drain(&self.outgoing, |offset| {
                if offset + 4 > self.region_size {
                    tracing::warn!(
                        region = self.control.name(),
                        offset,
                        "pending signal points outside the region"
                    );
                    return;
                }
                // SAFETY: bounds checked above; slot encodings are 4-byte
                // aligned by construction.
                let word = unsafe { &*(self.base as *mut u8).add(offset as usize).cast::<AtomicU32>() };
                futex::wake_all(word);
            });
            if stats.bounced > 0 {
                self.control.peer_interrupt();
            }
        }
        tracing::debug!(region = self.control.name(), "signal worker stopped");
    }
}
