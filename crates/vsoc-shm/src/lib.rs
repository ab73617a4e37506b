//! vsoc-shm: cross-domain shared-memory region runtime.
//!
//! A single shared-memory file is carved into named **regions**, each mapped
//! by two participants: the **host** process and the **guest** VM. Within a
//! region, all cross-side coordination happens through 32-bit atomic words;
//! wake-ups cross the VM boundary through per-direction **signal tables**
//! drained by a per-region worker thread that blocks on an interrupt
//! endpoint.
//!
//! # File layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  Global header (version, region count, descriptor array offset)      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Region descriptor array                                             │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Region "A"                                                          │
//! │    - guest→host signal table (slots + interrupt_signalled flag)      │
//! │    - host→guest signal table (slots + interrupt_signalled flag)      │
//! │    - typed user data                                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Region "B" ...                                                      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Layering
//!
//! - [`control::RegionControl`] — low-level, side-tagged handle: interrupt
//!   delivery, idempotent mapping, permission grants.
//! - [`view::RegionView`] — typed overlay bound to a [`view::RegionLayout`];
//!   owns the signal worker and the send/wait signal plumbing.
//! - [`lock::GuestAndHostLock`] — adaptive mutex living inside a region,
//!   usable from both sides concurrently.
//! - [`registry::ViewRegistry`] — per-process singleton acquisition keyed by
//!   layout type and domain.
//!
//! Invariant violations (unlock by a non-owner, unmappable regions, layout
//! version skew) are memory-corruption-class conditions: they write one line
//! to stderr and abort the process.

#![forbid(unsafe_op_in_unsafe_fn)]

#[macro_use]
mod util;

pub mod builder;
pub mod control;
mod error;
pub mod futex;
pub mod layout;
pub mod lock;
pub mod perm;
pub mod registry;
pub mod signal;
pub mod view;

pub use control::{RegionControl, Side};
pub use error::Error;
pub use layout::{GlobalHeader, LayoutError, RegionDescriptor, SignalTableLayout};
pub use lock::GuestAndHostLock;
pub use perm::FdScopedPermission;
pub use registry::ViewRegistry;
pub use view::{RegionLayout, RegionSignals, RegionView, Sides};
