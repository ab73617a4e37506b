//! Shared-file layout definitions.
//!
//! This module defines the `repr(C)` structures that make up the shared
//! file: the global header at offset 0 and the region descriptor array it
//! points at. These are the canonical on-disk layouts; every participant
//! reads them once, right after acquiring the shared-memory descriptor, and
//! copies its region's descriptor by value.
//!
//! All offsets are 32-bit byte offsets from the start of the file, naturally
//! aligned. The file is only ever consumed on the machine that produced it,
//! so fields are in native byte order.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

/// Layout major version. An exact match is required; mismatch is fatal for
/// the participant.
pub const LAYOUT_MAJOR_VERSION: u16 = 1;

/// Layout minor version. Informational; minor skew is tolerated.
pub const LAYOUT_MINOR_VERSION: u16 = 0;

/// Capacity of the region-name field, including the terminating null.
pub const REGION_NAME_CAPACITY: usize = 16;

// =============================================================================
// Global header
// =============================================================================

/// Global layout descriptor at offset 0 of the shared file (16 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlobalHeader {
    /// Major layout version; checked for exact equality.
    pub major_version: u16,
    /// Minor layout version.
    pub minor_version: u16,
    /// Number of entries in the region descriptor array.
    pub region_count: u32,
    /// Byte offset of the region descriptor array.
    pub region_desc_offset: u32,
    /// Pads the header so the descriptor array can start 8-byte aligned.
    pub reserved: u32,
}

const _: () = assert!(core::mem::size_of::<GlobalHeader>() == 16);

impl GlobalHeader {
    /// Check the major version against ours.
    pub fn check_version(&self) -> Result<(), LayoutError> {
        if self.major_version != LAYOUT_MAJOR_VERSION {
            return Err(LayoutError::VersionMismatch {
                expected: LAYOUT_MAJOR_VERSION,
                found: self.major_version,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Signal table layout
// =============================================================================

/// Placement of one direction's signal table inside a region.
///
/// Both offsets are region-relative and must reference 4-byte-aligned words
/// inside the region.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignalTableLayout {
    /// The slot array has `2^num_nodes_lg2` entries.
    pub num_nodes_lg2: u32,
    /// Region-relative offset of the slot array.
    pub futex_uaddr_table_offset: u32,
    /// Region-relative offset of the 32-bit interrupt-pending flag.
    pub interrupt_signalled_offset: u32,
}

const _: () = assert!(core::mem::size_of::<SignalTableLayout>() == 12);

impl SignalTableLayout {
    /// Number of slots in the table.
    pub fn num_nodes(&self) -> u32 {
        1 << self.num_nodes_lg2
    }

    /// Bytes occupied by the slot array.
    pub fn table_bytes(&self) -> u32 {
        self.num_nodes() * 4
    }
}

// =============================================================================
// Region descriptor
// =============================================================================

/// One entry of the region descriptor array (52 bytes, no padding).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RegionDescriptor {
    /// Null-terminated region name.
    pub name: [u8; REGION_NAME_CAPACITY],
    /// File offset where the region begins.
    pub begin_offset: u32,
    /// File offset one past the region's last byte.
    pub end_offset: u32,
    /// File offset of the typed user data, past both signal tables.
    pub offset_of_region_data: u32,
    /// Signals travelling guest→host (the host's incoming table).
    pub guest_to_host: SignalTableLayout,
    /// Signals travelling host→guest (the guest's incoming table).
    pub host_to_guest: SignalTableLayout,
}

const _: () = assert!(core::mem::size_of::<RegionDescriptor>() == 52);

impl RegionDescriptor {
    /// The region name up to the terminating null.
    pub fn name(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(REGION_NAME_CAPACITY);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    /// Total region size, signal tables included.
    pub fn region_size(&self) -> u32 {
        self.end_offset - self.begin_offset
    }

    /// Size of the typed user data area.
    pub fn region_data_size(&self) -> u32 {
        self.end_offset - self.offset_of_region_data
    }

    /// Region-relative offset of the user data area.
    pub fn data_offset_in_region(&self) -> u32 {
        self.offset_of_region_data - self.begin_offset
    }
}

impl std::fmt::Debug for RegionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionDescriptor")
            .field("name", &self.name())
            .field("begin_offset", &self.begin_offset)
            .field("end_offset", &self.end_offset)
            .field("offset_of_region_data", &self.offset_of_region_data)
            .field("guest_to_host", &self.guest_to_host)
            .field("host_to_guest", &self.host_to_guest)
            .finish()
    }
}

// =============================================================================
// Reading and validation
// =============================================================================

/// Errors from reading or validating the shared-file layout.
#[derive(Debug)]
pub enum LayoutError {
    /// Major version skew.
    VersionMismatch { expected: u16, found: u16 },
    /// Requested region name absent from the descriptor array.
    NameNotFound(String),
    /// A region's begin/data/end offsets are not monotonically ordered, or
    /// the region extends past the end of the file.
    BadCoverage(String),
    /// Two regions' byte ranges intersect.
    Overlap(String, String),
    /// Two regions share a name.
    DuplicateName(String),
    /// A signal table's offsets fall outside its region or are misaligned.
    TableOutOfRange(String),
    /// The file ended before the header or descriptor array did.
    Io(io::Error),
}

impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VersionMismatch { expected, found } => {
                write!(f, "layout version mismatch: expected {}, found {}", expected, found)
            }
            Self::NameNotFound(name) => write!(f, "region {:?} not found", name),
            Self::BadCoverage(name) => write!(f, "region {:?} offsets out of order", name),
            Self::Overlap(a, b) => write!(f, "regions {:?} and {:?} overlap", a, b),
            Self::DuplicateName(name) => write!(f, "duplicate region name {:?}", name),
            Self::TableOutOfRange(name) => {
                write!(f, "signal table of region {:?} out of range", name)
            }
            Self::Io(e) => write!(f, "layout read failed: {}", e),
        }
    }
}

impl std::error::Error for LayoutError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for LayoutError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Read the global header at offset 0.
pub fn read_header(file: &File) -> Result<GlobalHeader, LayoutError> {
    let mut buf = [0u8; core::mem::size_of::<GlobalHeader>()];
    file.read_exact_at(&mut buf, 0)?;
    // SAFETY: GlobalHeader is repr(C) with no padding and any bit pattern of
    // its integer fields is a valid value.
    Ok(unsafe { core::ptr::read_unaligned(buf.as_ptr().cast()) })
}

/// Read the full descriptor array the header points at.
pub fn read_descriptors(
    file: &File,
    header: &GlobalHeader,
) -> Result<Vec<RegionDescriptor>, LayoutError> {
    const DESC_SIZE: usize = core::mem::size_of::<RegionDescriptor>();
    let mut descs = Vec::with_capacity(header.region_count as usize);
    let mut buf = [0u8; DESC_SIZE];
    for i in 0..header.region_count as u64 {
        let at = header.region_desc_offset as u64 + i * DESC_SIZE as u64;
        file.read_exact_at(&mut buf, at)?;
        // SAFETY: RegionDescriptor is repr(C) with no padding and all-integer
        // fields; any bit pattern is a valid value.
        descs.push(unsafe { core::ptr::read_unaligned(buf.as_ptr().cast()) });
    }
    Ok(descs)
}

/// Locate one region by name, verifying the layout version first.
///
/// The returned descriptor is a by-value copy; the file is not consulted
/// again for this region.
pub fn find_region(file: &File, name: &str) -> Result<RegionDescriptor, LayoutError> {
    let header = read_header(file)?;
    header.check_version()?;
    let descs = read_descriptors(file, &header)?;
    descs
        .into_iter()
        .find(|d| d.name() == name)
        .ok_or_else(|| LayoutError::NameNotFound(name.to_owned()))
}

/// Validate the whole file against the layout invariants: ordered coverage,
/// non-overlap, unique names, and signal tables contained in their regions
/// at 4-byte alignment.
pub fn validate_file(file: &File) -> Result<(), LayoutError> {
    let header = read_header(file)?;
    header.check_version()?;
    let descs = read_descriptors(file, &header)?;
    let file_size = file.metadata().map_err(LayoutError::Io)?.len();

    for d in &descs {
        if !(d.begin_offset <= d.offset_of_region_data
            && d.offset_of_region_data < d.end_offset
            && u64::from(d.end_offset) <= file_size)
        {
            return Err(LayoutError::BadCoverage(d.name().to_owned()));
        }
        for table in [&d.guest_to_host, &d.host_to_guest] {
            let slots_end = table
                .futex_uaddr_table_offset
                .checked_add(table.table_bytes())
                .ok_or_else(|| LayoutError::TableOutOfRange(d.name().to_owned()))?;
            let flag_end = table
                .interrupt_signalled_offset
                .checked_add(4)
                .ok_or_else(|| LayoutError::TableOutOfRange(d.name().to_owned()))?;
            let in_range = slots_end <= d.region_size() && flag_end <= d.region_size();
            let aligned = table.futex_uaddr_table_offset % 4 == 0
                && table.interrupt_signalled_offset % 4 == 0;
            if !in_range || !aligned {
                return Err(LayoutError::TableOutOfRange(d.name().to_owned()));
            }
        }
    }

    for (i, a) in descs.iter().enumerate() {
        for b in &descs[i + 1..] {
            if a.name() == b.name() {
                return Err(LayoutError::DuplicateName(a.name().to_owned()));
            }
            if a.begin_offset < b.end_offset && b.begin_offset < a.end_offset {
                return Err(LayoutError::Overlap(a.name().to_owned(), b.name().to_owned()));
            }
        }
    }

    Ok(())
}

/// Build a name field from a string. Panics if the name does not fit with
/// its terminating null; callers validate first.
pub fn name_field(name: &str) -> [u8; REGION_NAME_CAPACITY] {
    assert!(
        !name.is_empty() && name.len() < REGION_NAME_CAPACITY,
        "region name must be 1..=15 bytes"
    );
    let mut field = [0u8; REGION_NAME_CAPACITY];
    field[..name.len()].copy_from_slice(name.as_bytes());
    field
}
