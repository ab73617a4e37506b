//! Shared-file layout builder.
//!
//! The launcher lays out the shared file once, before either side opens
//! anything: global header, region descriptor array, then the regions
//! themselves, each beginning page-aligned with its two signal tables ahead
//! of the typed data area. Contents are zeroed, which is every region's
//! valid initial state.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::layout::{
    self, GlobalHeader, RegionDescriptor, SignalTableLayout, LAYOUT_MAJOR_VERSION,
    LAYOUT_MINOR_VERSION, REGION_NAME_CAPACITY,
};
use crate::util::align_up;

/// Host page size; region begin offsets are aligned to this so the host can
/// map a region directly at its file offset.
pub const PAGE_SIZE: u32 = 4096;

/// Alignment of every region's data area, enough for any cache-line-aligned
/// layout struct.
pub const DATA_ALIGN: u32 = 64;

/// One region to lay out.
#[derive(Debug, Clone)]
pub struct RegionPlan {
    name: String,
    data_size: u32,
    num_nodes_lg2: u32,
}

impl RegionPlan {
    /// Plan a region with `data_size` bytes of typed data and
    /// `2^num_nodes_lg2` signal slots per direction.
    pub fn new(name: &str, data_size: u32, num_nodes_lg2: u32) -> Self {
        assert!(
            !name.is_empty() && name.len() < REGION_NAME_CAPACITY,
            "region name must be 1..=15 bytes"
        );
        assert!(data_size > 0, "region data size must be nonzero");
        assert!(num_nodes_lg2 < 16, "signal table size out of range");
        Self {
            name: name.to_owned(),
            data_size,
            num_nodes_lg2,
        }
    }
}

/// Builds the shared file from a list of region plans.
#[derive(Debug, Default)]
pub struct FileBuilder {
    plans: Vec<RegionPlan>,
}

impl FileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a region. Order determines file placement.
    pub fn region(mut self, plan: RegionPlan) -> Self {
        self.plans.push(plan);
        self
    }

    /// Compute descriptors without touching a file.
    pub fn descriptors(&self) -> (GlobalHeader, Vec<RegionDescriptor>, u64) {
        const DESC_SIZE: u32 = core::mem::size_of::<RegionDescriptor>() as u32;
        const HEADER_SIZE: u32 = core::mem::size_of::<GlobalHeader>() as u32;

        let header = GlobalHeader {
            major_version: LAYOUT_MAJOR_VERSION,
            minor_version: LAYOUT_MINOR_VERSION,
            region_count: self.plans.len() as u32,
            region_desc_offset: HEADER_SIZE,
            reserved: 0,
        };

        let mut cursor = align_up(
            HEADER_SIZE + DESC_SIZE * self.plans.len() as u32,
            PAGE_SIZE,
        );
        let mut descs = Vec::with_capacity(self.plans.len());
        for plan in &self.plans {
            let slots_bytes = 4u32 << plan.num_nodes_lg2;
            let guest_to_host = SignalTableLayout {
                num_nodes_lg2: plan.num_nodes_lg2,
                futex_uaddr_table_offset: 0,
                interrupt_signalled_offset: slots_bytes,
            };
            let host_to_guest = SignalTableLayout {
                num_nodes_lg2: plan.num_nodes_lg2,
                futex_uaddr_table_offset: slots_bytes + 4,
                interrupt_signalled_offset: 2 * slots_bytes + 4,
            };
            let data_offset_in_region = align_up(2 * slots_bytes + 8, DATA_ALIGN);

            let begin = cursor;
            let end = begin + data_offset_in_region + plan.data_size;
            descs.push(RegionDescriptor {
                name: layout::name_field(&plan.name),
                begin_offset: begin,
                end_offset: end,
                offset_of_region_data: begin + data_offset_in_region,
                guest_to_host,
                host_to_guest,
            });
            cursor = align_up(end, PAGE_SIZE);
        }

        (header, descs, cursor as u64)
    }

    /// Create `path`, lay it out, and return the open file.
    ///
    /// The result is validated against the layout invariants before it is
    /// handed back.
    pub fn build(self, path: &Path) -> io::Result<File> {
        let (header, descs, total) = self.descriptors();

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(total)?;

        file.write_all_at(as_bytes(&header), 0)?;
        for (i, desc) in descs.iter().enumerate() {
            let at = header.region_desc_offset as u64
                + (i * core::mem::size_of::<RegionDescriptor>()) as u64;
            file.write_all_at(as_bytes(desc), at)?;
        }

        if let Err(e) = layout::validate_file(&file) {
            return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string()));
        }
        Ok(file)
    }
}

/// View a layout struct as bytes for writing.
fn as_bytes<T>(value: &T) -> &[u8] {
    // SAFETY: callers only pass the repr(C) layout structs, which have no
    // padding bytes.
    unsafe {
        std::slice::from_raw_parts(
            (value as *const T).cast::<u8>(),
            core::mem::size_of::<T>(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("vsoc-builder-{}-{}", tag, std::process::id()))
    }

    #[test]
    fn descriptors_are_ordered_and_page_aligned() {
        let (header, descs, total) = FileBuilder::new()
            .region(RegionPlan::new("primary", 8192, 5))
            .region(RegionPlan::new("secondary", 4096, 5))
            .descriptors();

        assert_eq!(header.region_count, 2);
        for d in &descs {
            assert_eq!(d.begin_offset % PAGE_SIZE, 0);
            assert!(d.begin_offset < d.offset_of_region_data);
            assert!(d.offset_of_region_data < d.end_offset);
            assert_eq!((d.offset_of_region_data - d.begin_offset) % DATA_ALIGN, 0);
        }
        assert!(descs[0].end_offset <= descs[1].begin_offset);
        assert!(u64::from(descs[1].end_offset) <= total);
    }

    #[test]
    fn signal_tables_sit_back_to_back_before_the_data() {
        let (_, descs, _) = FileBuilder::new()
            .region(RegionPlan::new("r", 64, 3))
            .descriptors();
        let d = &descs[0];
        let g2h = &d.guest_to_host;
        let h2g = &d.host_to_guest;

        assert_eq!(g2h.futex_uaddr_table_offset, 0);
        assert_eq!(g2h.interrupt_signalled_offset, 32);
        assert_eq!(h2g.futex_uaddr_table_offset, 36);
        assert_eq!(h2g.interrupt_signalled_offset, 68);
        assert!(h2g.interrupt_signalled_offset + 4 <= d.offset_of_region_data - d.begin_offset);
    }

    #[test]
    fn built_file_round_trips_through_find_region() {
        let path = scratch_path("roundtrip");
        let file = FileBuilder::new()
            .region(RegionPlan::new("input", 4096, 4))
            .region(RegionPlan::new("frames", 65536, 6))
            .build(&path)
            .unwrap();

        let desc = layout::find_region(&file, "frames").unwrap();
        assert_eq!(desc.name(), "frames");
        assert_eq!(desc.region_data_size(), 65536);
        assert!(layout::find_region(&file, "absent").is_err());
        layout::validate_file(&file).unwrap();

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn zero_lg2_builds_a_one_slot_table() {
        let (_, descs, _) = FileBuilder::new()
            .region(RegionPlan::new("tiny", 16, 0))
            .descriptors();
        assert_eq!(descs[0].guest_to_host.num_nodes(), 1);
        assert_eq!(descs[0].guest_to_host.interrupt_signalled_offset, 4);
    }
}
