use chipflash_target::{FlashProperties, MemoryRange};
use std::fmt::{Debug, Formatter};
use std::ops::Range;

use super::FlashError;

/// The description of a page in flash.
#[derive(Clone, PartialEq, Eq)]
pub struct FlashPage {
    pub(super) address: u64,
    pub(super) data: Vec<u8>,
}

impl Debug for FlashPage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashPage")
            .field("address", &format_args!("{:#010x}", self.address))
            .field("size", &format_args!("{:#x}", self.size()))
            .finish()
    }
}

impl FlashPage {
    /// Returns the start address of the page.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Returns the size of the page in bytes.
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Returns the data slice of the page.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the mut data slice of the page.
    pub(super) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// The description of a sector in flash.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FlashSector {
    pub(super) address: u64,
    pub(super) size: u64,
}

impl Debug for FlashSector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashSector")
            .field("address", &format_args!("{:#010x}", self.address))
            .field("size", &format_args!("{:#x}", self.size))
            .finish()
    }
}

impl FlashSector {
    /// Returns the start address of the sector.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Returns the size of the sector in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// A span of a page that no staged data covers.
///
/// Fill spans are erased as collateral of their sector and are either left
/// at the erased byte value or restored from a read-back of the old flash
/// contents.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FlashFill {
    address: u64,
    size: u64,
    page_index: usize,
}

impl Debug for FlashFill {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashFill")
            .field("address", &format_args!("{:#010x}", self.address))
            .field("size", &format_args!("{:#x}", self.size))
            .field("page_index", &self.page_index)
            .finish()
    }
}

impl FlashFill {
    /// Returns the start address of the fill.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Returns the size of the fill in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the index of the page the fill belongs to.
    pub fn page_index(&self) -> usize {
        self.page_index
    }
}

/// A planned operation against the flash, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedOperation {
    /// Erase the sector at the given address.
    Erase {
        /// Base address of the sector.
        address: u64,
        /// Size of the sector.
        size: u64,
    },
    /// Program the page at the given address.
    Program {
        /// Base address of the page.
        address: u64,
        /// Size of the page.
        size: u32,
    },
}

/// The planned layout of a programming run: which sectors get erased, which
/// pages get programmed with what contents, and which page spans are
/// collateral fills.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlashLayout {
    sectors: Vec<FlashSector>,
    pages: Vec<FlashPage>,
    fills: Vec<FlashFill>,
}

impl FlashLayout {
    /// Get the sectors of the flash layout.
    pub fn sectors(&self) -> &[FlashSector] {
        &self.sectors
    }

    /// Get the pages of the flash layout.
    pub fn pages(&self) -> &[FlashPage] {
        &self.pages
    }

    /// Get the pages of the flash layout as mut.
    pub(super) fn pages_mut(&mut self) -> &mut [FlashPage] {
        &mut self.pages
    }

    /// Get the fills of the flash layout.
    pub fn fills(&self) -> &[FlashFill] {
        &self.fills
    }

    /// The planned operations in execution order: every erase, then every
    /// program, both ascending by address.
    pub fn operations(&self) -> impl Iterator<Item = PlannedOperation> + '_ {
        let erases = self.sectors.iter().map(|sector| PlannedOperation::Erase {
            address: sector.address,
            size: sector.size,
        });
        let programs = self.pages.iter().map(|page| PlannedOperation::Program {
            address: page.address,
            size: page.size(),
        });
        erases.chain(programs)
    }
}

/// A block of data that is to be written to flash.
#[derive(Clone)]
struct FlashDataBlock {
    address: u64,
    data: Vec<u8>,
}

impl FlashDataBlock {
    fn range(&self) -> Range<u64> {
        self.address..self.address + self.data.len() as u64
    }
}

/// Collects chunks of data to be written and plans them onto the sector and
/// page geometry of a flash device.
///
/// Chunks are kept sorted by address and must not overlap. Once all data is
/// staged, [`FlashBuilder::build_layout`] maps it onto a
/// [`FlashProperties`]' sector table.
#[derive(Default, Clone)]
pub struct FlashBuilder {
    blocks: Vec<FlashDataBlock>,
}

impl FlashBuilder {
    /// Creates a new `FlashBuilder` with empty data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block of data to be programmed.
    ///
    /// Programming does not start until the layout is built and handed to
    /// the flasher.
    pub fn add_data(&mut self, address: u64, data: &[u8]) -> Result<(), FlashError> {
        let range = address..address + data.len() as u64;

        match self
            .blocks
            .binary_search_by_key(&address, |block| block.address)
        {
            Ok(_) => Err(FlashError::DataOverlaps { address }),
            Err(position) => {
                // The neighbor on either side must not intersect the new
                // block.
                if position > 0 {
                    if let Some(block) = self.blocks.get(position - 1) {
                        if block.range().intersects_range(&range) {
                            return Err(FlashError::DataOverlaps { address });
                        }
                    }
                }
                if let Some(block) = self.blocks.get(position) {
                    if block.range().intersects_range(&range) {
                        return Err(FlashError::DataOverlaps { address });
                    }
                }

                self.blocks.insert(
                    position,
                    FlashDataBlock {
                        address,
                        data: data.to_vec(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Returns whether no data is staged.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The total number of staged bytes.
    pub fn staged_bytes(&self) -> u64 {
        self.blocks.iter().map(|block| block.data.len() as u64).sum()
    }

    /// Iterates all staged chunks intersecting `range`, in ascending address
    /// order, clipped to the range.
    pub fn data_in_range(&self, range: &Range<u64>) -> impl Iterator<Item = (u64, &[u8])> + '_ {
        let range = range.clone();
        self.blocks.iter().filter_map(move |block| {
            let block_range = block.range();
            if !range.intersects_range(&block_range) {
                return None;
            }
            let start = block_range.start.max(range.start);
            let end = block_range.end.min(range.end);
            let offset = (start - block_range.start) as usize;
            let len = (end - start) as usize;
            Some((start, &block.data[offset..offset + len]))
        })
    }

    /// Builds a copy of this builder containing only the data inside
    /// `range`.
    pub(super) fn restrict_to(&self, range: &Range<u64>) -> FlashBuilder {
        let mut builder = FlashBuilder::new();
        for (address, data) in self.data_in_range(range) {
            // Clipped chunks of a non-overlapping set never overlap.
            builder.add_data(address, data).unwrap();
        }
        builder
    }

    /// Maps the staged data onto the given flash geometry.
    ///
    /// Emits every sector that needs erasing exactly once and every page
    /// that needs programming exactly once, both in ascending address order.
    /// Pages are padded with the erased byte value wherever no staged data
    /// covers them; those spans are additionally reported as fills.
    pub fn build_layout(&self, properties: &FlashProperties) -> Result<FlashLayout, FlashError> {
        let flash_range = &properties.address_range;

        for block in &self.blocks {
            if !flash_range.contains_range(&block.range()) {
                return Err(FlashError::RangeOutOfBounds {
                    range: block.range(),
                    flash_range: flash_range.clone(),
                });
            }
        }

        let mut pages: Vec<FlashPage> = Vec::new();

        // Pages first. Blocks are sorted, so pages come out sorted as well;
        // two blocks may share a page.
        for block in &self.blocks {
            let mut address = block.address;
            let block_range = block.range();

            while address < block_range.end {
                // Lookups cannot fail after the bounds check above.
                let info = properties
                    .page_containing(address)
                    .expect("staged data is inside the flash range");

                let page = match pages.iter_mut().rfind(|page| page.address == info.base_address)
                {
                    Some(page) => page,
                    None => {
                        pages.push(FlashPage {
                            address: info.base_address,
                            data: vec![properties.erased_byte_value; info.size as usize],
                        });
                        pages.last_mut().unwrap()
                    }
                };

                let page_end = info.base_address + info.size as u64;
                let copy_end = block_range.end.min(page_end);
                let page_offset = (address - info.base_address) as usize;
                let block_offset = (address - block_range.start) as usize;
                let len = (copy_end - address) as usize;
                page.data[page_offset..page_offset + len]
                    .copy_from_slice(&block.data[block_offset..block_offset + len]);

                address = copy_end;
            }
        }

        // Sectors derive from the pages, not the raw blocks: programming a
        // padded page touches every sector the page spans.
        let mut sectors: Vec<FlashSector> = Vec::new();
        for page in &pages {
            let page_end = page.address + page.size() as u64;
            let mut address = page.address;
            while address < page_end {
                let info = properties
                    .sector_containing(address)
                    .expect("pages are inside the flash range");
                if sectors
                    .last()
                    .map_or(true, |sector| sector.address != info.base_address)
                {
                    sectors.push(FlashSector {
                        address: info.base_address,
                        size: info.size,
                    });
                }
                address = info.base_address + info.size;
            }
        }

        // Every page span not covered by staged data is a fill.
        let mut fills: Vec<FlashFill> = Vec::new();
        for (page_index, page) in pages.iter().enumerate() {
            let page_end = page.address + page.size() as u64;
            let mut cursor = page.address;

            for block in &self.blocks {
                let block_range = block.range();
                if block_range.end <= cursor || block_range.start >= page_end {
                    continue;
                }
                if block_range.start > cursor {
                    fills.push(FlashFill {
                        address: cursor,
                        size: block_range.start - cursor,
                        page_index,
                    });
                }
                cursor = cursor.max(block_range.end);
                if cursor >= page_end {
                    break;
                }
            }

            if cursor < page_end {
                fills.push(FlashFill {
                    address: cursor,
                    size: page_end - cursor,
                    page_index,
                });
            }
        }

        tracing::debug!(
            "planned {} sector erases and {} page programs",
            sectors.len(),
            pages.len()
        );

        Ok(FlashLayout {
            sectors,
            pages,
            fills,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chipflash_target::SectorDescription;
    use pretty_assertions::assert_eq;

    fn demo_properties(page_size: u32, sector_size: u64) -> FlashProperties {
        FlashProperties {
            address_range: 0x0..0x2_0000,
            page_size,
            erased_byte_value: 0xff,
            program_page_timeout: 200,
            erase_sector_timeout: 200,
            sectors: vec![SectorDescription {
                size: sector_size,
                address: 0,
            }],
        }
    }

    #[test]
    fn add_overlapping_data() {
        let mut builder = FlashBuilder::new();
        assert!(builder.add_data(0, &[42]).is_ok());
        assert!(builder.add_data(0, &[42]).is_err());
    }

    #[test]
    fn add_non_overlapping_data() {
        let mut builder = FlashBuilder::new();
        assert!(builder.add_data(0, &[42]).is_ok());
        assert!(builder.add_data(1, &[42]).is_ok());
    }

    #[test]
    fn add_data_straddling_existing_block() {
        let mut builder = FlashBuilder::new();
        assert!(builder.add_data(4, &[0; 4]).is_ok());
        assert!(builder.add_data(2, &[0; 4]).is_err());
        assert!(builder.add_data(7, &[0; 4]).is_err());
    }

    #[test]
    fn sector_aligned_write_plan() {
        // Sector table [{size: 0x400, address: 0x0}] over 0x0..0x20000,
        // write 0x0..0xc00.
        let properties = demo_properties(0x400, 0x400);
        let mut builder = FlashBuilder::new();
        builder.add_data(0x0, &[0x42; 0xc00]).unwrap();

        let layout = builder.build_layout(&properties).unwrap();

        let operations: Vec<_> = layout.operations().collect();
        assert_eq!(
            operations,
            vec![
                PlannedOperation::Erase {
                    address: 0x0,
                    size: 0x400
                },
                PlannedOperation::Erase {
                    address: 0x400,
                    size: 0x400
                },
                PlannedOperation::Erase {
                    address: 0x800,
                    size: 0x400
                },
                PlannedOperation::Program {
                    address: 0x0,
                    size: 0x400
                },
                PlannedOperation::Program {
                    address: 0x400,
                    size: 0x400
                },
                PlannedOperation::Program {
                    address: 0x800,
                    size: 0x400
                },
            ]
        );
        assert!(layout.fills().is_empty());
    }

    #[test]
    fn unaligned_write_is_padded_with_erased_value() {
        // Write 0x10..0x50 with a page size of 0x80: a single program
        // operation covering the whole page, padded on both sides.
        let properties = demo_properties(0x80, 0x400);
        let mut builder = FlashBuilder::new();
        builder.add_data(0x10, &[0xaa; 0x40]).unwrap();

        let layout = builder.build_layout(&properties).unwrap();

        assert_eq!(layout.pages().len(), 1);
        let page = &layout.pages()[0];
        assert_eq!(page.address(), 0x0);
        assert_eq!(page.size(), 0x80);
        assert!(page.data()[..0x10].iter().all(|b| *b == 0xff));
        assert!(page.data()[0x10..0x50].iter().all(|b| *b == 0xaa));
        assert!(page.data()[0x50..].iter().all(|b| *b == 0xff));

        assert_eq!(
            layout.fills(),
            &[
                FlashFill {
                    address: 0x0,
                    size: 0x10,
                    page_index: 0
                },
                FlashFill {
                    address: 0x50,
                    size: 0x30,
                    page_index: 0
                },
            ]
        );
    }

    #[test]
    fn sectors_are_erased_at_most_once() {
        // Two pages in the same sector must erase the sector only once.
        let properties = demo_properties(0x100, 0x400);
        let mut builder = FlashBuilder::new();
        builder.add_data(0x0, &[1; 0x100]).unwrap();
        builder.add_data(0x200, &[2; 0x100]).unwrap();

        let layout = builder.build_layout(&properties).unwrap();

        assert_eq!(layout.sectors().len(), 1);
        assert_eq!(layout.sectors()[0].address(), 0x0);
        assert_eq!(layout.pages().len(), 2);
    }

    #[test]
    fn page_spanning_multiple_small_sectors_erases_them_all() {
        // Sector 0x100, page 0x400: one staged byte still erases all four
        // sectors the padded page covers.
        let properties = demo_properties(0x400, 0x100);
        let mut builder = FlashBuilder::new();
        builder.add_data(0x0, &[1]).unwrap();

        let layout = builder.build_layout(&properties).unwrap();

        let erases: Vec<_> = layout.sectors().iter().map(|s| s.address()).collect();
        assert_eq!(erases, vec![0x0, 0x100, 0x200, 0x300]);
    }

    #[test]
    fn two_blocks_in_one_page_fill_the_gap_between_them() {
        let properties = demo_properties(0x100, 0x400);
        let mut builder = FlashBuilder::new();
        builder.add_data(0x0, &[1; 0x20]).unwrap();
        builder.add_data(0x40, &[2; 0xc0]).unwrap();

        let layout = builder.build_layout(&properties).unwrap();

        assert_eq!(layout.pages().len(), 1);
        assert_eq!(
            layout.fills(),
            &[FlashFill {
                address: 0x20,
                size: 0x20,
                page_index: 0
            }]
        );
    }

    #[test]
    fn write_outside_flash_is_rejected() {
        let properties = demo_properties(0x400, 0x400);
        let mut builder = FlashBuilder::new();
        builder.add_data(0x1_fc00, &[0; 0x800]).unwrap();

        assert!(matches!(
            builder.build_layout(&properties),
            Err(FlashError::RangeOutOfBounds { .. })
        ));
    }

    #[test]
    fn out_of_order_staging_is_sorted() {
        let properties = demo_properties(0x400, 0x400);
        let mut builder = FlashBuilder::new();
        builder.add_data(0x800, &[2; 0x400]).unwrap();
        builder.add_data(0x0, &[1; 0x400]).unwrap();

        let layout = builder.build_layout(&properties).unwrap();
        let programs: Vec<_> = layout.pages().iter().map(|p| p.address()).collect();
        assert_eq!(programs, vec![0x0, 0x800]);
    }

    #[test]
    fn data_in_range_clips_blocks() {
        let mut builder = FlashBuilder::new();
        builder.add_data(0x10, &[1, 2, 3, 4]).unwrap();

        let clipped: Vec<_> = builder.data_in_range(&(0x12..0x20)).collect();
        assert_eq!(clipped, vec![(0x12, &[3u8, 4u8][..])]);
    }
}
