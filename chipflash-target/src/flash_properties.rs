use super::memory::{PageInfo, SectorDescription, SectorInfo};
use crate::serialize::{hex_range, hex_u_int};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Properties of flash memory, which
/// are used when programming Flash memory.
///
/// These values are read from the
/// target description files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FlashProperties {
    /// The range of the device flash.
    #[serde(serialize_with = "hex_range")]
    pub address_range: Range<u64>,
    /// The page size of the device flash.
    #[serde(serialize_with = "hex_u_int")]
    pub page_size: u32,
    /// The value of a byte in flash that was just erased.
    #[serde(serialize_with = "hex_u_int")]
    pub erased_byte_value: u8,
    /// The approximative time it takes to program a page, in milliseconds.
    pub program_page_timeout: u32,
    /// The approximative time it takes to erase a sector, in milliseconds.
    pub erase_sector_timeout: u32,
    /// The available sectors of the device flash.
    #[serde(default)]
    pub sectors: Vec<SectorDescription>,
}

impl Default for FlashProperties {
    #[allow(clippy::reversed_empty_ranges)]
    fn default() -> Self {
        FlashProperties {
            address_range: 0..0,
            page_size: 0,
            erased_byte_value: 0,
            program_page_timeout: 0,
            erase_sector_timeout: 0,
            sectors: vec![],
        }
    }
}

impl FlashProperties {
    /// Try to retrieve the information about the flash sector
    /// which contains `address`.
    ///
    /// If the `address` is not part of the flash, None will
    /// be returned.
    pub fn sector_containing(&self, address: u64) -> Option<SectorInfo> {
        if !self.address_range.contains(&address) {
            return None;
        }

        let offset = address - self.address_range.start;

        // The sector description whose offset region the address falls into.
        let description = self.sectors.iter().rfind(|s| s.address <= offset)?;

        let sector_index = (offset - description.address) / description.size;
        let base_address =
            self.address_range.start + description.address + sector_index * description.size;

        Some(SectorInfo {
            base_address,
            size: description.size,
        })
    }

    /// Returns the page which `address` resides in, if the address is inside
    /// the flash region.
    pub fn page_containing(&self, address: u64) -> Option<PageInfo> {
        if !self.address_range.contains(&address) {
            return None;
        }

        Some(PageInfo {
            base_address: address - (address % self.page_size as u64),
            size: self.page_size,
        })
    }

    /// Iterate over all the sectors of the flash.
    pub fn iter_sectors(&self) -> impl Iterator<Item = SectorInfo> + '_ {
        assert!(!self.sectors.is_empty());
        assert!(self.sectors[0].address == 0);

        let mut addr = self.address_range.start;
        let mut desc_idx = 0;
        std::iter::from_fn(move || {
            if addr >= self.address_range.end {
                return None;
            }

            // Advance desc_idx if needed
            if let Some(next_desc) = self.sectors.get(desc_idx + 1) {
                if self.address_range.start + next_desc.address <= addr {
                    desc_idx += 1;
                }
            }

            let size = self.sectors[desc_idx].size;
            let sector = SectorInfo {
                base_address: addr,
                size,
            };
            addr += size;

            Some(sector)
        })
    }

    /// Iterate over all the pages of the flash.
    pub fn iter_pages(&self) -> impl Iterator<Item = PageInfo> + '_ {
        let mut addr = self.address_range.start;
        std::iter::from_fn(move || {
            if addr >= self.address_range.end {
                return None;
            }

            let page = PageInfo {
                base_address: addr,
                size: self.page_size,
            };
            addr += self.page_size as u64;

            Some(page)
        })
    }

    /// Returns true if the entire contents of the argument array equal the erased byte value.
    pub fn is_erased(&self, data: &[u8]) -> bool {
        data.iter().all(|b| *b == self.erased_byte_value)
    }
}
