use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::time::Instant;

use chipflash_target::{MemoryRegion, NvmRegion, RawFlashAlgorithm};
use ihex::Record;

use super::image::{extract_elf_segments, BinOptions, Format, ImageError};
use super::{
    CompletedOperation, FlashBuilder, FlashError, FlashReport, Flasher, ProgramOptions,
};
use crate::target::Target;
use crate::transport::Transport;

/// `FlashLoader` manages the flashing of any chunks of data onto any
/// sections of flash.
///
/// Use [`add_data`](FlashLoader::add_data) or one of the image readers to
/// stage data, then [`commit`](FlashLoader::commit) to flash it. The loader
/// selects the appropriate flash algorithm for every NVM region with staged
/// data, and writes RAM-resident chunks directly over the transport.
pub struct FlashLoader {
    memory_map: Vec<MemoryRegion>,
    builder: FlashBuilder,
}

impl FlashLoader {
    /// Create a new flash loader for a target.
    pub fn new(target: &Target) -> Self {
        Self {
            memory_map: target.memory_map.clone(),
            builder: FlashBuilder::new(),
        }
    }

    /// Check that the given address range is completely covered by the
    /// memory map, possibly by multiple memory regions.
    fn check_data_in_memory_map(&self, range: Range<u64>) -> Result<(), FlashError> {
        let mut address = range.start;
        while address < range.end {
            match chipflash_target::resolve(&self.memory_map, address) {
                Some(region) => address = region.address_range().end,
                None => {
                    return Err(FlashError::NoSuitableNvm {
                        start: range.start,
                        end: range.end,
                    })
                }
            }
        }
        Ok(())
    }

    /// Stages a chunk of data to be programmed.
    ///
    /// The chunk may cross region boundaries as long as the regions are
    /// contiguous in the memory map.
    pub fn add_data(&mut self, address: u64, data: &[u8]) -> Result<(), FlashError> {
        tracing::debug!(
            "staging data at {:#010x} ({} bytes)",
            address,
            data.len()
        );

        self.check_data_in_memory_map(address..address + data.len() as u64)?;
        self.builder.add_data(address, data)
    }

    /// Reads the data from a binary file and stages it at its base address.
    ///
    /// When [`BinOptions::base_address`] is absent, the data goes to the
    /// start of the first NVM region marked as boot memory, or the first
    /// NVM region when none is.
    pub fn load_bin_data<R: Read + Seek>(
        &mut self,
        file: &mut R,
        options: BinOptions,
    ) -> Result<(), ImageError> {
        file.seek(SeekFrom::Start(u64::from(options.skip)))?;

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        let address = match options.base_address {
            Some(address) => address,
            None => self
                .default_bin_address()
                .ok_or(FlashError::NoSuitableNvm { start: 0, end: 0 })?,
        };

        self.add_data(address, &buffer)?;

        Ok(())
    }

    fn default_bin_address(&self) -> Option<u64> {
        let nvm_regions: Vec<&NvmRegion> = self
            .memory_map
            .iter()
            .filter_map(MemoryRegion::as_nvm_region)
            .filter(|region| !region.is_alias)
            .collect();

        nvm_regions
            .iter()
            .find(|region| region.is_boot_memory())
            .or_else(|| nvm_regions.first())
            .map(|region| region.range.start)
    }

    /// Reads the HEX data segments and stages them at their record
    /// addresses.
    pub fn load_hex_data<R: Read>(&mut self, file: &mut R) -> Result<(), ImageError> {
        let mut base_address = 0;

        let mut data = String::new();
        file.read_to_string(&mut data)?;

        for record in ihex::Reader::new(&data) {
            match record? {
                Record::Data { offset, value } => {
                    let offset = base_address + offset as u64;
                    self.add_data(offset, &value)?;
                }
                Record::EndOfFile => (),
                Record::ExtendedSegmentAddress(address) => {
                    base_address = (address as u64) * 16;
                }
                Record::StartSegmentAddress { .. } => (),
                Record::ExtendedLinearAddress(address) => {
                    base_address = (address as u64) << 16;
                }
                Record::StartLinearAddress(_) => (),
            };
        }
        Ok(())
    }

    /// Stages the loadable segments of an ELF file at their physical
    /// addresses.
    pub fn load_elf_data<R: Read>(&mut self, file: &mut R) -> Result<(), ImageError> {
        let mut elf_buffer = Vec::new();
        file.read_to_end(&mut elf_buffer)?;

        let segments = extract_elf_segments(&elf_buffer)?;
        tracing::info!("found {} loadable segments", segments.len());

        for (address, data) in segments {
            self.add_data(address, &data)?;
        }

        Ok(())
    }

    /// Stages an image of the given format.
    pub fn load_image<R: Read + Seek>(
        &mut self,
        file: &mut R,
        format: Format,
    ) -> Result<(), ImageError> {
        match format {
            Format::Bin(options) => self.load_bin_data(file, options),
            Format::Hex => self.load_hex_data(file),
            Format::Elf => self.load_elf_data(file),
        }
    }

    /// Writes all the staged chunks to the target.
    ///
    /// NVM regions are programmed first through their flash algorithms; RAM
    /// chunks are written directly afterwards, since flashing clobbers RAM.
    /// Alias regions take part only when data was staged inside their
    /// window, and the target's interlock serializes them against their
    /// primary.
    pub fn commit<T: Transport>(
        &self,
        transport: &mut T,
        target: &Target,
        options: &ProgramOptions<'_>,
    ) -> Result<FlashReport, FlashError> {
        tracing::debug!("committing staged data");
        let started = Instant::now();
        let mut report = FlashReport::default();

        for region in self
            .memory_map
            .iter()
            .filter_map(MemoryRegion::as_nvm_region)
        {
            let region_builder = self.builder.restrict_to(&region.range);
            if region_builder.is_empty() {
                continue;
            }

            tracing::debug!(
                "programming region {:#010x?} ({} bytes staged)",
                region.range,
                region_builder.staged_bytes()
            );

            let algorithm = self.select_algorithm(region, target, options)?;
            tracing::debug!("using algorithm: {}", algorithm.name);

            let core_name = region.cores.first().cloned().ok_or_else(|| {
                FlashError::Validation(format!(
                    "region {:#010x?} is not assigned to a core",
                    region.range
                ))
            })?;

            // Serializes runs that could touch the same physical cells.
            let _guard = target.interlock().acquire(&region.range);

            let mut flasher = Flasher::new(target, &core_name, &algorithm, &mut *transport)?;
            let region_report = flasher.program(&region_builder, options)?;
            report.merge(region_report);
        }

        for region in self
            .memory_map
            .iter()
            .filter_map(MemoryRegion::as_ram_region)
        {
            for (address, data) in self.builder.data_in_range(&region.range) {
                tracing::info!(
                    "writing {} bytes into RAM at {:#010x}",
                    data.len(),
                    address
                );
                transport
                    .write_memory(address, data)
                    .map_err(FlashError::Transport)?;
                report.operations.push(CompletedOperation::RamWrite {
                    address,
                    size: data.len() as u64,
                });
            }
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    /// Picks the flash algorithm for a region: the one the caller named, or
    /// the region's only candidate, or the candidate marked as default.
    fn select_algorithm(
        &self,
        region: &NvmRegion,
        target: &Target,
        options: &ProgramOptions<'_>,
    ) -> Result<RawFlashAlgorithm, FlashError> {
        use chipflash_target::MemoryRange;

        if let Some(name) = &options.algorithm {
            return target
                .flash_algorithm_by_name(name)
                .filter(|algorithm| {
                    algorithm
                        .flash_properties
                        .address_range
                        .contains_range(&region.range)
                })
                .cloned()
                .ok_or_else(|| FlashError::NoFlashAlgorithmForRegion {
                    range: region.range.clone(),
                });
        }

        let candidates: Vec<&RawFlashAlgorithm> = target
            .flash_algorithms
            .iter()
            .filter(|algorithm| {
                algorithm
                    .flash_properties
                    .address_range
                    .contains_range(&region.range)
            })
            .collect();

        match candidates.as_slice() {
            [] => Err(FlashError::NoFlashAlgorithmForRegion {
                range: region.range.clone(),
            }),
            [only] => Ok((*only).clone()),
            _ => candidates
                .iter()
                .find(|algorithm| algorithm.default)
                .map(|algorithm| (*algorithm).clone())
                .ok_or_else(|| FlashError::NoDefaultAlgorithm {
                    range: region.range.clone(),
                }),
        }
    }
}

/// Programs `image` to `address` on the target: the engine's one-call
/// interface.
///
/// Stages the bytes, plans the run and drives it to completion, returning
/// the report of what was done.
pub fn program_image<T: Transport>(
    transport: &mut T,
    target: &Target,
    image: &[u8],
    address: u64,
    options: &ProgramOptions<'_>,
) -> Result<FlashReport, FlashError> {
    let mut loader = FlashLoader::new(target);
    loader.add_data(address, image)?;
    loader.commit(transport, target, options)
}
