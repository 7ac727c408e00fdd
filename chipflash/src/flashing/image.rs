use object::elf::{FileHeader32, PT_LOAD};
use object::read::elf::{FileHeader, ProgramHeader};
use object::Endianness;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use super::FlashError;

/// Extended options for flashing a binary file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinOptions {
    /// The address in memory where the binary will be put at.
    pub base_address: Option<u64>,
    /// The number of bytes to skip at the start of the binary file.
    pub skip: u32,
}

/// A finite list of all the binary formats chipflash understands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Format {
    /// Marks a file in binary format. This means that the file contains the
    /// contents of the flash 1:1. [BinOptions] can be used to define the
    /// location in flash where the file contents should be put at, and to
    /// skip the first N bytes of the file.
    Bin(BinOptions),
    /// Marks a file in [Intel HEX](https://en.wikipedia.org/wiki/Intel_HEX) format.
    Hex,
    /// Marks a file in the [ELF](https://en.wikipedia.org/wiki/Executable_and_Linkable_Format) format.
    Elf,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &s.to_lowercase()[..] {
            "bin" | "binary" => Ok(Format::Bin(BinOptions::default())),
            "hex" | "ihex" | "intelhex" => Ok(Format::Hex),
            "elf" => Ok(Format::Elf),
            _ => Err(format!("format '{s}' is unknown")),
        }
    }
}

/// A finite list of all the errors that can occur when staging an image
/// file.
///
/// This includes corrupt file issues, OS permission issues as well as memory
/// boundary issues.
#[derive(Debug, Error)]
pub enum ImageError {
    /// Staging the image data onto the memory map failed.
    #[error("error while staging image data")]
    Flash(#[from] FlashError),
    /// Reading and decoding the IHEX file has failed due to the given error.
    #[error("could not read ihex format")]
    IhexRead(#[from] ihex::ReaderError),
    /// An IO error has occurred while reading the firmware file.
    #[error("i/o error")]
    Io(#[from] std::io::Error),
    /// Reading and decoding the given ELF file has resulted in the given
    /// error.
    #[error("could not read ELF file")]
    Elf(#[from] object::read::Error),
    /// A loadable segment of the ELF file could not be read.
    #[error("a loadable ELF segment has invalid data")]
    InvalidElfSegment,
    /// No loadable segments were found in the ELF file.
    ///
    /// This is most likely because of a bad linker script.
    #[error("no loadable ELF segments were found")]
    NoLoadableSegments,
}

/// Extracts the loadable segments of a 32-bit ELF image as
/// `(physical address, bytes)` pairs.
pub(super) fn extract_elf_segments(elf_data: &[u8]) -> Result<Vec<(u64, Vec<u8>)>, ImageError> {
    let elf = FileHeader32::<Endianness>::parse(elf_data)?;
    let endian = elf.endian()?;

    let mut segments = Vec::new();

    for header in elf.program_headers(endian, elf_data)? {
        if header.p_type(endian) != PT_LOAD || header.p_filesz(endian) == 0 {
            continue;
        }

        let data = header
            .data(endian, elf_data)
            .map_err(|_| ImageError::InvalidElfSegment)?;

        // Flash contents live at the physical, not the virtual address.
        let address = header.p_paddr(endian) as u64;

        tracing::info!(
            "found loadable segment at {:#010x} ({} bytes)",
            address,
            data.len()
        );

        segments.push((address, data.to_vec()));
    }

    if segments.is_empty() {
        return Err(ImageError::NoLoadableSegments);
    }

    Ok(segments)
}
