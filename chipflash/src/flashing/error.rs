use crate::transport::TransportError;
use chipflash_target::Architecture;
use std::ops::Range;
use thiserror::Error;

/// Describes any error that happened during or in preparation for the
/// flashing procedure.
#[derive(Debug, Error)]
pub enum FlashError {
    /// The target description is malformed. Surfaced before any target
    /// contact; there is no point in retrying.
    #[error("target description is invalid: {0}")]
    Validation(String),

    /// No NVM region of the target contains the requested range.
    #[error(
        "no flash memory contains the entire requested memory range {start:#010x}..{end:#010x}"
    )]
    NoSuitableNvm {
        /// Start of the requested range.
        start: u64,
        /// End of the requested range.
        end: u64,
    },

    /// None of the target's flash algorithms covers the given region.
    #[error("no flash algorithm covers the memory region {range:#010x?}")]
    NoFlashAlgorithmForRegion {
        /// The region that has no algorithm.
        range: Range<u64>,
    },

    /// Several algorithms cover the region and none is marked as default.
    #[error("multiple flash algorithms cover {range:#010x?} and none of them is the default")]
    NoDefaultAlgorithm {
        /// The ambiguous region.
        range: Range<u64>,
    },

    /// No RAM region is reachable by the core that runs the algorithm.
    #[error("no RAM accessible by core `{core}` is defined for chip `{chip}`")]
    NoRamDefined {
        /// The chip name.
        chip: String,
        /// The core the algorithm would run on.
        core: String,
    },

    /// The algorithm, its working buffer and its stack do not fit into the
    /// target RAM region.
    #[error("flash algorithm `{name}` needs {requested:#x} bytes of RAM, only {available:#x} available")]
    AlgorithmTooLarge {
        /// The algorithm name.
        name: String,
        /// The required number of bytes.
        requested: u64,
        /// The bytes available in the RAM region.
        available: u64,
    },

    /// The algorithm is not valid for the connected core.
    #[error("flash algorithm `{name}` cannot run on core `{core}` ({architecture:?})")]
    UnsupportedCore {
        /// The algorithm name.
        name: String,
        /// The core that was selected.
        core: String,
        /// The architecture of the connected core.
        architecture: Architecture,
    },

    /// Verification was requested but the algorithm has no verify routine.
    #[error("verification was requested, but the flash algorithm has no verify routine")]
    VerifyNotSupported,

    /// A full-chip erase was requested but the algorithm has no erase-all
    /// routine.
    #[error("a chip erase was requested, but the flash algorithm has no erase-all routine")]
    ChipEraseNotSupported,

    /// The page size of the flash is not supported.
    #[error("the page size {size:#x} is not a multiple of 4")]
    InvalidPageSize {
        /// The offending page size.
        size: u32,
    },

    /// The configured load address does not leave room for the algorithm
    /// header, or lies outside the chosen RAM region.
    #[error("the load address {address:#010x} is not usable for the flash algorithm")]
    InvalidLoadAddress {
        /// The offending address.
        address: u64,
    },

    /// The data to be written is not contained in the flash covered by the
    /// algorithm.
    #[error("write range {range:#010x?} is outside of the flash range {flash_range:#010x?}")]
    RangeOutOfBounds {
        /// The requested write range.
        range: Range<u64>,
        /// The range covered by the flash algorithm.
        flash_range: Range<u64>,
    },

    /// Two staged chunks of data overlap each other.
    #[error("data staged at address {address:#010x} overlaps previously staged data")]
    DataOverlaps {
        /// The address of the newly staged chunk.
        address: u64,
    },

    /// The RAM contents did not match the algorithm after loading it.
    #[error("the RAM contents did not match the expected contents after loading the flash algorithm")]
    AlgorithmNotLoaded,

    /// The init routine reported a failure.
    #[error("the init routine failed with code {code}")]
    Init {
        /// The routine's return code.
        code: u32,
    },

    /// The uninit routine reported a failure.
    #[error("the uninit routine failed with code {code}")]
    Uninit {
        /// The routine's return code.
        code: u32,
    },

    /// The erase-all routine reported a failure.
    #[error("erasing the chip failed with code {code}")]
    ChipEraseFailed {
        /// The routine's return code.
        code: u32,
    },

    /// Erasing a sector failed.
    #[error("erasing the sector at {sector_address:#010x} failed with code {code}")]
    EraseFailed {
        /// The base address of the sector.
        sector_address: u64,
        /// The routine's return code.
        code: u32,
    },

    /// Programming a page failed.
    #[error("programming the page at {page_address:#010x} failed with code {code}")]
    ProgramFailed {
        /// The base address of the page.
        page_address: u64,
        /// The routine's return code.
        code: u32,
    },

    /// The verify routine reported its first mismatching address.
    #[error("verification failed at address {address:#010x}")]
    VerifyFailed {
        /// The first address whose contents do not match.
        address: u64,
    },

    /// Reading back flash contents failed.
    #[error("reading back flash at {address:#010x} failed with code {code}")]
    ReadFailed {
        /// The address of the read.
        address: u64,
        /// The routine's return code.
        code: u32,
    },

    /// The algorithm overran its stack.
    #[error("the {routine} routine overflowed the algorithm stack")]
    StackOverflow {
        /// The routine that corrupted the stack canary.
        routine: &'static str,
    },

    /// A routine did not return in time. Fatal: a non-responding algorithm
    /// indicates a corrupted load or a wrong algorithm selection.
    #[error("the {routine} routine did not complete in time")]
    Timeout {
        /// The routine that timed out.
        routine: &'static str,
    },

    /// A value does not fit into a 32 bit target register.
    #[error("the value {0:#x} does not fit into a target register")]
    RegisterValueOutOfRange(u64),

    /// Compressed transfer data could not be decoded.
    #[error("decoding compressed transfer data failed")]
    Decompression,

    /// The run was cancelled between operations.
    #[error("the flashing run was cancelled")]
    Cancelled,

    /// Something went wrong in the debug transport. Possibly transient; the
    /// caller may retry the run, the engine itself never does.
    #[error("a debug transport operation failed")]
    Transport(#[source] TransportError),
}

impl FlashError {
    /// Maps a transport error of a routine call to the engine taxonomy:
    /// timeouts are fatal target failures, everything else stays a transport
    /// error.
    pub(super) fn from_call(routine: &'static str, error: TransportError) -> Self {
        match error {
            TransportError::Timeout { .. } => FlashError::Timeout { routine },
            other => FlashError::Transport(other),
        }
    }
}

pub(super) fn into_reg(value: u64) -> Result<u32, FlashError> {
    value
        .try_into()
        .map_err(|_| FlashError::RegisterValueOutOfRange(value))
}
