//! Flash programming operations.
//!
//! This module turns a declarative target descriptor plus a binary image
//! into correctly-sequenced device-memory writes: it plans the staged data
//! onto the flash geometry, loads the descriptor's flash algorithm into
//! target RAM, and drives it through the init, erase, program, verify and
//! uninit sequence over the debug transport.
//!
//! ## Example
//!
//! Planning is independent of a target connection and can be inspected up
//! front:
//!
//! ```
//! use chipflash::flashing::FlashBuilder;
//! use chipflash::config::{FlashProperties, SectorDescription};
//!
//! let mut builder = FlashBuilder::new();
//! builder.add_data(0x0800_0000, &[0xaa; 0x600])?;
//!
//! let properties = FlashProperties {
//!     address_range: 0x0800_0000..0x0810_0000,
//!     page_size: 0x400,
//!     erased_byte_value: 0xff,
//!     program_page_timeout: 300,
//!     erase_sector_timeout: 3000,
//!     sectors: vec![SectorDescription { size: 0x800, address: 0 }],
//! };
//!
//! let layout = builder.build_layout(&properties)?;
//! assert_eq!(layout.sectors().len(), 1);
//! assert_eq!(layout.pages().len(), 2);
//! # Ok::<(), chipflash::flashing::FlashError>(())
//! ```
//!
//! To program a connected target, resolve a [`Target`](crate::Target) from
//! its chip family and hand a [`FlashLoader`] or [`program_image`] a
//! [`Transport`](crate::transport::Transport) implementation.

mod algorithm;
mod builder;
mod encoder;
mod error;
mod flasher;
mod image;
mod interlock;
mod loader;
mod progress;

pub use algorithm::FlashAlgorithm;
pub use builder::{
    FlashBuilder, FlashFill, FlashLayout, FlashPage, FlashSector, PlannedOperation,
};
pub use encoder::{compress, decompress, FlashEncoder};
pub use error::FlashError;
pub use flasher::{
    CancelToken, CompletedOperation, FlashReport, Flasher, Operation, ProgramOptions,
    DEFAULT_INIT_TIMEOUT,
};
pub use image::{BinOptions, Format, ImageError};
pub use interlock::{FlashInterlock, InterlockGuard};
pub use loader::{program_image, FlashLoader};
pub use progress::{FlashProgress, ProgressEvent};
