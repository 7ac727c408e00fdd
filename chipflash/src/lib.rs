//! # chipflash
//!
//! A flash algorithm loading, execution and verification engine for
//! embedded targets.
//!
//! Chip vendors describe their devices declaratively: memory maps, core
//! types, and small relocatable flash-programming routines that must run
//! *on* the target, because a debug host cannot write flash cells directly.
//! This crate interprets such a descriptor: it loads the routine into
//! target RAM over a debug transport, plans an image onto the device's
//! sector and page geometry, and drives the routine operation by operation
//! until the image is in flash.
//!
//! The descriptor schema lives in the companion crate
//! [`chipflash_target`], re-exported here as [`config`]. The probe layer is
//! not part of this crate: implement [`transport::Transport`] on top of
//! your debug adapter and the engine does the rest.
//!
//! The flow is: load a [`config::ChipFamily`], resolve a [`Target`] from
//! it, stage data with a [`flashing::FlashLoader`] (or call
//! [`flashing::program_image`]) and inspect the returned
//! [`flashing::FlashReport`].
#![warn(missing_docs)]

pub mod flashing;
mod target;
pub mod transport;

/// The target description schema, re-exported from the `chipflash-target`
/// crate.
pub mod config {
    pub use chipflash_target::*;
}

pub use target::Target;
