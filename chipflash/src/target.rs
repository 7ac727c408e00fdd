use chipflash_target::{
    Architecture, ChipFamily, Core, MemoryRegion, RawFlashAlgorithm, TargetDescriptionSource,
};

use crate::flashing::{FlashError, FlashInterlock};

/// A concrete target: one variant of a chip family, resolved and validated.
///
/// A target bundles the cores, the memory map and the owned set of flash
/// algorithms of a single chip variant. It is immutable for the lifetime of
/// a session and meant to be loaded once and shared read-only (typically as
/// an `Arc<Target>`) across engine instances; the embedded
/// [`FlashInterlock`] is the only synchronization state.
#[derive(Debug)]
pub struct Target {
    /// The name of the chip variant.
    pub name: String,
    /// The cores of the variant. Always at least one.
    pub cores: Vec<Core>,
    /// The memory map of the variant.
    pub memory_map: Vec<MemoryRegion>,
    /// The flash algorithms of the variant, with their core lists narrowed
    /// to the variant's cores.
    pub flash_algorithms: Vec<RawFlashAlgorithm>,
    /// Where the descriptor came from, for diagnostics.
    pub source: TargetDescriptionSource,
    interlock: FlashInterlock,
}

impl Target {
    /// Resolves a variant of a validated chip family into a target.
    ///
    /// Validates the family first: a malformed descriptor surfaces here as
    /// [`FlashError::Validation`], before any target contact.
    pub fn from_family(family: &ChipFamily, variant_name: &str) -> Result<Self, FlashError> {
        family.validate().map_err(FlashError::Validation)?;

        let chip = family
            .variants()
            .iter()
            .find(|variant| variant.name == variant_name)
            .ok_or_else(|| {
                FlashError::Validation(format!(
                    "family `{}` has no variant `{}`",
                    family.name, variant_name
                ))
            })?;

        let flash_algorithms = chip
            .flash_algorithms
            .iter()
            .filter_map(|name| family.get_algorithm_for_chip(name, chip))
            .collect();

        Ok(Self {
            name: chip.name.clone(),
            cores: chip.cores.clone(),
            memory_map: chip.memory_map.clone(),
            flash_algorithms,
            source: family.source.clone(),
            interlock: FlashInterlock::new(&chip.memory_map),
        })
    }

    /// Allows programming runs through an alias and its primary region to
    /// proceed in parallel.
    ///
    /// Only sound for targets whose alias windows are hardware-coherent;
    /// the conservative default serializes them.
    pub fn allow_aliased_parallelism(mut self) -> Self {
        self.interlock = FlashInterlock::new(&self.memory_map).allow_aliased_parallelism(true);
        self
    }

    /// The architecture of the target's cores.
    ///
    /// All cores of a variant share one architecture; targets built through
    /// [`Target::from_family`] always have at least one core.
    pub fn architecture(&self) -> Architecture {
        self.cores[0].core_type.architecture()
    }

    /// Returns the core with the given name, if the target has one.
    pub fn core_by_name(&self, name: &str) -> Option<&Core> {
        self.cores.iter().find(|core| core.name == name)
    }

    /// Returns the flash algorithm with the given name, if the target has
    /// one.
    pub fn flash_algorithm_by_name(&self, name: &str) -> Option<&RawFlashAlgorithm> {
        self.flash_algorithms
            .iter()
            .find(|algorithm| algorithm.name == name)
    }

    /// The interlock serializing runs that may touch the same physical
    /// flash cells.
    pub fn interlock(&self) -> &FlashInterlock {
        &self.interlock
    }
}
