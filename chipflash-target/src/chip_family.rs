use crate::{CoreAccessOptions, MemoryRange, MemoryRegion};

use super::chip::Chip;
use super::flash_algorithm::RawFlashAlgorithm;

use serde::{Deserialize, Serialize};

/// Source of a target description.
///
/// This is used for diagnostics, when
/// an error related to a target description occurs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetDescriptionSource {
    /// The target description is a built-in target description,
    /// which was included into the consuming tool at compile time.
    BuiltIn,
    /// The target description was from an external source
    /// during runtime.
    External,
}

/// Type of a supported core.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreType {
    /// ARMv6-M: Cortex M0, M0+, M1
    Armv6m,
    /// ARMv7-A: Cortex A7, A9, A15
    Armv7a,
    /// ARMv7-M: Cortex M3
    Armv7m,
    /// ARMv7e-M: Cortex M4, M7
    Armv7em,
    /// ARMv8-A: Cortex A35, A55, A72
    Armv8a,
    /// ARMv8-M: Cortex M23, M33
    Armv8m,
    /// RISC-V
    Riscv,
    /// Xtensa
    Xtensa,
}

impl CoreType {
    /// Returns true if the core type is an ARM Cortex-M
    pub fn is_cortex_m(&self) -> bool {
        matches!(
            self,
            CoreType::Armv6m | CoreType::Armv7em | CoreType::Armv7m | CoreType::Armv8m
        )
    }

    fn is_riscv(&self) -> bool {
        matches!(self, CoreType::Riscv)
    }

    fn is_xtensa(&self) -> bool {
        matches!(self, CoreType::Xtensa)
    }

    fn is_arm(&self) -> bool {
        matches!(
            self,
            CoreType::Armv6m
                | CoreType::Armv7a
                | CoreType::Armv7em
                | CoreType::Armv7m
                | CoreType::Armv8a
                | CoreType::Armv8m
        )
    }

    /// Returns the parent architecture family of this core type.
    pub fn architecture(&self) -> Architecture {
        match self {
            CoreType::Riscv => Architecture::Riscv,
            CoreType::Xtensa => Architecture::Xtensa,
            _ => Architecture::Arm,
        }
    }
}

/// The architecture family of a specific [`CoreType`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// An ARM core of one of the specific types [`CoreType::Armv6m`], [`CoreType::Armv7m`], [`CoreType::Armv7em`] or [`CoreType::Armv8m`]
    Arm,
    /// A RISC-V core.
    Riscv,
    /// An Xtensa core.
    Xtensa,
}

/// This describes a chip family with all its variants.
///
/// This struct is usually read from a target description
/// file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChipFamily {
    /// This is the name of the chip family in base form.
    /// E.g. `nRF52832`.
    pub name: String,
    /// This vector holds all the variants of the family.
    pub variants: Vec<Chip>,
    /// This vector holds all available algorithms.
    #[serde(default)]
    pub flash_algorithms: Vec<RawFlashAlgorithm>,
    #[serde(skip, default = "default_source")]
    /// Source of the target description, used for diagnostics
    pub source: TargetDescriptionSource,
}

fn default_source() -> TargetDescriptionSource {
    TargetDescriptionSource::External
}

impl ChipFamily {
    /// Validates the [`ChipFamily`] such that the runtime can make
    /// assumptions about the correctness without validating thereafter.
    ///
    /// This method should be called right after the [`ChipFamily`] is created!
    pub fn validate(&self) -> Result<(), String> {
        self.reject_duplicate_variant_names()?;
        self.ensure_algorithms_exist()?;
        self.ensure_at_least_one_core()?;
        self.reject_incorrect_core_access_options()?;
        self.validate_memory_regions()?;
        self.validate_sector_tables()?;
        self.validate_algorithm_ranges()?;
        self.reject_ambiguous_defaults()?;

        Ok(())
    }

    /// Rejects families with duplicate variant names. Only one of these
    /// variants can be selected, so having multiple is probably a mistake.
    fn reject_duplicate_variant_names(&self) -> Result<(), String> {
        use std::collections::HashSet;

        let mut seen = HashSet::new();

        for chip in &self.variants {
            if !seen.insert(&chip.name) {
                return Err(format!(
                    "variant {} appears multiple times in {}",
                    chip.name, self.name,
                ));
            }
        }

        Ok(())
    }

    /// Make sure the algorithms used on the variant actually exist on the
    /// family (this is basically a check for typos).
    fn ensure_algorithms_exist(&self) -> Result<(), String> {
        for variant in &self.variants {
            if variant.flash_algorithms.is_empty() {
                log::warn!(
                    "variant `{}` does not reference any flash algorithm",
                    variant.name
                );
            }

            for algorithm_name in variant.flash_algorithms.iter() {
                let matches = self
                    .flash_algorithms
                    .iter()
                    .filter(|algorithm| &algorithm.name == algorithm_name)
                    .count();

                if matches != 1 {
                    return Err(format!(
                        "flash algorithm `{}` for variant `{}` resolves to {} entries, expected exactly one",
                        algorithm_name, variant.name, matches
                    ));
                }
            }
        }

        Ok(())
    }

    // Check that there is at least one core, and that architectures are not mixed.
    fn ensure_at_least_one_core(&self) -> Result<(), String> {
        for variant in &self.variants {
            let Some(core) = variant.cores.first() else {
                return Err(format!(
                    "variant `{}` does not contain any cores",
                    variant.name
                ));
            };

            let architecture = core.core_type.architecture();
            if variant
                .cores
                .iter()
                .any(|core| core.core_type.architecture() != architecture)
            {
                return Err(format!(
                    "variant `{}` contains mixed core architectures",
                    variant.name
                ));
            }
        }

        Ok(())
    }

    fn reject_incorrect_core_access_options(&self) -> Result<(), String> {
        for variant in &self.variants {
            for core in variant.cores.iter() {
                // The core access options must match the core type specified.
                match &core.core_access_options {
                    CoreAccessOptions::Arm(_) if !core.core_type.is_arm() => {
                        return Err(format!(
                            "Arm options don't match core type {:?} on core {}",
                            core.core_type, core.name
                        ));
                    }
                    CoreAccessOptions::Riscv(_) if !core.core_type.is_riscv() => {
                        return Err(format!(
                            "Riscv options don't match core type {:?} on core {}",
                            core.core_type, core.name
                        ));
                    }
                    CoreAccessOptions::Xtensa(_) if !core.core_type.is_xtensa() => {
                        return Err(format!(
                            "Xtensa options don't match core type {:?} on core {}",
                            core.core_type, core.name
                        ));
                    }
                    CoreAccessOptions::Arm(options) => {
                        if matches!(core.core_type, CoreType::Armv7a | CoreType::Armv8a)
                            && options.debug_base.is_none()
                        {
                            return Err(format!("core {} requires setting debug_base", core.name));
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }

    /// Ensures that the memory is assigned to a core, and that all the cores exist
    fn validate_memory_regions(&self) -> Result<(), String> {
        for variant in &self.variants {
            let core_names = variant
                .cores
                .iter()
                .map(|core| &core.name)
                .collect::<Vec<_>>();

            for memory in &variant.memory_map {
                for core in memory.cores() {
                    if !core_names.contains(&core) {
                        return Err(format!(
                            "variant {}, memory region {:?} is assigned to a non-existent core {}",
                            variant.name, memory, core
                        ));
                    }
                }

                if memory.cores().is_empty() {
                    return Err(format!(
                        "variant {}, memory region {:?} is not assigned to a core",
                        variant.name, memory
                    ));
                }

                let range = memory.address_range();
                if range.start > range.end {
                    return Err(format!(
                        "variant {}, memory region {:?} has a reversed address range",
                        variant.name, memory
                    ));
                }
            }

            // Regions of one kind must be disjoint; only alias windows may
            // overlay other regions.
            for (index, memory) in variant.memory_map.iter().enumerate() {
                if memory.is_alias() {
                    continue;
                }
                for other in variant.memory_map.iter().skip(index + 1) {
                    if other.is_alias() || memory.is_nvm() != other.is_nvm() {
                        continue;
                    }
                    if memory.address_range().intersects_range(&other.address_range()) {
                        return Err(format!(
                            "variant {}, memory regions {:?} and {:?} overlap",
                            variant.name, memory, other
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// Ensures the sector descriptions of every algorithm partition its
    /// flash range: ascending, starting at offset zero, no gaps, no
    /// overlaps, and a description boundary never splits a sector.
    fn validate_sector_tables(&self) -> Result<(), String> {
        for algorithm in &self.flash_algorithms {
            let props = &algorithm.flash_properties;
            let flash_len = props.address_range.end - props.address_range.start;

            if props.page_size == 0 {
                return Err(format!(
                    "algorithm `{}` has a zero page size",
                    algorithm.name
                ));
            }

            let Some(first) = props.sectors.first() else {
                return Err(format!(
                    "algorithm `{}` does not describe any sectors",
                    algorithm.name
                ));
            };

            if first.address != 0 {
                return Err(format!(
                    "algorithm `{}`: first sector description must start at offset 0, found {:#x}",
                    algorithm.name, first.address
                ));
            }

            for pair in props.sectors.windows(2) {
                let (current, next) = (&pair[0], &pair[1]);

                if next.address <= current.address {
                    return Err(format!(
                        "algorithm `{}`: sector descriptions are not sorted ascending ({:#x} after {:#x})",
                        algorithm.name, next.address, current.address
                    ));
                }

                if current.size == 0 || (next.address - current.address) % current.size != 0 {
                    return Err(format!(
                        "algorithm `{}`: sector description at {:#x} splits a {:#x} byte sector",
                        algorithm.name, next.address, current.size
                    ));
                }
            }

            let last = props.sectors.last().unwrap();
            if last.size == 0
                || flash_len < last.address
                || (flash_len - last.address) % last.size != 0
            {
                return Err(format!(
                    "algorithm `{}`: sector descriptions do not partition the flash range",
                    algorithm.name
                ));
            }
        }

        Ok(())
    }

    /// Ensures each referenced algorithm's flash range is fully contained in
    /// an NVM region of the variant, reachable by at least one of the
    /// algorithm's cores.
    fn validate_algorithm_ranges(&self) -> Result<(), String> {
        for variant in &self.variants {
            for name in &variant.flash_algorithms {
                // Resolution is checked by `ensure_algorithms_exist`.
                let Some(algorithm) = self.get_algorithm(name) else {
                    continue;
                };

                let range = &algorithm.flash_properties.address_range;
                let cores = self.algorithm_cores(algorithm, variant);

                let reachable = variant.memory_map.iter().any(|region| {
                    let MemoryRegion::Nvm(nvm) = region else {
                        return false;
                    };
                    nvm.range.contains_range(range)
                        && cores.iter().any(|core| nvm.accessible_by(core))
                });

                if !reachable {
                    return Err(format!(
                        "algorithm `{}` covers {:#x?} which is not a reachable NVM region of variant `{}`",
                        algorithm.name, range, variant.name
                    ));
                }
            }
        }

        Ok(())
    }

    /// At most one algorithm per variant/region pair may be the default.
    fn reject_ambiguous_defaults(&self) -> Result<(), String> {
        for variant in &self.variants {
            for region in variant.memory_map.iter().filter_map(|r| r.as_nvm_region()) {
                let defaults = variant
                    .flash_algorithms
                    .iter()
                    .filter_map(|name| self.get_algorithm(name))
                    .filter(|algorithm| {
                        algorithm.default
                            && algorithm
                                .flash_properties
                                .address_range
                                .intersects_range(&region.range)
                    })
                    .count();

                if defaults > 1 {
                    return Err(format!(
                        "variant `{}` has {} default algorithms for region {:#x?}",
                        variant.name, defaults, region.range
                    ));
                }
            }
        }

        Ok(())
    }

    fn algorithm_cores(&self, algorithm: &RawFlashAlgorithm, variant: &Chip) -> Vec<String> {
        if algorithm.cores.is_empty() {
            variant.cores.iter().map(|core| core.name.clone()).collect()
        } else {
            algorithm.cores.clone()
        }
    }
}

impl ChipFamily {
    /// Get the different [Chip]s which are part of this
    /// family.
    pub fn variants(&self) -> &[Chip] {
        &self.variants
    }

    /// Get all flash algorithms for this family of chips.
    pub fn algorithms(&self) -> &[RawFlashAlgorithm] {
        &self.flash_algorithms
    }

    /// Try to find a [RawFlashAlgorithm] with a given name.
    pub fn get_algorithm(&self, name: impl AsRef<str>) -> Option<&RawFlashAlgorithm> {
        let name = name.as_ref();
        self.flash_algorithms.iter().find(|elem| elem.name == name)
    }

    /// Tries to find a [RawFlashAlgorithm] with a given name and returns it
    /// with the core assignment fixed to the cores of the given chip.
    pub fn get_algorithm_for_chip(
        &self,
        name: impl AsRef<str>,
        chip: &Chip,
    ) -> Option<RawFlashAlgorithm> {
        self.get_algorithm(name).map(|algo| {
            let mut algo_cores = self.algorithm_cores(algo, chip);

            // only keep cores in the algo that are also in the chip
            algo_cores.retain(|algo_core| {
                chip.cores
                    .iter()
                    .any(|chip_core| &chip_core.name == algo_core)
            });

            RawFlashAlgorithm {
                cores: algo_cores,
                ..algo.clone()
            }
        })
    }
}
