use chipflash_target::{MemoryRange, MemoryRegion};
use std::ops::Range;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Serializes programming runs that touch the same physical flash cells.
///
/// Engine instances on different cores may program disjoint regions in
/// parallel. Alias regions break the "disjoint addresses mean disjoint
/// cells" assumption: an alias maps the same physical storage as its
/// primary region under a second address window. Since the descriptor does
/// not say *which* primary an alias maps, the interlock collapses to a
/// single whole-target lock as soon as the memory map contains any alias
/// NVM region.
///
/// Targets whose aliases are hardware-coherent can opt out with
/// [`FlashInterlock::allow_aliased_parallelism`]; that is a configuration
/// decision of the integrator, not of this crate.
#[derive(Debug)]
pub struct FlashInterlock {
    serialize_all: bool,
    whole_target: Mutex<()>,
    regions: Vec<(Range<u64>, Mutex<()>)>,
}

/// Held for the duration of a programming run against one region.
#[derive(Debug)]
pub struct InterlockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl FlashInterlock {
    /// Creates the interlock for a memory map.
    pub fn new(memory_map: &[MemoryRegion]) -> Self {
        let nvm_regions: Vec<_> = memory_map
            .iter()
            .filter_map(MemoryRegion::as_nvm_region)
            .collect();

        let serialize_all = nvm_regions.iter().any(|region| region.is_alias);
        let regions = nvm_regions
            .iter()
            .map(|region| (region.range.clone(), Mutex::new(())))
            .collect();

        Self {
            serialize_all,
            whole_target: Mutex::new(()),
            regions,
        }
    }

    /// Allows runs against an alias and its primary region to proceed in
    /// parallel.
    ///
    /// Only sound when the hardware guarantees write-through coherence
    /// between the windows.
    pub fn allow_aliased_parallelism(mut self, allow: bool) -> Self {
        if allow {
            self.serialize_all = false;
        }
        self
    }

    fn lock_for(&self, range: &Range<u64>) -> &Mutex<()> {
        if self.serialize_all {
            return &self.whole_target;
        }

        self.regions
            .iter()
            .find(|(region, _)| region.contains_range(range) || region.intersects_range(range))
            .map(|(_, lock)| lock)
            // Ranges outside every known region still serialize against the
            // whole target.
            .unwrap_or(&self.whole_target)
    }

    /// Blocks until the run may touch `range`, and holds the claim until
    /// the guard is dropped.
    pub fn acquire(&self, range: &Range<u64>) -> InterlockGuard<'_> {
        let guard = self
            .lock_for(range)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        InterlockGuard { _guard: guard }
    }

    /// Tries to claim `range` without blocking.
    pub fn try_acquire(&self, range: &Range<u64>) -> Option<InterlockGuard<'_>> {
        self.lock_for(range)
            .try_lock()
            .ok()
            .map(|guard| InterlockGuard { _guard: guard })
    }
}
