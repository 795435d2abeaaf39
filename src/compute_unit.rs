/// Compute unit (CU): resource admission plus the instruction sequencer.
///
/// Admission is decided over a whole set of wavefronts at once so that a
/// workgroup is either resident in full on one CU or not at all.
use crate::cache::CacheConfig;
use crate::coalescer::Coalescer;
use crate::error::SimError;
use crate::memory::{Hierarchy, L1Caches, MemorySystem};
use crate::occupancy::{CuConfig, OccupancyLimiter, ResourceLedger, Resources};
use crate::scheduler::FetchPolicy;
use crate::sequencer::{CycleOutcome, InstructionSequencer};
use crate::wavefront::{Wavefront, WavefrontId};

/// Per-CU parameters beyond the resource ceilings.
#[derive(Debug, Clone)]
pub struct CuParams {
    pub resources: CuConfig,
    pub fetch_width: usize,
    pub simd_width: usize,
    pub transaction_size: usize,
    pub l1_instruction: CacheConfig,
    pub l1_scalar: CacheConfig,
    pub l1_vector: CacheConfig,
}

impl Default for CuParams {
    fn default() -> Self {
        CuParams {
            resources: CuConfig::gcn3(),
            fetch_width: 4,
            simd_width: 16,
            transaction_size: 64,
            l1_instruction: CacheConfig::l1_instruction(),
            l1_scalar: CacheConfig::l1_scalar(),
            l1_vector: CacheConfig::l1_vector(),
        }
    }
}

pub struct ComputeUnit {
    pub id: usize,
    ledger: ResourceLedger,
    sequencer: InstructionSequencer,
    pub l1: L1Caches,
    pub coalescer: Coalescer,
    pub cycle_count: u64,
    wavefronts_completed: u64,
}

impl ComputeUnit {
    pub fn new(id: usize, params: &CuParams, policy: Box<dyn FetchPolicy>) -> Self {
        let resources = &params.resources;
        ComputeUnit {
            id,
            ledger: ResourceLedger::new(resources.ceilings()),
            sequencer: InstructionSequencer::new(
                resources.num_pools as usize,
                resources.slots_per_pool() as usize,
                params.fetch_width,
                params.simd_width,
                policy,
            ),
            l1: L1Caches::new(&params.l1_instruction, &params.l1_scalar, &params.l1_vector),
            coalescer: Coalescer::new(params.transaction_size),
            cycle_count: 0,
            wavefronts_completed: 0,
        }
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn sequencer(&self) -> &InstructionSequencer {
        &self.sequencer
    }

    pub fn resident(&self) -> usize {
        self.sequencer.resident()
    }

    pub fn is_idle(&self) -> bool {
        self.sequencer.resident() == 0
    }

    pub fn wavefronts_completed(&self) -> u64 {
        self.wavefronts_completed
    }

    /// `None` if every wavefront in `wavefronts` fits together, else the
    /// first resource class that would be exhausted.
    pub fn shortfall(&self, wavefronts: &[Wavefront]) -> Option<OccupancyLimiter> {
        let demand: Resources = wavefronts.iter().map(Wavefront::demand).sum();
        if let Some(limiter) = self.ledger.shortfall(demand) {
            return Some(limiter);
        }
        // pool slots can run out before the ledger's slot ceiling when the
        // ceiling does not divide evenly into pools
        (self.sequencer.free_slots() < wavefronts.len()).then_some(OccupancyLimiter::WavefrontSlots)
    }

    pub fn has_resources_for(&self, wavefronts: &[Wavefront]) -> bool {
        self.shortfall(wavefronts).is_none()
    }

    /// Admit every wavefront in `wavefronts`, or none of them.
    pub fn allocate(&mut self, wavefronts: Vec<Wavefront>) -> Result<(), SimError> {
        if let Some(limiter) = self.shortfall(&wavefronts) {
            return Err(SimError::InsufficientResources { wavefronts: wavefronts.len(), limiter });
        }
        let demand: Resources = wavefronts.iter().map(Wavefront::demand).sum();
        self.ledger.reserve(demand)?;
        if let Err(error) = self.place(wavefronts) {
            self.ledger.release(demand);
            return Err(error);
        }
        Ok(())
    }

    /// Put `wavefronts` into sequencer pools. If a pool slot runs out part way,
    /// the wavefronts already placed are taken out again.
    fn place(&mut self, wavefronts: Vec<Wavefront>) -> Result<(), SimError> {
        let count = wavefronts.len();
        let mut placed = Vec::with_capacity(count);
        for wavefront in wavefronts {
            let id = wavefront.id;
            if self.sequencer.add_wavefront(wavefront).is_err() {
                log::warn!("cu{}: no pool slot for {}, rolling back {} wavefronts", self.id, id, placed.len());
                for id in placed {
                    self.sequencer.remove_wavefront(id);
                }
                return Err(SimError::InsufficientResources {
                    wavefronts: count,
                    limiter: OccupancyLimiter::WavefrontSlots,
                });
            }
            placed.push(id);
        }
        Ok(())
    }

    /// Release `id`'s resources and drop it from the sequencer.
    ///
    /// Returns `false`, changing nothing, if `id` is not resident.
    pub fn free(&mut self, id: WavefrontId) -> bool {
        match self.sequencer.remove_wavefront(id) {
            Some(wavefront) => {
                self.ledger.release(wavefront.demand());
                true
            }
            None => false,
        }
    }

    /// Run one sequencer cycle and free every wavefront that finished.
    pub fn execute_cycle(&mut self, shared: &mut MemorySystem) -> CycleOutcome {
        let outcome = {
            let mut mem = Hierarchy::new(&mut self.l1, &mut self.coalescer, shared);
            self.sequencer.cycle(&mut mem)
        };
        for &id in &outcome.finished {
            if self.free(id) {
                self.wavefronts_completed += 1;
                log::trace!("cu{}: retired {}", self.id, id);
            }
        }
        self.cycle_count += 1;
        outcome
    }
}

impl std::fmt::Debug for ComputeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeUnit")
            .field("id", &self.id)
            .field("used", &self.ledger.used())
            .field("sequencer", &self.sequencer)
            .field("cycle_count", &self.cycle_count)
            .finish()
    }
}
