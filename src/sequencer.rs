/// Instruction sequencer: the per-cycle fetch → issue → execute loop of one
/// compute unit.
///
/// Resident wavefronts live in fixed-capacity pools. Every cycle:
///   1. Fetch: the fetch policy picks one wavefront, which fetches up to
///      `fetch_width` instructions through L1I → L2 → DRAM.
///   2. Issue: one pool, chosen round-robin, issues the head instruction of
///      each idle wavefront whose target execution unit is free.
///   3. Execute: every busy unit advances; a finished instruction clears its
///      wavefront's executing flag.
///
/// Vector memory instructions perform their coalesced access at issue time.
use crate::error::SimError;
use crate::instruction::{ExecUnitKind, Instruction, INSTRUCTION_BYTES};
use crate::memory::Hierarchy;
use crate::scheduler::{FetchCandidate, FetchPolicy};
use crate::wavefront::{Wavefront, WavefrontId, WAVEFRONT_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    wavefront: WavefrontId,
    /// Cycles left, including the current one
    remaining: u32,
}

/// One execution unit; holds at most one instruction in flight.
#[derive(Debug, Clone)]
pub struct ExecutionUnit {
    pub kind: ExecUnitKind,
    busy: Option<InFlight>,
    pub instructions_executed: u64,
    pub cycles_active: u64,
    pub cycles_idle: u64,
}

impl ExecutionUnit {
    pub fn new(kind: ExecUnitKind) -> Self {
        ExecutionUnit {
            kind,
            busy: None,
            instructions_executed: 0,
            cycles_active: 0,
            cycles_idle: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_some()
    }

    pub fn occupant(&self) -> Option<WavefrontId> {
        self.busy.map(|f| f.wavefront)
    }

    /// Advance one cycle. Returns the wavefront whose instruction completed.
    fn tick(&mut self) -> Option<WavefrontId> {
        let Some(flight) = self.busy.as_mut() else {
            self.cycles_idle += 1;
            return None;
        };
        self.cycles_active += 1;
        flight.remaining = flight.remaining.saturating_sub(1);
        if flight.remaining > 0 {
            return None;
        }
        let done = flight.wavefront;
        self.busy = None;
        self.instructions_executed += 1;
        Some(done)
    }

    /// Fraction of simulated cycles this unit spent busy.
    pub fn utilization(&self) -> f64 {
        let total = self.cycles_active + self.cycles_idle;
        if total == 0 { 0.0 } else { self.cycles_active as f64 / total as f64 }
    }
}

/// A wavefront aborted by a fault.
#[derive(Debug, Clone, PartialEq)]
pub struct WavefrontFault {
    pub wavefront: WavefrontId,
    pub error: SimError,
}

/// What one sequencer cycle produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleOutcome {
    /// Wavefronts that are done (including faulted ones), in pool order
    pub finished: Vec<WavefrontId>,
    pub faults: Vec<WavefrontFault>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequencerStats {
    pub cycles: u64,
    pub instructions_fetched: u64,
    pub instructions_issued: u64,
    /// Cycles in which the selected pool issued nothing
    pub empty_issue_cycles: u64,
}

pub struct InstructionSequencer {
    pools: Vec<Vec<Wavefront>>,
    slots_per_pool: usize,
    current_pool: usize,
    fetch_width: usize,
    /// Cycles a vector instruction occupies the SIMD
    vector_latency: u32,
    units: Vec<ExecutionUnit>,
    policy: Box<dyn FetchPolicy>,
    next_age: u64,
    stats: SequencerStats,
}

impl InstructionSequencer {
    pub fn new(
        num_pools: usize,
        slots_per_pool: usize,
        fetch_width: usize,
        simd_width: usize,
        policy: Box<dyn FetchPolicy>,
    ) -> Self {
        let lanes = simd_width.clamp(1, WAVEFRONT_SIZE);
        InstructionSequencer {
            pools: (0..num_pools.max(1)).map(|_| Vec::with_capacity(slots_per_pool)).collect(),
            slots_per_pool,
            current_pool: 0,
            fetch_width: fetch_width.max(1),
            vector_latency: WAVEFRONT_SIZE.div_ceil(lanes) as u32,
            units: ExecUnitKind::ALL.iter().map(|&k| ExecutionUnit::new(k)).collect(),
            policy,
            next_age: 0,
            stats: SequencerStats::default(),
        }
    }

    pub fn num_pools(&self) -> usize {
        self.pools.len()
    }

    pub fn current_pool(&self) -> usize {
        self.current_pool
    }

    pub fn free_slots(&self) -> usize {
        self.pools
            .iter()
            .map(|p| self.slots_per_pool.saturating_sub(p.len()))
            .sum()
    }

    pub fn resident(&self) -> usize {
        self.pools.iter().map(Vec::len).sum()
    }

    pub fn pool_occupancy(&self) -> Vec<usize> {
        self.pools.iter().map(Vec::len).collect()
    }

    pub fn wavefronts(&self) -> impl Iterator<Item = &Wavefront> {
        self.pools.iter().flatten()
    }

    pub fn get(&self, id: WavefrontId) -> Option<&Wavefront> {
        self.wavefronts().find(|w| w.id == id)
    }

    pub fn units(&self) -> &[ExecutionUnit] {
        &self.units
    }

    pub fn stats(&self) -> SequencerStats {
        self.stats
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Place `wavefront` in the first pool with a free slot.
    ///
    /// Returns the pool index, or hands the wavefront back if every pool is full.
    pub fn add_wavefront(&mut self, wavefront: Wavefront) -> Result<usize, Box<Wavefront>> {
        let Some(pool) = self.pools.iter().position(|p| p.len() < self.slots_per_pool) else {
            return Err(Box::new(wavefront));
        };
        let wavefront = wavefront.with_age(self.next_age);
        self.next_age += 1;
        log::trace!("sq: {} -> pool {}", wavefront.id, pool);
        self.pools[pool].push(wavefront);
        Ok(pool)
    }

    pub fn remove_wavefront(&mut self, id: WavefrontId) -> Option<Wavefront> {
        for unit in &mut self.units {
            if unit.occupant() == Some(id) {
                unit.busy = None;
            }
        }
        for pool in &mut self.pools {
            if let Some(pos) = pool.iter().position(|w| w.id == id) {
                return Some(pool.remove(pos));
            }
        }
        None
    }

    fn find_mut(&mut self, id: WavefrontId) -> Option<&mut Wavefront> {
        self.pools.iter_mut().flatten().find(|w| w.id == id)
    }

    pub fn cycle(&mut self, mem: &mut Hierarchy<'_>) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();
        self.fetch(mem, &mut outcome);
        self.issue(mem, &mut outcome);
        self.execute();
        self.stats.cycles += 1;

        outcome.finished = self
            .wavefronts()
            .filter(|w| w.is_done())
            .map(|w| w.id)
            .collect();
        outcome
    }

    fn fetch(&mut self, mem: &mut Hierarchy<'_>, outcome: &mut CycleOutcome) {
        let width = self.fetch_width;
        let candidates: Vec<FetchCandidate> = self
            .wavefronts()
            .filter(|w| !w.faulted && !w.fetch_complete() && w.buffer.len() < width)
            .map(|w| FetchCandidate { id: w.id, age: w.age })
            .collect();
        let Some(id) = self.policy.select(&candidates) else {
            return;
        };
        let Some(wave) = self.find_mut(id) else {
            return;
        };

        let mut fetched = 0;
        while wave.buffer.len() < width {
            let Some(instruction) = wave.program.get(wave.pc) else {
                break;
            };
            let address = wave.program.address_of(wave.pc);
            match mem.fetch_instruction(address, INSTRUCTION_BYTES as usize) {
                Ok(served) => {
                    log::trace!("sq: fetch {} pc={} {} ({:?})", wave.id, wave.pc, instruction, served);
                    wave.buffer.push_back(instruction);
                    wave.pc += 1;
                    fetched += 1;
                }
                Err(error) => {
                    log::warn!("sq: {} faulted on fetch: {}", wave.id, error);
                    wave.faulted = true;
                    outcome.faults.push(WavefrontFault { wavefront: wave.id, error });
                    break;
                }
            }
        }
        self.stats.instructions_fetched += fetched;
    }

    fn issue(&mut self, mem: &mut Hierarchy<'_>, outcome: &mut CycleOutcome) {
        let pool = self.current_pool;
        let mut issued = 0;
        for wave in self.pools[pool].iter_mut() {
            if wave.executing || wave.faulted {
                continue;
            }
            let Some(&instruction) = wave.buffer.front() else {
                continue;
            };
            let unit = &mut self.units[instruction.unit().index()];
            if unit.is_busy() {
                continue;
            }
            wave.buffer.pop_front();

            if let Err(error) = access_memory(wave, instruction, mem) {
                log::warn!("sq: {} faulted on {}: {}", wave.id, instruction, error);
                wave.faulted = true;
                outcome.faults.push(WavefrontFault { wavefront: wave.id, error });
                continue;
            }

            let remaining = match instruction.unit() {
                ExecUnitKind::Vector | ExecUnitKind::VectorMemory => self.vector_latency,
                _ => 1,
            };
            unit.busy = Some(InFlight { wavefront: wave.id, remaining });
            wave.executing = true;
            issued += 1;
            log::trace!("sq: issue {} {} on {}", wave.id, instruction, unit.kind);
        }
        self.stats.instructions_issued += issued;
        if issued == 0 {
            self.stats.empty_issue_cycles += 1;
        }
        self.current_pool = (self.current_pool + 1) % self.pools.len();
    }

    fn execute(&mut self) {
        let completed: Vec<WavefrontId> = self.units.iter_mut().filter_map(ExecutionUnit::tick).collect();
        for id in completed {
            if let Some(wave) = self.find_mut(id) {
                wave.executing = false;
            }
        }
    }
}

/// Lane addresses of a strided vector memory instruction.
///
/// A lane whose `size`-byte access would run past the end of the 64-bit
/// address space is out of range for any device.
fn lane_addresses(
    wave: &Wavefront,
    base: u64,
    stride: u64,
    size: usize,
    capacity: usize,
) -> Result<Vec<u64>, SimError> {
    (0..WAVEFRONT_SIZE)
        .map(|lane| {
            wave.work_item(lane)
                .checked_mul(stride)
                .and_then(|offset| base.checked_add(offset))
                .filter(|address| address.checked_add(size as u64).is_some())
                .ok_or_else(|| SimError::out_of_range(base, size, capacity))
        })
        .collect()
}

/// Perform the memory side effect of `instruction`, if it has one.
fn access_memory(
    wave: &mut Wavefront,
    instruction: Instruction,
    mem: &mut Hierarchy<'_>,
) -> Result<(), SimError> {
    match instruction {
        Instruction::ScalarLoad { address, size } => {
            mem.scalar_load(address, size as usize)?;
        }
        Instruction::VectorLoad { vdst, base, stride, size } => {
            // validate the destination before touching memory
            wave.read_register(0, vdst)?;
            let size = size.clamp(1, 4) as usize;
            let addresses = lane_addresses(wave, base, stride, size, mem.shared.dram.capacity())?;
            let sizes = vec![size; WAVEFRONT_SIZE];
            let results = mem.vector_load(&addresses, &sizes)?;
            for (lane, bytes) in results.iter().enumerate() {
                let mut word = [0u8; 4];
                let n = bytes.len().min(4);
                word[..n].copy_from_slice(&bytes[..n]);
                wave.write_register(lane, vdst, u32::from_le_bytes(word))?;
            }
        }
        Instruction::VectorStore { vsrc, base, stride, size } => {
            let size = size.clamp(1, 4) as usize;
            let addresses = lane_addresses(wave, base, stride, size, mem.shared.dram.capacity())?;
            let data = (0..WAVEFRONT_SIZE)
                .map(|lane| Ok(wave.read_register(lane, vsrc)?.to_le_bytes()[..size].to_vec()))
                .collect::<Result<Vec<_>, SimError>>()?;
            mem.vector_store(&addresses, &data)?;
        }
        _ => {}
    }
    Ok(())
}

impl std::fmt::Debug for InstructionSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstructionSequencer")
            .field("pools", &self.pool_occupancy())
            .field("current_pool", &self.current_pool)
            .field("policy", &self.policy.name())
            .field("stats", &self.stats)
            .finish()
    }
}
