/// Wavefronts: the group of 64 work-items the sequencer schedules as a unit.
///
/// A workgroup is always expanded into the same fixed number of wavefronts, and
/// all of them are admitted to one compute unit.
use crate::error::SimError;
use crate::instruction::{Instruction, Program};
use crate::kernel::{KernelId, Workgroup, WorkgroupId};
use crate::occupancy::{Resources, WavefrontCost};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

pub const WAVEFRONT_SIZE: usize = 64; // work-items per wavefront

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WavefrontId {
    pub workgroup: WorkgroupId,
    /// Position within the workgroup
    pub slot: u32,
}

impl std::fmt::Display for WavefrontId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/wf{}", self.workgroup, self.slot)
    }
}

/// Scheduling state of a resident wavefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavefrontState {
    /// Head instruction buffered and nothing in flight.
    Ready,
    /// An instruction is in flight on an execution unit.
    Executing,
    /// Waiting for instructions to be fetched.
    Fetch,
    /// Program exhausted or aborted by a fault.
    Done,
}

impl std::fmt::Display for WavefrontState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WavefrontState::Ready     => write!(f, "Ready"),
            WavefrontState::Executing => write!(f, "Executing"),
            WavefrontState::Fetch     => write!(f, "Fetch"),
            WavefrontState::Done      => write!(f, "Done"),
        }
    }
}

pub struct Wavefront {
    pub id: WavefrontId,
    /// Global wavefront index within the kernel's launch grid
    pub global_index: u32,
    pub program: Arc<Program>,
    pub cost: WavefrontCost,
    /// Program counter of the next instruction to fetch
    pub pc: usize,
    /// Fetched instructions, in program order
    pub buffer: VecDeque<Instruction>,
    pub executing: bool,
    pub faulted: bool,
    /// Vector register file: one row per lane, `cost.vgprs` registers each
    pub registers: Vec<Vec<u32>>,
    /// Admission order on its compute unit: lower means older
    pub age: u64,
}

impl Wavefront {
    pub fn new(workgroup: &Workgroup, slot: u32, wavefronts_per_workgroup: u32) -> Self {
        // registers are materialised lazily on first vector access
        Wavefront {
            id: WavefrontId { workgroup: workgroup.id, slot },
            global_index: workgroup.id.index * wavefronts_per_workgroup + slot,
            program: Arc::clone(&workgroup.program),
            cost: workgroup.cost,
            pc: 0,
            buffer: VecDeque::new(),
            executing: false,
            faulted: false,
            registers: Vec::new(),
            age: 0,
        }
    }

    /// Expand `workgroup` into its fixed set of wavefronts.
    pub fn expand(workgroup: &Workgroup, wavefronts_per_workgroup: u32) -> Vec<Wavefront> {
        (0..wavefronts_per_workgroup)
            .map(|slot| Wavefront::new(workgroup, slot, wavefronts_per_workgroup))
            .collect()
    }

    pub fn with_age(mut self, age: u64) -> Self {
        self.age = age;
        self
    }

    pub fn kernel(&self) -> KernelId {
        self.id.workgroup.kernel
    }

    pub fn demand(&self) -> Resources {
        self.cost.demand()
    }

    /// Flat work-item index of `lane` within the launch grid.
    pub fn work_item(&self, lane: usize) -> u64 {
        u64::from(self.global_index) * WAVEFRONT_SIZE as u64 + lane as u64
    }

    pub fn fetch_complete(&self) -> bool {
        self.pc >= self.program.len()
    }

    pub fn is_done(&self) -> bool {
        self.faulted || (self.fetch_complete() && self.buffer.is_empty() && !self.executing)
    }

    pub fn state(&self) -> WavefrontState {
        if self.is_done() {
            WavefrontState::Done
        } else if self.executing {
            WavefrontState::Executing
        } else if self.buffer.is_empty() {
            WavefrontState::Fetch
        } else {
            WavefrontState::Ready
        }
    }

    fn check_register(&self, register: u8) -> Result<usize, SimError> {
        let allocated = self.cost.vgprs as usize;
        let idx = usize::from(register);
        if idx >= allocated {
            return Err(SimError::RegisterOutOfRange { register, allocated });
        }
        Ok(idx)
    }

    fn ensure_registers(&mut self) {
        if self.registers.is_empty() {
            self.registers = vec![vec![0u32; self.cost.vgprs as usize]; WAVEFRONT_SIZE];
        }
    }

    pub fn read_register(&self, lane: usize, register: u8) -> Result<u32, SimError> {
        let idx = self.check_register(register)?;
        Ok(self
            .registers
            .get(lane)
            .and_then(|row| row.get(idx))
            .copied()
            .unwrap_or(0))
    }

    pub fn write_register(&mut self, lane: usize, register: u8, value: u32) -> Result<(), SimError> {
        let idx = self.check_register(register)?;
        self.ensure_registers();
        if let Some(slot) = self.registers.get_mut(lane).and_then(|row| row.get_mut(idx)) {
            *slot = value;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Wavefront {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wavefront")
            .field("id", &self.id)
            .field("pc", &self.pc)
            .field("buffered", &self.buffer.len())
            .field("state", &self.state())
            .field("age", &self.age)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::kernel::{Dim3, Kernel, KernelDescriptor};

    fn workgroup(index: u32) -> Workgroup {
        let program = Program::new(0, vec![Instruction::VectorAlu; 2]);
        let kernel = Kernel::new(
            KernelId(3),
            KernelDescriptor::new("k", Dim3::x(8), Dim3::x(256), program),
        );
        Workgroup::new(&kernel, index)
    }

    #[test]
    fn expand_produces_fixed_count_with_shared_workgroup() {
        let waves = Wavefront::expand(&workgroup(2), 4);
        assert_eq!(waves.len(), 4);
        assert!(waves.iter().all(|w| w.id.workgroup == waves[0].id.workgroup));
        assert_eq!(waves[3].global_index, 11);
        assert_eq!(waves[1].work_item(5), 9 * 64 + 5);
    }

    #[test]
    fn state_follows_buffer_and_pc() {
        let mut wave = Wavefront::new(&workgroup(0), 0, 4);
        assert_eq!(wave.state(), WavefrontState::Fetch);
        wave.buffer.push_back(Instruction::VectorAlu);
        wave.pc = 1;
        assert_eq!(wave.state(), WavefrontState::Ready);
        wave.executing = true;
        assert_eq!(wave.state(), WavefrontState::Executing);
        wave.executing = false;
        wave.buffer.clear();
        wave.pc = 2;
        assert_eq!(wave.state(), WavefrontState::Done);
    }

    #[test]
    fn registers_are_bounded_by_allocation() {
        let mut wave = Wavefront::new(&workgroup(0), 0, 4);
        wave.write_register(63, 5, 42).unwrap();
        assert_eq!(wave.read_register(63, 5).unwrap(), 42);
        assert_eq!(wave.read_register(0, 5).unwrap(), 0);
        assert_eq!(
            wave.write_register(0, 64, 1),
            Err(SimError::RegisterOutOfRange { register: 64, allocated: 64 })
        );
    }
}
