/// Instruction classes the sequencer schedules.
///
/// Instructions carry only what scheduling and memory traffic need: the
/// execution unit they occupy and, for memory instructions, the lane address
/// pattern. Arithmetic is not modelled.
use serde::{Deserialize, Serialize};

/// Encoded size of one instruction, used to place programs in DRAM.
pub const INSTRUCTION_BYTES: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecUnitKind {
    Scalar,
    Branch,
    Vector,
    VectorMemory,
    Lds,
}

impl ExecUnitKind {
    pub const ALL: [ExecUnitKind; 5] = [
        ExecUnitKind::Scalar,
        ExecUnitKind::Branch,
        ExecUnitKind::Vector,
        ExecUnitKind::VectorMemory,
        ExecUnitKind::Lds,
    ];

    pub fn index(self) -> usize {
        match self {
            ExecUnitKind::Scalar       => 0,
            ExecUnitKind::Branch       => 1,
            ExecUnitKind::Vector       => 2,
            ExecUnitKind::VectorMemory => 3,
            ExecUnitKind::Lds          => 4,
        }
    }
}

impl std::fmt::Display for ExecUnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecUnitKind::Scalar       => write!(f, "scalar"),
            ExecUnitKind::Branch       => write!(f, "branch"),
            ExecUnitKind::Vector       => write!(f, "vector"),
            ExecUnitKind::VectorMemory => write!(f, "vector-memory"),
            ExecUnitKind::Lds          => write!(f, "lds"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    ScalarAlu,
    /// Scalar load through the scalar L1.
    ScalarLoad { address: u64, size: u32 },
    Branch,
    VectorAlu,
    /// Per-lane load of `size` (≤ 4) bytes into `vdst`.
    /// Lane address = `base + work_item * stride`.
    VectorLoad { vdst: u8, base: u64, stride: u64, size: u32 },
    /// Per-lane store of the low `size` (≤ 4) bytes of `vsrc`.
    VectorStore { vsrc: u8, base: u64, stride: u64, size: u32 },
    LdsAccess,
}

impl Instruction {
    pub fn unit(&self) -> ExecUnitKind {
        match self {
            Instruction::ScalarAlu | Instruction::ScalarLoad { .. } => ExecUnitKind::Scalar,
            Instruction::Branch => ExecUnitKind::Branch,
            Instruction::VectorAlu => ExecUnitKind::Vector,
            Instruction::VectorLoad { .. } | Instruction::VectorStore { .. } => {
                ExecUnitKind::VectorMemory
            }
            Instruction::LdsAccess => ExecUnitKind::Lds,
        }
    }

    pub fn is_vector_memory(&self) -> bool {
        self.unit() == ExecUnitKind::VectorMemory
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::ScalarAlu => write!(f, "s_alu"),
            Instruction::ScalarLoad { address, size } => {
                write!(f, "s_load {}B @ {:#x}", size, address)
            }
            Instruction::Branch => write!(f, "s_branch"),
            Instruction::VectorAlu => write!(f, "v_alu"),
            Instruction::VectorLoad { vdst, base, stride, size } => {
                write!(f, "v_load v{} {}B @ {:#x}+{}*i", vdst, size, base, stride)
            }
            Instruction::VectorStore { vsrc, base, stride, size } => {
                write!(f, "v_store v{} {}B @ {:#x}+{}*i", vsrc, size, base, stride)
            }
            Instruction::LdsAccess => write!(f, "ds_access"),
        }
    }
}

/// A kernel's code image: instructions placed contiguously from `base`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Program {
    pub base: u64,
    pub instructions: Vec<Instruction>,
}

impl Program {
    pub fn new(base: u64, instructions: Vec<Instruction>) -> Self {
        Program { base, instructions }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, pc: usize) -> Option<Instruction> {
        self.instructions.get(pc).copied()
    }

    /// Device address of the instruction at `pc`.
    pub fn address_of(&self, pc: usize) -> u64 {
        self.base + pc as u64 * INSTRUCTION_BYTES
    }

    /// Size of the code image in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.instructions.len() as u64 * INSTRUCTION_BYTES
    }
}
