#![allow(dead_code)]

use gcnsim::instruction::{Instruction, Program};
use gcnsim::kernel::{Dim3, KernelDescriptor};
use std::sync::Once;

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        env_logger::builder().is_test(true).init();
    });
}

/// `n` little-endian u32 values, element `i` holding `i * 7 + 3`.
pub fn pattern(n: usize) -> Vec<u8> {
    (0..n as u32).flat_map(|i| (i * 7 + 3).to_le_bytes()).collect()
}

/// A kernel copying one u32 per work-item from `src` to `dst`.
pub fn copy_kernel(name: &str, workgroups: u32, src: u64, dst: u64, code: u64) -> KernelDescriptor {
    let program = Program::new(
        code,
        vec![
            Instruction::VectorLoad { vdst: 0, base: src, stride: 4, size: 4 },
            Instruction::VectorAlu,
            Instruction::VectorStore { vsrc: 0, base: dst, stride: 4, size: 4 },
        ],
    );
    KernelDescriptor::new(name, Dim3::x(workgroups), Dim3::x(256), program)
}
