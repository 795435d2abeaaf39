mod common;

use gcnsim::command::{Command, CopyDirection};
use gcnsim::config::GpuConfig;
use gcnsim::error::SimError;
use gcnsim::gpu::Gpu;
use gcnsim::host::{HostMemory, SystemMemory};
use gcnsim::instruction::{Instruction, Program};
use gcnsim::kernel::{Dim3, KernelDescriptor, KernelId};
use gcnsim::occupancy::WavefrontCost;
use gcnsim::scheduler::FetchPolicyKind;

const ELEMENTS: usize = 512;
const BYTES: usize = ELEMENTS * 4;
const SRC: u64 = 0;
const DST: u64 = 4096;
const CODE: u64 = 8192;

fn gpu_with(config: GpuConfig) -> Gpu {
    let host = SystemMemory::with_contents(64 * 1024, &common::pattern(ELEMENTS)).unwrap();
    Gpu::new(config, Box::new(host)).unwrap()
}

fn copy_round_trip(config: GpuConfig) -> Gpu {
    common::init_logging();
    let mut gpu = gpu_with(config);
    gpu.submit(Command::memory_copy(0, SRC, BYTES, CopyDirection::HostToDevice));
    gpu.submit(Command::kernel_launch(common::copy_kernel("copy", 2, SRC, DST, CODE)));
    let summary = gpu.run(100_000);
    assert!(summary.drained);
    assert_eq!(summary.kernels_completed, 1);
    assert_eq!(summary.wavefronts_retired, 8);
    assert_eq!(summary.wavefront_faults, 0);

    // read back only once the kernel has drained
    gpu.submit(Command::memory_copy(DST, DST, BYTES, CopyDirection::DeviceToHost));
    assert!(gpu.run(10).drained);
    assert_eq!(gpu.host().read(DST, BYTES).unwrap(), common::pattern(ELEMENTS));
    gpu
}

#[test]
fn copy_kernel_moves_data_end_to_end() {
    let gpu = copy_round_trip(GpuConfig::default());
    let metrics = gpu.snapshot();
    assert_eq!(metrics.status, "complete");
    assert_eq!(metrics.dma_transfers, 2);
    assert_eq!(metrics.dma_bytes, 2 * BYTES as u64);
    assert_eq!(metrics.workgroups_dispatched, 2);
    // 64 contiguous 4-byte lanes pack into four 64-byte transactions
    assert_eq!(metrics.coalescing_requests, 8 * 2 * 64);
    assert_eq!(metrics.coalescing_transactions, 8 * 2 * 4);
    assert_eq!(metrics.coalescing_ratio, 0.0625);
    assert!(metrics.compute_units.iter().all(|cu| cu.resident_wavefronts == 0));
    let l1i = metrics.caches.iter().find(|c| c.name == "l1i").unwrap();
    assert!(l1i.hits > 0);
}

#[test]
fn round_robin_fetch_gives_same_result() {
    let config = GpuConfig { fetch_policy: FetchPolicyKind::RoundRobin, ..GpuConfig::default() };
    let gpu = copy_round_trip(config);
    assert_eq!(gpu.snapshot().fetch_policy, "RoundRobin");
}

#[test]
fn unallocated_register_faults_each_wavefront_only() {
    common::init_logging();
    let mut gpu = gpu_with(GpuConfig::default());
    let program = Program::new(
        CODE,
        vec![Instruction::VectorLoad { vdst: 3, base: SRC, stride: 4, size: 4 }, Instruction::VectorAlu],
    );
    let kernel = KernelDescriptor::new("overreach", Dim3::x(1), Dim3::x(256), program)
        .with_cost(WavefrontCost { sgprs: 16, vgprs: 1, lds_bytes: 0 });
    gpu.submit(Command::kernel_launch(kernel));

    let summary = gpu.run(10_000);
    assert!(summary.drained);
    assert_eq!(summary.wavefront_faults, 4);
    assert!(gpu
        .faults()
        .iter()
        .all(|f| matches!(f.error, SimError::RegisterOutOfRange { register: 3, allocated: 1 })));
    assert!(gpu.shader().compute_units().all(|(_, cu)| cu.ledger().used().wavefronts == 0));
}

#[test]
fn empty_grid_completes_at_launch() {
    let mut gpu = gpu_with(GpuConfig::default());
    let program = Program::new(CODE, vec![Instruction::ScalarAlu]);
    gpu.submit(Command::kernel_launch(KernelDescriptor::new(
        "empty",
        Dim3::x(0),
        Dim3::x(256),
        program,
    )));
    let summary = gpu.run(10);
    assert!(summary.drained);
    assert_eq!(gpu.completed_kernels(), &[KernelId(0)]);
    assert_eq!(summary.wavefronts_retired, 0);
}

#[test]
fn more_launches_than_aces_wait_their_turn() {
    let config = GpuConfig { aces: 1, ..GpuConfig::default() };
    let mut gpu = gpu_with(config);
    for i in 0..3 {
        let program = Program::new(CODE, vec![Instruction::ScalarAlu, Instruction::VectorAlu]);
        gpu.submit(Command::kernel_launch(KernelDescriptor::new(
            &format!("k{}", i),
            Dim3::x(2),
            Dim3::x(256),
            program,
        )));
    }
    let summary = gpu.run(100_000);
    assert!(summary.drained);
    assert_eq!(summary.command_failures, 0);
    assert_eq!(gpu.completed_kernels(), &[KernelId(0), KernelId(1), KernelId(2)]);
    assert_eq!(summary.wavefronts_retired, 24);
}

#[test]
fn workload_file_format_runs() {
    let json = format!(
        r#"[
            {{"type": "memory_copy", "params": {{"src": 0, "dst": 0, "size": 64, "direction": 0}}}},
            {{"type": "scrub_caches"}},
            {{"type": "kernel_launch", "kernel": {{
                "name": "from_json",
                "grid": {{"x": 1, "y": 1, "z": 1}},
                "workgroup_size": {{"x": 256, "y": 1, "z": 1}},
                "program": {{"base": {}, "instructions": [{{"op": "scalar_alu"}}, {{"op": "v_alu_missing"}}]}}
            }}}}
        ]"#,
        CODE
    );
    // unknown instruction opcodes are a parse error
    assert!(serde_json::from_str::<Vec<Command>>(&json).is_err());

    let json = json.replace("v_alu_missing", "vector_alu");
    let commands: Vec<Command> = serde_json::from_str(&json).unwrap();
    let mut gpu = gpu_with(GpuConfig::default());
    for command in commands {
        gpu.submit(command);
    }
    let summary = gpu.run(10_000);
    assert!(summary.drained);
    assert_eq!(summary.command_failures, 1);
    assert_eq!(
        gpu.failures()[0].error,
        SimError::UnknownCommandType { tag: "scrub_caches".to_string() }
    );
    assert_eq!(summary.kernels_completed, 1);
    assert_eq!(summary.wavefronts_retired, 4);
}
