use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use gcnsim::command::{Command, CopyDirection};
use gcnsim::config::GpuConfig;
use gcnsim::gpu::{Gpu, RunSummary};
use gcnsim::host::{HostMemory, SystemMemory};
use gcnsim::instruction::{Instruction, Program};
use gcnsim::kernel::{Dim3, KernelDescriptor};
use gcnsim::wavefront::WAVEFRONT_SIZE;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "gcnsim", version, about = "Cycle-level GCN-style GPU pipeline simulator")]
struct Options {
    /// Device configuration (JSON); unset fields keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Command list (JSON array) to run instead of the built-in demo
    #[arg(long)]
    workload: Option<PathBuf>,

    #[arg(long, default_value_t = 1_000_000)]
    max_cycles: u64,

    /// Write live metrics for the `viz` dashboard
    #[arg(long)]
    live: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

// ---------------------------------------------------------------------------
// Built-in demo: copy A to the device, run a copy kernel, read C back
// ---------------------------------------------------------------------------

const ELEMENTS: u64 = 4096;
const ELEMENT_BYTES: u64 = 4;
const WORKGROUP_SIZE: u32 = 256;

const HOST_A: u64 = 0;
const HOST_C: u64 = ELEMENTS * ELEMENT_BYTES;
const DEVICE_A: u64 = 0;
const DEVICE_C: u64 = ELEMENTS * ELEMENT_BYTES;
const DEVICE_CODE: u64 = 2 * ELEMENTS * ELEMENT_BYTES;

fn demo_input() -> Vec<u8> {
    (0..ELEMENTS as u32).flat_map(|i| (i * 3 + 1).to_le_bytes()).collect()
}

/// Commands run in phases; the device drains between phases, so the read-back
/// only starts once the kernel has retired every wavefront.
fn demo_phases() -> Vec<Vec<Command>> {
    let bytes = (ELEMENTS * ELEMENT_BYTES) as usize;
    let program = Program::new(
        DEVICE_CODE,
        vec![
            Instruction::ScalarLoad { address: DEVICE_CODE, size: 16 },
            Instruction::ScalarAlu,
            Instruction::VectorLoad { vdst: 0, base: DEVICE_A, stride: ELEMENT_BYTES, size: 4 },
            Instruction::VectorAlu,
            Instruction::VectorStore { vsrc: 0, base: DEVICE_C, stride: ELEMENT_BYTES, size: 4 },
        ],
    );
    let work_items = ELEMENTS as u32;
    let kernel = KernelDescriptor::new(
        "copy_u32",
        Dim3::x(work_items.div_ceil(WORKGROUP_SIZE)),
        Dim3::x(WORKGROUP_SIZE),
        program,
    )
    .with_arg("n", ELEMENTS as i64);

    vec![
        vec![
            Command::memory_copy(HOST_A, DEVICE_A, bytes, CopyDirection::HostToDevice),
            Command::kernel_launch(kernel),
        ],
        vec![Command::memory_copy(DEVICE_C, HOST_C, bytes, CopyDirection::DeviceToHost)],
    ]
}

/// Compare the copied-back output with the input. Returns the mismatch count.
fn verify_demo(host: &dyn HostMemory, expected: &[u8]) -> eyre::Result<usize> {
    let output = host.read(HOST_C, expected.len())?;
    let mismatches = output
        .chunks_exact(ELEMENT_BYTES as usize)
        .zip(expected.chunks_exact(ELEMENT_BYTES as usize))
        .enumerate()
        .filter(|(i, (got, want))| {
            if got != want {
                log::debug!("mismatch at element {}: got {:?}, expected {:?}", i, got, want);
                true
            } else {
                false
            }
        })
        .count();
    Ok(mismatches)
}

fn load_workload(path: &Path) -> eyre::Result<Vec<Command>> {
    let data = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read workload {}", path.display()))?;
    serde_json::from_str(&data).wrap_err_with(|| format!("failed to parse workload {}", path.display()))
}

fn print_summary(gpu: &Gpu, summary: &RunSummary) {
    let metrics = gpu.snapshot();
    println!(
        "[gcnsim] {} cycles | drained={} | {} kernels | {} wavefronts retired | policy={}",
        summary.cycles,
        summary.drained,
        summary.kernels_completed,
        summary.wavefronts_retired,
        metrics.fetch_policy,
    );
    if let Some(launch) = &metrics.last_launch {
        println!(
            "[gcnsim] last launch '{}': {} workgroups | occupancy={:.1}% (limited by {}, {} workgroups/CU)",
            launch.kernel,
            launch.workgroups,
            launch.theoretical_occupancy * 100.0,
            launch.occupancy_limiter,
            launch.max_workgroups_per_cu,
        );
    }
    for cache in &metrics.caches {
        println!(
            "[gcnsim] {:<4} {:>8} accesses | hit rate {:.1}%",
            cache.name,
            cache.accesses,
            cache.hit_rate * 100.0
        );
    }
    println!(
        "[gcnsim] coalescing: {} requests -> {} transactions ({:.3} per request)",
        metrics.coalescing_requests, metrics.coalescing_transactions, metrics.coalescing_ratio,
    );
    println!(
        "[gcnsim] DMA: {} transfers, {} bytes, {:.2} us | DRAM: {} reads, {} writes",
        metrics.dma_transfers,
        metrics.dma_bytes,
        metrics.dma_time_us,
        metrics.dram_reads,
        metrics.dram_writes,
    );
    for failure in gpu.failures() {
        println!("[gcnsim] command failed: {}", failure);
    }
    for fault in gpu.faults() {
        println!("[gcnsim] wavefront {} faulted: {}", fault.wavefront, fault.error);
    }
}

fn main() -> eyre::Result<()> {
    let options = Options::parse();
    let level = match options.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    color_eyre::install()?;

    let config = match &options.config {
        Some(path) => GpuConfig::from_json_file(path)
            .wrap_err_with(|| format!("invalid config {}", path.display()))?,
        None => GpuConfig::default(),
    };

    let (phases, host, expected) = match &options.workload {
        Some(path) => (vec![load_workload(path)?], SystemMemory::new(config.host_bytes), None),
        None => {
            let input = demo_input();
            let host = SystemMemory::with_contents(config.host_bytes, &input)?;
            (demo_phases(), host, Some(input))
        }
    };

    let mut gpu = Gpu::new(config, Box::new(host))?.with_live_metrics(options.live);
    println!(
        "[gcnsim] {} compute units ({} SE x {} SA x {} CU), {} wavefronts of {} lanes per CU",
        gpu.config().num_compute_units(),
        gpu.config().shader_engines,
        gpu.config().arrays_per_engine,
        gpu.config().cus_per_array,
        gpu.config().compute_unit.max_wavefronts,
        WAVEFRONT_SIZE,
    );
    let mut summary = RunSummary::default();
    for phase in phases {
        for command in phase {
            gpu.submit(command);
        }
        let budget = options.max_cycles.saturating_sub(summary.cycles);
        let cycles = summary.cycles;
        summary = gpu.run(budget);
        summary.cycles += cycles;
        if !summary.drained {
            break;
        }
    }
    print_summary(&gpu, &summary);

    if let Some(expected) = expected {
        let mismatches = verify_demo(gpu.host(), &expected)?;
        if mismatches == 0 {
            println!("[gcnsim] verification PASSED: {} elements copied", ELEMENTS);
        } else {
            eyre::bail!("verification FAILED: {} of {} elements differ", mismatches, ELEMENTS);
        }
    }
    Ok(())
}
