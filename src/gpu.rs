/// Top-level GPU simulator.
/// Models a GPU as a command processor feeding DMA engines and ACEs, shader
/// dispatch over a hierarchy of compute units, and the device-wide memory
/// system (L2 + TLB + DRAM) those compute units share.
///
/// One call to `cycle` advances every block by one simulated cycle, in a fixed
/// order: command dispatch, workgroup hand-off, then compute.
use crate::ace::AsyncComputeEngine;
use crate::cache::CacheStats;
use crate::command::{Command, EngineKind};
use crate::command_processor::{CommandFailure, CommandProcessor, CopyContext, Dispatch};
use crate::config::GpuConfig;
use crate::dma::DmaEngine;
use crate::error::ConfigError;
use crate::host::HostMemory;
use crate::instruction::ExecUnitKind;
use crate::interconnect::{Pcie, Transport};
use crate::kernel::KernelId;
use crate::memory::MemorySystem;
use crate::metrics::{self, CacheSnapshot, CuSnapshot, LaunchSnapshot, LiveMetrics};
use crate::occupancy::{max_workgroups_per_cu, occupancy};
use crate::sequencer::WavefrontFault;
use crate::shader::ShaderPipeInput;

/// Cycles between live metrics snapshots.
const SNAPSHOT_INTERVAL: u64 = 64;

/// Result of `Gpu::run`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub cycles: u64,
    /// Whether the device drained before the cycle budget ran out
    pub drained: bool,
    pub kernels_completed: usize,
    pub wavefronts_retired: u64,
    pub command_failures: usize,
    pub wavefront_faults: usize,
}

pub struct Gpu {
    config: GpuConfig,
    cp: CommandProcessor,
    spi: ShaderPipeInput,
    memory: MemorySystem,
    host: Box<dyn HostMemory>,
    link: Box<dyn Transport>,
    cycle: u64,
    failures: Vec<CommandFailure>,
    faults: Vec<WavefrontFault>,
    /// Kernels whose last workgroup has been handed off, in completion order
    completed_kernels: Vec<KernelId>,
    wavefronts_retired: u64,
    last_launch: Option<LaunchSnapshot>,
    live_metrics: bool,
}

impl Gpu {
    pub fn new(config: GpuConfig, host: Box<dyn HostMemory>) -> Result<Self, ConfigError> {
        config.validate()?;
        let dma = (0..config.dma_engines).map(DmaEngine::new).collect();
        let aces = (0..config.aces)
            .map(|id| AsyncComputeEngine::new(id, config.max_active_workgroups))
            .collect();
        let cp = CommandProcessor::new(dma, aces).with_default_cost(config.default_cost);
        let spi = ShaderPipeInput::new(
            config.topology(),
            &config.cu_params(),
            config.fetch_policy,
            config.wavefronts_per_workgroup,
        );
        let memory = MemorySystem::new(&config.l2, &config.tlb, config.dram_bytes);
        let link = Box::new(Pcie::new(config.pcie.clone()));

        log::info!(
            "gpu: {} DMA, {} ACE, {} compute units ({} slots each), {} KiB DRAM",
            config.dma_engines,
            config.aces,
            config.num_compute_units(),
            config.compute_unit.max_wavefronts,
            config.dram_bytes / 1024
        );

        Ok(Gpu {
            config,
            cp,
            spi,
            memory,
            host,
            link,
            cycle: 0,
            failures: Vec::new(),
            faults: Vec::new(),
            completed_kernels: Vec::new(),
            wavefronts_retired: 0,
            last_launch: None,
            live_metrics: false,
        })
    }

    pub fn with_transport(mut self, link: Box<dyn Transport>) -> Self {
        self.link = link;
        self
    }

    pub fn with_live_metrics(mut self, enabled: bool) -> Self {
        self.live_metrics = enabled;
        self
    }

    pub fn config(&self) -> &GpuConfig {
        &self.config
    }

    pub fn command_processor(&self) -> &CommandProcessor {
        &self.cp
    }

    pub fn shader(&self) -> &ShaderPipeInput {
        &self.spi
    }

    pub fn memory(&self) -> &MemorySystem {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemorySystem {
        &mut self.memory
    }

    pub fn host(&self) -> &dyn HostMemory {
        self.host.as_ref()
    }

    pub fn host_mut(&mut self) -> &mut dyn HostMemory {
        self.host.as_mut()
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle
    }

    /// Commands rejected so far, in rejection order.
    pub fn failures(&self) -> &[CommandFailure] {
        &self.failures
    }

    /// Wavefronts aborted by faults so far.
    pub fn faults(&self) -> &[WavefrontFault] {
        &self.faults
    }

    pub fn completed_kernels(&self) -> &[KernelId] {
        &self.completed_kernels
    }

    pub fn submit(&mut self, command: Command) {
        self.cp.enqueue(command);
    }

    pub fn is_idle(&self) -> bool {
        self.cp.pending() == 0
            && self.cp.aces().iter().all(AsyncComputeEngine::is_available)
            && self.spi.is_idle()
    }

    /// Advance the whole device by one cycle.
    pub fn cycle(&mut self) {
        self.dispatch_command();

        for ace in self.cp.aces_mut() {
            match ace.pass_workgroup(&mut self.spi) {
                Ok(Some(handoff)) => {
                    if let Some(kernel) = handoff.finished {
                        log::info!("gpu: kernel {} fully dispatched at cycle {}", kernel, self.cycle);
                        self.completed_kernels.push(kernel);
                    }
                }
                Ok(None) => {}
                Err(err) if err.is_retryable() => {
                    log::trace!("gpu: ace{} holds its workgroup: {}", ace.id, err);
                }
                Err(err) => log::warn!("gpu: ace{}: {}", ace.id, err),
            }
        }

        let outcome = self.spi.cycle(&mut self.memory);
        self.wavefronts_retired += outcome.finished.len() as u64;
        self.faults.extend(outcome.faults);

        self.cycle += 1;
        if self.live_metrics && self.cycle % SNAPSHOT_INTERVAL == 0 {
            metrics::write_metrics(&self.snapshot());
        }
    }

    fn dispatch_command(&mut self) {
        let ctx = CopyContext {
            host: self.host.as_mut(),
            dram: &mut self.memory.dram,
            link: self.link.as_ref(),
        };
        match self.cp.process_next(ctx) {
            Ok(Some(Dispatch::Kernel { ace, kernel, workgroups })) => {
                self.record_launch(ace, kernel);
                if workgroups == 0 {
                    self.completed_kernels.push(kernel);
                }
            }
            Ok(Some(Dispatch::Copy { engine, stats })) => {
                log::debug!(
                    "gpu: dma{} moved {} bytes ({:.2} us, {:.2} GB/s)",
                    engine,
                    stats.bytes,
                    stats.time_us,
                    stats.effective_bandwidth_gb_s
                );
            }
            Ok(None) => {}
            Err(failure) if failure.error.is_retryable() => {}
            Err(failure) => {
                log::warn!("gpu: command failed: {}", failure);
                self.failures.push(failure);
            }
        }
    }

    fn record_launch(&mut self, ace: usize, kernel: KernelId) {
        let Some(launched) = self.cp.aces().iter().find(|a| a.id == ace).and_then(|a| a.kernel())
        else {
            return;
        };
        let waves = self.config.wavefronts_per_workgroup;
        let (max_wg, limiter) = max_workgroups_per_cu(&launched.cost, waves, &self.config.compute_unit);
        let theoretical = occupancy(max_wg, waves, self.config.compute_unit.max_wavefronts);
        log::info!(
            "gpu: launched {} '{}' grid={} on ace{}: occupancy {:.1}% (limited by {}, {} workgroups/CU)",
            kernel,
            launched.name(),
            launched.descriptor.grid,
            ace,
            theoretical * 100.0,
            limiter,
            max_wg
        );
        self.last_launch = Some(LaunchSnapshot {
            kernel: launched.name().to_string(),
            workgroups: launched.num_workgroups(),
            theoretical_occupancy: theoretical,
            occupancy_limiter: limiter.to_string(),
            max_workgroups_per_cu: max_wg,
        });
    }

    /// Cycle until the device drains or `max_cycles` cycles have run.
    pub fn run(&mut self, max_cycles: u64) -> RunSummary {
        let start = self.cycle;
        while !self.is_idle() && self.cycle - start < max_cycles {
            self.cycle();
        }
        let drained = self.is_idle();
        if !drained {
            log::warn!("gpu: cycle budget of {} exhausted before draining", max_cycles);
        }
        if self.live_metrics {
            metrics::write_metrics(&self.snapshot());
        }
        RunSummary {
            cycles: self.cycle - start,
            drained,
            kernels_completed: self.completed_kernels.len(),
            wavefronts_retired: self.wavefronts_retired,
            command_failures: self.failures.len(),
            wavefront_faults: self.faults.len(),
        }
    }

    pub fn snapshot(&self) -> LiveMetrics {
        let status = if self.is_idle() {
            if self.cycle == 0 { "idle" } else { "complete" }
        } else {
            "running"
        };

        let mut compute_units = Vec::new();
        let mut l1i = CacheStats::default();
        let mut l1s = CacheStats::default();
        let mut l1v = CacheStats::default();
        let (mut requests, mut transactions) = (0, 0);
        for (target, cu) in self.spi.compute_units() {
            let sequencer = cu.sequencer();
            compute_units.push(CuSnapshot {
                id: cu.id,
                location: target.to_string(),
                resident_wavefronts: cu.resident(),
                pool_occupancy: sequencer.pool_occupancy(),
                used: cu.ledger().used(),
                max: cu.ledger().max(),
                wavefronts_completed: cu.wavefronts_completed(),
                instructions_issued: sequencer.stats().instructions_issued,
                simd_utilization: sequencer.units()[ExecUnitKind::Vector.index()].utilization(),
            });
            accumulate(&mut l1i, cu.l1.instruction.stats());
            accumulate(&mut l1s, cu.l1.scalar.stats());
            accumulate(&mut l1v, cu.l1.vector.stats());
            requests += cu.coalescer.stats().requests;
            transactions += cu.coalescer.stats().transactions;
        }
        let coalescing_ratio = if requests == 0 { 1.0 } else { transactions as f64 / requests as f64 };

        let dma = self.cp.dma_engines();
        let counters = self.spi.counters();
        let dram = self.memory.dram_stats();

        LiveMetrics {
            status: status.to_string(),
            cycle: self.cycle,
            fetch_policy: self.config.fetch_policy.name().to_string(),
            pending_commands: self.cp.pending(),
            free_dma_engines: dma.iter().filter(|e| e.is_available()).count(),
            free_aces: self.cp.pool(EngineKind::Ace).len(),
            ace_kernels: self
                .cp
                .aces()
                .iter()
                .map(|a| a.kernel().map(|k| k.id.to_string()).unwrap_or_default())
                .collect(),
            queued_workgroups: self.cp.aces().iter().map(AsyncComputeEngine::queued).sum(),
            workgroups_dispatched: counters.workgroups_dispatched,
            wavefronts_dispatched: counters.wavefronts_dispatched,
            admission_denials: counters.admission_denials,
            kernels_completed: self.completed_kernels.len(),
            last_launch: self.last_launch.clone(),
            compute_units,
            caches: vec![
                CacheSnapshot::new("l1i", l1i),
                CacheSnapshot::new("l1s", l1s),
                CacheSnapshot::new("l1v", l1v),
                CacheSnapshot::new("l2", self.memory.l2_stats()),
                CacheSnapshot::new("tlb", self.memory.tlb.stats()),
            ],
            coalescing_requests: requests,
            coalescing_transactions: transactions,
            coalescing_ratio,
            dram_reads: dram.reads,
            dram_writes: dram.writes,
            dma_transfers: dma.iter().map(DmaEngine::transfers).sum(),
            dma_bytes: dma.iter().map(DmaEngine::bytes_copied).sum(),
            dma_time_us: dma.iter().map(DmaEngine::time_us).sum(),
            command_failures: self.failures.len(),
            wavefront_faults: self.faults.len(),
            timestamp_ms: metrics::now_ms(),
        }
    }
}

fn accumulate(total: &mut CacheStats, stats: CacheStats) {
    total.accesses += stats.accesses;
    total.hits += stats.hits;
    total.misses += stats.misses;
}

impl std::fmt::Debug for Gpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gpu")
            .field("cycle", &self.cycle)
            .field("cp", &self.cp)
            .field("memory", &self.memory)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CopyDirection;
    use crate::host::SystemMemory;
    use crate::instruction::{Instruction, Program};
    use crate::kernel::{Dim3, KernelDescriptor};

    fn gpu() -> Gpu {
        Gpu::new(GpuConfig::default(), Box::new(SystemMemory::new(4096))).unwrap()
    }

    #[test]
    fn fresh_device_is_idle() {
        let gpu = gpu();
        assert!(gpu.is_idle());
        assert_eq!(gpu.snapshot().status, "idle");
        assert_eq!(gpu.snapshot().compute_units.len(), 4);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = GpuConfig { aces: 0, ..GpuConfig::default() };
        assert!(Gpu::new(config, Box::new(SystemMemory::new(16))).is_err());
    }

    #[test]
    fn failed_copy_is_recorded_and_run_continues() {
        let mut gpu = gpu();
        gpu.submit(Command::memory_copy(4000, 0, 1024, CopyDirection::HostToDevice));
        gpu.submit(Command::memory_copy(0, 0, 16, CopyDirection::HostToDevice));
        let summary = gpu.run(10);
        assert!(summary.drained);
        assert_eq!(summary.command_failures, 1);
        assert_eq!(gpu.snapshot().dma_transfers, 1);
    }

    #[test]
    fn kernel_runs_to_completion() {
        let mut gpu = gpu();
        let program = Program::new(0x10000, vec![Instruction::ScalarAlu, Instruction::VectorAlu]);
        gpu.submit(Command::kernel_launch(KernelDescriptor::new(
            "tiny",
            Dim3::x(8),
            Dim3::x(256),
            program,
        )));
        let summary = gpu.run(1_000);
        assert!(summary.drained);
        assert_eq!(summary.kernels_completed, 1);
        assert_eq!(summary.wavefronts_retired, 32);
        assert_eq!(summary.wavefront_faults, 0);

        let snapshot = gpu.snapshot();
        assert_eq!(snapshot.status, "complete");
        assert_eq!(snapshot.wavefronts_dispatched, 32);
        assert!(snapshot.last_launch.unwrap().theoretical_occupancy > 0.0);
        assert!(snapshot.compute_units.iter().all(|cu| cu.resident_wavefronts == 0));
    }
}
