/// Command processor: routes queued commands to free DMA engines and ACEs.
///
/// Engine availability is tracked in explicit pools owned by the processor. An
/// identifier leaves its pool when a command is handed to that engine and only
/// returns once the engine reports itself idle again.
use crate::ace::AsyncComputeEngine;
use crate::command::{Command, CommandKind, EngineKind};
use crate::dma::DmaEngine;
use crate::dram::Dram;
use crate::error::SimError;
use crate::host::HostMemory;
use crate::interconnect::{TransferStats, Transport};
use crate::kernel::{Kernel, KernelId};
use crate::occupancy::WavefrontCost;
use std::collections::VecDeque;

/// Ordered set of free engine identifiers.
#[derive(Debug, Clone, Default)]
pub struct EnginePool {
    free: VecDeque<usize>,
}

impl EnginePool {
    pub fn with_engines(ids: impl IntoIterator<Item = usize>) -> Self {
        EnginePool { free: ids.into_iter().collect() }
    }

    pub fn acquire(&mut self) -> Option<usize> {
        self.free.pop_front()
    }

    /// Return `id` to the pool; already-free identifiers are not duplicated.
    pub fn release(&mut self, id: usize) {
        if !self.contains(id) {
            self.free.push_back(id);
        }
    }

    pub fn contains(&self, id: usize) -> bool {
        self.free.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}

/// What a successfully dispatched command turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Copy { engine: usize, stats: TransferStats },
    Kernel { ace: usize, kernel: KernelId, workgroups: usize },
}

/// A command that could not be dispatched, reported back to its originator.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandFailure {
    pub command: Command,
    pub error: SimError,
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.command, self.error)
    }
}

/// Everything a DMA copy touches besides the engine itself.
pub struct CopyContext<'a> {
    pub host: &'a mut dyn HostMemory,
    pub dram: &'a mut Dram,
    pub link: &'a dyn Transport,
}

#[derive(Debug)]
pub struct CommandProcessor {
    commands: VecDeque<Command>,
    dma_engines: Vec<DmaEngine>,
    aces: Vec<AsyncComputeEngine>,
    dma_pool: EnginePool,
    ace_pool: EnginePool,
    next_kernel_id: u32,
    /// Charged per wavefront for kernels that do not declare a cost
    default_cost: WavefrontCost,
}

impl CommandProcessor {
    /// Build a processor over the given engines with every engine initially free.
    pub fn new(dma_engines: Vec<DmaEngine>, aces: Vec<AsyncComputeEngine>) -> Self {
        let dma_pool = EnginePool::with_engines(dma_engines.iter().map(|e| e.id));
        let ace_pool = EnginePool::with_engines(aces.iter().map(|e| e.id));
        Self::with_pools(dma_engines, aces, dma_pool, ace_pool)
    }

    pub fn with_pools(
        dma_engines: Vec<DmaEngine>,
        aces: Vec<AsyncComputeEngine>,
        dma_pool: EnginePool,
        ace_pool: EnginePool,
    ) -> Self {
        CommandProcessor {
            commands: VecDeque::new(),
            dma_engines,
            aces,
            dma_pool,
            ace_pool,
            next_kernel_id: 0,
            default_cost: WavefrontCost::default(),
        }
    }

    pub fn with_default_cost(mut self, cost: WavefrontCost) -> Self {
        self.default_cost = cost;
        self
    }

    pub fn enqueue(&mut self, command: Command) {
        log::trace!("cp: enqueued {}", command);
        self.commands.push_back(command);
    }

    pub fn pending(&self) -> usize {
        self.commands.len()
    }

    pub fn dma_engines(&self) -> &[DmaEngine] {
        &self.dma_engines
    }

    pub fn aces(&self) -> &[AsyncComputeEngine] {
        &self.aces
    }

    pub fn aces_mut(&mut self) -> &mut [AsyncComputeEngine] {
        &mut self.aces
    }

    pub fn pool(&self, kind: EngineKind) -> &EnginePool {
        match kind {
            EngineKind::Dma => &self.dma_pool,
            EngineKind::Ace => &self.ace_pool,
        }
    }

    /// Re-add every idle engine to its pool.
    pub fn refresh_pools(&mut self) {
        for engine in &self.dma_engines {
            if engine.is_available() {
                self.dma_pool.release(engine.id);
            }
        }
        for ace in &self.aces {
            if ace.is_available() {
                self.ace_pool.release(ace.id);
            }
        }
    }

    /// Dispatch the command at the head of the queue.
    ///
    /// `Ok(None)` when the queue is empty. When no engine of the needed class
    /// is free, the command goes back to the head of the queue and the error
    /// carries a copy of it. Any other error consumes the command.
    pub fn process_next(&mut self, ctx: CopyContext<'_>) -> Result<Option<Dispatch>, CommandFailure> {
        let Some(command) = self.commands.pop_front() else {
            return Ok(None);
        };
        self.refresh_pools();
        match self.dispatch(&command, ctx) {
            Ok(dispatch) => Ok(Some(dispatch)),
            Err(error @ SimError::NoEngineAvailable { .. }) => {
                log::trace!("cp: {} waits for an engine ({})", command, error);
                self.commands.push_front(command.clone());
                Err(CommandFailure { command, error })
            }
            Err(error) => {
                log::warn!("cp: rejected {}: {}", command, error);
                Err(CommandFailure { command, error })
            }
        }
    }

    fn dispatch(&mut self, command: &Command, ctx: CopyContext<'_>) -> Result<Dispatch, SimError> {
        match command.kind()? {
            CommandKind::MemoryCopy => {
                let engine = self
                    .dma_pool
                    .acquire()
                    .ok_or(SimError::NoEngineAvailable { kind: EngineKind::Dma })?;
                log::debug!("cp: {} -> dma{}", command, engine);
                let dma = self
                    .dma_engines
                    .iter_mut()
                    .find(|e| e.id == engine)
                    .ok_or(SimError::NoEngineAvailable { kind: EngineKind::Dma })?;
                let stats = dma.demand(command, ctx.host, ctx.dram, ctx.link)?;
                Ok(Dispatch::Copy { engine, stats })
            }
            CommandKind::KernelLaunch => {
                let descriptor = command.descriptor()?.clone();
                let ace_id = self
                    .ace_pool
                    .acquire()
                    .ok_or(SimError::NoEngineAvailable { kind: EngineKind::Ace })?;
                let kernel = Kernel::with_fallback_cost(
                    KernelId(self.next_kernel_id),
                    descriptor,
                    self.default_cost,
                );
                self.next_kernel_id += 1;
                log::debug!("cp: {} -> ace{} as {}", command, ace_id, kernel.id);
                let id = kernel.id;
                let ace = self
                    .aces
                    .iter_mut()
                    .find(|a| a.id == ace_id)
                    .ok_or(SimError::NoEngineAvailable { kind: EngineKind::Ace })?;
                let workgroups = ace.receive_kernel(kernel)?;
                Ok(Dispatch::Kernel { ace: ace_id, kernel: id, workgroups })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CopyDirection;
    use crate::host::SystemMemory;
    use crate::instruction::{Instruction, Program};
    use crate::interconnect::Pcie;
    use crate::kernel::{Dim3, KernelDescriptor};
    use std::collections::BTreeMap;

    struct Fixture {
        host: SystemMemory,
        dram: Dram,
        link: Pcie,
    }

    impl Fixture {
        fn new(dram: usize) -> Self {
            Fixture { host: SystemMemory::new(1024), dram: Dram::new(dram), link: Pcie::default() }
        }

        fn ctx(&mut self) -> CopyContext<'_> {
            CopyContext { host: &mut self.host, dram: &mut self.dram, link: &self.link }
        }
    }

    fn processor(dma: usize, aces: usize) -> CommandProcessor {
        CommandProcessor::new(
            (0..dma).map(DmaEngine::new).collect(),
            (0..aces).map(|id| AsyncComputeEngine::new(id, 16)).collect(),
        )
    }

    fn launch(workgroups: u32) -> Command {
        let program = Program::new(0, vec![Instruction::VectorAlu]);
        Command::kernel_launch(KernelDescriptor::new(
            "k",
            Dim3::x(workgroups),
            Dim3::x(256),
            program,
        ))
    }

    #[test]
    fn copy_out_of_range_consumes_command() {
        let mut fixture = Fixture::new(8);
        let mut cp = processor(2, 1);
        cp.enqueue(Command::memory_copy(0, 0, 16, CopyDirection::HostToDevice));
        let failure = cp.process_next(fixture.ctx()).unwrap_err();
        assert!(matches!(failure.error, SimError::AddressOutOfRange { .. }));
        assert_eq!(cp.pending(), 0);
        // engine went back to its pool on the next refresh
        cp.refresh_pools();
        assert_eq!(cp.pool(EngineKind::Dma).len(), 2);
    }

    #[test]
    fn unknown_tag_does_not_block_queue() {
        let mut fixture = Fixture::new(64);
        let mut cp = processor(1, 1);
        cp.enqueue(Command::raw("flush_everything", BTreeMap::new()));
        cp.enqueue(Command::memory_copy(0, 0, 8, CopyDirection::HostToDevice));

        let failure = cp.process_next(fixture.ctx()).unwrap_err();
        assert_eq!(
            failure.error,
            SimError::UnknownCommandType { tag: "flush_everything".to_string() }
        );
        assert!(matches!(
            cp.process_next(fixture.ctx()),
            Ok(Some(Dispatch::Copy { engine: 0, .. }))
        ));
    }

    #[test]
    fn launch_without_free_ace_is_requeued() {
        let mut fixture = Fixture::new(64);
        let mut cp = processor(1, 1);
        cp.enqueue(launch(2));
        cp.enqueue(launch(1));

        let first = cp.process_next(fixture.ctx()).unwrap().unwrap();
        assert_eq!(first, Dispatch::Kernel { ace: 0, kernel: KernelId(0), workgroups: 2 });
        assert!(!cp.pool(EngineKind::Ace).contains(0));

        let failure = cp.process_next(fixture.ctx()).unwrap_err();
        assert_eq!(failure.error, SimError::NoEngineAvailable { kind: EngineKind::Ace });
        assert_eq!(cp.pending(), 1);
        // pool refresh does not hand out a busy ACE
        cp.refresh_pools();
        assert!(cp.pool(EngineKind::Ace).is_empty());
    }

    #[test]
    fn kernel_ids_are_unique_per_launch() {
        let mut fixture = Fixture::new(64);
        let mut cp = processor(0, 2);
        cp.enqueue(launch(1));
        cp.enqueue(launch(1));
        let a = cp.process_next(fixture.ctx()).unwrap().unwrap();
        let b = cp.process_next(fixture.ctx()).unwrap().unwrap();
        match (a, b) {
            (
                Dispatch::Kernel { ace: ace_a, kernel: ka, .. },
                Dispatch::Kernel { ace: ace_b, kernel: kb, .. },
            ) => {
                assert_ne!(ace_a, ace_b);
                assert_ne!(ka, kb);
            }
            other => panic!("unexpected dispatch {:?}", other),
        }
    }

    #[test]
    fn empty_queue_dispatches_nothing() {
        let mut fixture = Fixture::new(64);
        let mut cp = processor(1, 1);
        assert_eq!(cp.process_next(fixture.ctx()), Ok(None));
    }

    #[test]
    fn pool_release_does_not_duplicate() {
        let mut pool = EnginePool::with_engines([0, 1]);
        pool.release(1);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.acquire(), Some(0));
        pool.release(0);
        assert_eq!(pool.acquire(), Some(1));
    }
}
