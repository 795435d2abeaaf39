/// Asynchronous compute engines.
///
/// An ACE owns at most one kernel. It breaks the kernel into workgroups and
/// feeds them, one hand-off at a time, to shader dispatch. At most
/// `max_active_workgroups` workgroups are queued at once; the rest of the grid
/// is broken lazily as queued workgroups are handed off, which bounds the
/// downstream resource demand any single kernel can put in flight.
use crate::command::EngineKind;
use crate::error::SimError;
use crate::kernel::{Kernel, KernelId, Workgroup, WorkgroupId};
use crate::shader::DispatchTarget;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AceState {
    Idle,
    Busy(KernelId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Empty,
    Active,
}

/// Downstream consumer of workgroups.
pub trait WorkgroupSink {
    /// Admit every wavefront of `workgroup` onto one compute unit, or none.
    fn get_workgroup(&mut self, workgroup: &Workgroup) -> Result<DispatchTarget, SimError>;
}

/// A successful workgroup hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handoff {
    pub workgroup: WorkgroupId,
    pub target: DispatchTarget,
    /// Set when this hand-off drained the kernel and the ACE went idle.
    pub finished: Option<KernelId>,
}

#[derive(Debug)]
pub struct AsyncComputeEngine {
    pub id: usize,
    kernel: Option<Kernel>,
    /// Grid index of the next workgroup to break out of the kernel
    next_workgroup: u32,
    queue: VecDeque<Workgroup>,
    /// Queued workgroups per kernel; equals queue length for the active kernel
    active_workgroups: HashMap<KernelId, u32>,
    max_active_workgroups: u32,
    dispatched: u64,
}

impl AsyncComputeEngine {
    pub fn new(id: usize, max_active_workgroups: u32) -> Self {
        AsyncComputeEngine {
            id,
            kernel: None,
            next_workgroup: 0,
            queue: VecDeque::new(),
            active_workgroups: HashMap::new(),
            max_active_workgroups: max_active_workgroups.max(1),
            dispatched: 0,
        }
    }

    pub fn state(&self) -> AceState {
        match &self.kernel {
            Some(kernel) => AceState::Busy(kernel.id),
            None => AceState::Idle,
        }
    }

    pub fn is_available(&self) -> bool {
        self.kernel.is_none()
    }

    pub fn kernel(&self) -> Option<&Kernel> {
        self.kernel.as_ref()
    }

    pub fn queue_state(&self) -> QueueState {
        if self.queue.is_empty() {
            QueueState::Empty
        } else {
            QueueState::Active
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Workgroups handed off downstream since construction.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub fn active_workgroups(&self, kernel: KernelId) -> u32 {
        self.active_workgroups.get(&kernel).copied().unwrap_or(0)
    }

    /// Take ownership of `kernel` and break its first workgroups.
    ///
    /// Returns the number of workgroups queued. A kernel with an empty grid
    /// finishes immediately and leaves the engine idle.
    pub fn receive_kernel(&mut self, kernel: Kernel) -> Result<usize, SimError> {
        if self.kernel.is_some() {
            return Err(SimError::EngineBusy { kind: EngineKind::Ace, engine: self.id });
        }
        log::debug!(
            "ace{}: received kernel {} ({}) with {} workgroups",
            self.id,
            kernel.id,
            kernel.name(),
            kernel.num_workgroups()
        );
        self.kernel = Some(kernel);
        self.next_workgroup = 0;
        let queued = self.break_kernel()?;
        if queued == 0 {
            self.finish_kernel();
        }
        Ok(queued)
    }

    /// Queue workgroups from the owned kernel until the ceiling is reached or
    /// the grid is exhausted. Returns how many were added.
    pub fn break_kernel(&mut self) -> Result<usize, SimError> {
        let kernel = self
            .kernel
            .as_ref()
            .ok_or(SimError::NoKernelToBreak { ace: self.id })?;
        let total = kernel.num_workgroups();
        let mut added = 0;
        while self.next_workgroup < total && (self.queue.len() as u32) < self.max_active_workgroups {
            self.queue.push_back(Workgroup::new(kernel, self.next_workgroup));
            self.next_workgroup += 1;
            added += 1;
        }
        if added > 0 {
            *self.active_workgroups.entry(kernel.id).or_insert(0) += added as u32;
            log::trace!(
                "ace{}: broke {} workgroups of {} ({}/{} broken)",
                self.id,
                added,
                kernel.id,
                self.next_workgroup,
                total
            );
        }
        Ok(added)
    }

    /// Hand the head workgroup to `sink`.
    ///
    /// `Ok(None)` when nothing is queued. If the sink rejects the workgroup it
    /// stays at the head of the queue and the error is returned for retry.
    pub fn pass_workgroup(&mut self, sink: &mut dyn WorkgroupSink) -> Result<Option<Handoff>, SimError> {
        let Some(workgroup) = self.queue.front() else {
            return Ok(None);
        };
        let target = sink.get_workgroup(workgroup)?;
        let workgroup_id = workgroup.id;
        self.queue.pop_front();
        self.dispatched += 1;

        let kernel_id = workgroup_id.kernel;
        if let Some(count) = self.active_workgroups.get_mut(&kernel_id) {
            debug_assert!(*count > 0, "workgroup count underflow");
            *count = count.saturating_sub(1);
        }
        log::debug!("ace{}: {} -> {}", self.id, workgroup_id, target);

        if self.kernel.is_some() {
            self.break_kernel()?;
        }
        let finished = self.finish_kernel();
        Ok(Some(Handoff { workgroup: workgroup_id, target, finished }))
    }

    /// Release the owned kernel once every workgroup has been handed off.
    ///
    /// Returns the finished kernel's id, or `None` if the engine is idle or
    /// work remains.
    pub fn finish_kernel(&mut self) -> Option<KernelId> {
        let kernel = self.kernel.as_ref()?;
        if !self.queue.is_empty() || self.next_workgroup < kernel.num_workgroups() {
            return None;
        }
        let id = kernel.id;
        debug_assert_eq!(self.active_workgroups(id), 0);
        self.active_workgroups.remove(&id);
        self.kernel = None;
        self.next_workgroup = 0;
        log::debug!("ace{}: kernel {} fully dispatched", self.id, id);
        Some(id)
    }
}
