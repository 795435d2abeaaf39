/// Kernels and the workgroups an ACE breaks them into.
///
/// Ownership flows downward: the ACE owns the active `Kernel`, workgroups and
/// wavefronts refer back to it only through `KernelId` handles.
use crate::instruction::Program;
use crate::occupancy::WavefrontCost;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 3D dimension struct used for grid and workgroup sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Dim3 { x, y, z }
    }

    /// Convenience constructor for 1D configs
    pub fn x(x: u32) -> Self {
        Dim3 { x, y: 1, z: 1 }
    }

    /// Total number of elements in this dimension
    pub fn size(&self) -> u32 {
        self.x.saturating_mul(self.y).saturating_mul(self.z)
    }
}

impl std::fmt::Display for Dim3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

/// What the host asks to launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelDescriptor {
    pub name: String,
    #[serde(default)]
    pub args: BTreeMap<String, i64>,
    /// Grid size, in workgroups
    pub grid: Dim3,
    /// Workgroup size, in work-items
    pub workgroup_size: Dim3,
    pub program: Arc<Program>,
    /// Resources each wavefront of this kernel occupies on its compute unit.
    /// Falls back to the device's default cost when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<WavefrontCost>,
}

impl KernelDescriptor {
    pub fn new(name: &str, grid: Dim3, workgroup_size: Dim3, program: Program) -> Self {
        KernelDescriptor {
            name: name.to_string(),
            args: BTreeMap::new(),
            grid,
            workgroup_size,
            program: Arc::new(program),
            cost: None,
        }
    }

    pub fn with_cost(mut self, cost: WavefrontCost) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_arg(mut self, name: &str, value: i64) -> Self {
        self.args.insert(name.to_string(), value);
        self
    }

    pub fn num_workgroups(&self) -> u32 {
        self.grid.size()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KernelId(pub u32);

impl std::fmt::Display for KernelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "k{}", self.0)
    }
}

/// A launched kernel. Immutable once launched.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    pub id: KernelId,
    pub descriptor: KernelDescriptor,
    /// Per-wavefront cost in effect for this launch
    pub cost: WavefrontCost,
}

impl Kernel {
    pub fn new(id: KernelId, descriptor: KernelDescriptor) -> Self {
        Self::with_fallback_cost(id, descriptor, WavefrontCost::default())
    }

    /// Launch `descriptor`, charging `fallback` per wavefront unless it names its own cost.
    pub fn with_fallback_cost(id: KernelId, descriptor: KernelDescriptor, fallback: WavefrontCost) -> Self {
        let cost = descriptor.cost.unwrap_or(fallback);
        Kernel { id, descriptor, cost }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn num_workgroups(&self) -> u32 {
        self.descriptor.num_workgroups()
    }
}

/// Handle of a workgroup: its kernel plus its flat index within the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkgroupId {
    pub kernel: KernelId,
    pub index: u32,
}

impl std::fmt::Display for WorkgroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/wg{}", self.kernel, self.index)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Workgroup {
    pub id: WorkgroupId,
    pub program: Arc<Program>,
    pub cost: WavefrontCost,
}

impl Workgroup {
    pub fn new(kernel: &Kernel, index: u32) -> Self {
        Workgroup {
            id: WorkgroupId { kernel: kernel.id, index },
            program: Arc::clone(&kernel.descriptor.program),
            cost: kernel.cost,
        }
    }

    pub fn kernel(&self) -> KernelId {
        self.id.kernel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;

    #[test]
    fn explicit_cost_overrides_fallback() {
        let program = Program::new(0, vec![Instruction::ScalarAlu]);
        let descriptor = KernelDescriptor::new("k", Dim3::new(2, 3, 1), Dim3::x(64), program);
        let fallback = WavefrontCost { sgprs: 16, vgprs: 32, lds_bytes: 0 };

        let kernel = Kernel::with_fallback_cost(KernelId(1), descriptor.clone(), fallback);
        assert_eq!(kernel.cost, fallback);
        assert_eq!(kernel.num_workgroups(), 6);

        let own = WavefrontCost { sgprs: 8, vgprs: 128, lds_bytes: 4096 };
        let kernel = Kernel::with_fallback_cost(KernelId(2), descriptor.with_cost(own), fallback);
        assert_eq!(Workgroup::new(&kernel, 5).cost, own);
    }
}
