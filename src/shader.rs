/// Shader dispatch: shader pipe input → shader engines → shader arrays → CUs.
///
/// A workgroup handed over by an ACE is expanded into its wavefronts and placed
/// on the first compute unit, in engine/array/CU scan order, able to admit all
/// of them.
use crate::ace::WorkgroupSink;
use crate::compute_unit::{ComputeUnit, CuParams};
use crate::error::SimError;
use crate::kernel::Workgroup;
use crate::memory::MemorySystem;
use crate::occupancy::OccupancyLimiter;
use crate::scheduler::FetchPolicyKind;
use crate::sequencer::WavefrontFault;
use crate::wavefront::{Wavefront, WavefrontId};
use serde::{Deserialize, Serialize};

/// Location of a compute unit in the shader hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DispatchTarget {
    pub shader_engine: usize,
    pub shader_array: usize,
    pub compute_unit: usize,
}

impl std::fmt::Display for DispatchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "se{}/sa{}/cu{}", self.shader_engine, self.shader_array, self.compute_unit)
    }
}

#[derive(Debug)]
pub struct ShaderArray {
    pub compute_units: Vec<ComputeUnit>,
}

#[derive(Debug)]
pub struct ShaderEngine {
    pub arrays: Vec<ShaderArray>,
}

/// Shape of the shader hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderTopology {
    pub shader_engines: usize,
    pub arrays_per_engine: usize,
    pub cus_per_array: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounters {
    pub workgroups_dispatched: u64,
    pub wavefronts_dispatched: u64,
    pub admission_denials: u64,
}

/// Faults and retirements gathered across every CU in one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderCycle {
    pub finished: Vec<WavefrontId>,
    pub faults: Vec<WavefrontFault>,
}

#[derive(Debug)]
pub struct ShaderPipeInput {
    pub engines: Vec<ShaderEngine>,
    wavefronts_per_workgroup: u32,
    counters: DispatchCounters,
}

impl ShaderPipeInput {
    pub fn new(
        topology: ShaderTopology,
        params: &CuParams,
        policy: FetchPolicyKind,
        wavefronts_per_workgroup: u32,
    ) -> Self {
        let mut next_id = 0;
        let engines = (0..topology.shader_engines)
            .map(|_| ShaderEngine {
                arrays: (0..topology.arrays_per_engine)
                    .map(|_| ShaderArray {
                        compute_units: (0..topology.cus_per_array)
                            .map(|_| {
                                let cu = ComputeUnit::new(next_id, params, policy.build());
                                next_id += 1;
                                cu
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();
        ShaderPipeInput { engines, wavefronts_per_workgroup, counters: DispatchCounters::default() }
    }

    pub fn wavefronts_per_workgroup(&self) -> u32 {
        self.wavefronts_per_workgroup
    }

    pub fn counters(&self) -> DispatchCounters {
        self.counters
    }

    /// Every compute unit with its location, in scan order.
    pub fn compute_units(&self) -> impl Iterator<Item = (DispatchTarget, &ComputeUnit)> {
        self.engines.iter().enumerate().flat_map(|(se, engine)| {
            engine.arrays.iter().enumerate().flat_map(move |(sa, array)| {
                array.compute_units.iter().enumerate().map(move |(cu, unit)| {
                    (DispatchTarget { shader_engine: se, shader_array: sa, compute_unit: cu }, unit)
                })
            })
        })
    }

    pub fn compute_unit(&self, target: DispatchTarget) -> Option<&ComputeUnit> {
        self.engines
            .get(target.shader_engine)?
            .arrays
            .get(target.shader_array)?
            .compute_units
            .get(target.compute_unit)
    }

    pub fn compute_unit_mut(&mut self, target: DispatchTarget) -> Option<&mut ComputeUnit> {
        self.engines
            .get_mut(target.shader_engine)?
            .arrays
            .get_mut(target.shader_array)?
            .compute_units
            .get_mut(target.compute_unit)
    }

    fn compute_units_mut(&mut self) -> impl Iterator<Item = &mut ComputeUnit> {
        self.engines
            .iter_mut()
            .flat_map(|e| e.arrays.iter_mut())
            .flat_map(|a| a.compute_units.iter_mut())
    }

    pub fn is_idle(&self) -> bool {
        self.compute_units().all(|(_, cu)| cu.is_idle())
    }

    /// Advance every compute unit by one cycle.
    pub fn cycle(&mut self, shared: &mut MemorySystem) -> ShaderCycle {
        let mut result = ShaderCycle::default();
        for cu in self.compute_units_mut() {
            let outcome = cu.execute_cycle(shared);
            result.finished.extend(outcome.finished);
            result.faults.extend(outcome.faults);
        }
        result
    }
}

impl WorkgroupSink for ShaderPipeInput {
    fn get_workgroup(&mut self, workgroup: &Workgroup) -> Result<DispatchTarget, SimError> {
        let wavefronts = Wavefront::expand(workgroup, self.wavefronts_per_workgroup);
        let count = wavefronts.len();

        let mut first_limiter = None;
        let mut chosen = None;
        for (target, cu) in self.compute_units() {
            match cu.shortfall(&wavefronts) {
                None => {
                    chosen = Some(target);
                    break;
                }
                Some(limiter) => {
                    first_limiter.get_or_insert(limiter);
                }
            }
        }

        let Some(target) = chosen else {
            self.counters.admission_denials += 1;
            let limiter = first_limiter.unwrap_or(OccupancyLimiter::WavefrontSlots);
            log::debug!("spi: {} denied ({})", workgroup.id, limiter);
            return Err(SimError::InsufficientResources { wavefronts: count, limiter });
        };

        let cu = self
            .compute_unit_mut(target)
            .ok_or(SimError::InsufficientResources {
                wavefronts: count,
                limiter: OccupancyLimiter::WavefrontSlots,
            })?;
        cu.allocate(wavefronts)?;
        self.counters.workgroups_dispatched += 1;
        self.counters.wavefronts_dispatched += count as u64;
        log::debug!("spi: {} ({} wavefronts) -> {}", workgroup.id, count, target);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Instruction, Program};
    use crate::kernel::{Dim3, Kernel, KernelDescriptor, KernelId};
    use crate::occupancy::CuConfig;

    fn spi(cus: usize, max_wavefronts: u32) -> ShaderPipeInput {
        let params = CuParams {
            resources: CuConfig { max_wavefronts, num_pools: 2, ..CuConfig::gcn3() },
            ..CuParams::default()
        };
        let topology = ShaderTopology { shader_engines: 1, arrays_per_engine: 2, cus_per_array: cus };
        ShaderPipeInput::new(topology, &params, FetchPolicyKind::OldestFirst, 4)
    }

    fn workgroup(index: u32) -> Workgroup {
        let kernel = Kernel::new(
            KernelId(0),
            KernelDescriptor::new("t", Dim3::x(8), Dim3::x(256), Program::new(0, vec![Instruction::VectorAlu])),
        );
        Workgroup::new(&kernel, index)
    }

    #[test]
    fn first_fitting_cu_in_scan_order() {
        let mut spi = spi(1, 8);
        let targets: Vec<DispatchTarget> =
            (0..4).map(|i| spi.get_workgroup(&workgroup(i)).unwrap()).collect();
        assert_eq!(targets[0], targets[1]);
        assert_eq!(targets[2], targets[3]);
        assert_eq!(targets[2].shader_array, 1);
        assert!(matches!(
            spi.get_workgroup(&workgroup(4)),
            Err(SimError::InsufficientResources { wavefronts: 4, limiter: OccupancyLimiter::WavefrontSlots })
        ));
        assert_eq!(spi.counters().admission_denials, 1);
        assert_eq!(spi.counters().wavefronts_dispatched, 16);
    }

    #[test]
    fn workgroup_lands_whole_on_one_cu() {
        // 6 slots per CU: a second workgroup cannot split 2 + 2 across CUs
        let mut spi = spi(1, 6);
        let first = spi.get_workgroup(&workgroup(0)).unwrap();
        let second = spi.get_workgroup(&workgroup(1)).unwrap();
        assert_ne!(first, second);
        for (_, cu) in spi.compute_units() {
            let indices: Vec<u32> = cu.sequencer().wavefronts().map(|w| w.id.workgroup.index).collect();
            assert!(indices.windows(2).all(|w| w[0] == w[1]));
            assert_eq!(indices.len(), 4);
        }
    }

    #[test]
    fn compute_unit_ids_are_unique() {
        let spi = spi(3, 8);
        let mut ids: Vec<usize> = spi.compute_units().map(|(_, cu)| cu.id).collect();
        ids.dedup();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
    }
}
