/// Compute-unit resource ceilings, the per-CU resource ledger, and the
/// theoretical occupancy calculation derived from them.
///
/// A compute unit consumes four resource classes: wavefront slots, scalar
/// registers (SGPRs), vector registers (VGPRs) and local data share (LDS) bytes.
use crate::error::SimError;
use serde::{Deserialize, Serialize};

/// Hardware resource limits of one compute unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CuConfig {
    /// Maximum resident wavefronts
    pub max_wavefronts: u32,
    /// Scalar register file entries
    pub max_sgprs: u32,
    /// Vector register file entries
    pub max_vgprs: u32,
    /// Local data share size in bytes
    pub max_lds_bytes: u32,
    /// Number of wavefront pools in the instruction sequencer
    pub num_pools: u32,
}

impl CuConfig {
    /// GCN3-like compute unit: 4 pools of 10 wavefronts, 64 KB LDS.
    pub fn gcn3() -> Self {
        CuConfig {
            max_wavefronts: 40,
            max_sgprs: 800,
            max_vgprs: 1024,
            max_lds_bytes: 64 * 1024,
            num_pools: 4,
        }
    }

    pub fn slots_per_pool(&self) -> u32 {
        if self.num_pools == 0 {
            0
        } else {
            self.max_wavefronts / self.num_pools
        }
    }

    pub fn ceilings(&self) -> Resources {
        Resources {
            wavefronts: self.max_wavefronts,
            sgprs: self.max_sgprs,
            vgprs: self.max_vgprs,
            lds_bytes: self.max_lds_bytes,
        }
    }
}

impl Default for CuConfig {
    fn default() -> Self {
        CuConfig::gcn3()
    }
}

/// Resources a single wavefront of a kernel occupies while resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavefrontCost {
    pub sgprs: u32,
    pub vgprs: u32,
    pub lds_bytes: u32,
}

impl Default for WavefrontCost {
    fn default() -> Self {
        WavefrontCost { sgprs: 32, vgprs: 64, lds_bytes: 2048 }
    }
}

impl WavefrontCost {
    /// Ledger demand of one wavefront with this cost.
    pub fn demand(&self) -> Resources {
        Resources {
            wavefronts: 1,
            sgprs: self.sgprs,
            vgprs: self.vgprs,
            lds_bytes: self.lds_bytes,
        }
    }
}

/// A quantity of each of the four resource classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub wavefronts: u32,
    pub sgprs: u32,
    pub vgprs: u32,
    pub lds_bytes: u32,
}

impl Resources {
    pub fn checked_add(self, other: Resources) -> Option<Resources> {
        Some(Resources {
            wavefronts: self.wavefronts.checked_add(other.wavefronts)?,
            sgprs: self.sgprs.checked_add(other.sgprs)?,
            vgprs: self.vgprs.checked_add(other.vgprs)?,
            lds_bytes: self.lds_bytes.checked_add(other.lds_bytes)?,
        })
    }

    pub fn saturating_sub(self, other: Resources) -> Resources {
        Resources {
            wavefronts: self.wavefronts.saturating_sub(other.wavefronts),
            sgprs: self.sgprs.saturating_sub(other.sgprs),
            vgprs: self.vgprs.saturating_sub(other.vgprs),
            lds_bytes: self.lds_bytes.saturating_sub(other.lds_bytes),
        }
    }

    /// The first resource class in which `self` exceeds `max`, if any.
    pub fn exceeds(&self, max: &Resources) -> Option<OccupancyLimiter> {
        if self.wavefronts > max.wavefronts {
            Some(OccupancyLimiter::WavefrontSlots)
        } else if self.sgprs > max.sgprs {
            Some(OccupancyLimiter::ScalarRegisters)
        } else if self.vgprs > max.vgprs {
            Some(OccupancyLimiter::VectorRegisters)
        } else if self.lds_bytes > max.lds_bytes {
            Some(OccupancyLimiter::LocalDataShare)
        } else {
            None
        }
    }
}

impl std::iter::Sum for Resources {
    fn sum<I: Iterator<Item = Resources>>(iter: I) -> Self {
        iter.fold(Resources::default(), |acc, r| Resources {
            wavefronts: acc.wavefronts.saturating_add(r.wavefronts),
            sgprs: acc.sgprs.saturating_add(r.sgprs),
            vgprs: acc.vgprs.saturating_add(r.vgprs),
            lds_bytes: acc.lds_bytes.saturating_add(r.lds_bytes),
        })
    }
}

/// Which resource is limiting occupancy or admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OccupancyLimiter {
    WavefrontSlots,
    ScalarRegisters,
    VectorRegisters,
    LocalDataShare,
}

impl std::fmt::Display for OccupancyLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OccupancyLimiter::WavefrontSlots  => write!(f, "wavefront slots"),
            OccupancyLimiter::ScalarRegisters => write!(f, "scalar registers"),
            OccupancyLimiter::VectorRegisters => write!(f, "vector registers"),
            OccupancyLimiter::LocalDataShare  => write!(f, "local data share"),
        }
    }
}

/// Per-CU usage counters, each bounded by its ceiling.
///
/// `reserve` and `release` are the only mutators. A reservation either applies
/// to all four counters or to none of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLedger {
    used: Resources,
    max: Resources,
}

impl ResourceLedger {
    pub fn new(max: Resources) -> Self {
        ResourceLedger { used: Resources::default(), max }
    }

    pub fn used(&self) -> Resources {
        self.used
    }

    pub fn max(&self) -> Resources {
        self.max
    }

    pub fn available(&self) -> Resources {
        self.max.saturating_sub(self.used)
    }

    /// `None` if `demand` fits on top of current usage, else the first exhausted class.
    pub fn shortfall(&self, demand: Resources) -> Option<OccupancyLimiter> {
        match self.used.checked_add(demand) {
            Some(total) => total.exceeds(&self.max),
            None => Some(OccupancyLimiter::WavefrontSlots),
        }
    }

    pub fn can_fit(&self, demand: Resources) -> bool {
        self.shortfall(demand).is_none()
    }

    pub fn reserve(&mut self, demand: Resources) -> Result<(), SimError> {
        if let Some(limiter) = self.shortfall(demand) {
            return Err(SimError::InsufficientResources {
                wavefronts: demand.wavefronts as usize,
                limiter,
            });
        }
        // checked above
        self.used = self.used.checked_add(demand).unwrap_or(self.used);
        Ok(())
    }

    pub fn release(&mut self, demand: Resources) {
        debug_assert!(demand.exceeds(&self.used).is_none(), "releasing more than reserved");
        self.used = self.used.saturating_sub(demand);
    }
}

/// Maximum number of workgroups that can simultaneously reside on one compute
/// unit, and which resource is the bottleneck.
///
/// The minimum across the four resource constraints, each being
/// `ceiling / (wavefronts_per_workgroup * per-wavefront cost)`.
pub fn max_workgroups_per_cu(
    cost: &WavefrontCost,
    wavefronts_per_workgroup: u32,
    cu: &CuConfig,
) -> (u32, OccupancyLimiter) {
    let waves = wavefronts_per_workgroup.max(1);
    let per = |ceiling: u32, unit: u32| {
        let per_workgroup = unit.saturating_mul(waves);
        if per_workgroup == 0 { u32::MAX } else { ceiling / per_workgroup }
    };

    let by_slots = per(cu.max_wavefronts, 1);
    let by_sgprs = per(cu.max_sgprs, cost.sgprs);
    let by_vgprs = per(cu.max_vgprs, cost.vgprs);
    let by_lds = per(cu.max_lds_bytes, cost.lds_bytes);

    let max = by_slots.min(by_sgprs).min(by_vgprs).min(by_lds);

    let limiter = if max == by_lds {
        OccupancyLimiter::LocalDataShare
    } else if max == by_vgprs {
        OccupancyLimiter::VectorRegisters
    } else if max == by_sgprs {
        OccupancyLimiter::ScalarRegisters
    } else {
        OccupancyLimiter::WavefrontSlots
    };

    (max, limiter)
}

/// Theoretical occupancy as a fraction [0.0, 1.0].
/// occupancy = (resident wavefronts) / (wavefront slots per CU)
pub fn occupancy(max_workgroups: u32, wavefronts_per_workgroup: u32, max_wavefronts: u32) -> f32 {
    if max_wavefronts == 0 {
        return 0.0;
    }
    let resident = max_workgroups.saturating_mul(wavefronts_per_workgroup);
    (resident as f32 / max_wavefronts as f32).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn gcn3_occupancy_with_default_cost() {
        let cu = CuConfig::gcn3();
        let (max, limiter) = max_workgroups_per_cu(&WavefrontCost::default(), 4, &cu);
        // 1024 VGPRs / (4 * 64) = 4 workgroups; 800 SGPRs / 128 = 6; LDS 65536 / 8192 = 8
        assert_eq!(max, 4);
        assert_eq!(limiter, OccupancyLimiter::VectorRegisters);
        assert!((occupancy(max, 4, cu.max_wavefronts) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn zero_cost_kernel_is_slot_limited() {
        let cost = WavefrontCost { sgprs: 0, vgprs: 0, lds_bytes: 0 };
        let (max, limiter) = max_workgroups_per_cu(&cost, 4, &CuConfig::gcn3());
        assert_eq!(max, 10);
        assert_eq!(limiter, OccupancyLimiter::WavefrontSlots);
    }

    #[test]
    fn reserve_is_all_or_nothing() {
        let mut ledger = ResourceLedger::new(Resources {
            wavefronts: 4,
            sgprs: 100,
            vgprs: 100,
            lds_bytes: 100,
        });
        let demand = Resources { wavefronts: 1, sgprs: 10, vgprs: 60, lds_bytes: 10 };
        ledger.reserve(demand).unwrap();
        let err = ledger.reserve(demand).unwrap_err();
        assert_eq!(
            err,
            SimError::InsufficientResources {
                wavefronts: 1,
                limiter: OccupancyLimiter::VectorRegisters,
            }
        );
        assert_eq!(ledger.used(), demand);
        ledger.release(demand);
        assert_eq!(ledger.used(), Resources::default());
    }

    #[test]
    fn overflowing_demand_is_rejected() {
        let ledger = ResourceLedger::new(CuConfig::gcn3().ceilings());
        let demand = Resources { wavefronts: u32::MAX, sgprs: 0, vgprs: 0, lds_bytes: 0 };
        assert!(ledger.can_fit(Resources::default()));
        assert!(!ledger.can_fit(demand));
    }

    proptest! {
        #[test]
        fn used_never_exceeds_max(ops in prop::collection::vec((any::<bool>(), 0u32..8, 0u32..300, 0u32..300), 1..200)) {
            let max = Resources { wavefronts: 16, sgprs: 800, vgprs: 1024, lds_bytes: 4096 };
            let mut ledger = ResourceLedger::new(max);
            let mut held: Vec<Resources> = Vec::new();
            for (alloc, sgprs, vgprs, lds) in ops {
                if alloc || held.is_empty() {
                    let demand = Resources { wavefronts: 1, sgprs, vgprs, lds_bytes: lds * 4 };
                    let before = ledger.used();
                    match ledger.reserve(demand) {
                        Ok(()) => held.push(demand),
                        Err(_) => prop_assert_eq!(ledger.used(), before),
                    }
                } else {
                    let demand = held.remove(sgprs as usize % held.len());
                    ledger.release(demand);
                }
                prop_assert!(ledger.used().exceeds(&max).is_none());
                prop_assert_eq!(ledger.used(), held.iter().copied().sum::<Resources>());
            }
        }
    }
}
