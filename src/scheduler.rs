/// Instruction fetch arbitration.
///
/// Each cycle the sequencer fetches for exactly one wavefront. The fetch policy
/// picks it from the wavefronts that still have instructions to fetch and room
/// in their buffer:
///   - OldestFirst: earliest-admitted wavefront wins (default)
///   - RoundRobin: rotates through candidates after the last one served
use crate::wavefront::WavefrontId;
use serde::{Deserialize, Serialize};

/// The fetch arbiter's view of a wavefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchCandidate {
    pub id: WavefrontId,
    /// Admission timestamp: lower = older
    pub age: u64,
}

/// Trait for fetch arbitration policies.
pub trait FetchPolicy: Send {
    /// Choose the wavefront to fetch for this cycle, if any.
    fn select(&mut self, candidates: &[FetchCandidate]) -> Option<WavefrontId>;

    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Oldest-first
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct OldestFirst;

impl FetchPolicy for OldestFirst {
    fn select(&mut self, candidates: &[FetchCandidate]) -> Option<WavefrontId> {
        candidates.iter().min_by_key(|c| c.age).map(|c| c.id)
    }

    fn name(&self) -> &'static str {
        "OldestFirst"
    }
}

// ---------------------------------------------------------------------------
// Round-robin
// ---------------------------------------------------------------------------

/// Serves the next-older candidate after the one served last, wrapping.
#[derive(Debug, Default)]
pub struct RoundRobin {
    last_served: Option<u64>,
}

impl FetchPolicy for RoundRobin {
    fn select(&mut self, candidates: &[FetchCandidate]) -> Option<WavefrontId> {
        let after_last = |c: &&FetchCandidate| match self.last_served {
            Some(age) => c.age > age,
            None => true,
        };
        let chosen = candidates
            .iter()
            .filter(after_last)
            .min_by_key(|c| c.age)
            .or_else(|| candidates.iter().min_by_key(|c| c.age))?;
        self.last_served = Some(chosen.age);
        Some(chosen.id)
    }

    fn name(&self) -> &'static str {
        "RoundRobin"
    }
}

// ---------------------------------------------------------------------------
// Policy selector
// ---------------------------------------------------------------------------

/// Selectable fetch policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicyKind {
    #[default]
    OldestFirst,
    RoundRobin,
}

impl FetchPolicyKind {
    pub fn build(self) -> Box<dyn FetchPolicy> {
        match self {
            FetchPolicyKind::OldestFirst => Box::new(OldestFirst),
            FetchPolicyKind::RoundRobin => Box::new(RoundRobin::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FetchPolicyKind::OldestFirst => "OldestFirst",
            FetchPolicyKind::RoundRobin => "RoundRobin",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{KernelId, WorkgroupId};

    fn candidate(slot: u32, age: u64) -> FetchCandidate {
        FetchCandidate {
            id: WavefrontId {
                workgroup: WorkgroupId { kernel: KernelId(0), index: 0 },
                slot,
            },
            age,
        }
    }

    #[test]
    fn oldest_first_prefers_lowest_age() {
        let mut policy = OldestFirst;
        let candidates = [candidate(0, 5), candidate(1, 2), candidate(2, 9)];
        assert_eq!(policy.select(&candidates).unwrap().slot, 1);
        assert_eq!(policy.select(&candidates).unwrap().slot, 1);
        assert_eq!(policy.select(&[]), None);
    }

    #[test]
    fn round_robin_rotates_and_wraps() {
        let mut policy = FetchPolicyKind::RoundRobin.build();
        let candidates = [candidate(0, 1), candidate(1, 2), candidate(2, 3)];
        let served: Vec<u32> = (0..4)
            .map(|_| policy.select(&candidates).unwrap().slot)
            .collect();
        assert_eq!(served, vec![0, 1, 2, 0]);
    }

    #[test]
    fn round_robin_skips_departed_candidates() {
        let mut policy = RoundRobin::default();
        assert_eq!(policy.select(&[candidate(0, 1), candidate(1, 2)]).unwrap().slot, 0);
        // wavefront 1 finished fetching; only 0 and a newcomer remain
        assert_eq!(policy.select(&[candidate(0, 1), candidate(3, 7)]).unwrap().slot, 3);
    }
}
