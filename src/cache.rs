/// Tag-based cache models for the L1 instruction/scalar/vector caches and the L2.
///
/// Caches track line presence only; the bytes themselves always come from DRAM.
/// Hit/miss is decided by the model's tag lookup, so tests can plug a
/// deterministic model behind the `CacheModel` trait.
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Access counters exposed for reporting. No internal decision reads them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn record(&mut self, hit: bool) {
        self.accesses += 1;
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }

    pub fn hit_rate(&self) -> f64 {
        if self.accesses == 0 {
            0.0
        } else {
            self.hits as f64 / self.accesses as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        if self.accesses == 0 {
            0.0
        } else {
            self.misses as f64 / self.accesses as f64
        }
    }
}

/// A pluggable cache level.
pub trait CacheModel: Send {
    /// Probe for the line holding `address`. Counts one access, and a miss if absent.
    fn lookup(&mut self, address: u64) -> bool;

    /// Install the line holding `address`, evicting per the replacement policy.
    fn insert(&mut self, address: u64);

    /// Drop every line.
    fn flush(&mut self);

    fn stats(&self) -> CacheStats;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementPolicy {
    /// Least recently used line in the set is evicted.
    Lru,
    /// Oldest inserted line in the set is evicted; hits do not reorder.
    Fifo,
}

impl std::fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplacementPolicy::Lru  => write!(f, "LRU"),
            ReplacementPolicy::Fifo => write!(f, "FIFO"),
        }
    }
}

/// Geometry of one cache level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub sets: usize,
    pub ways: usize,
    /// Line size in bytes (power of two)
    pub line_size: usize,
    pub replacement: ReplacementPolicy,
}

impl CacheConfig {
    /// 16 KB, 64 B lines, 4-way: the per-CU vector L1.
    pub fn l1_vector() -> Self {
        CacheConfig { sets: 64, ways: 4, line_size: 64, replacement: ReplacementPolicy::Lru }
    }

    /// 32 KB, 64 B lines, 4-way: the instruction L1.
    pub fn l1_instruction() -> Self {
        CacheConfig { sets: 128, ways: 4, line_size: 64, replacement: ReplacementPolicy::Lru }
    }

    /// 16 KB, 64 B lines, 4-way: the scalar (constant) L1.
    pub fn l1_scalar() -> Self {
        CacheConfig { sets: 64, ways: 4, line_size: 64, replacement: ReplacementPolicy::Lru }
    }

    /// 1 MB, 64 B lines, 16-way: the device-wide L2.
    pub fn l2() -> Self {
        CacheConfig { sets: 1024, ways: 16, line_size: 64, replacement: ReplacementPolicy::Lru }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.sets * self.ways * self.line_size
    }
}

/// Set-associative tag array. Each set keeps its tags ordered so that the
/// front is the next victim.
#[derive(Debug, Clone)]
pub struct SetAssociativeCache {
    name: String,
    config: CacheConfig,
    sets: Vec<VecDeque<u64>>,
    stats: CacheStats,
}

impl SetAssociativeCache {
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        let sets = (0..config.sets.max(1))
            .map(|_| VecDeque::with_capacity(config.ways))
            .collect();
        SetAssociativeCache {
            name: name.into(),
            config,
            sets,
            stats: CacheStats::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Line address (tag + index) of `address`.
    pub fn block_addr(&self, address: u64) -> u64 {
        address / self.config.line_size as u64
    }

    fn set_index(&self, block: u64) -> usize {
        (block % self.sets.len() as u64) as usize
    }

    /// Presence check that does not count as an access.
    pub fn contains(&self, address: u64) -> bool {
        let block = self.block_addr(address);
        self.sets[self.set_index(block)].contains(&block)
    }

    pub fn resident_lines(&self) -> usize {
        self.sets.iter().map(VecDeque::len).sum()
    }
}

impl CacheModel for SetAssociativeCache {
    fn lookup(&mut self, address: u64) -> bool {
        let block = self.block_addr(address);
        let idx = self.set_index(block);
        let set = &mut self.sets[idx];
        let hit = match set.iter().position(|&tag| tag == block) {
            Some(pos) => {
                if self.config.replacement == ReplacementPolicy::Lru {
                    set.remove(pos);
                    set.push_back(block);
                }
                true
            }
            None => false,
        };
        self.stats.record(hit);
        hit
    }

    fn insert(&mut self, address: u64) {
        let block = self.block_addr(address);
        let idx = self.set_index(block);
        let ways = self.config.ways.max(1);
        let set = &mut self.sets[idx];
        if set.contains(&block) {
            return;
        }
        if set.len() >= ways {
            if let Some(victim) = set.pop_front() {
                log::trace!("{}: evict line {:#x}", self.name, victim);
            }
        }
        set.push_back(block);
    }

    fn flush(&mut self) {
        for set in &mut self.sets {
            set.clear();
        }
    }

    fn stats(&self) -> CacheStats {
        self.stats
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny(replacement: ReplacementPolicy) -> SetAssociativeCache {
        // one set, two ways, 64 B lines
        SetAssociativeCache::new(
            "tiny",
            CacheConfig { sets: 1, ways: 2, line_size: 64, replacement },
        )
    }

    #[test]
    fn miss_then_hit_on_same_line() {
        let mut cache = tiny(ReplacementPolicy::Lru);
        assert!(!cache.lookup(0x100));
        cache.insert(0x100);
        assert!(cache.lookup(0x13f));
        assert!(!cache.lookup(0x140));
        assert_eq!(cache.stats(), CacheStats { accesses: 3, hits: 1, misses: 2 });
        assert!((cache.stats().hit_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn lru_keeps_recently_used_line() {
        let mut cache = tiny(ReplacementPolicy::Lru);
        cache.insert(0);
        cache.insert(64);
        assert!(cache.lookup(0));
        cache.insert(128);
        assert!(cache.contains(0));
        assert!(!cache.contains(64));
    }

    #[test]
    fn fifo_evicts_oldest_despite_hits() {
        let mut cache = tiny(ReplacementPolicy::Fifo);
        cache.insert(0);
        cache.insert(64);
        assert!(cache.lookup(0));
        cache.insert(128);
        assert!(!cache.contains(0));
        assert!(cache.contains(64));
    }

    #[test]
    fn flush_clears_all_lines() {
        let mut cache = SetAssociativeCache::new("l2", CacheConfig::l2());
        for line in 0..100u64 {
            cache.insert(line * 64);
        }
        assert_eq!(cache.resident_lines(), 100);
        cache.flush();
        assert_eq!(cache.resident_lines(), 0);
        assert!(!cache.lookup(0));
    }

    #[test]
    fn empty_stats_report_zero_rates() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 0.0);
    }
}
