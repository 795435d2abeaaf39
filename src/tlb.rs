/// L2 translation lookaside buffer.
///
/// Caches virtual page number → physical page number entries with FIFO
/// replacement. A miss only reports itself; resolving it (the page walk) is the
/// caller's job, which then populates the TLB through `insert`.
use crate::cache::CacheStats;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlbConfig {
    pub entries: usize,
    /// Page size in bytes
    pub page_size: u64,
}

impl Default for TlbConfig {
    fn default() -> Self {
        TlbConfig { entries: 4096, page_size: 4096 }
    }
}

#[derive(Debug, Clone)]
pub struct Tlb {
    config: TlbConfig,
    entries: HashMap<u64, u64>,
    /// Insertion order of the virtual pages in `entries`, oldest first
    order: VecDeque<u64>,
    stats: CacheStats,
}

impl Tlb {
    pub fn new(config: TlbConfig) -> Self {
        Tlb {
            entries: HashMap::with_capacity(config.entries),
            order: VecDeque::with_capacity(config.entries),
            stats: CacheStats::default(),
            config,
        }
    }

    pub fn page_size(&self) -> u64 {
        self.config.page_size
    }

    pub fn capacity(&self) -> usize {
        self.config.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Split a virtual address into (virtual page number, offset).
    pub fn split(&self, virtual_address: u64) -> (u64, u64) {
        (
            virtual_address / self.config.page_size,
            virtual_address % self.config.page_size,
        )
    }

    /// Translate `virtual_address`, returning the physical address on a hit.
    pub fn lookup(&mut self, virtual_address: u64) -> Option<u64> {
        let (vpn, offset) = self.split(virtual_address);
        let translated = self
            .entries
            .get(&vpn)
            .map(|&ppn| ppn * self.config.page_size + offset);
        self.stats.record(translated.is_some());
        translated
    }

    /// Install the translation for the page of `virtual_address`.
    ///
    /// Re-inserting a resident page updates it in place without refreshing its age.
    pub fn insert(&mut self, virtual_address: u64, physical_address: u64) {
        let vpn = virtual_address / self.config.page_size;
        let ppn = physical_address / self.config.page_size;
        self.insert_page(vpn, ppn);
    }

    pub fn insert_page(&mut self, vpn: u64, ppn: u64) {
        if let Some(entry) = self.entries.get_mut(&vpn) {
            *entry = ppn;
            return;
        }
        if self.config.entries == 0 {
            return;
        }
        if self.entries.len() >= self.config.entries {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                log::trace!("tlb: evict page {}", oldest);
            }
        }
        self.entries.insert(vpn, ppn);
        self.order.push_back(vpn);
    }

    /// Presence check that does not count as an access.
    pub fn contains_page(&self, vpn: u64) -> bool {
        self.entries.contains_key(&vpn)
    }

    pub fn flush(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

/// Resolves a TLB miss to a physical address.
pub trait PageWalker: Send {
    fn walk(&mut self, virtual_address: u64) -> u64;
}

/// Flat address space: every virtual page maps onto the same physical page.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityWalker;

impl PageWalker for IdentityWalker {
    fn walk(&mut self, virtual_address: u64) -> u64 {
        virtual_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tlb(entries: usize) -> Tlb {
        Tlb::new(TlbConfig { entries, page_size: 4096 })
    }

    #[test]
    fn hit_translates_page_and_keeps_offset() {
        let mut tlb = tlb(4);
        tlb.insert_page(3, 9);
        assert_eq!(tlb.lookup(3 * 4096 + 17), Some(9 * 4096 + 17));
        assert_eq!(tlb.stats().hits, 1);
    }

    #[test]
    fn miss_returns_none_and_counts() {
        let mut tlb = tlb(4);
        assert_eq!(tlb.lookup(4096), None);
        assert_eq!(tlb.stats().misses, 1);
        assert_eq!(tlb.stats().accesses, 1);
    }

    #[test]
    fn fifo_evicts_first_inserted_page() {
        let mut tlb = tlb(2);
        for page in 1..=3u64 {
            tlb.insert(page * 4096, page * 4096);
        }
        assert_eq!(tlb.len(), 2);
        assert_eq!(tlb.lookup(4096), None);
        assert!(tlb.lookup(2 * 4096).is_some());
        assert!(tlb.lookup(3 * 4096).is_some());
    }

    #[test]
    fn reinsert_does_not_evict() {
        let mut tlb = tlb(2);
        tlb.insert_page(1, 1);
        tlb.insert_page(2, 2);
        tlb.insert_page(1, 7);
        assert_eq!(tlb.len(), 2);
        assert_eq!(tlb.lookup(4096), Some(7 * 4096));
        // page 1 is still the oldest
        tlb.insert_page(3, 3);
        assert!(!tlb.contains_page(1));
    }

    #[test]
    fn flush_clears_translations() {
        let mut tlb = tlb(2);
        tlb.insert_page(1, 1);
        tlb.flush();
        assert!(tlb.is_empty());
        assert_eq!(tlb.lookup(4096), None);
    }

    #[test]
    fn hit_rate_is_hits_over_accesses() {
        let mut tlb = tlb(2);
        tlb.insert_page(0, 0);
        let _ = tlb.lookup(0);
        let _ = tlb.lookup(0);
        let _ = tlb.lookup(8192);
        assert!((tlb.stats().hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }
}
