/// Memory hierarchy simulation.
/// Models the tiers a compute unit's accesses flow through:
///   - L1 instruction / scalar / vector caches (per CU)
///   - L2 cache and L2 TLB (shared across all CUs)
///   - device DRAM
///
/// Caches decide hit/miss and account for it; bytes are always served from
/// DRAM so stores remain visible to later loads regardless of cache state.
use crate::cache::{CacheConfig, CacheModel, CacheStats, SetAssociativeCache};
use crate::coalescer::{self, Coalescer, Transaction};
use crate::dram::Dram;
use crate::error::SimError;
use crate::tlb::{IdentityWalker, PageWalker, Tlb, TlbConfig};

/// Which level of the hierarchy satisfied an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServedBy {
    L1,
    L2,
    Dram,
}

/// The per-CU first-level caches.
pub struct L1Caches {
    pub instruction: Box<dyn CacheModel>,
    pub scalar: Box<dyn CacheModel>,
    pub vector: Box<dyn CacheModel>,
}

impl L1Caches {
    pub fn new(instruction: &CacheConfig, scalar: &CacheConfig, vector: &CacheConfig) -> Self {
        L1Caches {
            instruction: Box::new(SetAssociativeCache::new("l1i", instruction.clone())),
            scalar: Box::new(SetAssociativeCache::new("l1s", scalar.clone())),
            vector: Box::new(SetAssociativeCache::new("l1v", vector.clone())),
        }
    }

    pub fn flush(&mut self) {
        self.instruction.flush();
        self.scalar.flush();
        self.vector.flush();
    }
}

impl std::fmt::Debug for L1Caches {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("L1Caches")
            .field("instruction", &self.instruction.stats())
            .field("scalar", &self.scalar.stats())
            .field("vector", &self.vector.stats())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DramStats {
    pub reads: u64,
    pub writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Device-wide memory: L2, TLB, DRAM and the page walker backing the TLB.
pub struct MemorySystem {
    pub l2: Box<dyn CacheModel>,
    pub tlb: Tlb,
    pub dram: Dram,
    walker: Box<dyn PageWalker>,
    dram_stats: DramStats,
}

impl MemorySystem {
    pub fn new(l2: &CacheConfig, tlb: &TlbConfig, dram_capacity: usize) -> Self {
        MemorySystem {
            l2: Box::new(SetAssociativeCache::new("l2", l2.clone())),
            tlb: Tlb::new(tlb.clone()),
            dram: Dram::new(dram_capacity),
            walker: Box::new(IdentityWalker),
            dram_stats: DramStats::default(),
        }
    }

    pub fn with_walker(mut self, walker: Box<dyn PageWalker>) -> Self {
        self.walker = walker;
        self
    }

    pub fn dram_stats(&self) -> DramStats {
        self.dram_stats
    }

    pub fn l2_stats(&self) -> CacheStats {
        self.l2.stats()
    }

    /// Virtual → physical, walking the page table and filling the TLB on a miss.
    pub fn translate(&mut self, virtual_address: u64) -> u64 {
        if let Some(physical) = self.tlb.lookup(virtual_address) {
            return physical;
        }
        let physical = self.walker.walk(virtual_address);
        self.tlb.insert(virtual_address, physical);
        log::trace!("tlb miss: {:#x} -> {:#x}", virtual_address, physical);
        physical
    }

    fn read(&mut self, address: u64, size: usize) -> Result<Vec<u8>, SimError> {
        let bytes = self.dram.load(address, size)?.to_vec();
        self.dram_stats.reads += 1;
        self.dram_stats.bytes_read += size as u64;
        Ok(bytes)
    }

    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<(), SimError> {
        self.dram.store(address, bytes)?;
        self.dram_stats.writes += 1;
        self.dram_stats.bytes_written += bytes.len() as u64;
        Ok(())
    }
}

impl std::fmt::Debug for MemorySystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySystem")
            .field("l2", &self.l2.stats())
            .field("tlb", &self.tlb.stats())
            .field("dram", &self.dram)
            .finish()
    }
}

/// Probe `l1`, then the L2; fill the levels that missed.
fn probe(l1: &mut dyn CacheModel, l2: &mut dyn CacheModel, address: u64) -> ServedBy {
    if l1.lookup(address) {
        return ServedBy::L1;
    }
    let served = if l2.lookup(address) {
        ServedBy::L2
    } else {
        l2.insert(address);
        ServedBy::Dram
    };
    l1.insert(address);
    served
}

/// One compute unit's view of the hierarchy for the duration of a cycle.
pub struct Hierarchy<'a> {
    pub l1: &'a mut L1Caches,
    pub coalescer: &'a mut Coalescer,
    pub shared: &'a mut MemorySystem,
}

impl<'a> Hierarchy<'a> {
    pub fn new(l1: &'a mut L1Caches, coalescer: &'a mut Coalescer, shared: &'a mut MemorySystem) -> Self {
        Hierarchy { l1, coalescer, shared }
    }

    /// Fetch the instruction at `address`: L1I, then L2, then DRAM.
    pub fn fetch_instruction(&mut self, address: u64, size: usize) -> Result<ServedBy, SimError> {
        let served = probe(self.l1.instruction.as_mut(), self.shared.l2.as_mut(), address);
        if served == ServedBy::Dram {
            self.shared.read(address, size)?;
        }
        Ok(served)
    }

    /// Scalar load through the scalar L1.
    pub fn scalar_load(&mut self, address: u64, size: usize) -> Result<Vec<u8>, SimError> {
        let physical = self.shared.translate(address);
        probe(self.l1.scalar.as_mut(), self.shared.l2.as_mut(), physical);
        self.shared.read(physical, size)
    }

    /// Translate each page-sized piece of `transaction` and probe L1V/L2 for it.
    ///
    /// Pieces are returned in address order as `(virtual, physical, len)`.
    fn transact(&mut self, transaction: &Transaction) -> Vec<(u64, u64, usize)> {
        let page_size = self.shared.tlb.page_size();
        let mut pieces = Vec::with_capacity(1);
        let mut virtual_address = transaction.start;
        let end = transaction.end();
        while virtual_address < end {
            let (_, offset) = self.shared.tlb.split(virtual_address);
            let len = (page_size - offset).min(end - virtual_address);
            let physical = self.shared.translate(virtual_address);
            probe(self.l1.vector.as_mut(), self.shared.l2.as_mut(), physical);
            pieces.push((virtual_address, physical, len as usize));
            virtual_address += len;
        }
        pieces
    }

    /// Coalesced vector load; results are returned in request order.
    pub fn vector_load(&mut self, addresses: &[u64], sizes: &[usize]) -> Result<Vec<Vec<u8>>, SimError> {
        let transactions = self.coalescer.coalesce(addresses, sizes);
        let mut payloads = Vec::with_capacity(transactions.len());
        for transaction in &transactions {
            let mut payload = Vec::with_capacity(transaction.len);
            for (_, physical, len) in self.transact(transaction) {
                payload.extend(self.shared.read(physical, len)?);
            }
            payloads.push(payload);
        }
        Ok(coalescer::split(&transactions, &payloads, addresses, sizes))
    }

    /// Coalesced vector store (write-through, write-allocate).
    ///
    /// On an out-of-range element, the transactions before it stay written.
    pub fn vector_store(&mut self, addresses: &[u64], data: &[Vec<u8>]) -> Result<(), SimError> {
        let sizes: Vec<usize> = data.iter().map(Vec::len).collect();
        let transactions = self.coalescer.coalesce(addresses, &sizes);
        for transaction in &transactions {
            let pieces = self.transact(transaction);
            // bounds-check the whole transaction before touching any byte of it
            for &(_, physical, len) in &pieces {
                self.shared.dram.load(physical, len)?;
            }
            let mut members: Vec<(u64, &Vec<u8>)> = addresses
                .iter()
                .zip(data)
                .filter(|(address, bytes)| transaction.covers(**address, bytes.len()))
                .map(|(&address, bytes)| (address, bytes))
                .collect();
            members.sort_by_key(|(address, _)| *address);
            for (address, bytes) in members {
                let member_end = address + bytes.len() as u64;
                for &(piece_start, physical, len) in &pieces {
                    let from = address.max(piece_start);
                    let to = member_end.min(piece_start + len as u64);
                    if from >= to {
                        continue;
                    }
                    let chunk = &bytes[(from - address) as usize..(to - address) as usize];
                    self.shared.write(physical + (from - piece_start), chunk)?;
                }
            }
        }
        Ok(())
    }
}
