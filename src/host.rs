/// Host-side byte store consumed by the DMA engines.
use crate::dram::Dram;
use crate::error::SimError;

pub trait HostMemory {
    fn read(&self, address: u64, size: usize) -> Result<Vec<u8>, SimError>;

    fn write(&mut self, address: u64, data: &[u8]) -> Result<(), SimError>;

    fn capacity(&self) -> usize;
}

/// Flat, bounds-checked system memory.
#[derive(Debug)]
pub struct SystemMemory {
    storage: Dram,
}

impl SystemMemory {
    pub fn new(capacity: usize) -> Self {
        SystemMemory { storage: Dram::new(capacity) }
    }

    /// System memory pre-filled with `bytes` starting at address 0.
    pub fn with_contents(capacity: usize, bytes: &[u8]) -> Result<Self, SimError> {
        let mut memory = SystemMemory::new(capacity);
        memory.write(0, bytes)?;
        Ok(memory)
    }
}

impl HostMemory for SystemMemory {
    fn read(&self, address: u64, size: usize) -> Result<Vec<u8>, SimError> {
        Ok(self.storage.load(address, size)?.to_vec())
    }

    fn write(&mut self, address: u64, data: &[u8]) -> Result<(), SimError> {
        self.storage.store(address, data)
    }

    fn capacity(&self) -> usize {
        self.storage.capacity()
    }
}
