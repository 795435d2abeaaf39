/// Device DRAM: flat, capacity-bounded byte storage backing the cache hierarchy.
///
/// Every access is bounds-checked against the capacity. The vector variants
/// apply element-wise and stop at the first out-of-range element; elements
/// before it have already been applied.
use crate::error::SimError;

pub struct Dram {
    storage: Vec<u8>,
}

impl Dram {
    pub fn new(capacity: usize) -> Self {
        Dram {
            storage: vec![0u8; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    fn check(&self, address: u64, size: usize) -> Result<usize, SimError> {
        let capacity = self.capacity();
        let start = usize::try_from(address)
            .map_err(|_| SimError::out_of_range(address, size, capacity))?;
        match start.checked_add(size) {
            Some(end) if end <= capacity => Ok(start),
            _ => Err(SimError::out_of_range(address, size, capacity)),
        }
    }

    /// Read `size` bytes starting at `address`.
    pub fn load(&self, address: u64, size: usize) -> Result<&[u8], SimError> {
        let start = self.check(address, size)?;
        Ok(&self.storage[start..start + size])
    }

    /// Write `data` starting at `address`.
    pub fn store(&mut self, address: u64, data: &[u8]) -> Result<(), SimError> {
        let start = self.check(address, data.len())?;
        self.storage[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Element-wise load over parallel address/size sequences.
    pub fn vector_load(&self, addresses: &[u64], sizes: &[usize]) -> Result<Vec<Vec<u8>>, SimError> {
        addresses
            .iter()
            .zip(sizes)
            .map(|(&address, &size)| self.load(address, size).map(<[u8]>::to_vec))
            .collect()
    }

    /// Element-wise store over parallel address/data sequences.
    ///
    /// Crash-early: on failure, the elements preceding the failing one stay written.
    pub fn vector_store(&mut self, addresses: &[u64], data: &[Vec<u8>]) -> Result<(), SimError> {
        for (&address, bytes) in addresses.iter().zip(data) {
            self.store(address, bytes)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Dram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dram")
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_ending_at_capacity_succeeds() {
        let mut dram = Dram::new(64);
        let size = 8;
        let address = (dram.capacity() - size) as u64;
        dram.store(address, &[7u8; 8]).unwrap();
        assert_eq!(dram.load(address, size).unwrap(), &[7u8; 8]);
    }

    #[test]
    fn access_one_past_capacity_fails() {
        let mut dram = Dram::new(64);
        let size = 8;
        let address = (dram.capacity() - size + 1) as u64;
        assert!(matches!(
            dram.load(address, size),
            Err(SimError::AddressOutOfRange { address: 57, size: 8, capacity: 64 })
        ));
        assert!(matches!(
            dram.store(address, &[0u8; 8]),
            Err(SimError::AddressOutOfRange { .. })
        ));
    }

    #[test]
    fn huge_address_does_not_overflow() {
        let dram = Dram::new(16);
        assert!(dram.load(u64::MAX, 2).is_err());
    }

    #[test]
    fn vector_store_is_crash_early() {
        let mut dram = Dram::new(16);
        let addresses = [0, 4, 15, 8];
        let data = vec![vec![1u8; 4], vec![2u8; 4], vec![3u8; 4], vec![4u8; 4]];
        assert!(dram.vector_store(&addresses, &data).is_err());
        // the first two elements landed, the fourth was never attempted
        assert_eq!(dram.load(0, 8).unwrap(), &[1, 1, 1, 1, 2, 2, 2, 2]);
        assert_eq!(dram.load(8, 4).unwrap(), &[0, 0, 0, 0]);
    }

    #[test]
    fn vector_load_preserves_element_order() {
        let mut dram = Dram::new(16);
        dram.store(0, &[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        let loaded = dram.vector_load(&[6, 0, 3], &[2, 1, 3]).unwrap();
        assert_eq!(loaded, vec![vec![6, 7], vec![0], vec![3, 4, 5]]);
    }
}
