/// Memory coalescing (texture addressing) for vector memory instructions.
///
/// The per-lane accesses of one instruction are sorted by address and greedily
/// packed into regions. An access joins the current region when it starts
/// before the region's transaction boundary (`region start + transaction size`)
/// or overlaps bytes the region already covers; otherwise it opens a new region.
/// Each region is issued to the hierarchy once.
use serde::{Deserialize, Serialize};

/// One hierarchy transaction covering `[start, start + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub start: u64,
    pub len: usize,
}

impl Transaction {
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.len as u64)
    }

    pub fn covers(&self, address: u64, size: usize) -> bool {
        address >= self.start
            && address.checked_add(size as u64).is_some_and(|end| end <= self.end())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoalescingStats {
    /// Per-lane requests received
    pub requests: u64,
    /// Transactions issued
    pub transactions: u64,
}

impl CoalescingStats {
    /// Transactions issued ÷ requests received; 1.0 before any request.
    pub fn ratio(&self) -> f64 {
        if self.requests == 0 {
            1.0
        } else {
            self.transactions as f64 / self.requests as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct Coalescer {
    transaction_size: u64,
    stats: CoalescingStats,
}

impl Coalescer {
    pub fn new(transaction_size: usize) -> Self {
        Coalescer {
            transaction_size: transaction_size as u64,
            stats: CoalescingStats::default(),
        }
    }

    pub fn transaction_size(&self) -> usize {
        self.transaction_size as usize
    }

    pub fn stats(&self) -> CoalescingStats {
        self.stats
    }

    /// Merge parallel `addresses`/`sizes` into an address-ordered transaction list.
    pub fn coalesce(&mut self, addresses: &[u64], sizes: &[usize]) -> Vec<Transaction> {
        debug_assert_eq!(addresses.len(), sizes.len());
        let mut accesses: Vec<(u64, usize)> = addresses
            .iter()
            .copied()
            .zip(sizes.iter().copied())
            .collect();
        if accesses.is_empty() {
            return Vec::new();
        }
        accesses.sort_unstable();

        let mut transactions = Vec::new();
        let (first_addr, first_size) = accesses[0];
        let mut start = first_addr;
        let mut end = first_addr.saturating_add(first_size as u64);

        for &(addr, size) in &accesses[1..] {
            if addr < start.saturating_add(self.transaction_size) || addr < end {
                end = end.max(addr.saturating_add(size as u64));
            } else {
                transactions.push(Transaction { start, len: (end - start) as usize });
                start = addr;
                end = addr.saturating_add(size as u64);
            }
        }
        transactions.push(Transaction { start, len: (end - start) as usize });

        self.stats.requests += accesses.len() as u64;
        self.stats.transactions += transactions.len() as u64;
        log::trace!(
            "coalesced {} accesses into {} transactions",
            accesses.len(),
            transactions.len()
        );
        transactions
    }
}

/// Index of the transaction covering `address`, given address-ordered transactions.
pub fn transaction_for(transactions: &[Transaction], address: u64) -> Option<usize> {
    let idx = transactions
        .partition_point(|t| t.start <= address)
        .checked_sub(1)?;
    (address < transactions[idx].end()).then_some(idx)
}

/// Split transaction payloads back into per-request results, in request order.
///
/// `payloads[i]` holds the bytes of `transactions[i]`.
pub fn split(
    transactions: &[Transaction],
    payloads: &[Vec<u8>],
    addresses: &[u64],
    sizes: &[usize],
) -> Vec<Vec<u8>> {
    addresses
        .iter()
        .zip(sizes)
        .map(|(&address, &size)| {
            match transaction_for(transactions, address) {
                Some(idx) if transactions[idx].covers(address, size) => {
                    let offset = (address - transactions[idx].start) as usize;
                    payloads[idx][offset..offset + size].to_vec()
                }
                _ => Vec::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn nearby_accesses_share_a_transaction() {
        let mut coalescer = Coalescer::new(64);
        let transactions = coalescer.coalesce(&[0, 4, 8, 70, 74], &[4; 5]);
        assert_eq!(
            transactions,
            vec![
                Transaction { start: 0, len: 12 },
                Transaction { start: 70, len: 8 },
            ]
        );
        assert_eq!(coalescer.stats().requests, 5);
        assert_eq!(coalescer.stats().transactions, 2);
        assert!((coalescer.stats().ratio() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn unsorted_input_is_sorted_first() {
        let mut coalescer = Coalescer::new(64);
        let transactions = coalescer.coalesce(&[200, 0, 204], &[4, 4, 4]);
        assert_eq!(
            transactions,
            vec![Transaction { start: 0, len: 4 }, Transaction { start: 200, len: 8 }]
        );
    }

    #[test]
    fn overlapping_accesses_extend_region() {
        let mut coalescer = Coalescer::new(64);
        let transactions = coalescer.coalesce(&[0, 2], &[16, 4]);
        assert_eq!(transactions, vec![Transaction { start: 0, len: 16 }]);
    }

    #[test]
    fn accesses_at_top_of_address_space_do_not_wrap() {
        let mut coalescer = Coalescer::new(64);
        let top = u64::MAX - 8;
        let transactions = coalescer.coalesce(&[top, top + 4, top + 6], &[4, 4, 4]);
        assert_eq!(transactions, vec![Transaction { start: top, len: 8 }]);
        assert_eq!(transactions[0].end(), u64::MAX);
        assert!(transactions[0].covers(top, 8));
        assert!(!transactions[0].covers(u64::MAX - 1, 4));
    }

    #[test]
    fn empty_batch_issues_nothing() {
        let mut coalescer = Coalescer::new(64);
        assert!(coalescer.coalesce(&[], &[]).is_empty());
        assert_eq!(coalescer.stats().ratio(), 1.0);
    }

    #[test]
    fn split_returns_request_order() {
        let mut coalescer = Coalescer::new(64);
        let addresses = [74, 0, 8];
        let sizes = [4, 4, 4];
        let transactions = coalescer.coalesce(&addresses, &sizes);
        let payloads: Vec<Vec<u8>> = transactions
            .iter()
            .map(|t| (t.start..t.end()).map(|a| a as u8).collect())
            .collect();
        let results = split(&transactions, &payloads, &addresses, &sizes);
        assert_eq!(results, vec![vec![74, 75, 76, 77], vec![0, 1, 2, 3], vec![8, 9, 10, 11]]);
    }

    proptest! {
        #[test]
        fn coalesce_then_split_round_trips(
            accesses in prop::collection::vec((0u64..4096, 1usize..16), 1..64)
        ) {
            let addresses: Vec<u64> = accesses.iter().map(|a| a.0).collect();
            let sizes: Vec<usize> = accesses.iter().map(|a| a.1).collect();
            let mut coalescer = Coalescer::new(64);
            let transactions = coalescer.coalesce(&addresses, &sizes);

            // transactions are disjoint and ordered
            for pair in transactions.windows(2) {
                prop_assert!(pair[0].end() <= pair[1].start);
            }

            // a payload where every byte encodes its own address
            let payloads: Vec<Vec<u8>> = transactions
                .iter()
                .map(|t| (t.start..t.end()).map(|a| (a % 251) as u8).collect())
                .collect();
            let results = split(&transactions, &payloads, &addresses, &sizes);

            prop_assert_eq!(results.len(), addresses.len());
            for ((bytes, &address), &size) in results.iter().zip(&addresses).zip(&sizes) {
                prop_assert_eq!(bytes.len(), size);
                let expected: Vec<u8> = (address..address + size as u64)
                    .map(|a| (a % 251) as u8)
                    .collect();
                prop_assert_eq!(bytes, &expected);
            }
        }
    }
}
