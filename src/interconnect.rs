/// Host↔device link model.
///
/// The DMA engines hand every copy to a `Transport`. The link reports how long
/// the transfer would take; the simulator treats it as instantaneous and
/// reliable for scheduling, and only surfaces the estimate in reports.
///
/// Bandwidth reference (per direction):
///   PCIe 3.0 x16: ~15.75 GB/s
///   PCIe 4.0 x16: ~31.5 GB/s
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Link configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcieConfig {
    /// Peak bandwidth per direction in GB/s
    pub bandwidth_gb_s: f64,
    /// Per-transfer latency in microseconds
    pub latency_us: f64,
}

impl PcieConfig {
    pub fn gen3_x16() -> Self {
        PcieConfig { bandwidth_gb_s: 15.75, latency_us: 1.0 }
    }

    pub fn gen4_x16() -> Self {
        PcieConfig { bandwidth_gb_s: 31.5, latency_us: 1.0 }
    }
}

impl Default for PcieConfig {
    fn default() -> Self {
        PcieConfig::gen3_x16()
    }
}

// ---------------------------------------------------------------------------
// Transfer simulation
// ---------------------------------------------------------------------------

/// Result of a simulated transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferStats {
    /// Number of bytes transferred
    pub bytes: u64,
    /// Destination address the bytes were delivered to
    pub destination: u64,
    /// Simulated transfer time in microseconds
    pub time_us: f64,
    /// Effective bandwidth achieved in GB/s
    pub effective_bandwidth_gb_s: f64,
}

impl TransferStats {
    pub fn zero(destination: u64) -> Self {
        TransferStats {
            bytes: 0,
            destination,
            time_us: 0.0,
            effective_bandwidth_gb_s: f64::INFINITY,
        }
    }
}

/// Compute simulated transfer time in microseconds.
///
/// time_µs = latency_µs + bytes / bandwidth_bytes_per_µs
///
/// Unit note: 1 GB/s = 10⁹ bytes/s = 10³ bytes/µs
pub fn transfer_time_us(bytes: u64, bandwidth_gb_s: f64, latency_us: f64) -> f64 {
    if bytes == 0 { return 0.0; }
    let bandwidth_bytes_per_us = bandwidth_gb_s * 1_000.0;
    latency_us + bytes as f64 / bandwidth_bytes_per_us
}

/// Compute effective bandwidth in GB/s from bytes and transfer time.
pub fn effective_bandwidth_gb_s(bytes: u64, time_us: f64) -> f64 {
    if time_us == 0.0 { return f64::INFINITY; }
    bytes as f64 / time_us / 1_000.0
}

/// Moves bytes between host and device.
pub trait Transport {
    fn transfer(&self, bytes: &[u8], destination: u64, size: usize) -> TransferStats;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Default)]
pub struct Pcie {
    pub config: PcieConfig,
}

impl Pcie {
    pub fn new(config: PcieConfig) -> Self {
        Pcie { config }
    }
}

impl Transport for Pcie {
    fn transfer(&self, bytes: &[u8], destination: u64, size: usize) -> TransferStats {
        let moved = size.min(bytes.len()) as u64;
        if moved == 0 {
            return TransferStats::zero(destination);
        }
        let time_us = transfer_time_us(moved, self.config.bandwidth_gb_s, self.config.latency_us);
        TransferStats {
            bytes: moved,
            destination,
            time_us,
            effective_bandwidth_gb_s: effective_bandwidth_gb_s(moved, time_us),
        }
    }

    fn name(&self) -> &'static str {
        "PCIe"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_dominates_small_transfers() {
        let link = Pcie::new(PcieConfig::gen3_x16());
        let stats = link.transfer(&[0; 64], 0x100, 64);
        assert_eq!(stats.bytes, 64);
        assert_eq!(stats.destination, 0x100);
        assert!(stats.time_us > 1.0 && stats.time_us < 1.01);
        assert!(stats.effective_bandwidth_gb_s < 1.0);
    }

    #[test]
    fn large_transfers_approach_peak() {
        let link = Pcie::new(PcieConfig::gen4_x16());
        let payload = vec![0u8; 1 << 26];
        let stats = link.transfer(&payload, 0, payload.len());
        assert!(stats.effective_bandwidth_gb_s > 31.0);
    }

    #[test]
    fn empty_transfer_is_free() {
        let stats = Pcie::default().transfer(&[], 0, 0);
        assert_eq!(stats.time_us, 0.0);
    }
}
