/// Live metrics for the TUI visualizer.
///
/// When live metrics are enabled the simulator writes a JSON snapshot to
/// METRICS_PATH periodically and once at the end of a run. The viz binary polls
/// this file and re-renders the dashboard.
/// Writes are atomic (write to .tmp then rename) to avoid torn reads.
use crate::cache::CacheStats;
use crate::occupancy::Resources;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const METRICS_PATH: &str = "/tmp/gcnsim_live.json";

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Counters of one cache, TLB, or an aggregate over a cache class.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct CacheSnapshot {
    /// e.g. "l1v", "l2", "tlb"
    pub name: String,
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
    /// Hit rate [0.0, 1.0]
    pub hit_rate: f64,
}

impl CacheSnapshot {
    pub fn new(name: &str, stats: CacheStats) -> Self {
        CacheSnapshot {
            name: name.to_string(),
            accesses: stats.accesses,
            hits: stats.hits,
            misses: stats.misses,
            hit_rate: stats.hit_rate(),
        }
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct CuSnapshot {
    pub id: usize,
    /// Location, e.g. "se0/sa1/cu0"
    pub location: String,
    pub resident_wavefronts: usize,
    /// Resident wavefronts per sequencer pool
    pub pool_occupancy: Vec<usize>,
    pub used: Resources,
    pub max: Resources,
    pub wavefronts_completed: u64,
    pub instructions_issued: u64,
    /// Vector SIMD busy fraction [0.0, 1.0]
    pub simd_utilization: f64,
}

/// Occupancy report for the most recent kernel launch.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct LaunchSnapshot {
    pub kernel: String,
    pub workgroups: u32,
    /// Theoretical occupancy [0.0, 1.0]
    pub theoretical_occupancy: f32,
    /// Which resource limited occupancy
    pub occupancy_limiter: String,
    /// Max workgroups that can be resident per CU
    pub max_workgroups_per_cu: u32,
}

// ---------------------------------------------------------------------------
// LiveMetrics
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct LiveMetrics {
    /// "idle" | "running" | "complete"
    pub status: String,
    pub cycle: u64,
    pub fetch_policy: String,

    // command processor
    pub pending_commands: usize,
    pub free_dma_engines: usize,
    pub free_aces: usize,
    /// Kernel held by each ACE, empty string when idle
    pub ace_kernels: Vec<String>,
    pub queued_workgroups: usize,

    // dispatch
    pub workgroups_dispatched: u64,
    pub wavefronts_dispatched: u64,
    pub admission_denials: u64,
    pub kernels_completed: usize,
    #[serde(default)]
    pub last_launch: Option<LaunchSnapshot>,

    /// Per-CU state: index = CU id
    pub compute_units: Vec<CuSnapshot>,

    // memory
    pub caches: Vec<CacheSnapshot>,
    pub coalescing_requests: u64,
    pub coalescing_transactions: u64,
    pub coalescing_ratio: f64,
    pub dram_reads: u64,
    pub dram_writes: u64,

    // DMA
    pub dma_transfers: u64,
    pub dma_bytes: u64,
    pub dma_time_us: f64,

    pub command_failures: usize,
    pub wavefront_faults: usize,
    /// Unix timestamp in ms when this snapshot was written
    pub timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// I/O helpers
// ---------------------------------------------------------------------------

/// Atomically write metrics to `path` via a .tmp intermediate file + rename.
pub fn write_metrics_to(path: &Path, metrics: &LiveMetrics) -> std::io::Result<()> {
    let json = serde_json::to_string(metrics)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)
}

/// Atomically write metrics to METRICS_PATH. Failures are ignored; the
/// dashboard simply keeps showing the previous snapshot.
pub fn write_metrics(metrics: &LiveMetrics) {
    if let Err(err) = write_metrics_to(Path::new(METRICS_PATH), metrics) {
        log::trace!("metrics write failed: {}", err);
    }
}

/// Read a metrics snapshot. Returns None if the file doesn't exist
/// or can't be parsed (e.g. no simulation has run yet).
pub fn read_metrics_from(path: &Path) -> Option<LiveMetrics> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

pub fn read_metrics() -> Option<LiveMetrics> {
    read_metrics_from(Path::new(METRICS_PATH))
}

/// Returns current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_survives_write_and_read() {
        let path = std::env::temp_dir().join(format!("gcnsim_metrics_{}.json", std::process::id()));
        let metrics = LiveMetrics {
            status: "running".to_string(),
            cycle: 42,
            caches: vec![CacheSnapshot::new(
                "l2",
                CacheStats { accesses: 4, hits: 3, misses: 1 },
            )],
            ..LiveMetrics::default()
        };
        write_metrics_to(&path, &metrics).unwrap();
        let read = read_metrics_from(&path).unwrap();
        assert_eq!(read, metrics);
        assert_eq!(read.caches[0].hit_rate, 0.75);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_reads_as_none() {
        assert!(read_metrics_from(Path::new("/nonexistent/gcnsim_live.json")).is_none());
    }
}
