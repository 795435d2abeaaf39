/// Device configuration.
///
/// Every field has a default, so a JSON file only needs the fields it changes.
use crate::cache::CacheConfig;
use crate::compute_unit::CuParams;
use crate::error::ConfigError;
use crate::interconnect::PcieConfig;
use crate::occupancy::{CuConfig, WavefrontCost};
use crate::scheduler::FetchPolicyKind;
use crate::shader::ShaderTopology;
use crate::tlb::TlbConfig;
use crate::wavefront::WAVEFRONT_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    pub dma_engines: usize,
    pub aces: usize,
    pub shader_engines: usize,
    pub arrays_per_engine: usize,
    pub cus_per_array: usize,
    pub compute_unit: CuConfig,
    pub wavefronts_per_workgroup: u32,
    /// Ceiling on workgroups an ACE keeps queued for one kernel
    pub max_active_workgroups: u32,
    /// Instructions fetched per sequencer fetch
    pub fetch_width: usize,
    /// SIMD lanes; a vector instruction takes 64 / simd_width cycles
    pub simd_width: usize,
    /// Coalescing transaction size in bytes
    pub transaction_size: usize,
    pub l1_instruction: CacheConfig,
    pub l1_scalar: CacheConfig,
    pub l1_vector: CacheConfig,
    pub l2: CacheConfig,
    pub tlb: TlbConfig,
    pub dram_bytes: usize,
    pub host_bytes: usize,
    pub pcie: PcieConfig,
    /// Per-wavefront cost for kernels that do not declare one
    pub default_cost: WavefrontCost,
    pub fetch_policy: FetchPolicyKind,
}

impl Default for GpuConfig {
    fn default() -> Self {
        GpuConfig {
            dma_engines: 2,
            aces: 4,
            shader_engines: 1,
            arrays_per_engine: 2,
            cus_per_array: 2,
            compute_unit: CuConfig::gcn3(),
            wavefronts_per_workgroup: 4,
            max_active_workgroups: 16,
            fetch_width: 4,
            simd_width: 16,
            transaction_size: 64,
            l1_instruction: CacheConfig::l1_instruction(),
            l1_scalar: CacheConfig::l1_scalar(),
            l1_vector: CacheConfig::l1_vector(),
            l2: CacheConfig::l2(),
            tlb: TlbConfig::default(),
            dram_bytes: 16 * 1024 * 1024,
            host_bytes: 16 * 1024 * 1024,
            pcie: PcieConfig::gen3_x16(),
            default_cost: WavefrontCost::default(),
            fetch_policy: FetchPolicyKind::OldestFirst,
        }
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { reason: reason.into() }
}

fn check_cache(name: &str, cache: &CacheConfig) -> Result<(), ConfigError> {
    if cache.sets == 0 || cache.ways == 0 {
        return Err(invalid(format!("{} needs at least one set and one way", name)));
    }
    if !cache.line_size.is_power_of_two() {
        return Err(invalid(format!("{} line size {} is not a power of two", name, cache.line_size)));
    }
    Ok(())
}

impl GpuConfig {
    /// Load and validate a configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: GpuConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dma_engines == 0 || self.aces == 0 {
            return Err(invalid("at least one DMA engine and one ACE are required"));
        }
        if self.shader_engines == 0 || self.arrays_per_engine == 0 || self.cus_per_array == 0 {
            return Err(invalid("shader hierarchy must contain at least one compute unit"));
        }
        let cu = &self.compute_unit;
        if cu.num_pools == 0 || cu.max_wavefronts % cu.num_pools != 0 {
            return Err(invalid(format!(
                "{} wavefront slots do not divide into {} pools",
                cu.max_wavefronts, cu.num_pools
            )));
        }
        if self.wavefronts_per_workgroup == 0 || self.wavefronts_per_workgroup > cu.max_wavefronts {
            return Err(invalid(format!(
                "{} wavefronts per workgroup cannot fit on a compute unit with {} slots",
                self.wavefronts_per_workgroup, cu.max_wavefronts
            )));
        }
        if self.max_active_workgroups == 0 {
            return Err(invalid("max_active_workgroups must be positive"));
        }
        if self.fetch_width == 0 || self.simd_width == 0 || self.simd_width > WAVEFRONT_SIZE {
            return Err(invalid(format!(
                "fetch width {} / SIMD width {} out of range",
                self.fetch_width, self.simd_width
            )));
        }
        if self.transaction_size == 0 {
            return Err(invalid("transaction size must be positive"));
        }
        check_cache("l1_instruction", &self.l1_instruction)?;
        check_cache("l1_scalar", &self.l1_scalar)?;
        check_cache("l1_vector", &self.l1_vector)?;
        check_cache("l2", &self.l2)?;
        if self.tlb.entries == 0 || !self.tlb.page_size.is_power_of_two() {
            return Err(invalid("TLB needs entries and a power-of-two page size"));
        }
        Ok(())
    }

    pub fn topology(&self) -> ShaderTopology {
        ShaderTopology {
            shader_engines: self.shader_engines,
            arrays_per_engine: self.arrays_per_engine,
            cus_per_array: self.cus_per_array,
        }
    }

    pub fn cu_params(&self) -> CuParams {
        CuParams {
            resources: self.compute_unit.clone(),
            fetch_width: self.fetch_width,
            simd_width: self.simd_width,
            transaction_size: self.transaction_size,
            l1_instruction: self.l1_instruction.clone(),
            l1_scalar: self.l1_scalar.clone(),
            l1_vector: self.l1_vector.clone(),
        }
    }

    pub fn num_compute_units(&self) -> usize {
        self.shader_engines * self.arrays_per_engine * self.cus_per_array
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GpuConfig::default();
        config.validate().unwrap();
        assert_eq!(config.num_compute_units(), 4);
        assert_eq!(config.compute_unit.slots_per_pool(), 10);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: GpuConfig = serde_json::from_str(
            r#"{"aces": 1, "compute_unit": {"max_wavefronts": 8, "num_pools": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.aces, 1);
        assert_eq!(config.dma_engines, 2);
        assert_eq!(config.compute_unit.max_wavefronts, 8);
        assert_eq!(config.compute_unit.max_sgprs, 800);
        config.validate().unwrap();
    }

    #[test]
    fn uneven_pools_are_rejected() {
        let mut config = GpuConfig::default();
        config.compute_unit.num_pools = 3;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn non_power_of_two_line_is_rejected() {
        let mut config = GpuConfig::default();
        config.l2.line_size = 48;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("l2"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = GpuConfig::from_json_file("/nonexistent/gcnsim.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
