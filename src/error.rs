/// Error taxonomy shared by every pipeline stage.
///
/// Contention errors (`EngineBusy`, `NoEngineAvailable`, `InsufficientResources`)
/// are recoverable: the caller keeps the command or workgroup queued and retries
/// on a later cycle. Bounds and malformed-input errors abort the affected command
/// or wavefront only.
use crate::command::EngineKind;
use crate::occupancy::OccupancyLimiter;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("access of {size} bytes at address {address} is out of range (capacity {capacity} bytes)")]
    AddressOutOfRange {
        address: i64,
        size: usize,
        capacity: usize,
    },

    #[error("{kind} engine {engine} is busy")]
    EngineBusy { kind: EngineKind, engine: usize },

    #[error("no {kind} engine available")]
    NoEngineAvailable { kind: EngineKind },

    #[error("ACE {ace} holds no kernel to break into workgroups")]
    NoKernelToBreak { ace: usize },

    #[error("insufficient resources for {wavefronts} wavefronts (limited by {limiter})")]
    InsufficientResources {
        wavefronts: usize,
        limiter: OccupancyLimiter,
    },

    #[error("unknown command type {tag:?}")]
    UnknownCommandType { tag: String },

    #[error("command is missing parameter {name:?}")]
    MissingParameter { name: &'static str },

    #[error("vector register v{register} outside of the {allocated} allocated registers")]
    RegisterOutOfRange { register: u8, allocated: usize },
}

impl SimError {
    /// Builds an `AddressOutOfRange` for an unsigned device or host address.
    pub fn out_of_range(address: u64, size: usize, capacity: usize) -> Self {
        SimError::AddressOutOfRange {
            address: i64::try_from(address).unwrap_or(i64::MAX),
            size,
            capacity,
        }
    }

    /// Whether the caller should keep the work queued and retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SimError::EngineBusy { .. }
                | SimError::NoEngineAvailable { .. }
                | SimError::InsufficientResources { .. }
        )
    }
}

/// Errors raised while loading configuration or workload files.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}
