pub mod ace;
pub mod cache;
pub mod coalescer;
pub mod command;
pub mod command_processor;
pub mod compute_unit;
pub mod config;
pub mod dma;
pub mod dram;
pub mod error;
pub mod gpu;
pub mod host;
pub mod instruction;
pub mod interconnect;
pub mod kernel;
pub mod memory;
pub mod metrics;
pub mod occupancy;
pub mod scheduler;
pub mod sequencer;
pub mod shader;
pub mod tlb;
pub mod wavefront;
