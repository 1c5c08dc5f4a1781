//! Flow tracking
//!
//! Per-flow state storage shared by every stream-oriented handler, plus the
//! per-direction TCP segment ordering that feeds them.
//!
//! # Example
//!
//! ```ignore
//! use wirelog::flow::{FlowConfig, FlowTable};
//!
//! let mut table: FlowTable<MyState> = FlowTable::new(&FlowConfig::default());
//! table.insert(key, MyState::default());
//! let expired = table.cleanup_expired();
//! ```

pub mod reassembly;
pub mod table;

pub use reassembly::StreamReassembler;
pub use table::FlowTable;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for flow tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Maximum concurrent flows per table
    pub table_size: usize,

    /// Idle time after which a flow is dropped without events (seconds)
    pub idle_timeout: u64,

    /// How often idle flows are swept (seconds)
    pub cleanup_interval: u64,

    /// Out-of-order segments held per direction before the flow is dropped
    pub max_out_of_order: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            table_size: 100_000,
            idle_timeout: 600,     // 10 minutes
            cleanup_interval: 30,  // 30 seconds
            max_out_of_order: 64,
        }
    }
}

impl FlowConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }
}

/// Flow table statistics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TableStats {
    pub inserts: u64,
    pub evictions: u64,
    pub expired: u64,
    pub removed: u64,
}
