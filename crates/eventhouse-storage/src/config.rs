//! Block Configuration
//!
//! ## BlockConfig
//!
//! Controls how a block is created:
//!
//! - **capacity**: soft upper bound on data bytes (default: 64MB). Once
//!   the prepared write offset crosses it, `prepare_append` reports the
//!   block as full so the caller can schedule archival. The block itself
//!   never rejects appends past capacity.
//!
//! ## Usage
//!
//! ```ignore
//! use eventhouse_storage::BlockConfig;
//!
//! // Small blocks for faster test cycles
//! let config = BlockConfig {
//!     capacity: 1024 * 1024, // 1MB
//! };
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockConfig {
    /// Soft data capacity in bytes before the block reports itself full
    /// (default: 64MB)
    #[serde(default = "default_capacity")]
    pub capacity: i64,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> i64 {
    64 * 1024 * 1024 // 64MB
}
