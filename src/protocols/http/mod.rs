//! HTTP/1.x
//!
//! Two stages per TCP session:
//! - `session`: frames each direction's byte stream into message
//!   notifications
//! - `reassembler`: turns notifications into correlated request/response
//!   events with decoded bodies

pub mod body;
pub mod reassembler;
pub mod session;
pub mod types;

pub use reassembler::{HttpMessageBuffer, HttpReassembler};
pub use session::HttpSession;
pub use types::{HttpNotice, RawHeaders};

use serde::{Deserialize, Serialize};

/// HTTP reconstruction limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Largest body kept per message; larger messages are not reported
    pub max_body_bytes: usize,

    /// Requests awaiting a response per connection
    pub max_pending_exchanges: usize,

    /// Largest start line plus header block
    pub max_head_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024,
            max_pending_exchanges: 64,
            max_head_bytes: 64 * 1024,
        }
    }
}
