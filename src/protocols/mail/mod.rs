//! Mail protocols (POP, SMTP, IMAP)
//!
//! Mail flows are not parsed. The client side of each flow is collected
//! as a transcript and reported once when the TCP session ends.

pub mod aggregator;
pub mod types;

pub use aggregator::{MailAggregator, MailSessionState};
pub use types::{is_encrypted_port, is_mail_port, MailProtocol, ENCRYPTED_MAIL_PORTS, MAIL_PORTS};

use serde::{Deserialize, Serialize};

/// Mail aggregation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// Largest transcript kept per flow; larger flows are abandoned
    pub max_buffer_bytes: usize,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 1024 * 1024,
        }
    }
}
