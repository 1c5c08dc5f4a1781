//! DNS
//!
//! Wire format decoding and request/response correlation for DNS over UDP.

pub mod correlator;
pub mod parser;
pub mod types;

pub use correlator::DnsCorrelator;
pub use parser::{parse_message, DnsError};
pub use types::*;

/// Well-known DNS port; either side of a UDP packet may carry it
pub const DNS_PORT: u16 = 53;
