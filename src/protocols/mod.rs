//! Application protocol reconstruction
//!
//! - `dns`: UDP wire decoding and request/response correlation
//! - `http`: HTTP/1.x framing and message reassembly over TCP sessions
//! - `mail`: POP/SMTP/IMAP transcript aggregation
//!
//! Each handler owns its per-flow state and returns events to the caller;
//! nothing here touches the event sink directly.

pub mod dns;
pub mod http;
pub mod mail;

pub use dns::{DnsCorrelator, DnsError};
pub use http::{HttpConfig, HttpReassembler, HttpSession};
pub use mail::{MailAggregator, MailConfig, MailProtocol};
