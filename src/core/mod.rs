//! Core shared types for packet processing
//!
//! Provides the data structures every component works with:
//! - `Packet`: decoded packet with optional network/transport layers
//! - `FlowKey`: directional flow identity
//! - `Event`: closed set of emitted events
//! - `parser`: etherparse-based frame decoding

pub mod event;
pub mod flow;
pub mod packet;
pub mod parser;

pub use event::{Event, EventKind, HeaderValue, Headers};
pub use flow::{Direction, FlowKey};
pub use packet::{IpProtocol, NetworkLayer, Packet, TcpFlags, TransportLayer};
pub use parser::{parse_frame, LinkKind};
