//! Flow identity
//!
//! A `FlowKey` names one direction of a conversation. Sessions are stored
//! under the key of the initiating direction; the reverse key finds the same
//! session from the responder's packets.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use super::packet::Packet;

/// Directional flow identity `(src_addr:src_port, dst_addr:dst_port)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub src: SocketAddr,
    pub dst: SocketAddr,
}

impl FlowKey {
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        Self { src, dst }
    }

    /// Key for the packet's own direction
    pub fn from_packet(pkt: &Packet) -> Option<Self> {
        Some(Self::new(pkt.src_addr()?, pkt.dst_addr()?))
    }

    /// Key for the opposite direction
    pub fn reversed(&self) -> Self {
        Self::new(self.dst, self.src)
    }

    /// Same conversation regardless of direction
    pub fn same_session(&self, other: &FlowKey) -> bool {
        self == other || *self == other.reversed()
    }
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// Packet direction relative to the session initiator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// From client to server (request side)
    ToServer,
    /// From server to client (response side)
    ToClient,
}
