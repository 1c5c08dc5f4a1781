//! Decoded packet representation
//!
//! A packet as handed over by the capture/decode layer. Layers that were
//! absent in the frame are `None`, which lets the dispatcher reject
//! incomplete packets without inspecting raw bytes.

use std::net::{IpAddr, SocketAddr};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpProtocol {
    Icmp,
    Tcp,
    Udp,
    Icmpv6,
    Other(u8),
}

impl From<u8> for IpProtocol {
    fn from(val: u8) -> Self {
        match val {
            1 => IpProtocol::Icmp,
            6 => IpProtocol::Tcp,
            17 => IpProtocol::Udp,
            58 => IpProtocol::Icmpv6,
            other => IpProtocol::Other(other),
        }
    }
}

impl std::fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpProtocol::Icmp => write!(f, "ICMP"),
            IpProtocol::Tcp => write!(f, "TCP"),
            IpProtocol::Udp => write!(f, "UDP"),
            IpProtocol::Icmpv6 => write!(f, "ICMPv6"),
            IpProtocol::Other(n) => write!(f, "Proto({})", n),
        }
    }
}

/// TCP flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
}

impl TcpFlags {
    pub fn from_u8(flags: u8) -> Self {
        Self {
            fin: flags & 0x01 != 0,
            syn: flags & 0x02 != 0,
            rst: flags & 0x04 != 0,
            psh: flags & 0x08 != 0,
            ack: flags & 0x10 != 0,
        }
    }

    /// Client-side opening segment (SYN without ACK)
    pub fn is_syn(&self) -> bool {
        self.syn && !self.ack
    }

    pub fn is_syn_ack(&self) -> bool {
        self.syn && self.ack
    }
}

impl std::fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = String::new();
        if self.syn { s.push('S'); }
        if self.ack { s.push('A'); }
        if self.fin { s.push('F'); }
        if self.rst { s.push('R'); }
        if self.psh { s.push('P'); }
        if s.is_empty() { s.push('.'); }
        write!(f, "{}", s)
    }
}

/// Network layer fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkLayer {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
}

/// Transport layer fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportLayer {
    pub protocol: IpProtocol,
    pub src_port: u16,
    pub dst_port: u16,
    /// TCP only
    pub seq: Option<u32>,
    /// TCP only
    pub tcp_flags: Option<TcpFlags>,
    pub payload: Vec<u8>,
}

/// Decoded packet
#[derive(Debug, Clone)]
pub struct Packet {
    /// Capture timestamp
    pub timestamp: SystemTime,
    /// Original frame length
    pub raw_len: u32,
    pub network: Option<NetworkLayer>,
    pub transport: Option<TransportLayer>,
}

impl Packet {
    /// Build a UDP packet
    pub fn udp(src: SocketAddr, dst: SocketAddr, payload: Vec<u8>) -> Self {
        Self::with_transport(
            src,
            dst,
            TransportLayer {
                protocol: IpProtocol::Udp,
                src_port: src.port(),
                dst_port: dst.port(),
                seq: None,
                tcp_flags: None,
                payload,
            },
        )
    }

    /// Build a TCP segment
    pub fn tcp(src: SocketAddr, dst: SocketAddr, seq: u32, flags: TcpFlags, payload: Vec<u8>) -> Self {
        Self::with_transport(
            src,
            dst,
            TransportLayer {
                protocol: IpProtocol::Tcp,
                src_port: src.port(),
                dst_port: dst.port(),
                seq: Some(seq),
                tcp_flags: Some(flags),
                payload,
            },
        )
    }

    fn with_transport(src: SocketAddr, dst: SocketAddr, transport: TransportLayer) -> Self {
        Self {
            timestamp: SystemTime::now(),
            raw_len: transport.payload.len() as u32,
            network: Some(NetworkLayer {
                src_ip: src.ip(),
                dst_ip: dst.ip(),
            }),
            transport: Some(transport),
        }
    }

    /// Source socket address, if both layers are present
    pub fn src_addr(&self) -> Option<SocketAddr> {
        match (&self.network, &self.transport) {
            (Some(net), Some(tr)) => Some(SocketAddr::new(net.src_ip, tr.src_port)),
            _ => None,
        }
    }

    /// Destination socket address, if both layers are present
    pub fn dst_addr(&self) -> Option<SocketAddr> {
        match (&self.network, &self.transport) {
            (Some(net), Some(tr)) => Some(SocketAddr::new(net.dst_ip, tr.dst_port)),
            _ => None,
        }
    }

    pub fn protocol(&self) -> Option<IpProtocol> {
        self.transport.as_ref().map(|t| t.protocol)
    }

    pub fn payload(&self) -> &[u8] {
        self.transport.as_ref().map(|t| t.payload.as_slice()).unwrap_or(&[])
    }
}
