//! Frame decoding
//!
//! Turns a captured frame into a [`Packet`] using etherparse:
//! - `parse_ip()` - Layer 3 (IPv4/IPv6)
//! - `parse_transport()` - Layer 4 (TCP/UDP)
//!
//! Missing layers are left as `None`; no application parsing happens here.

use std::net::IpAddr;
use std::time::SystemTime;

use etherparse::SlicedPacket;

use super::packet::{IpProtocol, NetworkLayer, Packet, TcpFlags, TransportLayer};

/// Link layer framing of captured data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Ethernet,
    /// Raw IPv4/IPv6 without a link header
    RawIp,
}

impl LinkKind {
    /// Map a libpcap DLT value; unknown values fall back to Ethernet
    pub fn from_dlt(dlt: i32) -> Self {
        match dlt {
            // DLT_RAW, LINKTYPE_RAW, LINKTYPE_IPV4, LINKTYPE_IPV6
            12 | 101 | 228 | 229 => LinkKind::RawIp,
            _ => LinkKind::Ethernet,
        }
    }
}

/// Decode a captured frame
///
/// Returns `None` only when the frame cannot be sliced at all; a frame
/// without an IP or transport layer still yields a `Packet` with those
/// layers unset.
pub fn parse_frame(data: &[u8], link: LinkKind, timestamp: SystemTime) -> Option<Packet> {
    let sliced = match link {
        LinkKind::Ethernet => SlicedPacket::from_ethernet(data).ok()?,
        LinkKind::RawIp => SlicedPacket::from_ip(data).ok()?,
    };

    Some(Packet {
        timestamp,
        raw_len: data.len() as u32,
        network: parse_ip(&sliced),
        transport: parse_transport(&sliced),
    })
}

/// Parse the IP layer; `None` for non-IP frames (ARP, etc.)
pub fn parse_ip(sliced: &SlicedPacket<'_>) -> Option<NetworkLayer> {
    match &sliced.net {
        Some(etherparse::NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            Some(NetworkLayer {
                src_ip: IpAddr::from(header.source_addr()),
                dst_ip: IpAddr::from(header.destination_addr()),
            })
        }
        Some(etherparse::NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            Some(NetworkLayer {
                src_ip: IpAddr::from(header.source_addr()),
                dst_ip: IpAddr::from(header.destination_addr()),
            })
        }
        _ => None,
    }
}

/// Parse the transport layer; only TCP and UDP carry anything we route on
pub fn parse_transport(sliced: &SlicedPacket<'_>) -> Option<TransportLayer> {
    match &sliced.transport {
        Some(etherparse::TransportSlice::Tcp(tcp)) => Some(TransportLayer {
            protocol: IpProtocol::Tcp,
            src_port: tcp.source_port(),
            dst_port: tcp.destination_port(),
            seq: Some(tcp.sequence_number()),
            tcp_flags: Some(TcpFlags {
                fin: tcp.fin(),
                syn: tcp.syn(),
                rst: tcp.rst(),
                psh: tcp.psh(),
                ack: tcp.ack(),
            }),
            payload: tcp.payload().to_vec(),
        }),
        Some(etherparse::TransportSlice::Udp(udp)) => Some(TransportLayer {
            protocol: IpProtocol::Udp,
            src_port: udp.source_port(),
            dst_port: udp.destination_port(),
            seq: None,
            tcp_flags: None,
            payload: udp.payload().to_vec(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    #[test]
    fn test_parse_udp_frame() {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([192, 168, 1, 10], [8, 8, 8, 8], 64)
            .udp(40000, 53);
        let payload = [0xAB, 0xCD];
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, &payload).unwrap();

        let pkt = parse_frame(&frame, LinkKind::Ethernet, SystemTime::now()).unwrap();
        assert_eq!(pkt.src_addr().unwrap().to_string(), "192.168.1.10:40000");
        assert_eq!(pkt.dst_addr().unwrap().to_string(), "8.8.8.8:53");
        assert_eq!(pkt.protocol(), Some(IpProtocol::Udp));
        assert_eq!(pkt.payload(), &payload);
    }

    #[test]
    fn test_parse_tcp_raw_ip() {
        let builder = PacketBuilder::ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(51000, 80, 1000, 65535)
            .syn();
        let mut frame = Vec::with_capacity(builder.size(0));
        builder.write(&mut frame, &[]).unwrap();

        let pkt = parse_frame(&frame, LinkKind::RawIp, SystemTime::now()).unwrap();
        let tcp = pkt.transport.as_ref().unwrap();
        assert_eq!(tcp.seq, Some(1000));
        assert!(tcp.tcp_flags.unwrap().is_syn());
    }

    #[test]
    fn test_link_kind_from_dlt() {
        assert_eq!(LinkKind::from_dlt(1), LinkKind::Ethernet);
        assert_eq!(LinkKind::from_dlt(101), LinkKind::RawIp);
    }
}
