//! Packet classification by transport and port

use crate::core::IpProtocol;
use crate::protocols::dns::DNS_PORT;
use crate::protocols::mail::is_mail_port;

/// Port of TLS-wrapped HTTP; observed for metadata only
pub const HTTPS_PORT: u16 = 443;

/// Where a packet goes after session tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Dns,
    Https,
    Mail,
    Unclassified,
}

/// Classify a packet by `(transport, port)`.
///
/// DNS matches either port; HTTPS and mail only match the destination,
/// so server replies on those flows are unclassified.
pub fn classify(protocol: IpProtocol, src_port: u16, dst_port: u16) -> Route {
    match protocol {
        IpProtocol::Udp if src_port == DNS_PORT || dst_port == DNS_PORT => Route::Dns,
        IpProtocol::Tcp if dst_port == HTTPS_PORT => Route::Https,
        IpProtocol::Tcp if is_mail_port(dst_port) => Route::Mail,
        _ => Route::Unclassified,
    }
}
