//! DNS message types

use std::net::{Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

/// Resource record type, named for the types commonly seen on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnsRecordType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    SRV,
    ANY,
    Other(u16),
}

impl DnsRecordType {
    const NAMED: [(u16, DnsRecordType); 10] = [
        (1, DnsRecordType::A),
        (2, DnsRecordType::NS),
        (5, DnsRecordType::CNAME),
        (6, DnsRecordType::SOA),
        (12, DnsRecordType::PTR),
        (15, DnsRecordType::MX),
        (16, DnsRecordType::TXT),
        (28, DnsRecordType::AAAA),
        (33, DnsRecordType::SRV),
        (255, DnsRecordType::ANY),
    ];

    /// Numeric TYPE value
    pub fn code(self) -> u16 {
        match self {
            DnsRecordType::Other(code) => code,
            named => Self::NAMED
                .iter()
                .find(|(_, t)| *t == named)
                .map_or(0, |(code, _)| *code),
        }
    }
}

impl From<u16> for DnsRecordType {
    fn from(code: u16) -> Self {
        Self::NAMED
            .iter()
            .find(|(c, _)| *c == code)
            .map_or(DnsRecordType::Other(code), |(_, t)| *t)
    }
}

impl std::fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DnsRecordType::Other(code) => write!(f, "TYPE{}", code),
            named => write!(f, "{:?}", named),
        }
    }
}

/// Decoded record data for the types we report on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnsRdata {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    CNAME(String),
    NS(String),
    PTR(String),
    MX { preference: u16, exchange: String },
    TXT(String),
}

impl std::fmt::Display for DnsRdata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DnsRdata::A(ip) => write!(f, "{}", ip),
            DnsRdata::AAAA(ip) => write!(f, "{}", ip),
            DnsRdata::CNAME(name) | DnsRdata::NS(name) | DnsRdata::PTR(name) => f.write_str(name),
            DnsRdata::MX { preference, exchange } => write!(f, "{} {}", preference, exchange),
            DnsRdata::TXT(text) => f.write_str(text),
        }
    }
}

/// Question section entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsQuery {
    pub name: String,
    pub qtype: DnsRecordType,
    pub qclass: u16,
}

/// Resource record from any of the record sections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsAnswer {
    pub name: String,
    pub rtype: DnsRecordType,
    pub rclass: u16,
    pub ttl: u32,
    /// `None` for record types we don't decode or rdata that didn't parse
    pub rdata: Option<DnsRdata>,
}

/// Decoded message; all four record sections are kept
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsMessage {
    /// 16-bit wire id, reused by clients over time
    pub id: u16,
    pub is_response: bool,
    pub opcode: u8,
    pub rcode: u8,
    pub queries: Vec<DnsQuery>,
    pub answers: Vec<DnsAnswer>,
    pub authorities: Vec<DnsAnswer>,
    pub additionals: Vec<DnsAnswer>,
}
