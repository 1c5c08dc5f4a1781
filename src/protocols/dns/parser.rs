//! DNS wire format decoder
//!
//! Decodes the header, question section and all three record sections.
//! Name compression is followed up to [`MAX_POINTER_HOPS`] jumps. A message
//! cut short in its authority or additional section keeps the records
//! decoded before the cut.

use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use tracing::debug;

use super::types::*;

/// Maximum compression pointer jumps while reading one name
pub const MAX_POINTER_HOPS: usize = 16;

const HEADER_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DnsError {
    #[error("message shorter than the 12-byte header ({0} bytes)")]
    TruncatedHeader(usize),

    #[error("name runs past end of message at offset {0}")]
    TruncatedName(usize),

    #[error("record runs past end of message at offset {0}")]
    TruncatedRecord(usize),

    #[error("compression pointer loop at offset {0}")]
    PointerLoop(usize),
}

/// Parse a DNS message from a UDP payload
pub fn parse_message(payload: &[u8]) -> Result<DnsMessage, DnsError> {
    if payload.len() < HEADER_LEN {
        return Err(DnsError::TruncatedHeader(payload.len()));
    }

    let id = read_u16(payload, 0);
    let flags = read_u16(payload, 2);
    let qdcount = read_u16(payload, 4) as usize;
    let ancount = read_u16(payload, 6) as usize;
    let nscount = read_u16(payload, 8) as usize;
    let arcount = read_u16(payload, 10) as usize;

    let mut msg = DnsMessage {
        id,
        is_response: (flags & 0x8000) != 0,
        opcode: ((flags >> 11) & 0x0F) as u8,
        rcode: (flags & 0x000F) as u8,
        ..Default::default()
    };

    let mut offset = HEADER_LEN;

    for _ in 0..qdcount {
        let (query, next) = parse_question(payload, offset)?;
        msg.queries.push(query);
        offset = next;
    }

    for _ in 0..ancount {
        let (record, next) = parse_resource_record(payload, offset)?;
        msg.answers.push(record);
        offset = next;
    }

    'sections: for (count, section) in [(nscount, &mut msg.authorities), (arcount, &mut msg.additionals)] {
        for _ in 0..count {
            match parse_resource_record(payload, offset) {
                Ok((record, next)) => {
                    section.push(record);
                    offset = next;
                }
                Err(e) => {
                    debug!("DNS message {:#06x} cut short after answers: {}", id, e);
                    break 'sections;
                }
            }
        }
    }

    Ok(msg)
}

fn parse_question(payload: &[u8], offset: usize) -> Result<(DnsQuery, usize), DnsError> {
    let (name, offset) = parse_name(payload, offset)?;

    if offset + 4 > payload.len() {
        return Err(DnsError::TruncatedRecord(offset));
    }

    Ok((
        DnsQuery {
            name,
            qtype: DnsRecordType::from(read_u16(payload, offset)),
            qclass: read_u16(payload, offset + 2),
        },
        offset + 4,
    ))
}

fn parse_resource_record(payload: &[u8], offset: usize) -> Result<(DnsAnswer, usize), DnsError> {
    let (name, offset) = parse_name(payload, offset)?;

    if offset + 10 > payload.len() {
        return Err(DnsError::TruncatedRecord(offset));
    }

    let rtype = DnsRecordType::from(read_u16(payload, offset));
    let rclass = read_u16(payload, offset + 2);
    let ttl = u32::from_be_bytes([
        payload[offset + 4],
        payload[offset + 5],
        payload[offset + 6],
        payload[offset + 7],
    ]);
    let rdlength = read_u16(payload, offset + 8) as usize;

    let rdata_offset = offset + 10;
    if rdata_offset + rdlength > payload.len() {
        return Err(DnsError::TruncatedRecord(rdata_offset));
    }

    Ok((
        DnsAnswer {
            name,
            rtype,
            rclass,
            ttl,
            rdata: parse_rdata(payload, rdata_offset, rdlength, rtype),
        },
        rdata_offset + rdlength,
    ))
}

/// Read a possibly compressed name; returns the name and the offset just
/// past it in the original position
fn parse_name(payload: &[u8], mut offset: usize) -> Result<(String, usize), DnsError> {
    let mut name = String::new();
    let mut return_offset = None;
    let mut hops = 0;

    loop {
        let len = *payload.get(offset).ok_or(DnsError::TruncatedName(offset))? as usize;

        if len == 0 {
            return Ok((name, return_offset.unwrap_or(offset + 1)));
        }

        // Compression pointer
        if len & 0xC0 == 0xC0 {
            let low = *payload.get(offset + 1).ok_or(DnsError::TruncatedName(offset))? as usize;
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return Err(DnsError::PointerLoop(offset));
            }
            return_offset.get_or_insert(offset + 2);
            offset = ((len & 0x3F) << 8) | low;
            continue;
        }

        offset += 1;
        if offset + len > payload.len() {
            return Err(DnsError::TruncatedName(offset));
        }

        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&String::from_utf8_lossy(&payload[offset..offset + len]));
        offset += len;
    }
}

/// Decode RDATA for the supported types; anything else is `None`
fn parse_rdata(payload: &[u8], offset: usize, length: usize, rtype: DnsRecordType) -> Option<DnsRdata> {
    let rdata = &payload[offset..offset + length];

    match rtype {
        DnsRecordType::A if length == 4 => {
            Some(DnsRdata::A(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3])))
        }
        DnsRecordType::AAAA if length == 16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(rdata);
            Some(DnsRdata::AAAA(Ipv6Addr::from(octets)))
        }
        DnsRecordType::CNAME | DnsRecordType::NS | DnsRecordType::PTR if length > 0 => {
            let (name, _) = parse_name(payload, offset).ok()?;
            match rtype {
                DnsRecordType::CNAME => Some(DnsRdata::CNAME(name)),
                DnsRecordType::NS => Some(DnsRdata::NS(name)),
                _ => Some(DnsRdata::PTR(name)),
            }
        }
        DnsRecordType::MX if length >= 3 => {
            let preference = u16::from_be_bytes([rdata[0], rdata[1]]);
            let (exchange, _) = parse_name(payload, offset + 2).ok()?;
            Some(DnsRdata::MX { preference, exchange })
        }
        DnsRecordType::TXT if length > 0 => {
            let mut txt = String::new();
            let mut pos = 0;
            while pos < length {
                let str_len = rdata[pos] as usize;
                pos += 1;
                if pos + str_len > length {
                    break;
                }
                txt.push_str(&String::from_utf8_lossy(&rdata[pos..pos + str_len]));
                pos += str_len;
            }
            Some(DnsRdata::TXT(txt))
        }
        _ => None,
    }
}

#[inline]
fn read_u16(payload: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([payload[offset], payload[offset + 1]])
}
