//! Mail session aggregation
//!
//! Collects the client-to-server plaintext of each mail flow and emits one
//! `Mail` event when the session ends. Encrypted ports are tracked for
//! metadata only; their payload is never copied or inspected.
//!
//! TCP segments fed through [`MailAggregator::on_mail_segment`] are put in
//! sequence order first, so retransmissions appear once in the transcript.

use tracing::{debug, trace};

use crate::core::event::{Event, MailEvent};
use crate::core::FlowKey;
use crate::flow::{FlowConfig, FlowTable, StreamReassembler, TableStats};
use crate::geoip::CountryLookup;
use super::types::{is_encrypted_port, MailProtocol};
use super::MailConfig;

/// Per-flow mail state
#[derive(Debug)]
pub struct MailSessionState {
    pub protocol: MailProtocol,
    pub port: u16,
    pub is_encrypted: bool,
    /// Mail server country
    pub country: String,
    /// Plaintext transcript; `None` until the first payload byte and
    /// always `None` when encrypted
    buffer: Option<Vec<u8>>,
    /// Client stream ordering, created with the first sequenced segment
    stream: Option<StreamReassembler>,
    /// Transcript exceeded the size cap; the flow reports nothing
    abandoned: bool,
}

impl MailSessionState {
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.as_ref().map_or(0, Vec::len)
    }

    fn append(&mut self, key: &FlowKey, payload: &[u8], max: usize) {
        if self.abandoned || self.is_encrypted || payload.is_empty() {
            return;
        }
        if self.buffered_bytes() + payload.len() > max {
            debug!("mail transcript for {} exceeds {} bytes, abandoning", key, max);
            self.abandon();
            return;
        }
        self.buffer.get_or_insert_with(Vec::new).extend_from_slice(payload);
    }

    fn abandon(&mut self) {
        self.buffer = None;
        self.stream = None;
        self.abandoned = true;
    }
}

/// Aggregates mail flows until session end
pub struct MailAggregator {
    sessions: FlowTable<MailSessionState>,
    max_buffer_bytes: usize,
    max_out_of_order: usize,
}

impl MailAggregator {
    pub fn new(config: &MailConfig, flow: &FlowConfig) -> Self {
        Self {
            sessions: FlowTable::new(flow),
            max_buffer_bytes: config.max_buffer_bytes,
            max_out_of_order: flow.max_out_of_order,
        }
    }

    /// Record one client-to-server packet on a mail port, in arrival order
    pub fn on_mail_packet(&mut self, key: FlowKey, dst_port: u16, payload: &[u8], geo: &dyn CountryLookup) {
        let max = self.max_buffer_bytes;
        if let Some(state) = self.state_for(key, dst_port, geo) {
            state.append(&key, payload, max);
        }
    }

    /// Record one client-to-server TCP segment on a mail port.
    ///
    /// Payload is appended once it is contiguous with what came before;
    /// overflowing the out-of-order buffer abandons the transcript.
    pub fn on_mail_segment(
        &mut self,
        key: FlowKey,
        dst_port: u16,
        seq: u32,
        syn: bool,
        payload: &[u8],
        geo: &dyn CountryLookup,
    ) {
        let max = self.max_buffer_bytes;
        let capacity = self.max_out_of_order;
        let Some(state) = self.state_for(key, dst_port, geo) else {
            return;
        };
        if state.abandoned || state.is_encrypted {
            return;
        }

        let stream = state.stream.get_or_insert_with(|| StreamReassembler::new(capacity));
        match stream.insert(seq, syn, payload) {
            Ok(data) => state.append(&key, &data, max),
            Err(e) => {
                debug!("mail transcript for {} abandoned: {}", key, e);
                state.abandon();
            }
        }
    }

    /// Existing state for the flow, or a new one for mail ports
    fn state_for(&mut self, key: FlowKey, dst_port: u16, geo: &dyn CountryLookup) -> Option<&mut MailSessionState> {
        let protocol = MailProtocol::from_port(dst_port)?;

        if self.sessions.get(&key).is_none() {
            let is_encrypted = is_encrypted_port(dst_port);
            trace!("new {} session {} (encrypted: {})", protocol, key, is_encrypted);
            let state = MailSessionState {
                protocol,
                port: dst_port,
                is_encrypted,
                country: geo.country_for_ip(key.dst.ip()),
                buffer: None,
                stream: None,
                abandoned: false,
            };
            if let Some((evicted, _)) = self.sessions.insert(key, state) {
                debug!("mail table full, dropped {}", evicted);
            }
        }
        self.sessions.get_mut(&key)
    }

    /// Emit the flow's `Mail` event and forget it; no-op for unknown flows
    pub fn flush(&mut self, key: &FlowKey) -> Option<Event> {
        let state = self.sessions.remove(key)?;
        if state.abandoned {
            return None;
        }

        let data = state.buffer.map(|buf| String::from_utf8_lossy(&buf).into_owned());
        let login_observed = data.as_deref().is_some_and(contains_login);

        Some(Event::Mail(MailEvent {
            src: key.src,
            dst: key.dst,
            port: state.port,
            protocol: state.protocol,
            is_encrypted: state.is_encrypted,
            country: state.country,
            data,
            login_observed,
        }))
    }

    /// Forget a flow without reporting it
    pub fn discard(&mut self, key: &FlowKey) -> bool {
        self.sessions.remove(key).is_some()
    }

    /// Drop flows that went idle without a session end
    pub fn expire_idle(&mut self) -> usize {
        self.sessions.cleanup_expired().len()
    }

    pub fn get(&self, key: &FlowKey) -> Option<&MailSessionState> {
        self.sessions.get(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    pub fn table_stats(&self) -> TableStats {
        self.sessions.stats
    }
}

/// `LOGIN ` or `login ` anywhere in the transcript
fn contains_login(text: &str) -> bool {
    text.contains("LOGIN ") || text.contains("login ")
}
