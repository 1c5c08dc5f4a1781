//! DNS request/response correlation
//!
//! Maps the 16-bit wire transaction id to a locally generated correlation
//! id. An entry lives from the question until the first response carrying
//! the same wire id. Wire ids collide over long captures; the latest
//! question wins.

use std::collections::{BTreeMap, HashMap};

use tracing::trace;
use uuid::Uuid;

use crate::core::event::{DnsRequestEvent, DnsResponseEvent, Event};
use super::parser::{parse_message, DnsError};
use super::types::DnsMessage;

/// Pending DNS transactions
#[derive(Debug, Default)]
pub struct DnsCorrelator {
    pending: HashMap<u16, Uuid>,
}

impl DnsCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one UDP payload and produce its event, if any.
    ///
    /// Messages with answers are responses; otherwise messages with
    /// questions are requests. Messages with neither produce nothing.
    pub fn on_dns_message(&mut self, payload: &[u8]) -> Result<Option<Event>, DnsError> {
        let msg = parse_message(payload)?;
        Ok(self.on_parsed(msg))
    }

    /// Correlate an already decoded message
    pub fn on_parsed(&mut self, msg: DnsMessage) -> Option<Event> {
        if !msg.answers.is_empty() {
            return Some(self.on_response(msg));
        }

        let question = msg.queries.into_iter().next()?;
        let id = Uuid::new_v4();
        if let Some(stale) = self.pending.insert(msg.id, id) {
            trace!("dns wire id {:#06x} reused, dropping pending {}", msg.id, stale);
        }

        Some(Event::DnsRequest(DnsRequestEvent {
            id,
            domain: question.name,
            country: None,
        }))
    }

    fn on_response(&mut self, msg: DnsMessage) -> Event {
        let mut domains: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for answer in msg.answers {
            if let Some(rdata) = answer.rdata {
                domains.entry(answer.name).or_default().push(rdata.to_string());
            }
        }

        let id = self.pending.remove(&msg.id);
        if id.is_none() {
            trace!("dns response {:#06x} has no pending request", msg.id);
        }

        Event::DnsResponse(DnsResponseEvent {
            id,
            domains,
            country: None,
        })
    }

    /// Number of questions still waiting for an answer
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
