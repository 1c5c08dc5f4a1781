//! Processing pipeline
//!
//! Runs one packet at a time to completion:
//! 1. Reject packets without addresses or a transport layer
//! 2. Dispatch by `(transport, port)` to DNS, HTTPS or mail handling
//! 3. Track the TCP session (connect, HTTP reconstruction, teardown)
//!
//! All per-flow tables live here and are owned by the capture thread, so
//! none of them is locked.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::core::event::{Event, HttpsEvent, ProtocolErrorEvent};
use crate::core::{FlowKey, IpProtocol, Packet};
use crate::flow::TableStats;
use crate::geoip::CountryLookup;
use crate::protocols::dns::DnsCorrelator;
use crate::protocols::mail::MailAggregator;

use super::bus::EventSink;
use super::dispatch::{classify, Route};
use super::session::{Segment, SessionTracker};

/// Pipeline counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PipelineStats {
    /// Packets handed to the pipeline
    pub packets: u64,
    /// Packets missing address or transport fields
    pub rejected: u64,
    /// Events emitted
    pub events: u64,
    /// DNS payloads that failed to decode
    pub dns_errors: u64,
    /// Sessions and mail flows dropped for inactivity
    pub expired: u64,
    /// Live TCP sessions
    pub active_sessions: usize,
    pub session_table: TableStats,
    pub mail_table: TableStats,
}

/// Sink wrapper that counts what passes through
struct Counted<'a> {
    inner: &'a mut dyn EventSink,
    count: u64,
}

impl EventSink for Counted<'_> {
    fn emit(&mut self, event: Event) {
        self.count += 1;
        self.inner.emit(event);
    }
}

/// Single-threaded packet-to-event pipeline
pub struct Pipeline {
    geo: Arc<dyn CountryLookup>,
    sessions: SessionTracker,
    dns: DnsCorrelator,
    mail: MailAggregator,
    cleanup_interval: Duration,
    last_cleanup: Instant,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(config: &Config, geo: Arc<dyn CountryLookup>) -> Self {
        Self {
            geo,
            sessions: SessionTracker::new(&config.flow, &config.http),
            dns: DnsCorrelator::new(),
            mail: MailAggregator::new(&config.mail, &config.flow),
            cleanup_interval: config.flow.cleanup_interval(),
            last_cleanup: Instant::now(),
            stats: PipelineStats::default(),
        }
    }

    /// Process one packet, emitting any resulting events
    pub fn process(&mut self, packet: &Packet, sink: &mut dyn EventSink) {
        self.stats.packets += 1;

        let (Some(src), Some(dst), Some(transport)) =
            (packet.src_addr(), packet.dst_addr(), packet.transport.as_ref())
        else {
            self.stats.rejected += 1;
            return;
        };

        let mut sink = Counted { inner: sink, count: 0 };
        let key = FlowKey::new(src, dst);

        match classify(transport.protocol, transport.src_port, transport.dst_port) {
            Route::Dns => match self.dns.on_dns_message(&transport.payload) {
                Ok(Some(event)) => {
                    let country = self.geo.country_for_ip(src.ip());
                    sink.emit(event.with_country(country));
                }
                Ok(None) => {}
                Err(e) => {
                    self.stats.dns_errors += 1;
                    warn!("bad DNS message {}: {}", key, e);
                    sink.emit(Event::ProtocolError(ProtocolErrorEvent {
                        src,
                        dst,
                        protocol: "dns".to_string(),
                        reason: e.to_string(),
                    }));
                }
            },
            Route::Https => {
                sink.emit(Event::HttpsObserved(HttpsEvent {
                    src,
                    dst,
                    country: Some(self.geo.country_for_ip(src.ip())),
                }));
            }
            Route::Mail => match (transport.seq, transport.tcp_flags) {
                (Some(seq), Some(flags)) => self.mail.on_mail_segment(
                    key,
                    transport.dst_port,
                    seq,
                    flags.syn,
                    &transport.payload,
                    self.geo.as_ref(),
                ),
                _ => self.mail.on_mail_packet(key, transport.dst_port, &transport.payload, self.geo.as_ref()),
            },
            Route::Unclassified => {}
        }

        if transport.protocol == IpProtocol::Tcp {
            let segment = Segment {
                seq: transport.seq.unwrap_or(0),
                flags: transport.tcp_flags.unwrap_or_default(),
                payload: &transport.payload,
            };
            self.sessions.on_segment(key, segment, self.geo.as_ref(), &mut self.mail, &mut sink);
        }

        self.stats.events += sink.count;
        self.maybe_cleanup();
    }

    /// Expire idle flows once per cleanup interval
    fn maybe_cleanup(&mut self) {
        if self.last_cleanup.elapsed() < self.cleanup_interval {
            return;
        }
        self.last_cleanup = Instant::now();
        let expired = self.expire_idle();
        if expired > 0 {
            debug!("expired {} idle flows", expired);
        }
    }

    /// Drop idle sessions and mail flows now
    pub fn expire_idle(&mut self) -> usize {
        let expired = self.sessions.expire_idle(&mut self.mail) + self.mail.expire_idle();
        self.stats.expired += expired as u64;
        expired
    }

    /// Discard all in-flight state without emitting anything
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.mail.clear();
        self.dns = DnsCorrelator::new();
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            active_sessions: self.sessions.len(),
            session_table: self.sessions.table_stats(),
            mail_table: self.mail.table_stats(),
            ..self.stats
        }
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn mail(&self) -> &MailAggregator {
        &self.mail
    }

    pub fn dns(&self) -> &DnsCorrelator {
        &self.dns
    }
}
