//! TCP session tracking
//!
//! A session begins with a client SYN for an unknown flow and ends on RST
//! or once both sides have sent FIN. A client SYN with a new initial
//! sequence number on a live flow ends that session and starts another.
//! Sessions on plain ports carry an HTTP
//! framer fed with each direction's ordered bytes; HTTPS and mail sessions
//! are tracked for lifecycle only.

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::core::event::{Event, SessionEvent};
use crate::core::{Direction, FlowKey, TcpFlags};
use crate::flow::reassembly::ReassemblyError;
use crate::flow::{FlowConfig, FlowTable, StreamReassembler, TableStats};
use crate::geoip::CountryLookup;
use crate::protocols::http::{HttpConfig, HttpReassembler, HttpSession};
use crate::protocols::mail::{is_mail_port, MailAggregator};

use super::bus::EventSink;
use super::dispatch::HTTPS_PORT;

/// One TCP segment as seen by the tracker
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    pub seq: u32,
    pub flags: TcpFlags,
    pub payload: &'a [u8],
}

/// HTTP reconstruction state of a session
#[derive(Debug)]
struct HttpState {
    client: StreamReassembler,
    server: StreamReassembler,
    framer: HttpSession,
    messages: HttpReassembler,
}

impl HttpState {
    /// Order a segment and run whatever became contiguous through the framer
    fn on_segment(
        &mut self,
        direction: Direction,
        segment: &Segment<'_>,
        sink: &mut dyn EventSink,
    ) -> Result<(), ReassemblyError> {
        let stream = match direction {
            Direction::ToServer => &mut self.client,
            Direction::ToClient => &mut self.server,
        };
        let data = stream.insert(segment.seq, segment.flags.syn, segment.payload)?;
        if data.is_empty() {
            return Ok(());
        }
        for notice in self.framer.on_data(direction, &data) {
            if let Some(event) = self.messages.on_notice(notice) {
                sink.emit(event);
            }
        }
        Ok(())
    }

    fn finish(&mut self, sink: &mut dyn EventSink) {
        for notice in self.framer.finish() {
            if let Some(event) = self.messages.on_notice(notice) {
                sink.emit(event);
            }
        }
    }
}

/// Per-session state, stored under the client's flow key
#[derive(Debug)]
pub struct TcpSession {
    /// Server country, resolved once at session start
    pub country: String,
    pub started: DateTime<Utc>,
    /// Client initial sequence number
    client_isn: u32,
    client_fin: bool,
    server_fin: bool,
    http: Option<HttpState>,
}

impl TcpSession {
    pub fn inspects_http(&self) -> bool {
        self.http.is_some()
    }

    fn saw_fin(&mut self, direction: Direction) {
        match direction {
            Direction::ToServer => self.client_fin = true,
            Direction::ToClient => self.server_fin = true,
        }
    }

    fn closed(&self) -> bool {
        self.client_fin && self.server_fin
    }
}

/// Whether a session to this server port is framed as HTTP
fn inspect_http(server_port: u16) -> bool {
    server_port != HTTPS_PORT && !is_mail_port(server_port)
}

/// Outcome of applying one segment to a live session
enum Step {
    Continue,
    End,
    Drop,
}

/// Table of live TCP sessions
pub struct SessionTracker {
    sessions: FlowTable<TcpSession>,
    max_out_of_order: usize,
    http: HttpConfig,
}

impl SessionTracker {
    pub fn new(flow: &FlowConfig, http: &HttpConfig) -> Self {
        Self {
            sessions: FlowTable::new(flow),
            max_out_of_order: flow.max_out_of_order,
            http: http.clone(),
        }
    }

    /// Apply one TCP segment travelling along `key`
    pub fn on_segment(
        &mut self,
        key: FlowKey,
        segment: Segment<'_>,
        geo: &dyn CountryLookup,
        mail: &mut MailAggregator,
        sink: &mut dyn EventSink,
    ) {
        let mut located = self.sessions.locate(&key);
        if let Some((live, Direction::ToServer)) = located {
            let reused = segment.flags.is_syn()
                && self.sessions.get(&live).is_some_and(|s| s.client_isn != segment.seq);
            if reused {
                debug!("new SYN on live session {}, restarting", live);
                self.end(&live, mail, sink);
                located = None;
            }
        }

        let (session_key, direction) = match located {
            Some(found) => found,
            None if segment.flags.is_syn() => {
                self.open(key, segment.seq, geo, mail, sink);
                (key, Direction::ToServer)
            }
            None => {
                trace!("segment outside any session: {}", key);
                return;
            }
        };

        let Some(session) = self.sessions.get_mut(&session_key) else {
            return;
        };

        let step = match session.http.as_mut() {
            Some(http) => match http.on_segment(direction, &segment, sink) {
                Ok(()) => Step::Continue,
                Err(e) => {
                    debug!("dropping session {}: {}", session_key, e);
                    Step::Drop
                }
            },
            None => Step::Continue,
        };

        let step = match step {
            Step::Continue if segment.flags.rst => Step::End,
            Step::Continue => {
                if segment.flags.fin {
                    session.saw_fin(direction);
                }
                if session.closed() { Step::End } else { Step::Continue }
            }
            other => other,
        };

        match step {
            Step::Continue => {}
            Step::End => self.end(&session_key, mail, sink),
            Step::Drop => {
                self.sessions.remove(&session_key);
                mail.discard(&session_key);
            }
        }
    }

    fn open(&mut self, key: FlowKey, isn: u32, geo: &dyn CountryLookup, mail: &mut MailAggregator, sink: &mut dyn EventSink) {
        let country = geo.country_for_ip(key.dst.ip());
        let http = inspect_http(key.dst.port()).then(|| HttpState {
            client: StreamReassembler::new(self.max_out_of_order),
            server: StreamReassembler::new(self.max_out_of_order),
            framer: HttpSession::new(&self.http),
            messages: HttpReassembler::new(key.src, key.dst, country.clone(), &self.http),
        });
        debug!("session start {} ({})", key, country);

        let session = TcpSession {
            country,
            started: Utc::now(),
            client_isn: isn,
            client_fin: false,
            server_fin: false,
            http,
        };
        if let Some((evicted, _)) = self.sessions.insert(key, session) {
            debug!("session table full, dropped {}", evicted);
            mail.discard(&evicted);
        }
        sink.emit(Event::Connect(SessionEvent { src: key.src, dst: key.dst }));
    }

    /// Session end: complete open HTTP, flush mail, report the disconnect
    fn end(&mut self, key: &FlowKey, mail: &mut MailAggregator, sink: &mut dyn EventSink) {
        let Some(mut session) = self.sessions.remove(key) else {
            return;
        };
        debug!("session end {}", key);
        if let Some(http) = session.http.as_mut() {
            http.finish(sink);
        }
        if let Some(event) = mail.flush(key) {
            sink.emit(event);
        }
        sink.emit(Event::Disconnect(SessionEvent { src: key.src, dst: key.dst }));
    }

    /// Drop sessions idle past the flow timeout; nothing is reported for them
    pub fn expire_idle(&mut self, mail: &mut MailAggregator) -> usize {
        let expired = self.sessions.cleanup_expired();
        for (key, _) in &expired {
            trace!("session {} expired", key);
            mail.discard(key);
        }
        expired.len()
    }

    pub fn get(&self, key: &FlowKey) -> Option<&TcpSession> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventKind;
    use crate::geoip::StaticCountries;
    use crate::protocols::mail::MailConfig;
    use std::net::SocketAddr;

    const SYN: TcpFlags = TcpFlags { fin: false, syn: true, rst: false, psh: false, ack: false };
    const SYN_ACK: TcpFlags = TcpFlags { fin: false, syn: true, rst: false, psh: false, ack: true };
    const ACK: TcpFlags = TcpFlags { fin: false, syn: false, rst: false, psh: false, ack: true };
    const FIN: TcpFlags = TcpFlags { fin: true, syn: false, rst: false, psh: false, ack: true };
    const RST: TcpFlags = TcpFlags { fin: false, syn: false, rst: true, psh: false, ack: false };

    struct Harness {
        tracker: SessionTracker,
        mail: MailAggregator,
        geo: StaticCountries,
        events: Vec<Event>,
    }

    impl Harness {
        fn new() -> Self {
            let flow = FlowConfig::default();
            Self {
                tracker: SessionTracker::new(&flow, &HttpConfig::default()),
                mail: MailAggregator::new(&MailConfig::default(), &flow),
                geo: StaticCountries::new().with("93.184.216.34".parse().unwrap(), "United States"),
                events: Vec::new(),
            }
        }

        fn send(&mut self, key: FlowKey, seq: u32, flags: TcpFlags, payload: &[u8]) {
            let segment = Segment { seq, flags, payload };
            self.tracker.on_segment(key, segment, &self.geo, &mut self.mail, &mut self.events);
        }

        fn kinds(&self) -> Vec<EventKind> {
            self.events.iter().map(Event::kind).collect()
        }
    }

    fn client(port: u16) -> FlowKey {
        let src: SocketAddr = "192.168.1.10:51000".parse().unwrap();
        let dst: SocketAddr = format!("93.184.216.34:{}", port).parse().unwrap();
        FlowKey::new(src, dst)
    }

    #[test]
    fn test_session_needs_client_syn() {
        let mut h = Harness::new();
        let k = client(80);
        h.send(k, 100, ACK, b"GET / HTTP/1.1\r\n\r\n");
        h.send(k.reversed(), 500, SYN_ACK, b"");
        assert!(h.events.is_empty());
        assert!(h.tracker.is_empty());
    }

    #[test]
    fn test_http_exchange_and_fin_teardown() {
        let mut h = Harness::new();
        let k = client(80);
        let request = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let response = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi";

        h.send(k, 1000, SYN, b"");
        assert_eq!(h.tracker.get(&k).unwrap().country, "United States");
        h.send(k.reversed(), 5000, SYN_ACK, b"");
        h.send(k, 1001, ACK, request);
        h.send(k.reversed(), 5001, ACK, response);
        h.send(k, 1001 + request.len() as u32, FIN, b"");
        assert_eq!(h.tracker.len(), 1);
        h.send(k.reversed(), 5001 + response.len() as u32, FIN, b"");

        assert_eq!(h.kinds(), vec![
            EventKind::Connect,
            EventKind::HttpRequest,
            EventKind::HttpResponse,
            EventKind::Disconnect,
        ]);
        assert!(h.tracker.is_empty());
    }

    #[test]
    fn test_new_syn_on_reused_tuple_restarts_session() {
        let mut h = Harness::new();
        let k = client(80);
        h.send(k, 0, SYN, b"");
        h.send(k.reversed(), 0, SYN_ACK, b"");
        h.send(k, 1, ACK, b"GET /a HTTP/1.1\r\n\r\n");

        // Retransmitted SYN keeps the session
        h.send(k, 0, SYN, b"");
        assert_eq!(h.kinds(), vec![EventKind::Connect, EventKind::HttpRequest]);

        // Teardown never seen; the port is reused with a fresh ISN
        h.send(k, 100, SYN, b"");
        h.send(k.reversed(), 900, SYN_ACK, b"");
        h.send(k, 101, ACK, b"GET /b HTTP/1.1\r\n\r\n");

        assert_eq!(h.kinds(), vec![
            EventKind::Connect,
            EventKind::HttpRequest,
            EventKind::Disconnect,
            EventKind::Connect,
            EventKind::HttpRequest,
        ]);
        let urls: Vec<&str> = h.events.iter().filter_map(|e| match e {
            Event::HttpRequest(req) => Some(req.url.as_str()),
            _ => None,
        }).collect();
        assert_eq!(urls, vec!["/a", "/b"]);
        assert_eq!(h.tracker.len(), 1);
    }

    #[test]
    fn test_idle_session_expires_silently() {
        let flow = FlowConfig {
            idle_timeout: 0,
            ..FlowConfig::default()
        };
        let mut h = Harness::new();
        h.tracker = SessionTracker::new(&flow, &HttpConfig::default());
        let k = client(80);
        h.send(k, 0, SYN, b"");
        h.send(k, 1, ACK, b"GET /slow HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc");

        assert_eq!(h.tracker.expire_idle(&mut h.mail), 1);
        assert!(h.tracker.is_empty());
        assert_eq!(h.tracker.table_stats().expired, 1);

        h.send(k.reversed(), 0, RST, b"");
        assert_eq!(h.kinds(), vec![EventKind::Connect]);
    }

    #[test]
    fn test_out_of_order_request_is_reordered() {
        let mut h = Harness::new();
        let k = client(8080);
        h.send(k, 0, SYN, b"");
        h.send(k, 17, ACK, b"Host: a\r\n\r\n");
        h.send(k, 1, ACK, b"GET / HTTP/1.1\r\n");
        match &h.events[1] {
            Event::HttpRequest(req) => assert_eq!(req.host.as_deref(), Some("a")),
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_rst_ends_session_and_flushes_mail() {
        let mut h = Harness::new();
        let k = client(25);
        h.send(k, 10, SYN, b"");
        assert!(!h.tracker.get(&k).unwrap().inspects_http());
        h.mail.on_mail_packet(k, 25, b"EHLO host\r\n", &h.geo);
        h.send(k.reversed(), 99, RST, b"");

        assert_eq!(h.kinds(), vec![EventKind::Connect, EventKind::Mail, EventKind::Disconnect]);
        assert!(h.mail.is_empty());
    }

    #[test]
    fn test_out_of_order_overflow_drops_silently() {
        let flow = FlowConfig {
            max_out_of_order: 1,
            ..FlowConfig::default()
        };
        let mut h = Harness::new();
        h.tracker = SessionTracker::new(&flow, &HttpConfig::default());
        let k = client(80);

        h.send(k, 0, SYN, b"");
        h.send(k, 100, ACK, b"later");
        h.send(k, 200, ACK, b"even later");
        assert!(h.tracker.is_empty());

        h.send(k.reversed(), 0, RST, b"");
        assert_eq!(h.kinds(), vec![EventKind::Connect]);
    }

    #[test]
    fn test_close_delimited_response_completes_at_end() {
        let mut h = Harness::new();
        let k = client(80);
        h.send(k, 0, SYN, b"");
        h.send(k.reversed(), 0, SYN_ACK, b"");
        h.send(k, 1, ACK, b"GET / HTTP/1.0\r\n\r\n");
        h.send(k.reversed(), 1, ACK, b"HTTP/1.0 200 OK\r\n\r\nstreamed");
        h.send(k.reversed(), 9, RST, b"");

        let response = h.events.iter().find_map(|e| match e {
            Event::HttpResponse(r) => Some(r),
            _ => None,
        });
        assert_eq!(response.unwrap().body.parse_body.as_deref(), Some("streamed"));
        assert_eq!(h.events.last().map(Event::kind), Some(EventKind::Disconnect));
    }
}
