//! End-to-end pipeline scenarios over hand-built packets

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;

use wirelog::core::event::HttpResponseEvent;
use wirelog::core::{Event, EventKind, Packet, TcpFlags};
use wirelog::protocols::mail::MailProtocol;
use wirelog::{Config, Pipeline, StaticCountries};

const CLIENT: &str = "192.168.1.50";
const SERVER: &str = "93.184.216.34";

fn flags(syn: bool, ack: bool, fin: bool, rst: bool) -> TcpFlags {
    TcpFlags { syn, ack, fin, rst, psh: false }
}

fn pipeline() -> Pipeline {
    let geo = StaticCountries::new()
        .with(CLIENT.parse().unwrap(), "Germany")
        .with(SERVER.parse().unwrap(), "United States");
    Pipeline::new(&Config::default(), Arc::new(geo))
}

fn run(pipeline: &mut Pipeline, packets: &[Packet]) -> Vec<Event> {
    let mut events = Vec::new();
    for packet in packets {
        pipeline.process(packet, &mut events);
    }
    events
}

fn kinds(events: &[Event]) -> Vec<EventKind> {
    events.iter().map(Event::kind).collect()
}

/// Builds the segments of one TCP connection with consistent sequence numbers
struct Conversation {
    client: SocketAddr,
    server: SocketAddr,
    client_seq: u32,
    server_seq: u32,
    packets: Vec<Packet>,
}

impl Conversation {
    fn new(client_port: u16, server_port: u16) -> Self {
        Self {
            client: format!("{}:{}", CLIENT, client_port).parse().unwrap(),
            server: format!("{}:{}", SERVER, server_port).parse().unwrap(),
            client_seq: 1_000,
            server_seq: 4_000_000_000,
            packets: Vec::new(),
        }
    }

    fn starting_at(mut self, client_isn: u32) -> Self {
        self.client_seq = client_isn;
        self
    }

    fn open(mut self) -> Self {
        self.packets.push(Packet::tcp(self.client, self.server, self.client_seq, flags(true, false, false, false), Vec::new()));
        self.packets.push(Packet::tcp(self.server, self.client, self.server_seq, flags(true, true, false, false), Vec::new()));
        self.client_seq += 1;
        self.server_seq = self.server_seq.wrapping_add(1);
        self
    }

    fn client_sends(mut self, data: &[u8]) -> Self {
        self.packets.push(Packet::tcp(self.client, self.server, self.client_seq, flags(false, true, false, false), data.to_vec()));
        self.client_seq += data.len() as u32;
        self
    }

    fn server_sends(mut self, data: &[u8]) -> Self {
        self.packets.push(Packet::tcp(self.server, self.client, self.server_seq, flags(false, true, false, false), data.to_vec()));
        self.server_seq = self.server_seq.wrapping_add(data.len() as u32);
        self
    }

    fn into_packets(self) -> Vec<Packet> {
        self.packets
    }

    fn close(mut self) -> Vec<Packet> {
        self.packets.push(Packet::tcp(self.client, self.server, self.client_seq, flags(false, true, true, false), Vec::new()));
        self.packets.push(Packet::tcp(self.server, self.client, self.server_seq, flags(false, true, true, false), Vec::new()));
        self.packets
    }
}

fn dns_name(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for label in name.split('.') {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

fn dns_query(id: u16, name: &str) -> Vec<u8> {
    let mut msg = id.to_be_bytes().to_vec();
    msg.extend_from_slice(&[0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    msg.extend(dns_name(name));
    msg.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
    msg
}

fn dns_a_response(id: u16, name: &str, addr: [u8; 4]) -> Vec<u8> {
    let mut msg = id.to_be_bytes().to_vec();
    msg.extend_from_slice(&[0x81, 0x80, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]);
    msg.extend(dns_name(name));
    msg.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
    // Answer name points back at the question
    msg.extend_from_slice(&[0xc0, 0x0c, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x0e, 0x10, 0x00, 0x04]);
    msg.extend_from_slice(&addr);
    msg
}

fn dns_packets(id: u16) -> (Packet, Packet) {
    let client: SocketAddr = format!("{}:53124", CLIENT).parse().unwrap();
    let resolver: SocketAddr = "8.8.8.8:53".parse().unwrap();
    (
        Packet::udp(client, resolver, dns_query(id, "example.com")),
        Packet::udp(resolver, client, dns_a_response(id, "example.com", [93, 184, 216, 34])),
    )
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn responses(events: &[Event]) -> Vec<&HttpResponseEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::HttpResponse(r) => Some(r),
            _ => None,
        })
        .collect()
}

#[test]
fn dns_request_and_response_are_correlated() {
    let mut p = pipeline();
    let (query, answer) = dns_packets(0xabcd);
    let events = run(&mut p, &[query, answer]);

    let (request, response) = match events.as_slice() {
        [Event::DnsRequest(q), Event::DnsResponse(r)] => (q, r),
        other => panic!("unexpected events {:?}", other),
    };
    assert_eq!(request.domain, "example.com");
    assert_eq!(request.country.as_deref(), Some("Germany"));
    assert_eq!(response.id, Some(request.id));
    assert_eq!(response.domains.len(), 1);
    assert_eq!(response.domains["example.com"], vec!["93.184.216.34".to_string()]);
    assert_eq!(response.country.as_deref(), Some("Unrecognized"));
}

#[test]
fn dns_response_without_pending_request_has_no_id() {
    let mut p = pipeline();
    let (_, answer) = dns_packets(0x0101);
    let (_, repeat) = dns_packets(0x0101);
    let events = run(&mut p, &[answer]);
    match events.as_slice() {
        [Event::DnsResponse(r)] => assert_eq!(r.id, None),
        other => panic!("unexpected events {:?}", other),
    }

    let (query, _) = dns_packets(0x0101);
    let events = run(&mut p, &[query, repeat.clone(), repeat]);
    match events.as_slice() {
        [Event::DnsRequest(q), Event::DnsResponse(first), Event::DnsResponse(second)] => {
            assert_eq!(first.id, Some(q.id));
            assert_eq!(second.id, None);
        }
        other => panic!("unexpected events {:?}", other),
    }
}

#[test]
fn https_session_reports_metadata_only() {
    let mut p = pipeline();
    let packets = Conversation::new(50100, 443)
        .open()
        .client_sends(b"\x16\x03\x01\x02\x00\x01\x00\x01\xfc\x03\x03 GET /secret HTTP/1.1")
        .server_sends(b"\x16\x03\x03\x00\x5a\x02\x00\x00\x56 HTTP/1.1 200 OK")
        .close();
    let events = run(&mut p, &packets);

    assert!(events.iter().all(|e| !matches!(
        e.kind(),
        EventKind::HttpRequest | EventKind::HttpResponse | EventKind::Mail
    )));
    let observed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::HttpsObserved(h) => Some(h),
            _ => None,
        })
        .collect();
    assert_eq!(observed.len(), 3);
    for h in observed {
        assert_eq!(h.dst.port(), 443);
        assert_eq!(h.country.as_deref(), Some("Germany"));
    }
    assert_eq!(events.first().map(Event::kind), Some(EventKind::HttpsObserved));
    assert_eq!(events.last().map(Event::kind), Some(EventKind::Disconnect));
}

#[test]
fn encrypted_pop_session_has_no_transcript() {
    let mut p = pipeline();
    let secret = b"USER alice\r\nPASS hunter2\r\n";
    let packets = Conversation::new(50200, 995)
        .open()
        .server_sends(b"\x16\x03\x03 server hello")
        .client_sends(secret)
        .close();
    let events = run(&mut p, &packets);

    assert_eq!(kinds(&events), vec![EventKind::Connect, EventKind::Mail, EventKind::Disconnect]);
    match &events[1] {
        Event::Mail(m) => {
            assert_eq!(m.protocol, MailProtocol::Pop);
            assert!(m.is_encrypted);
            assert_eq!(m.data, None);
            assert!(!m.login_observed);
            assert_eq!(m.country, "United States");
        }
        other => panic!("expected mail, got {:?}", other),
    }
    let json = serde_json::to_string(&events[1]).unwrap();
    assert!(!json.contains("hunter2"));
    assert!(json.contains("\"POP\""));
}

#[test]
fn plaintext_imap_session_is_transcribed() {
    let mut p = pipeline();
    let packets = Conversation::new(50300, 143)
        .open()
        .server_sends(b"* OK IMAP4rev1 ready\r\n")
        .client_sends(b"a1 LOGIN alice secret\r\n")
        .client_sends(b"a2 LOGOUT\r\n")
        .close();
    let events = run(&mut p, &packets);

    let mail = events.iter().find_map(|e| match e {
        Event::Mail(m) => Some(m),
        _ => None,
    });
    let mail = mail.expect("mail event");
    assert_eq!(mail.protocol, MailProtocol::Imap);
    assert_eq!(mail.data.as_deref(), Some("a1 LOGIN alice secret\r\na2 LOGOUT\r\n"));
    assert!(mail.login_observed);
    assert!(p.mail().is_empty());
}

#[test]
fn broken_gzip_response_falls_back_to_raw_text() {
    let mut p = pipeline();
    let raw = b"\x1f\x00 compressed, allegedly".to_vec();
    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
        raw.len()
    )
    .into_bytes();
    response.extend_from_slice(&raw);

    let packets = Conversation::new(50400, 80)
        .open()
        .client_sends(b"GET /data HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .server_sends(&response)
        .close();
    let events = run(&mut p, &packets);

    let resp = responses(&events);
    assert_eq!(resp.len(), 1);
    assert_eq!(resp[0].body.buffer.as_deref(), Some(raw.as_slice()));
    assert_eq!(resp[0].body.parse_body, Some(String::from_utf8_lossy(&raw).into_owned()));
    assert_eq!(resp[0].body.json, None);
}

#[test]
fn gzip_json_response_is_decoded() {
    let mut p = pipeline();
    let body = gzip(br#"{"user":"alice","roles":["admin"]}"#);
    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(&body);

    let packets = Conversation::new(50500, 8080)
        .open()
        .client_sends(b"GET /me HTTP/1.1\r\nHost: api.example.com\r\nCookie: sid=42; theme=dark\r\n\r\n")
        .server_sends(&response)
        .close();
    let events = run(&mut p, &packets);

    assert_eq!(kinds(&events), vec![
        EventKind::Connect,
        EventKind::HttpRequest,
        EventKind::HttpResponse,
        EventKind::Disconnect,
    ]);
    let request = match &events[1] {
        Event::HttpRequest(r) => r,
        other => panic!("expected request, got {:?}", other),
    };
    assert_eq!(request.method, "GET");
    assert_eq!(request.url, "/me");
    assert_eq!(request.host.as_deref(), Some("api.example.com"));
    assert_eq!(request.country, "United States");
    assert!(request.body.buffer.is_none());

    let resp = responses(&events);
    assert_eq!(resp[0].id, request.id);
    assert_eq!(resp[0].status, 200);
    assert_eq!(resp[0].body.parse_body.as_deref(), Some(r#"{"user":"alice","roles":["admin"]}"#));
    assert_eq!(resp[0].body.json, Some(serde_json::json!({"user": "alice", "roles": ["admin"]})));
}

#[test]
fn pipelined_requests_pair_in_order() {
    let mut p = pipeline();
    let packets = Conversation::new(50600, 80)
        .open()
        .client_sends(b"GET /a HTTP/1.1\r\nHost: h\r\n\r\nGET /b HTTP/1.1\r\nHost: h\r\n\r\n")
        .server_sends(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nA")
        .server_sends(b"HTTP/1.1 404 Not Found\r\nContent-Length: 1\r\n\r\nB")
        .close();
    let events = run(&mut p, &packets);

    let requests: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::HttpRequest(r) => Some(r),
            _ => None,
        })
        .collect();
    let resp = responses(&events);
    assert_eq!(requests.len(), 2);
    assert_eq!(resp.len(), 2);
    assert_eq!(requests[0].url, "/a");
    assert_eq!(resp[0].id, requests[0].id);
    assert_eq!(resp[0].body.parse_body.as_deref(), Some("A"));
    assert_eq!(resp[1].id, requests[1].id);
    assert_eq!(resp[1].status, 404);
    assert_ne!(requests[0].id, requests[1].id);
}

#[test]
fn http_violation_is_reported_and_session_survives() {
    let mut p = pipeline();
    let packets = Conversation::new(50700, 80)
        .open()
        .client_sends(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n")
        .server_sends(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n")
        .client_sends(b"GET /again HTTP/1.1\r\nHost: h\r\n\r\n")
        .close();
    let events = run(&mut p, &packets);

    let error = events.iter().find_map(|e| match e {
        Event::ProtocolError(err) => Some(err),
        _ => None,
    });
    assert_eq!(error.expect("protocol error").protocol, "http");
    assert_eq!(
        events.iter().filter(|e| e.kind() == EventKind::HttpRequest).count(),
        2
    );
    assert_eq!(events.last().map(Event::kind), Some(EventKind::Disconnect));
}

#[test]
fn reset_ends_session_once() {
    let mut p = pipeline();
    let conv = Conversation::new(50800, 80).open();
    let client = conv.client;
    let server = conv.server;
    let mut packets = conv.close();
    packets.insert(2, Packet::tcp(server, client, 0, flags(false, false, false, true), Vec::new()));
    let events = run(&mut p, &packets);

    assert_eq!(kinds(&events), vec![EventKind::Connect, EventKind::Disconnect]);
    assert!(p.sessions().is_empty());
}

#[test]
fn reused_port_without_teardown_starts_a_new_session() {
    let mut p = pipeline();
    let mut packets = Conversation::new(50900, 80)
        .open()
        .client_sends(b"GET /a HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .into_packets();
    packets.extend(
        Conversation::new(50900, 80)
            .starting_at(100)
            .open()
            .client_sends(b"GET /b HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .close(),
    );
    let events = run(&mut p, &packets);

    assert_eq!(kinds(&events), vec![
        EventKind::Connect,
        EventKind::HttpRequest,
        EventKind::Disconnect,
        EventKind::Connect,
        EventKind::HttpRequest,
        EventKind::Disconnect,
    ]);
    let urls: Vec<&str> = events.iter().filter_map(|e| match e {
        Event::HttpRequest(req) => Some(req.url.as_str()),
        _ => None,
    }).collect();
    assert_eq!(urls, vec!["/a", "/b"]);
}

#[test]
fn retransmitted_smtp_segment_appears_once() {
    let mut p = pipeline();
    let mut packets = Conversation::new(51000, 25)
        .open()
        .client_sends(b"HELO host\r\n")
        .client_sends(b"QUIT\r\n")
        .close();
    // Duplicate the HELO segment after QUIT
    let resent = packets[2].clone();
    packets.insert(4, resent);
    let events = run(&mut p, &packets);

    let mail = events.iter().find_map(|e| match e {
        Event::Mail(m) => Some(m),
        _ => None,
    });
    assert_eq!(mail.expect("mail event").data.as_deref(), Some("HELO host\r\nQUIT\r\n"));
}
