//! HTTP/1.x session framer
//!
//! Turns the ordered byte stream of each TCP direction into message
//! boundary notifications ([`HttpNotice`]). Only framing is done here:
//! start line, header block, and body delimitation.
//!
//! Body framing, in order of precedence:
//! - `Transfer-Encoding: chunked`
//! - `Content-Length`
//! - requests: no body; responses: read until the connection closes
//!
//! Responses to `HEAD` and `204`/`304` responses never carry a body.
//! Interim `1xx` responses are consumed silently. After `101` or a
//! successful `CONNECT` the connection is no longer HTTP and is ignored.
//!
//! A side that never produced a valid head is dropped quietly. A side
//! that did and then breaks framing gets one `Error` notice and is
//! resynchronised at the next line that looks like a start line.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::core::Direction;
use super::types::{looks_like_start, HttpNotice, RawHeaders};
use super::HttpConfig;

/// Longest chunk-size or trailer line accepted
const MAX_CHUNK_LINE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(usize),
    DataEnd,
    Trailer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Body {
    Length(usize),
    Chunked(ChunkState),
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Head,
    Body(Body),
}

/// Request methods awaiting their response, plus connection-level state
#[derive(Debug)]
struct Exchanges {
    methods: VecDeque<String>,
    max_pending: usize,
    /// Connection switched protocols
    upgraded: bool,
}

impl Exchanges {
    fn push(&mut self, method: &str) {
        if self.methods.len() >= self.max_pending {
            self.methods.pop_front();
        }
        self.methods.push_back(method.to_string());
    }
}

/// One direction of the connection
#[derive(Debug)]
struct HalfStream {
    direction: Direction,
    buf: Vec<u8>,
    phase: Phase,
    /// A head has parsed on this side at some point
    seen_http: bool,
    /// An error was reported and no head has parsed since
    broken: bool,
}

impl HalfStream {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            buf: Vec::new(),
            phase: Phase::Head,
            seen_http: false,
            broken: false,
        }
    }

    fn feed(&mut self, data: &[u8], ex: &mut Exchanges, max_head: usize, out: &mut Vec<HttpNotice>) {
        self.buf.extend_from_slice(data);
        loop {
            if ex.upgraded {
                self.buf.clear();
                return;
            }
            let progressed = match self.phase {
                Phase::Head => self.step_head(ex, max_head, out),
                Phase::Body(body) => self.step_body(body, out),
            };
            if !progressed {
                return;
            }
        }
    }

    fn step_head(&mut self, ex: &mut Exchanges, max_head: usize, out: &mut Vec<HttpNotice>) -> bool {
        let blank = self.buf.iter().take_while(|b| **b == b'\r' || **b == b'\n').count();
        if blank > 0 {
            self.buf.drain(..blank);
        }
        if self.buf.is_empty() {
            return false;
        }

        match looks_like_start(&self.buf, self.direction) {
            None => return false,
            Some(false) => {
                self.desync(out, "unrecognised start line".to_string());
                return true;
            }
            Some(true) => {}
        }

        let Some((head_len, body_start)) = find_head_end(&self.buf) else {
            if self.buf.len() > max_head {
                self.desync(out, format!("message head exceeds {} bytes", max_head));
                return true;
            }
            return false;
        };
        if head_len > max_head {
            self.desync(out, format!("message head exceeds {} bytes", max_head));
            return true;
        }

        let head = String::from_utf8_lossy(&self.buf[..head_len]).into_owned();
        self.buf.drain(..body_start);

        match self.direction {
            Direction::ToServer => self.start_request(&head, ex, out),
            Direction::ToClient => self.start_response(&head, ex, out),
        }
        true
    }

    fn start_request(&mut self, head: &str, ex: &mut Exchanges, out: &mut Vec<HttpNotice>) {
        let mut lines = head_lines(head);
        let mut parts = lines.next().unwrap_or("").split_whitespace();
        let (Some(method), Some(url)) = (parts.next(), parts.next()) else {
            self.desync(out, "malformed request line".to_string());
            return;
        };
        let headers = parse_header_lines(lines);
        let framing = match body_framing(&headers) {
            Ok(framing) => framing,
            Err(reason) => {
                self.desync(out, reason);
                return;
            }
        };

        trace!("request {} {}", method, url);
        self.seen_http = true;
        self.broken = false;
        ex.push(method);
        out.push(HttpNotice::RequestStart {
            method: method.to_string(),
            url: url.to_string(),
            headers,
        });
        self.enter_body(framing, out);
    }

    fn start_response(&mut self, head: &str, ex: &mut Exchanges, out: &mut Vec<HttpNotice>) {
        let mut lines = head_lines(head);
        let mut parts = lines.next().unwrap_or("").splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        let status = parts.next().and_then(|s| s.trim().parse::<u16>().ok());
        let Some(status) = status.filter(|_| version.starts_with("HTTP/")) else {
            self.desync(out, "malformed status line".to_string());
            return;
        };
        let headers = parse_header_lines(lines);

        self.seen_http = true;
        self.broken = false;

        if (100..200).contains(&status) && status != 101 {
            trace!("skipping interim {} response", status);
            return;
        }

        let method = ex.methods.pop_front().unwrap_or_default();
        let framing = body_framing(&headers);
        trace!("response {} to {:?}", status, method);
        out.push(HttpNotice::ResponseStart { status, headers });

        let tunnel = status == 101 || (method == "CONNECT" && (200..300).contains(&status));
        if tunnel || method == "HEAD" || status == 204 || status == 304 {
            out.push(HttpNotice::ResponseComplete);
            if tunnel {
                debug!("connection left HTTP after {} response", status);
                ex.upgraded = true;
            }
            return;
        }

        match framing {
            Ok(Some(body)) => self.enter_body(Some(body), out),
            Ok(None) => self.phase = Phase::Body(Body::UntilClose),
            Err(reason) => {
                out.push(HttpNotice::Error {
                    direction: self.direction,
                    reason,
                });
                self.broken = true;
                self.skip_to_next_start();
            }
        }
    }

    fn enter_body(&mut self, framing: Option<Body>, out: &mut Vec<HttpNotice>) {
        match framing {
            None | Some(Body::Length(0)) => {
                out.push(complete_notice(self.direction));
                self.phase = Phase::Head;
            }
            Some(body) => self.phase = Phase::Body(body),
        }
    }

    fn step_body(&mut self, body: Body, out: &mut Vec<HttpNotice>) -> bool {
        match body {
            Body::Length(remaining) => {
                if self.buf.is_empty() {
                    return false;
                }
                let left = self.take_body(remaining, out);
                if left == 0 {
                    out.push(complete_notice(self.direction));
                    self.phase = Phase::Head;
                } else {
                    self.phase = Phase::Body(Body::Length(left));
                }
                true
            }
            Body::UntilClose => {
                if !self.buf.is_empty() {
                    let data = std::mem::take(&mut self.buf);
                    out.push(body_notice(self.direction, data));
                }
                false
            }
            Body::Chunked(state) => self.step_chunk(state, out),
        }
    }

    fn step_chunk(&mut self, state: ChunkState, out: &mut Vec<HttpNotice>) -> bool {
        match state {
            ChunkState::Size => {
                let Some(nl) = self.buf.iter().position(|b| *b == b'\n') else {
                    return self.check_line_len(out);
                };
                let line = String::from_utf8_lossy(&self.buf[..nl]).into_owned();
                self.buf.drain(..=nl);
                let size = line.trim_end_matches('\r').split(';').next().unwrap_or("").trim();
                match usize::from_str_radix(size, 16) {
                    Ok(0) => self.phase = Phase::Body(Body::Chunked(ChunkState::Trailer)),
                    Ok(n) => self.phase = Phase::Body(Body::Chunked(ChunkState::Data(n))),
                    Err(_) => self.desync(out, format!("invalid chunk size {:?}", size)),
                }
                true
            }
            ChunkState::Data(remaining) => {
                if self.buf.is_empty() {
                    return false;
                }
                let left = self.take_body(remaining, out);
                let next = if left == 0 { ChunkState::DataEnd } else { ChunkState::Data(left) };
                self.phase = Phase::Body(Body::Chunked(next));
                true
            }
            ChunkState::DataEnd => {
                if self.buf.starts_with(b"\r\n") {
                    self.buf.drain(..2);
                } else if self.buf.starts_with(b"\n") {
                    self.buf.drain(..1);
                } else if self.buf.is_empty() || self.buf == b"\r" {
                    return false;
                } else {
                    self.desync(out, "missing line break after chunk data".to_string());
                    return true;
                }
                self.phase = Phase::Body(Body::Chunked(ChunkState::Size));
                true
            }
            ChunkState::Trailer => {
                let Some(nl) = self.buf.iter().position(|b| *b == b'\n') else {
                    return self.check_line_len(out);
                };
                let end_of_trailers = self.buf[..nl].iter().all(|b| *b == b'\r');
                self.buf.drain(..=nl);
                if end_of_trailers {
                    out.push(complete_notice(self.direction));
                    self.phase = Phase::Head;
                }
                true
            }
        }
    }

    /// Emit up to `remaining` buffered body bytes; returns what is left
    fn take_body(&mut self, remaining: usize, out: &mut Vec<HttpNotice>) -> usize {
        let take = remaining.min(self.buf.len());
        let data: Vec<u8> = self.buf.drain(..take).collect();
        out.push(body_notice(self.direction, data));
        remaining - take
    }

    /// Waiting for a chunk line; give up if it grows without a line break
    fn check_line_len(&mut self, out: &mut Vec<HttpNotice>) -> bool {
        if self.buf.len() > MAX_CHUNK_LINE {
            self.desync(out, "chunk line too long".to_string());
            return true;
        }
        false
    }

    /// Report a framing failure (once per break) and resynchronise
    fn desync(&mut self, out: &mut Vec<HttpNotice>, reason: String) {
        if self.seen_http && !self.broken {
            debug!("http {:?} stream broken: {}", self.direction, reason);
            out.push(HttpNotice::Error {
                direction: self.direction,
                reason,
            });
        }
        self.broken = true;
        self.phase = Phase::Head;
        self.skip_to_next_start();
    }

    /// Drop bytes up to the next line that could begin a message
    fn skip_to_next_start(&mut self) {
        let mut pos = 0;
        while let Some(nl) = self.buf[pos..].iter().position(|b| *b == b'\n') {
            let start = pos + nl + 1;
            if looks_like_start(&self.buf[start..], self.direction) != Some(false) {
                self.buf.drain(..start);
                return;
            }
            pos = start;
        }
        self.buf.clear();
    }
}

/// HTTP/1.x framer for one TCP connection
#[derive(Debug)]
pub struct HttpSession {
    request: HalfStream,
    response: HalfStream,
    exchanges: Exchanges,
    max_head_bytes: usize,
}

impl HttpSession {
    pub fn new(config: &HttpConfig) -> Self {
        Self {
            request: HalfStream::new(Direction::ToServer),
            response: HalfStream::new(Direction::ToClient),
            exchanges: Exchanges {
                methods: VecDeque::new(),
                max_pending: config.max_pending_exchanges.max(1),
                upgraded: false,
            },
            max_head_bytes: config.max_head_bytes,
        }
    }

    /// Feed ordered bytes from one direction
    pub fn on_data(&mut self, direction: Direction, data: &[u8]) -> Vec<HttpNotice> {
        let mut out = Vec::new();
        if data.is_empty() || self.exchanges.upgraded {
            return out;
        }
        let half = match direction {
            Direction::ToServer => &mut self.request,
            Direction::ToClient => &mut self.response,
        };
        half.feed(data, &mut self.exchanges, self.max_head_bytes, &mut out);
        out
    }

    /// Connection closed: complete a response delimited by close
    pub fn finish(&mut self) -> Vec<HttpNotice> {
        let mut out = Vec::new();
        if self.response.phase == Phase::Body(Body::UntilClose) {
            if !self.response.buf.is_empty() {
                let data = std::mem::take(&mut self.response.buf);
                out.push(HttpNotice::ResponseBody(data));
            }
            out.push(HttpNotice::ResponseComplete);
            self.response.phase = Phase::Head;
        }
        out
    }

    /// Whether the connection switched away from HTTP
    pub fn is_upgraded(&self) -> bool {
        self.exchanges.upgraded
    }
}

fn body_notice(direction: Direction, data: Vec<u8>) -> HttpNotice {
    match direction {
        Direction::ToServer => HttpNotice::RequestBody(data),
        Direction::ToClient => HttpNotice::ResponseBody(data),
    }
}

fn complete_notice(direction: Direction) -> HttpNotice {
    match direction {
        Direction::ToServer => HttpNotice::RequestComplete,
        Direction::ToClient => HttpNotice::ResponseComplete,
    }
}

/// Locate the blank line ending a head; returns `(head_len, body_start)`.
/// Accepts CRLF and bare LF line endings.
fn find_head_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut pos = 0;
    while let Some(nl) = buf[pos..].iter().position(|b| *b == b'\n') {
        let i = pos + nl;
        match &buf[i + 1..] {
            [b'\n', ..] => return Some((i, i + 2)),
            [b'\r', b'\n', ..] => return Some((i, i + 3)),
            _ => pos = i + 1,
        }
    }
    None
}

fn head_lines(head: &str) -> impl Iterator<Item = &str> {
    head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l))
}

/// Header lines to pairs; folded continuation lines join the previous value
fn parse_header_lines<'a>(lines: impl Iterator<Item = &'a str>) -> RawHeaders {
    let mut headers: RawHeaders = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    headers
}

fn raw_header<'a>(headers: &'a RawHeaders, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Body delimitation from headers; `None` when neither chunking nor a
/// length is declared
fn body_framing(headers: &RawHeaders) -> Result<Option<Body>, String> {
    if let Some(te) = raw_header(headers, "transfer-encoding") {
        if te.to_ascii_lowercase().contains("chunked") {
            return Ok(Some(Body::Chunked(ChunkState::Size)));
        }
    }
    match raw_header(headers, "content-length") {
        Some(len) => len
            .trim()
            .parse::<usize>()
            .map(|n| Some(Body::Length(n)))
            .map_err(|_| format!("invalid Content-Length {:?}", len)),
        None => Ok(None),
    }
}
