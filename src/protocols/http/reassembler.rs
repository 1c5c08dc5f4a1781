//! HTTP message reassembly
//!
//! Consumes framer notifications for one TCP session and produces
//! `HttpRequest`/`HttpResponse` events. Each exchange gets a correlation
//! id when its request starts; responses take ids in request order, so
//! pipelined requests pair with their responses.

use std::collections::VecDeque;
use std::net::SocketAddr;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::event::{
    header, Event, Headers, HttpRequestEvent, HttpResponseEvent, ProtocolErrorEvent,
};
use crate::core::Direction;
use super::body::{build_headers, decode_body};
use super::types::HttpNotice;
use super::HttpConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
enum StartLine {
    Request {
        method: String,
        url: String,
        host: Option<String>,
    },
    Response {
        status: u16,
    },
}

/// One direction's message in progress
#[derive(Debug, Default)]
pub struct HttpMessageBuffer {
    id: Option<Uuid>,
    start: Option<StartLine>,
    headers: Headers,
    body: Vec<u8>,
    /// Body exceeded the size cap; the message will not be reported
    abandoned: bool,
}

impl HttpMessageBuffer {
    fn begin(id: Uuid, start: StartLine, headers: Headers) -> Self {
        Self {
            id: Some(id),
            start: Some(start),
            headers,
            body: Vec::new(),
            abandoned: false,
        }
    }

    fn append(&mut self, data: &[u8], max_body: usize) {
        if self.start.is_none() || self.abandoned {
            return;
        }
        if self.body.len() + data.len() > max_body {
            debug!("http body exceeds {} bytes, dropping message", max_body);
            self.abandoned = true;
            self.body = Vec::new();
            return;
        }
        self.body.extend_from_slice(data);
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    pub fn in_progress(&self) -> bool {
        self.start.is_some()
    }
}

/// Request/response reassembly for one TCP session
#[derive(Debug)]
pub struct HttpReassembler {
    src: SocketAddr,
    dst: SocketAddr,
    country: String,
    request: HttpMessageBuffer,
    response: HttpMessageBuffer,
    /// Ids of requests whose response has not started yet
    pending_ids: VecDeque<Uuid>,
    max_body_bytes: usize,
    max_pending: usize,
}

impl HttpReassembler {
    pub fn new(src: SocketAddr, dst: SocketAddr, country: String, config: &HttpConfig) -> Self {
        Self {
            src,
            dst,
            country,
            request: HttpMessageBuffer::default(),
            response: HttpMessageBuffer::default(),
            pending_ids: VecDeque::new(),
            max_body_bytes: config.max_body_bytes,
            max_pending: config.max_pending_exchanges.max(1),
        }
    }

    /// Apply one framer notification
    pub fn on_notice(&mut self, notice: HttpNotice) -> Option<Event> {
        match notice {
            HttpNotice::RequestStart { method, url, headers } => {
                let headers = build_headers(&headers);
                let host = header(&headers, "host")
                    .or_else(|| header(&headers, "server"))
                    .map(str::to_string);
                let id = Uuid::new_v4();
                if self.pending_ids.len() >= self.max_pending {
                    self.pending_ids.pop_front();
                }
                self.pending_ids.push_back(id);
                self.request = HttpMessageBuffer::begin(id, StartLine::Request { method, url, host }, headers);
                None
            }
            HttpNotice::RequestBody(data) => {
                self.request.append(&data, self.max_body_bytes);
                None
            }
            HttpNotice::RequestComplete => self.complete(Direction::ToServer),
            HttpNotice::ResponseStart { status, headers } => {
                let id = self.pending_ids.pop_front().unwrap_or_else(Uuid::new_v4);
                self.response = HttpMessageBuffer::begin(id, StartLine::Response { status }, build_headers(&headers));
                None
            }
            HttpNotice::ResponseBody(data) => {
                self.response.append(&data, self.max_body_bytes);
                None
            }
            HttpNotice::ResponseComplete => self.complete(Direction::ToClient),
            HttpNotice::Error { direction, reason } => {
                warn!("http error on {} -> {}: {}", self.src, self.dst, reason);
                *self.buffer_mut(direction) = HttpMessageBuffer::default();
                Some(Event::ProtocolError(ProtocolErrorEvent {
                    src: self.src,
                    dst: self.dst,
                    protocol: "http".to_string(),
                    reason,
                }))
            }
        }
    }

    /// Emit the finished message and reset that direction
    fn complete(&mut self, direction: Direction) -> Option<Event> {
        let msg = std::mem::take(self.buffer_mut(direction));
        if msg.abandoned {
            return None;
        }
        let id = msg.id?;
        let start = msg.start?;
        let body = decode_body(msg.body, &msg.headers);

        match start {
            StartLine::Request { method, url, host } => Some(Event::HttpRequest(HttpRequestEvent {
                id,
                src: self.src,
                dst: self.dst,
                country: self.country.clone(),
                headers: msg.headers,
                host,
                url,
                method,
                body,
            })),
            StartLine::Response { status } => Some(Event::HttpResponse(HttpResponseEvent {
                id,
                src: self.src,
                dst: self.dst,
                country: self.country.clone(),
                headers: msg.headers,
                status,
                body,
            })),
        }
    }

    fn buffer_mut(&mut self, direction: Direction) -> &mut HttpMessageBuffer {
        match direction {
            Direction::ToServer => &mut self.request,
            Direction::ToClient => &mut self.response,
        }
    }

    pub fn request(&self) -> &HttpMessageBuffer {
        &self.request
    }

    pub fn response(&self) -> &HttpMessageBuffer {
        &self.response
    }
}
