//! HTTP framing types

use crate::core::Direction;

/// Header block in wire order, names as sent
pub type RawHeaders = Vec<(String, String)>;

/// Request methods recognised at the start of a request line
pub const METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "CONNECT", "TRACE",
];

/// Message boundary notifications produced by the session framer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpNotice {
    RequestStart {
        method: String,
        url: String,
        headers: RawHeaders,
    },
    RequestBody(Vec<u8>),
    RequestComplete,
    ResponseStart {
        status: u16,
        headers: RawHeaders,
    },
    ResponseBody(Vec<u8>),
    ResponseComplete,
    /// The stream stopped being valid HTTP; the message in progress on
    /// that side is abandoned
    Error {
        direction: Direction,
        reason: String,
    },
}

/// Whether a buffer begins a start line for the given side.
///
/// `None` means the buffer is still too short to tell.
pub fn looks_like_start(buf: &[u8], direction: Direction) -> Option<bool> {
    match direction {
        Direction::ToServer => {
            let mut undecided = false;
            for method in METHODS {
                let token = method.as_bytes();
                if buf.len() > token.len() {
                    if buf.starts_with(token) && buf[token.len()] == b' ' {
                        return Some(true);
                    }
                } else if token.starts_with(buf) {
                    undecided = true;
                }
            }
            if undecided { None } else { Some(false) }
        }
        Direction::ToClient => {
            let token = b"HTTP/";
            if buf.len() >= token.len() {
                Some(buf.starts_with(token))
            } else if token.starts_with(buf) {
                None
            } else {
                Some(false)
            }
        }
    }
}
