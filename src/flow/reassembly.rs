//! Per-direction TCP segment ordering
//!
//! Segments are delivered in sequence order. Future segments wait in a
//! bounded out-of-order buffer; retransmitted data that overlaps what was
//! already delivered is trimmed. Sequence comparisons wrap at 2^32.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("out-of-order buffer overflow ({0} segments)")]
    Overflow(usize),
}

/// Ordered byte stream for one direction of a TCP connection
#[derive(Debug)]
pub struct StreamReassembler {
    /// Sequence number of the next byte to deliver
    next_seq: Option<u32>,
    /// Segments that arrived ahead of `next_seq`
    pending: VecDeque<(u32, Vec<u8>)>,
    capacity: usize,
}

impl StreamReassembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            next_seq: None,
            pending: VecDeque::new(),
            capacity,
        }
    }

    /// Insert a segment and return whatever bytes became deliverable.
    ///
    /// The first segment seen anchors the stream; a SYN occupies one
    /// sequence number ahead of its data.
    pub fn insert(&mut self, seq: u32, syn: bool, payload: &[u8]) -> Result<Vec<u8>, ReassemblyError> {
        let data_seq = if syn { seq.wrapping_add(1) } else { seq };
        let next = *self.next_seq.get_or_insert(data_seq);
        let mut out = Vec::new();

        if payload.is_empty() {
            return Ok(out);
        }

        if wrapping_lt(next, data_seq) {
            if self.pending.len() >= self.capacity {
                debug!("out-of-order buffer full, seq {} expecting {}", data_seq, next);
                return Err(ReassemblyError::Overflow(self.capacity));
            }
            trace!("buffering out-of-order segment seq {} expecting {}", data_seq, next);
            self.pending.push_back((data_seq, payload.to_vec()));
            return Ok(out);
        }

        let next = match append_new_data(&mut out, next, data_seq, payload) {
            Some(next) => next,
            None => {
                trace!("dropping old segment seq {} expecting {}", data_seq, next);
                return Ok(out);
            }
        };
        let next = self.flush_pending(&mut out, next);
        self.next_seq = Some(next);
        Ok(out)
    }

    /// Number of segments waiting for a gap to fill
    pub fn pending_segments(&self) -> usize {
        self.pending.len()
    }

    /// Deliver every buffered segment that now lines up with `next`
    fn flush_pending(&mut self, out: &mut Vec<u8>, mut next: u32) -> u32 {
        while let Some(idx) = self.pending.iter().position(|(s, _)| !wrapping_lt(next, *s)) {
            if let Some((seq, data)) = self.pending.remove(idx) {
                if let Some(advanced) = append_new_data(out, next, seq, &data) {
                    next = advanced;
                }
            }
        }
        next
    }
}

/// Append the part of a segment at or past `next`; `None` if it holds only old data
fn append_new_data(out: &mut Vec<u8>, next: u32, seq: u32, data: &[u8]) -> Option<u32> {
    let skip = next.wrapping_sub(seq) as usize;
    if skip >= data.len() {
        return None;
    }
    let fresh = &data[skip..];
    out.extend_from_slice(fresh);
    Some(next.wrapping_add(fresh.len() as u32))
}

/// `a < b` in sequence space
#[inline]
fn wrapping_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_delivery() {
        let mut stream = StreamReassembler::new(8);
        assert!(stream.insert(999, true, b"").unwrap().is_empty());
        assert_eq!(stream.insert(1000, false, b"GET ").unwrap(), b"GET ");
        assert_eq!(stream.insert(1004, false, b"/ HTTP/1.1").unwrap(), b"/ HTTP/1.1");
    }

    #[test]
    fn test_out_of_order_is_held_until_gap_fills() {
        let mut stream = StreamReassembler::new(8);
        stream.insert(0, true, b"").unwrap();
        assert!(stream.insert(4, false, b"world").unwrap().is_empty());
        assert_eq!(stream.pending_segments(), 1);
        assert_eq!(stream.insert(1, false, b"abc").unwrap(), b"abcworld");
        assert_eq!(stream.pending_segments(), 0);
    }

    #[test]
    fn test_retransmit_overlap_is_trimmed() {
        let mut stream = StreamReassembler::new(8);
        stream.insert(100, false, b"hello").unwrap();
        assert!(stream.insert(100, false, b"hello").unwrap().is_empty());
        assert_eq!(stream.insert(103, false, b"lo world").unwrap(), b" world");
    }

    #[test]
    fn test_sequence_wraparound() {
        let mut stream = StreamReassembler::new(8);
        let start = u32::MAX - 1;
        assert_eq!(stream.insert(start, false, b"ab").unwrap(), b"ab");
        assert_eq!(stream.insert(0, false, b"cd").unwrap(), b"cd");
    }

    #[test]
    fn test_overflow() {
        let mut stream = StreamReassembler::new(1);
        stream.insert(0, false, b"a").unwrap();
        stream.insert(10, false, b"x").unwrap();
        assert_eq!(stream.insert(20, false, b"y"), Err(ReassemblyError::Overflow(1)));
    }
}
