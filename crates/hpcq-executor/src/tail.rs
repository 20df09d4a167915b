//! Rolling, UTF-8-safe tail buffer kept per captured stream (spec §4.4 step
//! 4): the last `TAIL_BYTES` bytes, trimmed from the front on emission to
//! the nearest valid `char` boundary so a `running`/`completed`/`failed`
//! event never carries a truncated multi-byte sequence.

use std::collections::VecDeque;

pub struct RollingTail {
    buf: VecDeque<u8>,
    cap: usize,
}

impl RollingTail {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes);
        while self.buf.len() > self.cap {
            self.buf.pop_front();
        }
    }

    /// The current tail as a `String`, backing off from the front until a
    /// valid UTF-8 boundary is found.
    pub fn as_tail_string(&self) -> String {
        let bytes: Vec<u8> = self.buf.iter().copied().collect();
        for start in 0..=bytes.len() {
            if let Ok(s) = std::str::from_utf8(&bytes[start..]) {
                return s.to_string();
            }
        }
        String::new()
    }
}

/// Per-stream bookkeeping shared between the pump task and the
/// tail-emitter: running byte count plus the rolling tail.
#[derive(Default)]
pub struct StreamState {
    tail: Option<RollingTail>,
    pub bytes_read: u64,
}

impl StreamState {
    pub fn new(cap: usize) -> Self {
        Self {
            tail: Some(RollingTail::new(cap)),
            bytes_read: 0,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        if let Some(tail) = &mut self.tail {
            tail.push(bytes);
        }
        self.bytes_read += bytes.len() as u64;
    }

    pub fn tail_string(&self) -> String {
        self.tail.as_ref().map(RollingTail::as_tail_string).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_caps_at_configured_size() {
        let mut t = RollingTail::new(4);
        t.push(b"abcdef");
        assert_eq!(t.as_tail_string(), "cdef");
    }

    #[test]
    fn tail_backs_off_to_utf8_boundary() {
        let mut t = RollingTail::new(2);
        // push a 3-byte UTF-8 sequence ('€' = E2 82 AC) one byte at a time,
        // capped at 2 bytes: the buffer holds a truncated lead byte.
        t.push("€".as_bytes());
        // last 2 bytes of "€" (0x82, 0xAC) are not valid UTF-8 on their own;
        // the tail must not panic and must return a valid (possibly empty) string.
        let s = t.as_tail_string();
        assert!(std::str::from_utf8(s.as_bytes()).is_ok());
    }

    #[test]
    fn stream_state_tracks_total_bytes_beyond_cap() {
        let mut s = StreamState::new(4);
        s.push(b"hello ");
        s.push(b"world");
        assert_eq!(s.bytes_read, 11);
        assert_eq!(s.tail_string(), "orld");
    }
}
