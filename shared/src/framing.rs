//! Line framing for the text stream between server and clients.
//!
//! A frame is everything up to a line delimiter. Bytes are buffered raw so a
//! frame (or a multi-byte UTF-8 character) may be split across any number of
//! reads.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Delimiter appended to every outgoing frame. Incoming frames may end in a
/// bare `\n` as well.
pub const DELIMITER: &str = "\r\n";

/// Longest inbound frame accepted, delimiter excluded.
pub const MAX_FRAME_LEN: usize = 16 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("frame exceeds {limit} bytes")]
pub struct FrameTooLong {
    pub limit: usize,
}

/// Accumulates inbound bytes and yields complete frames in arrival order.
#[derive(Debug)]
pub struct FrameBuffer {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no `\n`
    scanned: usize,
    max_len: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::with_max_len(MAX_FRAME_LEN)
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            max_len,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Removes and returns the next complete frame without its delimiter.
    ///
    /// Everything after the first `\n` stays buffered for the next call.
    /// A frame longer than the limit is discarded with [`FrameTooLong`],
    /// as is an unterminated tail that has already outgrown it.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameTooLong> {
        let Some(offset) = self.pending[self.scanned..].iter().position(|&b| b == b'\n') else {
            if self.pending.len() > self.max_len {
                self.pending.clear();
                self.scanned = 0;
                return Err(FrameTooLong {
                    limit: self.max_len,
                });
            }
            self.scanned = self.pending.len();
            return Ok(None);
        };

        let end = self.scanned + offset;
        self.scanned = 0;
        let mut frame: Vec<u8> = self.pending.drain(..=end).collect();
        frame.pop();
        if frame.last() == Some(&b'\r') {
            frame.pop();
        }
        if frame.len() > self.max_len {
            return Err(FrameTooLong {
                limit: self.max_len,
            });
        }
        Ok(Some(frame))
    }

    /// Number of bytes waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

/// Terminates a payload with [`DELIMITER`].
pub fn encode_frame(payload: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(payload.len() + DELIMITER.len());
    bytes.extend_from_slice(payload.as_bytes());
    bytes.extend_from_slice(DELIMITER.as_bytes());
    bytes
}

/// Base64 text form of a ciphertext, as carried inside an encrypted frame.
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn from_base64(text: &[u8]) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut frames = FrameBuffer::new();
        frames.push(b"hello\r\n");

        assert_eq!(frames.next_frame(), Ok(Some(b"hello".to_vec())));
        assert_eq!(frames.next_frame(), Ok(None));
        assert_eq!(frames.buffered(), 0);
    }

    #[test]
    fn test_partial_frame_is_retained() {
        let mut frames = FrameBuffer::new();
        frames.push(b"hel");
        assert_eq!(frames.next_frame(), Ok(None));

        frames.push(b"lo\nwor");
        assert_eq!(frames.next_frame(), Ok(Some(b"hello".to_vec())));
        assert_eq!(frames.next_frame(), Ok(None));
        assert_eq!(frames.buffered(), 3);
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut frames = FrameBuffer::new();
        frames.push(b"one\r\ntwo\r\nthree\r\n");

        assert_eq!(frames.next_frame(), Ok(Some(b"one".to_vec())));
        assert_eq!(frames.next_frame(), Ok(Some(b"two".to_vec())));
        assert_eq!(frames.next_frame(), Ok(Some(b"three".to_vec())));
        assert_eq!(frames.next_frame(), Ok(None));
    }

    #[test]
    fn test_every_split_point_yields_same_frames() {
        let stream = b"first-frame\r\nsecond\r\n";

        for split in 0..=stream.len() {
            let mut frames = FrameBuffer::new();
            let mut seen = Vec::new();

            frames.push(&stream[..split]);
            while let Ok(Some(frame)) = frames.next_frame() {
                seen.push(frame);
            }
            frames.push(&stream[split..]);
            while let Ok(Some(frame)) = frames.next_frame() {
                seen.push(frame);
            }

            assert_eq!(
                seen,
                vec![b"first-frame".to_vec(), b"second".to_vec()],
                "split at {}",
                split
            );
        }
    }

    #[test]
    fn test_delimiter_split_between_cr_and_lf() {
        let mut frames = FrameBuffer::new();
        frames.push(b"abc\r");
        assert_eq!(frames.next_frame(), Ok(None));
        frames.push(b"\n");
        assert_eq!(frames.next_frame(), Ok(Some(b"abc".to_vec())));
    }

    #[test]
    fn test_empty_frame() {
        let mut frames = FrameBuffer::new();
        frames.push(b"\r\n");
        assert_eq!(frames.next_frame(), Ok(Some(Vec::new())));
    }

    #[test]
    fn test_base64_rejects_garbage() {
        assert!(from_base64(b"not*base64!").is_err());
        assert_eq!(from_base64(to_base64(b"\x00\xff").as_bytes()).unwrap(), b"\x00\xff");
    }

    #[test]
    fn test_encode_frame_appends_delimiter() {
        assert_eq!(encode_frame("abc"), b"abc\r\n".to_vec());
    }

    #[test]
    fn test_unterminated_frame_over_limit_is_dropped() {
        let mut frames = FrameBuffer::with_max_len(8);
        frames.push(b"AAAAAAAA");
        assert_eq!(frames.next_frame(), Ok(None));

        frames.push(b"A");
        assert_eq!(frames.next_frame(), Err(FrameTooLong { limit: 8 }));
        assert_eq!(frames.buffered(), 0);

        frames.push(b"ok\r\n");
        assert_eq!(frames.next_frame(), Ok(Some(b"ok".to_vec())));
    }

    #[test]
    fn test_terminated_frame_over_limit_is_dropped() {
        let mut frames = FrameBuffer::with_max_len(4);
        frames.push(b"123456\r\nabcd\r\n");

        assert_eq!(frames.next_frame(), Err(FrameTooLong { limit: 4 }));
        assert_eq!(frames.next_frame(), Ok(Some(b"abcd".to_vec())));
    }

    #[test]
    fn test_scan_resumes_where_previous_call_stopped() {
        let mut frames = FrameBuffer::new();
        for _ in 0..100 {
            frames.push(b"0123456789");
            assert_eq!(frames.next_frame(), Ok(None));
        }
        assert_eq!(frames.scanned, 1000);

        frames.push(b"\r\nnext\n");
        assert_eq!(frames.next_frame().unwrap().map(|f| f.len()), Some(1000));
        assert_eq!(frames.next_frame(), Ok(Some(b"next".to_vec())));
        assert_eq!(frames.scanned, 0);
    }

    #[test]
    fn test_default_limit() {
        let mut frames = FrameBuffer::new();
        frames.push(&vec![b'x'; MAX_FRAME_LEN]);
        assert_eq!(frames.next_frame(), Ok(None));
        frames.push(b"x");
        assert!(frames.next_frame().is_err());
    }
}
