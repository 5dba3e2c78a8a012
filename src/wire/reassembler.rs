//! Reassembly of wire messages from an arbitrarily chunked byte stream.
//!
//! # Responsibilities
//! - Keep one accumulator for the whole life of a direction
//! - Yield every complete message in order, exactly once
//! - Retain any trailing partial message for the next chunk
//!
//! # Design Decisions
//! - Frames are split off the front of a `BytesMut`, so yielding a message
//!   never copies the remainder
//! - A bad length field poisons the reassembler: the protocol has no resync
//!   marker, so there is no safe way to find the next boundary

use bytes::{Bytes, BytesMut};

use super::header::{parse_header, MessageHeader, HEADER_LEN};
use super::{FramingError, DEFAULT_MAX_MESSAGE_BYTES};

/// A complete wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: MessageHeader,
    /// The whole message, header included.
    pub bytes: Bytes,
}

/// Per-direction message reassembler.
#[derive(Debug)]
pub struct StreamReassembler {
    buffer: BytesMut,
    max_message_bytes: usize,
    poisoned: Option<FramingError>,
}

impl StreamReassembler {
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_message_bytes,
            poisoned: None,
        }
    }

    /// Append `chunk` and iterate over every message it completes.
    ///
    /// Frames not consumed from the iterator stay buffered and are returned
    /// by the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        if self.poisoned.is_none() {
            self.buffer.extend_from_slice(chunk);
        }
        Frames {
            reassembler: self,
            done: false,
        }
    }

    /// Split the next complete message off the accumulator.
    ///
    /// `Ok(None)` means more data is needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FramingError> {
        if let Some(err) = &self.poisoned {
            return Err(err.clone());
        }

        let Some(header) = parse_header(&self.buffer) else {
            return Ok(None);
        };

        let length = match self.validate_length(header.message_length) {
            Ok(length) => length,
            Err(err) => {
                self.poisoned = Some(err.clone());
                self.buffer = BytesMut::new();
                return Err(err);
            }
        };

        if self.buffer.len() < length {
            return Ok(None);
        }

        let bytes = self.buffer.split_to(length).freeze();
        Ok(Some(Frame { header, bytes }))
    }

    /// Bytes held for a message that is not complete yet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    fn validate_length(&self, declared: i32) -> Result<usize, FramingError> {
        let length = usize::try_from(declared).map_err(|_| FramingError::LengthTooSmall(declared))?;
        if length < HEADER_LEN {
            return Err(FramingError::LengthTooSmall(declared));
        }
        if length > self.max_message_bytes {
            return Err(FramingError::LengthTooLarge {
                length,
                max: self.max_message_bytes,
            });
        }
        Ok(length)
    }
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_BYTES)
    }
}

/// Lazy sequence of frames completed by one [`StreamReassembler::feed`].
///
/// Yields at most one error, then ends.
pub struct Frames<'a> {
    reassembler: &'a mut StreamReassembler,
    done: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reassembler.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
