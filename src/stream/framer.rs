//! Segmentation of the live message byte stream into [`RawFrame`]s.
//!
//! The reader hands every read to a [`Framer`], so the segmentation rule can be
//! swapped without touching the reader or the dispatcher.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::stream::proto::{RawFrame, MESSAGE_TAG};

/// Read size used by the short-read framer.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
const EVENT_MARKER: &str = "event:";
const DATA_MARKER: &str = "data:";

/// Turns the bytes of successive reads into frames.
pub trait Framer: Send {
    /// Size of the buffer passed to each read of the connection.
    fn read_size(&self) -> usize {
        DEFAULT_CHUNK_SIZE
    }

    /// Consumes the bytes of one read and returns the frames it completes.
    fn feed(&mut self, read: &[u8]) -> Vec<RawFrame>;

    /// Drops any partially accumulated frame.
    fn reset(&mut self);
}

/// A block of stream text that does not carry a usable frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("no `event:` descriptor in frame")]
    MissingEventMarker,

    #[error("frame has no line after the event descriptor")]
    MissingPayload,
}

/// Decodes one accumulated block of stream text.
///
/// Everything before the first `event:` marker is ignored. The rest of that
/// line is the tag; the remainder, minus a leading `data:` marker and
/// surrounding whitespace, is the data.
pub fn decode_frame(text: &str) -> Result<RawFrame, FrameError> {
    let start = text
        .find(EVENT_MARKER)
        .ok_or(FrameError::MissingEventMarker)?;
    let (tag, rest) = text[start + EVENT_MARKER.len()..]
        .split_once('\n')
        .ok_or(FrameError::MissingPayload)?;

    let rest = rest.trim_start();
    let data = rest.strip_prefix(DATA_MARKER).unwrap_or(rest).trim();
    Ok(RawFrame::new(tag.trim(), data))
}

/// Ends a frame at every read that returns fewer bytes than the chunk size.
///
/// This matches servers that flush once per message. A message whose length
/// is an exact multiple of the chunk size is merged with the next one.
#[derive(Debug)]
pub struct ShortReadFramer {
    chunk_size: usize,
    pending: Vec<u8>,
}

impl ShortReadFramer {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            pending: Vec::new(),
        }
    }
}

impl Default for ShortReadFramer {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl Framer for ShortReadFramer {
    fn read_size(&self) -> usize {
        self.chunk_size
    }

    fn feed(&mut self, read: &[u8]) -> Vec<RawFrame> {
        self.pending.extend_from_slice(read);
        if read.len() >= self.chunk_size {
            return Vec::new();
        }

        let block = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&block);
        match decode_frame(&text) {
            Ok(frame) => vec![frame],
            Err(err) => {
                debug!(event = "frame_discarded", reason = %err, bytes = block.len());
                Vec::new()
            }
        }
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}

/// Line-oriented `text/event-stream` framing: `event:` and `data:` fields
/// accumulate until a blank line. Comment lines and other fields are skipped.
#[derive(Debug, Default)]
pub struct LineFramer {
    line: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    fn process_line(&mut self, line: &str) -> Option<RawFrame> {
        if line.is_empty() {
            if self.event.is_none() && self.data.is_empty() {
                return None;
            }
            let event = self
                .event
                .take()
                .unwrap_or_else(|| MESSAGE_TAG.to_string());
            let data = std::mem::take(&mut self.data).join("\n");
            return Some(RawFrame::new(event, data));
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => self.event = Some(value.trim().to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }
}

impl Framer for LineFramer {
    fn feed(&mut self, read: &[u8]) -> Vec<RawFrame> {
        self.line.extend_from_slice(read);

        let mut frames = Vec::new();
        while let Some(newline) = self.line.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.line.drain(..=newline).collect();
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim_end_matches('\n').trim_end_matches('\r');
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn reset(&mut self) {
        self.line.clear();
        self.event = None;
        self.data.clear();
    }
}

/// Selects the framer a new stream connection uses.
#[derive(Clone)]
pub enum FramerKind {
    /// [`ShortReadFramer`] with the given chunk size.
    ShortRead { chunk_size: usize },
    /// [`LineFramer`].
    Lines,
    /// Caller-provided framer factory.
    Custom(Arc<dyn Fn() -> Box<dyn Framer> + Send + Sync>),
}

impl FramerKind {
    pub fn build(&self) -> Box<dyn Framer> {
        match self {
            Self::ShortRead { chunk_size } => Box::new(ShortReadFramer::new(*chunk_size)),
            Self::Lines => Box::new(LineFramer::new()),
            Self::Custom(factory) => factory(),
        }
    }
}

impl Default for FramerKind {
    fn default() -> Self {
        Self::ShortRead {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl fmt::Debug for FramerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortRead { chunk_size } => f
                .debug_struct("ShortRead")
                .field("chunk_size", chunk_size)
                .finish(),
            Self::Lines => f.write_str("Lines"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        decode_frame, FrameError, Framer, FramerKind, LineFramer, ShortReadFramer,
        DEFAULT_CHUNK_SIZE,
    };
    use crate::stream::proto::RawFrame;

    #[test]
    fn decodes_stream_open_frame() {
        let frame = decode_frame("event:stream-open\ndata:\n").expect("decode");
        assert_eq!(frame, RawFrame::new("stream-open", ""));
    }

    #[test]
    fn decodes_message_after_leading_noise() {
        let frame = decode_frame(
            "noise before event:message\ndata:{\"event_id\":5,\"event_type\":\"x\"}\n",
        )
        .expect("decode");
        assert_eq!(
            frame,
            RawFrame::new("message", "{\"event_id\":5,\"event_type\":\"x\"}")
        );
    }

    #[test]
    fn decoding_is_deterministic() {
        let text = "event: message\ndata: {\"event_id\":1}\n\n";
        assert_eq!(decode_frame(text), decode_frame(text));
        assert_eq!(
            decode_frame(text).expect("decode"),
            RawFrame::new("message", "{\"event_id\":1}")
        );
    }

    #[test]
    fn rejects_block_without_event_marker() {
        assert_eq!(
            decode_frame(": keep-alive\n\n"),
            Err(FrameError::MissingEventMarker)
        );
    }

    #[test]
    fn rejects_event_without_following_line() {
        assert_eq!(
            decode_frame("event:stream-open"),
            Err(FrameError::MissingPayload)
        );
    }

    #[test]
    fn short_read_ends_frame() {
        let mut framer = ShortReadFramer::new(8);

        assert!(framer.feed(b"event:me").is_empty());
        assert_eq!(framer.feed(b"ssage\n"), vec![RawFrame::new("message", "")]);
    }

    #[test]
    fn full_reads_accumulate_until_short_read() {
        let mut framer = ShortReadFramer::new(4);

        assert!(framer.feed(b"even").is_empty());
        assert!(framer.feed(b"t:x\n").is_empty());
        assert_eq!(framer.feed(b"da"), vec![RawFrame::new("x", "da")]);
    }

    #[test]
    fn short_read_without_marker_yields_nothing_and_recovers() {
        let mut framer = ShortReadFramer::default();

        assert!(framer.feed(b"garbage without descriptor\n").is_empty());
        assert_eq!(
            framer.feed(b"event:stream-open\ndata:\n"),
            vec![RawFrame::new("stream-open", "")]
        );
    }

    #[test]
    fn frame_on_exact_chunk_boundary_merges_with_next() {
        let mut framer = ShortReadFramer::new(16);
        let first = b"event:a\ndata:1\n\n";
        assert_eq!(first.len(), 16);

        assert!(framer.feed(first).is_empty());
        let frames = framer.feed(b"event:b\ndata:2\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "a");
    }

    #[test]
    fn line_framer_joins_multi_line_data() {
        let mut framer = LineFramer::new();
        let frames = framer.feed(b"event: message\ndata: {\"a\":\ndata: 1}\n\n");

        assert_eq!(frames, vec![RawFrame::new("message", "{\"a\":\n1}")]);
    }

    #[test]
    fn line_framer_handles_split_reads_and_comments() {
        let mut framer = LineFramer::new();

        assert!(framer.feed(b": ping\r\nevent: stream-").is_empty());
        assert!(framer.feed(b"open\r\ndata:\r\n").is_empty());
        assert_eq!(
            framer.feed(b"\r\nevent: message\ndata: {}\n\n"),
            vec![
                RawFrame::new("stream-open", ""),
                RawFrame::new("message", "{}"),
            ]
        );
    }

    #[test]
    fn line_framer_reset_drops_partial_frame() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"event: message\ndata: partial").is_empty());

        framer.reset();
        assert!(framer.feed(b"\n\n").is_empty());
    }

    #[test]
    fn default_kind_is_short_read() {
        let framer = FramerKind::default().build();
        assert_eq!(framer.read_size(), DEFAULT_CHUNK_SIZE);
    }
}
