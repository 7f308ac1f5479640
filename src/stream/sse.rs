//! Incremental SSE (Server-Sent Events) decoder.
//!
//! Reassembles frames from raw bytes that arrive at arbitrary boundaries,
//! following the field rules of the
//! [SSE specification](https://html.spec.whatwg.org/multipage/server-sent-events.html).
//! Buffering happens at the byte level, so a chunk edge may fall inside a
//! field, a line terminator or a multi-byte character.
use super::{SseEvent, SseMessage};
use memchr::memchr2;
use smallvec::SmallVec;

/// Literal data payload that ends an upstream completion stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const BOM: char = '\u{FEFF}';

/// Per-frame field accumulator.
#[derive(Default)]
struct FrameState {
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
    last_event_id: Option<String>,
}

impl FrameState {
    fn process_line(&mut self, line: &str, out: &mut Vec<SseMessage>) {
        if line.is_empty() {
            // Blank line = dispatch. A frame without data is dropped whole.
            if self.has_data {
                out.push(SseMessage::Event(SseEvent {
                    event: self.event_type.take(),
                    data: std::mem::take(&mut self.data_buffer),
                    id: self.last_event_id.clone(),
                }));
                self.has_data = false;
            } else {
                self.event_type = None;
            }
            return;
        }

        // Comment line
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.find(':') {
            Some(colon) => {
                let value = &line[colon + 1..];
                (&line[..colon], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "data" => {
                if self.has_data {
                    self.data_buffer.push('\n');
                } else {
                    self.has_data = true;
                }
                self.data_buffer.push_str(value);
            }
            "event" => self.event_type = Some(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id = Some(value.to_string());
                }
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(ms) = value.parse::<u64>() {
                        out.push(SseMessage::ReconnectInterval(ms));
                    }
                }
            }
            // Unknown field names are ignored
            _ => {}
        }
    }
}

/// Incremental SSE parser.
///
/// Feed it raw chunks and it yields fully-assembled [`SseMessage`]s in the
/// order their bytes were received. Partial frames stay buffered until a later
/// chunk completes them. Malformed lines are ignored, never raised.
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    /// Bytes of a UTF-8 sequence cut by a chunk edge.
    utf8_tail: SmallVec<[u8; 4]>,
    /// The previous scan ended on `\r`; a leading `\n` belongs to it.
    pending_cr: bool,
    started: bool,
    frame: FrameState,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            utf8_tail: SmallVec::new(),
            pending_cr: false,
            started: false,
            frame: FrameState::default(),
        }
    }

    /// Feed decoded text and return any complete messages.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseMessage> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed decoded text and append complete messages into `out`.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseMessage>) {
        self.push_text(chunk);
        self.scan(out);
    }

    /// Feed raw bytes and append complete messages into `out`.
    ///
    /// A multi-byte character split across calls is held back until its
    /// remaining bytes arrive. Invalid sequences decode to U+FFFD.
    pub fn feed_bytes_into(&mut self, chunk: &[u8], out: &mut Vec<SseMessage>) {
        if self.utf8_tail.is_empty() {
            self.decode_bytes(chunk);
        } else {
            let mut joined = Vec::with_capacity(self.utf8_tail.len() + chunk.len());
            joined.extend_from_slice(&self.utf8_tail);
            joined.extend_from_slice(chunk);
            self.utf8_tail.clear();
            self.decode_bytes(&joined);
        }
        self.scan(out);
    }

    /// Drop all buffered state, as if the parser were new.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Number of bytes held that do not yet form a complete line.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() - self.read_offset + self.utf8_tail.len()
    }

    fn decode_bytes(&mut self, mut bytes: &[u8]) {
        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    self.push_text(text);
                    return;
                }
                Err(e) => {
                    let (valid, rest) = bytes.split_at(e.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.push_text(text);
                    }
                    match e.error_len() {
                        Some(invalid_len) => {
                            self.push_text(char::REPLACEMENT_CHARACTER.encode_utf8(&mut [0; 4]));
                            bytes = &rest[invalid_len..];
                        }
                        None => {
                            self.utf8_tail.extend_from_slice(rest);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn push_text(&mut self, mut text: &str) {
        if !self.started && !text.is_empty() {
            self.started = true;
            text = text.strip_prefix(BOM).unwrap_or(text);
        }
        self.buffer.push_str(text);
    }

    fn scan(&mut self, out: &mut Vec<SseMessage>) {
        let len = self.buffer.len();
        let mut cursor = self.read_offset;
        if self.pending_cr && cursor < len {
            if self.buffer.as_bytes()[cursor] == b'\n' {
                cursor += 1;
            }
            self.pending_cr = false;
        }

        let mut line_start = cursor;
        while let Some(rel_pos) = memchr2(b'\n', b'\r', &self.buffer.as_bytes()[cursor..]) {
            let line_end = cursor + rel_pos;
            let terminator = self.buffer.as_bytes()[line_end];
            self.frame
                .process_line(&self.buffer[line_start..line_end], out);
            cursor = line_end + 1;
            if terminator == b'\r' {
                match self.buffer.as_bytes().get(cursor) {
                    Some(b'\n') => cursor += 1,
                    Some(_) => {}
                    None => self.pending_cr = true,
                }
            }
            line_start = cursor;
        }

        self.read_offset = line_start;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if an [`SseEvent`] carries the `[DONE]` sentinel.
#[must_use]
pub fn is_done_event(event: &SseEvent) -> bool {
    event.data.trim() == DONE_SENTINEL
}
