//! Reassembly of JSON values from a fragmented stream.

use bytes::{Buf, BytesMut};
use serde_json::{Deserializer, Value};

use super::{
    DEFAULT_BUFFER_LIMIT,
    DecodeDiagnostic,
    DecodeError,
    Decoded,
    FrameDecoder,
    clamp_buffer_limit,
};
use crate::message::Message;

/// Decoder for concatenated or newline-delimited JSON values.
///
/// Values may be split across any number of chunks. When the buffered input
/// cannot be parsed, the decoder drops bytes from the start of the buffer up
/// to the next point where a value could begin: the newline following the
/// error, or the next `{` or `[` at or after it. Each skipped run is reported
/// as a [`DecodeDiagnostic`] and any value behind it is still decoded.
///
/// # Examples
///
/// ```
/// use relink::{
///     decoder::{FrameDecoder, JsonFrameDecoder},
///     message::Message,
/// };
/// use serde_json::json;
///
/// let mut decoder = JsonFrameDecoder::default();
/// assert!(decoder.feed(br#"{"id":1,"#).expect("feed").is_empty());
/// let items = decoder.feed(br#""name":"test"}"#).expect("feed");
/// assert_eq!(
///     items[0].as_message(),
///     Some(&Message::Json(json!({"id": 1, "name": "test"})))
/// );
/// ```
#[derive(Debug)]
pub struct JsonFrameDecoder {
    buffer: BytesMut,
    max_buffer: usize,
    scan: Scan,
}

enum Step {
    Value(Value, usize),
    Incomplete,
    Malformed { reason: String, skip: usize },
}

/// Progress through a partially received object or array at the front of
/// the buffer, kept between feeds.
#[derive(Debug, Default)]
struct Scan {
    /// Bytes of the buffer already scanned.
    offset: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// Buffer length at the last full parse that found the value incomplete.
    parsed: usize,
}

impl Scan {
    /// Continue scanning `buffer` and return the length of the leading
    /// container once its brackets balance.
    fn advance(&mut self, buffer: &[u8]) -> Option<usize> {
        let start = self.offset;
        for (index, &byte) in buffer.iter().enumerate().skip(start) {
            self.offset = index + 1;
            if self.in_string {
                match byte {
                    _ if self.escaped => self.escaped = false,
                    b'\\' => self.escaped = true,
                    b'"' => self.in_string = false,
                    _ => {}
                }
                continue;
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(self.offset);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Whether a full parse of `len` buffered bytes is due. Full parses of an
    /// incomplete container happen only when the buffer has doubled since the
    /// last one, which keeps total parsing work linear in the input.
    fn parse_due(&self, len: usize) -> bool {
        self.parsed == 0 || len >= self.parsed.saturating_mul(2)
    }
}

impl JsonFrameDecoder {
    /// Construct a decoder retaining at most `max_buffer` bytes of partial
    /// input.
    #[must_use]
    pub fn new(max_buffer: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_buffer: clamp_buffer_limit(max_buffer),
            scan: Scan::default(),
        }
    }

    /// Return the configured buffer limit.
    #[must_use]
    pub const fn max_buffer(&self) -> usize { self.max_buffer }

    fn next_step(&mut self) -> Step {
        if !matches!(self.buffer.first(), Some(b'{' | b'[')) {
            return self.parse(self.buffer.len());
        }
        if let Some(end) = self.scan.advance(&self.buffer) {
            return self.parse(end);
        }
        if !self.scan.parse_due(self.buffer.len()) {
            return Step::Incomplete;
        }
        let step = self.parse(self.buffer.len());
        if matches!(step, Step::Incomplete) {
            self.scan.parsed = self.buffer.len();
        }
        step
    }

    /// Parse the first value within the leading `len` bytes.
    fn parse(&self, len: usize) -> Step {
        let input = &self.buffer[..len];
        let mut values = Deserializer::from_slice(input).into_iter::<Value>();
        match values.next() {
            None => Step::Incomplete,
            // A bare number at the end of the buffer may still be growing.
            Some(Ok(Value::Number(_))) if values.byte_offset() == self.buffer.len() => {
                Step::Incomplete
            }
            Some(Ok(value)) => Step::Value(value, values.byte_offset()),
            Some(Err(e)) if e.is_eof() => Step::Incomplete,
            Some(Err(e)) => Step::Malformed {
                skip: self.resync_point(e.line(), e.column()),
                reason: e.to_string(),
            },
        }
    }

    /// Number of bytes to drop after a parse error reported at `line` and
    /// `column` (both 1-based). Always at least one.
    fn resync_point(&self, line: usize, column: usize) -> usize {
        let line_start = match line.checked_sub(2) {
            None => 0,
            Some(skipped) => self
                .buffer
                .iter()
                .enumerate()
                .filter(|&(_, &byte)| byte == b'\n')
                .nth(skipped)
                .map_or(self.buffer.len(), |(newline, _)| newline + 1),
        };
        let error_at = (line_start + column.saturating_sub(1)).clamp(1, self.buffer.len());
        self.buffer[error_at..]
            .iter()
            .position(|byte| matches!(byte, b'\n' | b'{' | b'['))
            .map_or(self.buffer.len(), |found| {
                let at = error_at + found;
                if self.buffer[at] == b'\n' { at + 1 } else { at }
            })
    }

    fn consume(&mut self, len: usize) {
        self.buffer.advance(len);
        self.scan = Scan::default();
    }

    fn skip_whitespace(&mut self) {
        let leading = self
            .buffer
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(self.buffer.len());
        if leading > 0 {
            self.consume(leading);
        }
    }
}

impl Default for JsonFrameDecoder {
    fn default() -> Self { Self::new(DEFAULT_BUFFER_LIMIT) }
}

impl FrameDecoder for JsonFrameDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Decoded>, DecodeError> {
        self.buffer.extend_from_slice(chunk);
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.buffer.is_empty() {
                break;
            }
            match self.next_step() {
                Step::Value(value, consumed) => {
                    self.consume(consumed);
                    items.push(Decoded::Message(Message::Json(value)));
                }
                Step::Incomplete => break,
                Step::Malformed { reason, skip } => {
                    self.consume(skip);
                    tracing::debug!(discarded = skip, %reason, "discarding malformed JSON input");
                    items.push(Decoded::Diagnostic(DecodeDiagnostic::new(reason, skip)));
                }
            }
        }

        if self.buffer.len() > self.max_buffer {
            let buffered = self.buffer.len();
            self.reset();
            return Err(DecodeError::BufferOverflow {
                buffered,
                max: self.max_buffer,
            });
        }
        Ok(items)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.scan = Scan::default();
    }

    fn buffered(&self) -> usize { self.buffer.len() }
}
