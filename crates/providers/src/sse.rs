//! Incremental SSE decoding for the streaming adapters.
//!
//! [`SseDecoder`] turns an arbitrary byte-chunked response body into
//! [`SseFrame`]s: it joins multi-line `data:` fields with newlines per
//! the SSE spec, keeps the `event:` name (the Anthropic dialect routes
//! on it), tolerates CRLF delimiters, and skips comment lines. A frame
//! that is still incomplete when the body closes can be recovered with
//! [`SseDecoder::finish`].
//!
//! [`sse_event_stream`] drives a decoder over a `reqwest` body and maps
//! each frame through a dialect-specific parser, guaranteeing that the
//! resulting stream always terminates with a `Done` event even when the
//! upstream connection drops early.

use futures_util::StreamExt;

use crate::util::from_reqwest;
use sb_domain::error::Result;
use sb_domain::stream::{BoxStream, StopReason, StreamEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    /// The `event:` field, when the dialect sends one.
    pub event: Option<String>,
    /// All `data:` lines of the frame, joined with `\n`.
    pub data: String,
}

impl SseFrame {
    #[cfg(test)]
    pub fn data_only(data: &str) -> Self {
        Self {
            event: None,
            data: data.to_owned(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.event.as_deref()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decoder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stateful line decoder; chunk boundaries may fall anywhere, including
/// inside a UTF-8 sequence of the next line's text.
#[derive(Default)]
pub(crate) struct SseDecoder {
    carry: Vec<u8>,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a body chunk and return every frame it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.carry.extend_from_slice(chunk);

        let mut frames = Vec::new();
        // Process whole lines only; the tail stays carried.
        while let Some(newline) = self.carry.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.carry.drain(..=newline).collect();
            let mut line = String::from_utf8_lossy(&raw).into_owned();
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            if let Some(frame) = self.take_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush whatever an abruptly closed body left behind.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.carry.is_empty() {
            let raw = std::mem::take(&mut self.carry);
            let line = String::from_utf8_lossy(&raw).trim_end().to_owned();
            if let Some(frame) = self.take_line(&line) {
                return Some(frame);
            }
        }
        self.emit()
    }

    /// Apply one complete line; a blank line closes the pending frame.
    fn take_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.emit();
        }
        // Lines starting with ':' are keepalive comments.
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            // A field with no colon has an empty value.
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data_lines.push(value.to_owned()),
            // id / retry / unknown fields carry nothing we use.
            _ => {}
        }
        None
    }

    fn emit(&mut self) -> Option<SseFrame> {
        if self.data_lines.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseFrame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data_lines).join("\n"),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream driver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decode a response body into frames and map each through `parse`.
///
/// `parse` is the dialect: it may emit zero or more [`StreamEvent`]s per
/// frame and carries its own assembly state (`FnMut`). The stream opens
/// with `Start` and, if the dialect never produced a `Done` (body cut
/// short, malformed tail), closes with a synthetic clean one.
pub(crate) fn sse_event_stream<F>(
    response: reqwest::Response,
    mut parse: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(SseFrame) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        yield Ok(StreamEvent::Start);

        let mut decoder = SseDecoder::new();
        let mut saw_done = false;
        let mut body = response.bytes_stream();

        'read: while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break 'read;
                }
            };
            for frame in decoder.feed(&chunk) {
                for event in parse(frame) {
                    saw_done |= matches!(&event, Ok(StreamEvent::Done { .. }));
                    yield event;
                }
            }
        }

        if let Some(frame) = decoder.finish() {
            for event in parse(frame) {
                saw_done |= matches!(&event, Ok(StreamEvent::Done { .. }));
                yield event;
            }
        }

        if !saw_done {
            yield Ok(StreamEvent::Done {
                stop_reason: StopReason::EndTurn,
                usage: None,
            });
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
