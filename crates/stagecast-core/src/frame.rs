use crate::payload::text;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;
pub const DEFAULT_EVENT_NAME: &str = "message";

const FRAME_DELIMITER: &[u8] = b"\n\n";

/// One decoded `(event name, payload)` unit of the push stream.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
    pub event_name: String,
    pub payload: Value,
}

impl EventFrame {
    pub fn new(event_name: impl Into<String>, payload: Value) -> Self {
        Self {
            event_name: event_name.into(),
            payload,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        text(&self.payload, &["session_id"])
    }

    pub fn turn_id(&self) -> Option<&str> {
        text(&self.payload, &["turn_id"])
    }

    pub fn task_id(&self) -> Option<&str> {
        text(&self.payload, &["task_id"])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("buffer exceeds max size without delimiter: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },
    #[error("frame is not valid utf-8: {0}")]
    Utf8(String),
    #[error("frame '{event_name}' has no data line")]
    MissingData { event_name: String },
    #[error("frame '{event_name}' payload is not valid json: {message}")]
    Decode { event_name: String, message: String },
    #[error("frame encode failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Default)]
pub struct DecodeReport {
    pub frames: Vec<EventFrame>,
    pub errors: Vec<FrameError>,
}

impl DecodeReport {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.errors.is_empty()
    }

    fn push_frame(&mut self, frame: EventFrame) {
        self.frames.push(frame);
    }

    fn push_error(&mut self, error: FrameError) {
        self.errors.push(error);
    }
}

/// Incremental decoder for the `event:` / `data:` push stream.
///
/// Chunks may split a frame anywhere, including inside a multi-byte character or
/// exactly on the blank-line separator; the carry-over buffer keeps the trailing
/// incomplete segment until its delimiter arrives. A decoder belongs to exactly one
/// connection and cannot be rewound.
pub struct SseFrameDecoder {
    max_frame_bytes: usize,
    pending: Vec<u8>,
    scanned: usize,
}

impl SseFrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: Vec::new(),
            scanned: 0,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn push_str(&mut self, chunk: &str) -> DecodeReport {
        self.push_chunk(chunk.as_bytes())
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport {
        let mut report = DecodeReport::default();
        if !chunk.is_empty() {
            self.pending.extend_from_slice(chunk);
        }

        while let Some(delimiter_idx) = self.find_delimiter() {
            let segment = self
                .pending
                .drain(..delimiter_idx + FRAME_DELIMITER.len())
                .collect::<Vec<u8>>();
            self.scanned = 0;
            self.decode_segment(&segment[..delimiter_idx], &mut report);
        }
        // A delimiter may straddle the next chunk boundary, so rescan the last byte.
        self.scanned = self.pending.len().saturating_sub(1);

        if self.pending.len() > self.max_frame_bytes {
            report.push_error(FrameError::OversizedBuffer {
                size: self.pending.len(),
                max: self.max_frame_bytes,
            });
            self.pending.clear();
            self.scanned = 0;
        }

        report
    }

    /// Flushes a trailing segment that never received its blank-line separator.
    pub fn finish(&mut self) -> DecodeReport {
        let mut report = DecodeReport::default();
        if self.pending.is_empty() {
            return report;
        }
        let segment = std::mem::take(&mut self.pending);
        self.scanned = 0;
        self.decode_segment(&segment, &mut report);
        report
    }

    fn find_delimiter(&self) -> Option<usize> {
        let start = self.scanned.min(self.pending.len());
        self.pending[start..]
            .windows(FRAME_DELIMITER.len())
            .position(|window| window == FRAME_DELIMITER)
            .map(|idx| idx + start)
    }

    fn decode_segment(&self, segment: &[u8], report: &mut DecodeReport) {
        if segment.len() > self.max_frame_bytes {
            report.push_error(FrameError::OversizedFrame {
                size: segment.len(),
                max: self.max_frame_bytes,
            });
            return;
        }
        let text = match std::str::from_utf8(segment) {
            Ok(text) => text,
            Err(err) => {
                report.push_error(FrameError::Utf8(err.to_string()));
                return;
            }
        };
        match parse_segment(text) {
            Ok(Some(frame)) => report.push_frame(frame),
            Ok(None) => {}
            Err(err) => report.push_error(err),
        }
    }
}

impl Default for SseFrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

fn parse_segment(text: &str) -> Result<Option<EventFrame>, FrameError> {
    let mut event_name: Option<&str> = None;
    let mut data: Option<&str> = None;
    let mut saw_field = false;

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            saw_field = true;
            let name = rest.trim();
            if !name.is_empty() {
                event_name = Some(name);
            }
        } else if let Some(rest) = line.strip_prefix("data:") {
            saw_field = true;
            let value = rest.trim();
            if data.is_none() && !value.is_empty() {
                data = Some(value);
            }
        }
    }

    // Keep-alive comments and id/retry-only segments carry no frame.
    if !saw_field {
        return Ok(None);
    }

    let event_name = event_name.unwrap_or(DEFAULT_EVENT_NAME).to_string();
    let Some(data) = data else {
        return Err(FrameError::MissingData { event_name });
    };
    match serde_json::from_str::<Value>(data) {
        Ok(payload) => Ok(Some(EventFrame {
            event_name,
            payload,
        })),
        Err(err) => Err(FrameError::Decode {
            event_name,
            message: err.to_string(),
        }),
    }
}

/// Encodes one value as a newline-terminated JSON line for downstream sinks.
/// Output lines are not bounded by the input frame limit.
pub fn encode_ndjson<T: Serialize>(value: &T) -> Result<Vec<u8>, FrameError> {
    let mut encoded =
        serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    encoded.push(b'\n');
    Ok(encoded)
}
