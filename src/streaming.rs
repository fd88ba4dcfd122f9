//! Frame decoding for server-sent-event style response bodies.
//!
//! Bytes arrive in chunks split at arbitrary points, including inside a
//! multi-byte UTF-8 sequence or inside a frame. The decoder buffers until a
//! blank line closes a frame, then yields that frame's payload.

use std::collections::VecDeque;

const FRAME_SEPARATOR: &str = "\n\n";
const PAYLOAD_MARKER: &str = "data:";

/// Incremental decoder turning body chunks into frame payloads
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Undecoded tail of the previous chunk (an incomplete UTF-8 sequence)
    pending_bytes: Vec<u8>,
    /// Decoded text not yet closed by a separator
    text_buffer: String,
    /// Payloads of complete frames, oldest first
    ready: VecDeque<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk. Complete frames become available via
    /// [`next_payload`](Self::next_payload).
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending_bytes.extend_from_slice(chunk);
        let text = self.decode_pending();
        // JSON payloads never carry raw CRs, so dropping them only affects line endings.
        self.text_buffer.extend(text.chars().filter(|c| *c != '\r'));

        while let Some(pos) = self.text_buffer.find(FRAME_SEPARATOR) {
            let frame: String = self.text_buffer.drain(..pos + FRAME_SEPARATOR.len()).collect();
            if let Some(payload) = frame_payload(&frame[..pos]) {
                self.ready.push_back(payload.to_string());
            }
        }
    }

    /// Next payload from a complete frame, in arrival order.
    pub fn next_payload(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    /// Drain every payload decoded so far.
    pub fn drain(&mut self) -> impl Iterator<Item = String> + '_ {
        self.ready.drain(..)
    }

    /// End of stream. A trailing partial frame is truncated and never
    /// delivered; returns whether anything was discarded.
    pub fn finish(&mut self) -> bool {
        let discarded = !self.text_buffer.trim().is_empty() || !self.pending_bytes.is_empty();
        if discarded {
            tracing::debug!(
                bytes = self.text_buffer.len() + self.pending_bytes.len(),
                "discarding truncated frame at end of stream"
            );
        }
        self.text_buffer.clear();
        self.pending_bytes.clear();
        discarded
    }

    /// Decode as much of `pending_bytes` as forms valid UTF-8, keeping an
    /// incomplete trailing sequence for the next chunk.
    fn decode_pending(&mut self) -> String {
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending_bytes.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending_bytes[..valid]));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending_bytes.drain(..valid + bad);
                        }
                        None => {
                            self.pending_bytes.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }
}

/// Payload of the first `data:` line in a frame, marker stripped.
fn frame_payload(frame: &str) -> Option<&str> {
    frame.lines().find_map(|line| {
        line.strip_prefix(PAYLOAD_MARKER)
            .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
    })
}
