//! Framing codec for the EPOS wire protocol
//!
//! Frames are UTF-8 JSON bodies terminated by control bytes:
//! - interim prompts end with ETX (0x03) alone, meaning more protocol
//!   activity follows on this exchange
//! - final terminal replies end with EOT (0x04) then ETX, marking the
//!   exchange as finished
//!
//! The decoder buffers across socket reads and never emits a partial
//! message. A zero byte is the stream-closed sentinel.

use crate::constants::MAX_FRAME_SIZE;
use crate::protocol::{Request, Response};
use bytes::Bytes;

/// End of text - terminates every frame
pub const ETX: u8 = 0x03;
/// End of transmission - precedes ETX on final replies
pub const EOT: u8 = 0x04;
/// Stream-closed sentinel
pub const NUL: u8 = 0x00;

/// One decoded unit from the byte stream
#[derive(Debug, Clone)]
pub enum DecodedFrame {
    /// A complete, well-formed request
    Request(Request),
    /// A delimited body that failed to parse; the connection stays usable
    Malformed { reason: String },
    /// Empty accumulation before a marker - the peer is gone
    ConnectionClosed,
}

/// Encode a final terminal reply (EOT + ETX terminated)
pub fn encode_final(response: &Response) -> Bytes {
    encode(response, true)
}

/// Encode an interim callback prompt or notice (ETX terminated)
pub fn encode_prompt(response: &Response) -> Bytes {
    encode(response, false)
}

fn encode(response: &Response, is_final: bool) -> Bytes {
    // Response serialization cannot fail: all fields are plain data
    let mut out = serde_json::to_vec(response).expect("response serialization");
    if is_final {
        out.push(EOT);
    }
    out.push(ETX);
    Bytes::from(out)
}

/// Incremental frame decoder
///
/// Feed raw socket bytes in any chunking; complete frames come out in
/// arrival order.
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
        }
    }

    /// Feed new data and extract every complete frame
    pub fn feed(&mut self, data: &[u8]) -> Vec<DecodedFrame> {
        let mut frames = Vec::new();

        for &byte in data {
            if byte == ETX || byte == NUL {
                if self.buffer.is_empty() {
                    frames.push(DecodedFrame::ConnectionClosed);
                } else {
                    frames.push(self.parse_buffer());
                }
                continue;
            }

            self.buffer.push(byte);

            // A frame this large is never legitimate; reject the body but
            // keep the connection alive for the next delimiter.
            if self.buffer.len() > MAX_FRAME_SIZE {
                self.buffer.clear();
                frames.push(DecodedFrame::Malformed {
                    reason: format!("frame exceeds {} bytes", MAX_FRAME_SIZE),
                });
            }
        }

        frames
    }

    fn parse_buffer(&mut self) -> DecodedFrame {
        let body = std::mem::take(&mut self.buffer);
        match serde_json::from_slice::<Request>(&body) {
            Ok(request) => DecodedFrame::Request(request),
            Err(e) => DecodedFrame::Malformed {
                reason: e.to_string(),
            },
        }
    }
}
