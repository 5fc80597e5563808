//! Byte-stuffed frame codec for the cloud stream.
//!
//! # Frame Format
//!
//! Each frame on the wire is:
//! - 1 byte: `START` (0x42)
//! - N bytes: escaped payload
//! - 1 byte: `END` (0x43)
//!
//! Any payload byte equal to `START`, `END` or `ESCAPE` is replaced on the
//! wire by the two-byte sequence `ESCAPE, byte | 0x20`. Because `END` is
//! always escaped inside a payload, the first raw `END` in the stream is
//! always a genuine frame terminator, which is what makes scan-for-`END`
//! reassembly of fragmented TCP reads correct.

/// Frame start delimiter.
pub const START: u8 = 0x42;

/// Frame end delimiter.
pub const END: u8 = 0x43;

/// Escape marker preceding a stuffed byte.
pub const ESCAPE: u8 = 0x44;

/// Bit set on an escaped byte to move it out of the reserved range.
const ESCAPE_MASK: u8 = 0x20;

/// Encode a payload into a self-delimiting wire packet.
///
/// The output contains no unescaped `START`/`END` bytes except the two
/// delimiters themselves.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(payload.len() + 2);
    packet.push(START);

    for &byte in payload {
        match byte {
            START | END | ESCAPE => {
                packet.push(ESCAPE);
                packet.push(byte | ESCAPE_MASK);
            }
            _ => packet.push(byte),
        }
    }

    packet.push(END);
    packet
}

/// Streaming reassembly buffer for inbound wire bytes.
///
/// Bytes are appended as they arrive from the transport; complete payloads
/// are drained with [`FrameBuffer::next_payload`]. A single read may carry
/// several frames, and a frame (including an escape pair) may be split
/// across reads at any position - leftover bytes simply stay buffered.
///
/// The buffer belongs to one session and is discarded with it on disconnect.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty reassembly buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes received from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes currently buffered.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer holds no pending bytes.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drain the next complete payload, if a full frame has arrived.
    ///
    /// Returns `None` while no `END` byte is buffered; the partial frame is
    /// kept for the next read. A stray or duplicate `START` inside the
    /// scanned region resets the payload accumulator, discarding whatever
    /// was collected before it rather than producing a corrupt payload.
    pub fn next_payload(&mut self) -> Option<Vec<u8>> {
        let end = self.buf.iter().position(|&b| b == END)?;

        let mut payload = Vec::with_capacity(end);
        let mut i = 0;
        while i < end {
            match self.buf[i] {
                START => payload.clear(),
                ESCAPE => {
                    // END bounds the scan, so the follow byte is present.
                    i += 1;
                    payload.push(self.buf[i] & !ESCAPE_MASK);
                }
                byte => payload.push(byte),
            }
            i += 1;
        }

        self.buf.drain(..=end);
        Some(payload)
    }
}
