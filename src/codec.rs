//! Line framing over a byte stream.
//!
//! [`LineCodec`] assembles raw IRC lines from arbitrary read chunks:
//! splits on `\n`, strips one trailing `\r`, and decodes each assembled
//! line with a configurable encoding (UTF-8 by default). Decoding happens
//! per line, never per chunk, so multi-byte sequences split across reads
//! survive intact. A partial line left over when the stream closes is
//! discarded, not delivered.

use bytes::{BufMut, BytesMut};
use encoding::Encoding;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

/// Maximum accepted line length in bytes, including tags.
pub const MAX_LINE_LEN: usize = 8191;

/// Framing codec for raw IRC lines.
pub struct LineCodec {
    encoding: &'static Encoding,
    /// Resume position for the newline scan across partial reads.
    next_index: usize,
}

impl LineCodec {
    /// Create a codec from an encoding label (e.g. `"utf-8"`, `"latin1"`).
    pub fn new(label: &str) -> Result<Self, ProtocolError> {
        let encoding = Encoding::for_label(label.as_bytes())
            .ok_or_else(|| ProtocolError::UnknownEncoding(label.to_string()))?;
        Ok(Self {
            encoding,
            next_index: 0,
        })
    }

    /// Create a UTF-8 codec.
    pub fn utf8() -> Self {
        Self {
            encoding: encoding::UTF_8,
            next_index: 0,
        }
    }

    fn decode_line(&self, bytes: &[u8]) -> String {
        let bytes = match bytes.last() {
            Some(b'\r') => &bytes[..bytes.len() - 1],
            _ => bytes,
        };
        // Lossy per-line decode: undecodable sequences become U+FFFD
        // rather than poisoning the connection.
        self.encoding.decode_without_bom_handling(bytes).0.into_owned()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        if let Some(offset) = src[self.next_index..].iter().position(|&b| b == b'\n') {
            let end = self.next_index + offset;
            let frame = src.split_to(end + 1);
            self.next_index = 0;
            return Ok(Some(self.decode_line(&frame[..frame.len() - 1])));
        }

        if src.len() > MAX_LINE_LEN {
            return Err(ProtocolError::MessageTooLong(src.len()));
        }
        self.next_index = src.len();
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                // Connection closed mid-line: drop the partial tail.
                src.clear();
                self.next_index = 0;
                Ok(None)
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let (bytes, _, _) = self.encoding.encode(&line);
        if bytes.len() + 2 > MAX_LINE_LEN {
            return Err(ProtocolError::MessageTooLong(bytes.len()));
        }
        dst.reserve(bytes.len() + 2);
        dst.put_slice(&bytes);
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
