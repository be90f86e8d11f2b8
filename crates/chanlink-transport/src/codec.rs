use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Result, TransportError};

/// Default maximum frame length: 16 MiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Newline-delimited UTF-8 text framing.
///
/// Wire format:
/// ```text
/// ┌──────────────────────────────┬──────┐
/// │ UTF-8 text (no raw newlines) │ '\n' │
/// └──────────────────────────────┴──────┘
/// ```
///
/// A `\r` before the newline is stripped and blank lines are skipped, so
/// keepalive newlines never surface as messages.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_frame_len: usize,
    /// Bytes already scanned for a newline in the current buffer.
    next_index: usize,
}

impl LineCodec {
    /// Codec with the default maximum frame length.
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Codec with an explicit maximum frame length (newline excluded).
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            next_index: 0,
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Check that `text` can be written as one frame. Nothing is buffered
    /// when this fails, so the stream stays usable.
    pub fn check(&self, text: &str) -> Result<()> {
        check_len(text, self.max_frame_len)?;
        if text.contains('\n') {
            return Err(TransportError::EmbeddedNewline);
        }
        Ok(())
    }
}

/// Reject `text` when it is longer than `max` bytes.
pub fn check_len(text: &str, max: usize) -> Result<()> {
    if text.len() > max {
        return Err(TransportError::FrameTooLarge {
            size: text.len(),
            max,
        });
    }
    Ok(())
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        loop {
            let scan_from = self.next_index.min(src.len());
            let Some(offset) = src[scan_from..].iter().position(|b| *b == b'\n') else {
                if src.len() > self.max_frame_len {
                    return Err(TransportError::FrameTooLarge {
                        size: src.len(),
                        max: self.max_frame_len,
                    });
                }
                self.next_index = src.len();
                return Ok(None); // Need more data
            };

            let newline = scan_from + offset;
            self.next_index = 0;

            if newline > self.max_frame_len {
                return Err(TransportError::FrameTooLarge {
                    size: newline,
                    max: self.max_frame_len,
                });
            }

            let line = src.split_to(newline + 1);
            let text = line_to_text(&line[..newline])?;
            if text.is_empty() {
                continue;
            }
            return Ok(Some(text));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if let Some(text) = self.decode(src)? {
            return Ok(Some(text));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Final unterminated line.
        let rest = src.split_to(src.len());
        self.next_index = 0;
        let text = line_to_text(&rest)?;
        Ok((!text.is_empty()).then_some(text))
    }
}

impl<T: AsRef<str>> Encoder<T> for LineCodec {
    type Error = TransportError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let text = item.as_ref();
        self.check(text)?;
        dst.reserve(text.len() + 1);
        dst.put_slice(text.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

fn line_to_text(line: &[u8]) -> Result<String> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    std::str::from_utf8(line)
        .map(str::to_owned)
        .map_err(|_| TransportError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_single_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"cmd_id\":1}\n"[..]);

        let text = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(text, "{\"cmd_id\":1}");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"cmd_"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"id\":2}\n");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "{\"cmd_id\":2}");
    }

    #[test]
    fn decode_multiple_lines_and_skips_blank() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"first\r\n\n\nsecond\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "first");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "second");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_oversized_frame() {
        let mut codec = LineCodec::with_max_frame_len(4);
        let mut buf = BytesMut::from(&b"hello"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(TransportError::FrameTooLarge { size: 5, max: 4 })
        ));

        let mut codec = LineCodec::with_max_frame_len(4);
        let mut buf = BytesMut::from(&b"hello\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(TransportError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&[0xFF, 0xFE, b'\n'][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(TransportError::InvalidUtf8)
        ));
    }

    #[test]
    fn decode_eof_flushes_unterminated_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"tail"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap().unwrap(), "tail");
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn encode_appends_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("{\"x\":1}", &mut buf).unwrap();
        assert_eq!(&buf[..], b"{\"x\":1}\n");
    }

    #[test]
    fn encode_rejects_embedded_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode("a\nb", &mut buf),
            Err(TransportError::EmbeddedNewline)
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn encode_rejects_oversized_text_without_buffering() {
        let mut codec = LineCodec::with_max_frame_len(4);
        let mut buf = BytesMut::new();
        let err = codec.encode("12345", &mut buf).unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { size: 5, max: 4 }));
        assert!(err.is_message_rejected());
        assert!(buf.is_empty());

        codec.encode("1234", &mut buf).unwrap();
        assert_eq!(&buf[..], b"1234\n");
    }
}
