//! Newline-delimited framing for async streams

use crate::ProtocolError;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum reply line size (1MB)
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

/// Line codec for the control protocol
///
/// Reads are buffered internally; bytes received past the last decoded line
/// stay in the buffer and can be recovered with [`LineCodec::take_buffered`]
/// when the connection switches to raw streaming.
#[derive(Debug)]
pub struct LineCodec {
    /// Read buffer for incoming data
    read_buf: BytesMut,
    /// Maximum line size allowed
    max_line_size: usize,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    /// Create a new line codec with default settings
    pub fn new() -> Self {
        Self::with_max_line_size(MAX_LINE_SIZE)
    }

    /// Create a new line codec with custom max line size
    pub fn with_max_line_size(max_line_size: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            max_line_size,
        }
    }

    /// Encode a line, appending the terminating newline if missing
    pub fn encode_line(&self, line: &str) -> Bytes {
        let mut buf = BytesMut::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        if !line.ends_with('\n') {
            buf.extend_from_slice(b"\n");
        }
        buf.freeze()
    }

    /// Write a line to an async writer and flush it
    pub async fn write_line<W>(&self, writer: &mut W, line: &str) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = self.encode_line(line);
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read a line from an async reader
    ///
    /// Leading and trailing whitespace is stripped. Returns `None` once the
    /// stream is exhausted; a final unterminated line is still returned.
    pub async fn read_line<R>(&mut self, reader: &mut R) -> Result<Option<String>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(line) = self.try_decode_line()? {
                return Ok(Some(line));
            }

            let mut temp_buf = [0u8; 8192];
            let n = reader.read(&mut temp_buf).await?;

            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                let rest = self.read_buf.split();
                return Self::decode(&rest).map(Some);
            }

            self.read_buf.extend_from_slice(&temp_buf[..n]);
        }
    }

    /// Try to decode a line from the internal buffer
    pub fn try_decode_line(&mut self) -> Result<Option<String>, ProtocolError> {
        match self.read_buf.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                let line = self.read_buf.split_to(pos + 1);
                Self::decode(&line).map(Some)
            }
            None if self.read_buf.len() > self.max_line_size => Err(ProtocolError::LineTooLong {
                size: self.read_buf.len(),
                max: self.max_line_size,
            }),
            None => Ok(None),
        }
    }

    fn decode(raw: &[u8]) -> Result<String, ProtocolError> {
        let text = std::str::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(text.trim().to_string())
    }

    /// Take whatever has been read past the last decoded line
    pub fn take_buffered(&mut self) -> Bytes {
        self.read_buf.split().freeze()
    }

    /// Get the current buffer size
    pub fn buffer_size(&self) -> usize {
        self.read_buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_write_read_line() {
        let codec = LineCodec::new();
        let mut buffer = Vec::new();
        codec.write_line(&mut buffer, "status").await.unwrap();
        assert_eq!(buffer, b"status\n");

        let mut reader = LineCodec::new();
        let mut cursor = Cursor::new(buffer);
        assert_eq!(reader.read_line(&mut cursor).await.unwrap().as_deref(), Some("status"));
        assert!(reader.read_line(&mut cursor).await.unwrap().is_none());
    }

    #[test]
    fn test_encode_keeps_existing_newline() {
        let codec = LineCodec::new();
        assert_eq!(codec.encode_line("ping\n"), Bytes::from_static(b"ping\n"));
    }

    #[tokio::test]
    async fn test_multiple_lines_and_leftover() {
        let mut codec = LineCodec::new();
        let mut cursor = Cursor::new(b"Streaming results for work unit abc\r\nHELLO".to_vec());

        let line = codec.read_line(&mut cursor).await.unwrap();
        assert_eq!(line.as_deref(), Some("Streaming results for work unit abc"));
        assert_eq!(codec.take_buffered(), Bytes::from_static(b"HELLO"));
        assert_eq!(codec.buffer_size(), 0);
    }

    #[tokio::test]
    async fn test_unterminated_final_line() {
        let mut codec = LineCodec::new();
        let mut cursor = Cursor::new(b"{\"a\": 1}".to_vec());
        assert_eq!(codec.read_line(&mut cursor).await.unwrap().as_deref(), Some("{\"a\": 1}"));
        assert!(codec.read_line(&mut cursor).await.unwrap().is_none());
    }

    #[test]
    fn test_partial_line_decoding() {
        let mut codec = LineCodec::new();
        codec.read_buf.extend_from_slice(b"Receptor Con");
        assert!(codec.try_decode_line().unwrap().is_none());

        codec.read_buf.extend_from_slice(b"trol, node foo\n");
        assert_eq!(codec.try_decode_line().unwrap().as_deref(), Some("Receptor Control, node foo"));
    }

    #[test]
    fn test_line_too_long() {
        let mut codec = LineCodec::with_max_line_size(8);
        codec.read_buf.extend_from_slice(b"0123456789");
        assert!(matches!(
            codec.try_decode_line(),
            Err(ProtocolError::LineTooLong { size: 10, max: 8 })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut codec = LineCodec::new();
        codec.read_buf.extend_from_slice(&[0xff, 0xfe, b'\n']);
        assert!(matches!(codec.try_decode_line(), Err(ProtocolError::InvalidUtf8)));
    }

    proptest! {
        #[test]
        fn test_lines_survive_arbitrary_chunking(
            lines in prop::collection::vec("[a-zA-Z0-9 {}:\",]{0,40}", 1..10),
            chunk in 1usize..16
        ) {
            tokio_test::block_on(async {
                let codec = LineCodec::new();
                let mut wire = Vec::new();
                for line in &lines {
                    codec.write_line(&mut wire, line).await?;
                }

                let mut reader = LineCodec::new();
                let mut decoded = Vec::new();
                for piece in wire.chunks(chunk) {
                    reader.read_buf.extend_from_slice(piece);
                    while let Some(line) = reader.try_decode_line()? {
                        decoded.push(line);
                    }
                }

                let expected: Vec<String> = lines.iter().map(|l| l.trim().to_string()).collect();
                prop_assert_eq!(decoded, expected);
                Ok(())
            })?;
        }
    }
}
