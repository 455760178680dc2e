use crate::buffer::Batch;
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use std::io::{Read, Write};
use thiserror::Error;

// Consumer-side guard against decompression bombs
const MAX_DECOMPRESSED_SIZE: u64 = 64 * 1024 * 1024; // 64MB
const ESTIMATED_LINE_SIZE: usize = 128;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("IO error during compression: {0}")]
    Io(#[from] std::io::Error),
    #[error("Batch is empty")]
    EmptyBatch,
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("Decompressed payload exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

/// Gzip codec for the wire payload: every line followed by `\n`, then
/// compressed as one stream.
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    level: Compression,
}

impl Compressor {
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }

    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }

    pub fn compress_batch(&self, batch: &Batch) -> Result<Vec<u8>, CompressionError> {
        self.compress_lines(batch.lines())
    }

    pub fn compress_lines<S: AsRef<str>>(&self, lines: &[S]) -> Result<Vec<u8>, CompressionError> {
        if lines.is_empty() {
            return Err(CompressionError::EmptyBatch);
        }

        let capacity = lines.len().saturating_mul(ESTIMATED_LINE_SIZE) / 4;
        let mut encoder = GzEncoder::new(Vec::with_capacity(capacity), self.level);
        for line in lines {
            encoder.write_all(line.as_ref().as_bytes())?;
            encoder.write_all(b"\n")?;
        }
        Ok(encoder.finish()?)
    }

    /// Inverse of [`Compressor::compress_lines`]: the newline-terminated text.
    pub fn decompress(&self, payload: &[u8]) -> Result<String, CompressionError> {
        let mut decoder = GzDecoder::new(payload).take(MAX_DECOMPRESSED_SIZE + 1);
        let mut bytes = Vec::new();
        decoder.read_to_end(&mut bytes)?;
        if bytes.len() as u64 > MAX_DECOMPRESSED_SIZE {
            return Err(CompressionError::TooLarge {
                limit: MAX_DECOMPRESSED_SIZE,
            });
        }
        Ok(String::from_utf8(bytes)?)
    }

    pub fn decompress_lines(&self, payload: &[u8]) -> Result<Vec<String>, CompressionError> {
        Ok(split_lines(&self.decompress(payload)?))
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits newline-terminated text back into lines. Only `\n` separates, so a
/// trailing `\r` stays part of its line.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split_terminator('\n').map(str::to_owned).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_preserves_text() {
        let compressor = Compressor::new();
        let lines = vec![
            "2024-01-01 00:00:00 UTC [I] Boot: started".to_string(),
            String::new(),
            "literal \\n and a carriage\r".to_string(),
            "unicode: ログ ✓".to_string(),
        ];

        let payload = compressor.compress_lines(&lines).unwrap();
        let text = compressor.decompress(&payload).unwrap();
        assert_eq!(text, format!("{}\n", lines.join("\n")));
        assert_eq!(split_lines(&text), lines);
    }

    #[test]
    fn test_payload_is_gzip() {
        let payload = Compressor::new().compress_lines(&["x"]).unwrap();
        assert_eq!(&payload[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let lines: [&str; 0] = [];
        assert!(matches!(
            Compressor::new().compress_lines(&lines),
            Err(CompressionError::EmptyBatch)
        ));
    }

    #[test]
    fn test_garbage_payload_fails_to_decompress() {
        assert!(Compressor::new().decompress(b"not gzip at all").is_err());
    }

    #[test]
    fn test_batch_compression_matches_lines() {
        let batch = Batch::new(vec!["a".into(), "b".into()]);
        let compressor = Compressor::with_level(1);
        let payload = compressor.compress_batch(&batch).unwrap();
        assert_eq!(compressor.decompress_lines(&payload).unwrap(), vec!["a", "b"]);
    }
}
