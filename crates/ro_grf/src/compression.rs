//! Payload compression and decompression handling.

use std::io::{BufReader, Cursor, Read, Write};

use bon::Builder;
use flate2::{read::ZlibDecoder, write::DeflateEncoder, write::ZlibEncoder, Compression};
use lzma_rs::decompress::UnpackedSize;
use tracing::{instrument, trace};

use crate::error::{Error, Result};
use crate::lzss;

/// Leading byte of payloads produced by [`Codec::Lzma`]
pub const LZMA_MARKER: u8 = 0x00;

/// Leading byte of every zlib stream with a 32K window
pub const ZLIB_MARKER: u8 = 0x78;

/// Identifies the algorithm used to compress new payloads
///
/// Reading never needs this: stored payloads are detected from their first byte, see [`detect`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Codec {
    /// Zlib through flate2
    #[default]
    Zlib,

    /// Raw deflate framed by hand into a zlib stream, readable by any zlib decoder
    Deflate,

    /// LZMA-alone stream prefixed by [`LZMA_MARKER`]
    Lzma,

    /// Stores the data as it is
    Raw,
}

/// How a stored payload has to be expanded
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StoredFormat {
    /// Detected from the leading byte
    Auto,
    /// Stored uncompressed
    Raw,
    /// Legacy LZSS stream
    Lzss,
}

/// Algorithm detected from the leading byte of a stored payload
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DetectedCodec {
    Zlib,
    Lzma,
}

/// Compression settings for a container
///
/// This replaces any process wide choice: every table and writer gets its own copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct CodecConfig {
    /// The algorithm used for new payloads
    #[builder(default)]
    pub codec: Codec,

    /// Compression level for the zlib family, 0 to 9
    #[builder(default = 6)]
    pub level: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            codec: Codec::default(),
            level: 6,
        }
    }
}

impl CodecConfig {
    /// Compresses a payload with the configured codec
    #[instrument(skip_all, err, fields(codec = ?self.codec, size = data.len()))]
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self.codec {
            Codec::Zlib => compress_zlib(data, self.level),
            Codec::Deflate => compress_deflate(data, self.level),
            Codec::Lzma => compress_lzma(data),
            Codec::Raw => Ok(data.to_vec()),
        }
    }

    /// Compresses a file table, which can never be stored raw
    pub fn compress_table(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self.codec {
            Codec::Raw => compress_zlib(data, self.level),
            _ => self.compress(data),
        }
    }

    /// Whether payloads produced by this configuration are stored uncompressed
    pub fn is_raw(&self) -> bool {
        self.codec == Codec::Raw
    }
}

/// Detects the algorithm of a stored payload from its leading byte
pub fn detect(data: &[u8]) -> Option<DetectedCodec> {
    match data.first() {
        Some(&LZMA_MARKER) => Some(DetectedCodec::Lzma),
        Some(&ZLIB_MARKER) => Some(DetectedCodec::Zlib),
        _ => None,
    }
}

/// Whether a compressed payload does not start with any known marker
pub fn looks_encrypted(data: &[u8]) -> bool {
    !data.is_empty() && detect(data).is_none()
}

/// Expands a stored payload to `expected` bytes
pub fn decompress(data: &[u8], expected: usize, format: StoredFormat) -> Result<Vec<u8>> {
    if expected == 0 {
        return Ok(Vec::new());
    }

    match format {
        StoredFormat::Raw => {
            let mut out = data.to_vec();
            out.truncate(expected);
            Ok(out)
        }
        StoredFormat::Lzss => lzss::decompress(data, expected),
        StoredFormat::Auto => match detect(data) {
            Some(DetectedCodec::Zlib) => decompress_zlib(data, expected),
            Some(DetectedCodec::Lzma) => decompress_lzma(data, expected),
            None => Err(Error::CorruptedOrEncryptedEntry(format!(
                "unknown compression marker 0x{:02X}",
                data.first().copied().unwrap_or_default()
            ))),
        },
    }
}

fn compress_zlib(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn compress_deflate(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut out = vec![ZLIB_MARKER, 0xDA];
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder.write_all(data)?;
    out.extend_from_slice(&encoder.finish()?);

    let mut adler = adler2::Adler32::new();
    adler.write_slice(data);
    out.extend_from_slice(&adler.checksum().to_be_bytes());
    Ok(out)
}

fn compress_lzma(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = vec![LZMA_MARKER];
    lzma_rs::lzma_compress(&mut BufReader::new(Cursor::new(data)), &mut out)?;
    Ok(out)
}

fn decompress_zlib(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    ZlibDecoder::new(data)
        .take(expected as u64)
        .read_to_end(&mut out)
        .map_err(|e| Error::Compression(format!("zlib: {e}")))?;
    if out.len() != expected {
        trace!(expected, actual = out.len(), "zlib size mismatch");
    }
    out.truncate(expected);
    Ok(out)
}

/// Decodes an LZMA-alone stream into exactly `expected` bytes, ignoring the size in its header
fn decompress_lzma(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let stream = data.get(1..).unwrap_or_default();
    let options = lzma_rs::decompress::Options {
        unpacked_size: UnpackedSize::ReadHeaderButUseProvided(Some(expected as u64)),
        ..Default::default()
    };
    let mut out = Vec::with_capacity(expected);
    lzma_rs::lzma_decompress_with_options(&mut BufReader::new(Cursor::new(stream)), &mut out, &options)
        .map_err(|e| Error::Compression(format!("lzma: {e:?}")))?;
    Ok(out)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{decompress, detect, Codec, CodecConfig, DetectedCodec, StoredFormat};
    use crate::error::{Error, Result};

    const TEXT: &[u8] = b"Hello World, Hello World, Hello World, the quick brown fox";

    #[test]
    fn every_codec_round_trips() -> Result<()> {
        for codec in [Codec::Zlib, Codec::Deflate, Codec::Lzma] {
            let config = CodecConfig::builder().codec(codec).build();
            let packed = config.compress(TEXT)?;
            assert!(detect(&packed).is_some(), "{codec:?} output must be detectable");
            assert_eq!(decompress(&packed, TEXT.len(), StoredFormat::Auto)?, TEXT);
        }

        let raw = CodecConfig::builder().codec(Codec::Raw).build();
        let stored = raw.compress(TEXT)?;
        assert_eq!(decompress(&stored, TEXT.len(), StoredFormat::Raw)?, TEXT);
        Ok(())
    }

    #[test]
    fn detection_by_leading_byte() -> Result<()> {
        let lzma = CodecConfig::builder().codec(Codec::Lzma).build().compress(TEXT)?;
        assert_eq!(detect(&lzma), Some(DetectedCodec::Lzma));
        assert_eq!(detect(&[0x78, 0x9C]), Some(DetectedCodec::Zlib));
        assert_eq!(detect(&[0x42]), None);
        Ok(())
    }

    #[test]
    fn unknown_marker_is_an_entry_error() {
        let result = decompress(&[0x42, 0x00, 0x01], 3, StoredFormat::Auto);
        assert!(matches!(result, Err(Error::CorruptedOrEncryptedEntry(_))));
    }

    #[test]
    fn output_stops_at_the_declared_size() -> Result<()> {
        let zeros = vec![0u8; 64 * 1024];
        for codec in [Codec::Zlib, Codec::Lzma] {
            let packed = CodecConfig::builder().codec(codec).build().compress(&zeros)?;
            assert_eq!(decompress(&packed, 16, StoredFormat::Auto)?, vec![0u8; 16], "{codec:?}");
        }
        Ok(())
    }

    #[test]
    fn raw_truncates_to_declared_length() -> Result<()> {
        assert_eq!(decompress(b"abcdefgh", 3, StoredFormat::Raw)?, b"abc");
        Ok(())
    }

    #[test]
    fn zero_length_is_empty() -> Result<()> {
        assert!(decompress(&[0x42], 0, StoredFormat::Auto)?.is_empty());
        Ok(())
    }
}
