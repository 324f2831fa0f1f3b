//! Compression types used in the Anvil format.
//!
//! Same IDs as vanilla Minecraft; LZ4 uses the lz4-java block stream.

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use flate2::Compression as FlateLevel;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use lz4_java_wrc::{Lz4BlockInput, Lz4BlockOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompressionFormat {
    Gzip = 1,
    Zlib = 2,
    Uncompressed = 3,
    Lz4 = 10,
}

impl CompressionFormat {
    pub const ALL: [CompressionFormat; 4] = [
        CompressionFormat::Gzip,
        CompressionFormat::Zlib,
        CompressionFormat::Uncompressed,
        CompressionFormat::Lz4,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Look up a format by its type byte. Unknown ids are `None` so
    /// callers can treat them as a corrupt entry.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|format| format.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionFormat::Gzip => "gzip",
            CompressionFormat::Zlib => "zlib",
            CompressionFormat::Uncompressed => "none",
            CompressionFormat::Lz4 => "lz4",
        }
    }

    /// Wrap `reader` in a decompressing stream.
    pub fn decoder<'a, R: Read + 'a>(self, reader: R) -> Box<dyn Read + 'a> {
        match self {
            CompressionFormat::Gzip => Box::new(GzDecoder::new(reader)),
            CompressionFormat::Zlib => Box::new(ZlibDecoder::new(reader)),
            CompressionFormat::Uncompressed => Box::new(reader),
            CompressionFormat::Lz4 => Box::new(Lz4BlockInput::new(reader)),
        }
    }

    /// Wrap `writer` in a compressing stream. Call `finish` when done.
    pub fn encoder<'a, W: Write>(self, writer: &'a mut W) -> ChunkEncoder<'a, W> {
        match self {
            CompressionFormat::Gzip => ChunkEncoder::Gzip(GzEncoder::new(writer, FlateLevel::default())),
            CompressionFormat::Zlib => ChunkEncoder::Zlib(ZlibEncoder::new(writer, FlateLevel::default())),
            CompressionFormat::Uncompressed => ChunkEncoder::Uncompressed(writer),
            CompressionFormat::Lz4 => ChunkEncoder::Lz4(Lz4BlockOutput::new(writer)),
        }
    }

    /// Compress `data` fully into memory.
    pub fn compress(self, data: &[u8]) -> io::Result<Vec<u8>> {
        if self == CompressionFormat::Uncompressed {
            return Ok(data.to_vec());
        }
        let mut compressed = Vec::with_capacity(data.len() / 2);
        let mut encoder = self.encoder(&mut compressed);
        encoder.write_all(data)?;
        encoder.finish()?;
        Ok(compressed)
    }

    pub fn decompress(self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut decompressed = Vec::new();
        self.decoder(data).read_to_end(&mut decompressed)?;
        Ok(decompressed)
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(CompressionFormat::Gzip),
            "zlib" | "deflate" => Ok(CompressionFormat::Zlib),
            "none" | "uncompressed" | "raw" => Ok(CompressionFormat::Uncompressed),
            "lz4" => Ok(CompressionFormat::Lz4),
            other => anyhow::bail!("Unknown compression format: {}", other),
        }
    }
}

/// Compressing writer for one chunk payload.
pub enum ChunkEncoder<'a, W: Write> {
    Gzip(GzEncoder<&'a mut W>),
    Zlib(ZlibEncoder<&'a mut W>),
    Uncompressed(&'a mut W),
    Lz4(Lz4BlockOutput<'a, W>),
}

impl<W: Write> ChunkEncoder<'_, W> {
    /// Flush trailing compressed data (checksums, last block) into the
    /// underlying writer.
    pub fn finish(self) -> io::Result<()> {
        match self {
            ChunkEncoder::Gzip(encoder) => encoder.finish().map(drop),
            ChunkEncoder::Zlib(encoder) => encoder.finish().map(drop),
            ChunkEncoder::Uncompressed(writer) => writer.flush(),
            ChunkEncoder::Lz4(mut encoder) => encoder.flush(),
        }
    }
}

impl<W: Write> Write for ChunkEncoder<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ChunkEncoder::Gzip(encoder) => encoder.write(buf),
            ChunkEncoder::Zlib(encoder) => encoder.write(buf),
            ChunkEncoder::Uncompressed(writer) => writer.write(buf),
            ChunkEncoder::Lz4(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ChunkEncoder::Gzip(encoder) => encoder.flush(),
            ChunkEncoder::Zlib(encoder) => encoder.flush(),
            ChunkEncoder::Uncompressed(writer) => writer.flush(),
            ChunkEncoder::Lz4(encoder) => encoder.flush(),
        }
    }
}
