//! Compression codecs understood by the source reader and the bundle writer

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

/// A compression format applied on top of a tar stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Zstandard. The tar layer has no integrated support for it, so it is
    /// always streamed through a separate encoder or decoder.
    Zstd,
    Gzip,
    Bzip2,
    Xz,
    /// A plain, uncompressed tar.
    None,
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Zstd
    }
}

impl Codec {
    /// The suffix appended after `.tar` in file names.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Codec::Zstd => Some("zst"),
            Codec::Gzip => Some("gz"),
            Codec::Bzip2 => Some("bz2"),
            Codec::Xz => Some("xz"),
            Codec::None => None,
        }
    }

    /// Whether the codec is handled through a staged plain tar on disk rather
    /// than wrapped directly around the tar stream.
    pub fn is_streaming_only(&self) -> bool {
        matches!(self, Codec::Zstd)
    }

    /// Guess a codec from the extension of a file name.
    pub fn from_file_name(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "zst" | "zstd" | "tzst" => Some(Codec::Zstd),
            "gz" | "tgz" => Some(Codec::Gzip),
            "bz2" | "tbz" | "tbz2" => Some(Codec::Bzip2),
            "xz" | "txz" => Some(Codec::Xz),
            "tar" => Some(Codec::None),
            _ => None,
        }
    }

    /// Identify a codec from the leading bytes of a stream. Anything
    /// unrecognized is assumed to be a plain tar.
    pub fn sniff(magic: &[u8]) -> Self {
        if magic.starts_with(ZSTD_MAGIC) {
            Codec::Zstd
        } else if magic.starts_with(GZIP_MAGIC) {
            Codec::Gzip
        } else if magic.starts_with(BZIP2_MAGIC) {
            Codec::Bzip2
        } else if magic.starts_with(XZ_MAGIC) {
            Codec::Xz
        } else {
            Codec::None
        }
    }

    /// Detect the codec of a file on disk by its contents.
    pub fn detect(path: &Path) -> Result<Self> {
        let mut file = File::open(path)
            .with_context(|| format!("Failed to open archive: {}", path.display()))?;

        let mut magic = Vec::with_capacity(XZ_MAGIC.len());
        file.by_ref()
            .take(XZ_MAGIC.len() as u64)
            .read_to_end(&mut magic)?;

        Ok(Self::sniff(&magic))
    }

    /// Wrap a reader in the matching decoder.
    pub fn decoder<'a, R: Read + 'a>(&self, reader: R) -> io::Result<Box<dyn Read + 'a>> {
        let decoder: Box<dyn Read + 'a> = match self {
            Codec::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
            Codec::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            Codec::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
            Codec::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)),
            Codec::None => Box::new(reader),
        };

        Ok(decoder)
    }
}

impl FromStr for Codec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zst" | "zstd" => Ok(Codec::Zstd),
            "gz" | "gzip" => Ok(Codec::Gzip),
            "bz2" | "bzip2" => Ok(Codec::Bzip2),
            "xz" => Ok(Codec::Xz),
            "" | "tar" | "none" | "plain" => Ok(Codec::None),
            _ => bail!("Unknown compression codec: '{}'", s),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Zstd => write!(f, "zstd"),
            Codec::Gzip => write!(f, "gzip"),
            Codec::Bzip2 => write!(f, "bzip2"),
            Codec::Xz => write!(f, "xz"),
            Codec::None => write!(f, "none"),
        }
    }
}
