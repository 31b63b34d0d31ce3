//! # CARv2 index structures
//!
//! An index maps the multihash of every block of a CAR payload to the offset of its section,
//! so that a block can be retrieved without scanning the archive.
//!
//! Two index formats are defined by the CARv2 specification:
//! - 0x0400 - IndexSorted: blocks identified by their raw hash digest (hash function ignored).
//! - 0x0401 - MultihashIndexSorted: same, but entries are first grouped by hash function code.
//!
//! A serialized index starts with its format code (LEB128 varint), followed by its body.
//! Offsets are relative to the start of the CARv1 payload and point to the section length prefix.
//!
//! ## IndexSorted (0x0400)
//!
//! Entries are `digest || offset (u64le)` and are grouped into buckets sharing a common digest
//! size (possibly zero, so the smallest width is 8). The body starts with the number of buckets
//! (u32le). Each bucket then starts with the width of an entry (digest size + 8) as u32le and
//! the byte length of its entries (width x count) as u64le, followed by the entries themselves,
//! sorted by digest.
//! Buckets are sorted by width (smallest first).
//!
//! ## MultihashIndexSorted (0x0401)
//!
//! MultihashIndexSorted reuses IndexSorted: the body starts with the number of hash functions
//! (u32le), then for each hash function code (u64le, smallest first) comes a complete IndexSorted
//! body holding only the entries of that hash function.
//!
//! This allows the index to tell apart blocks hashed with different algorithms.

use std::io::{self, Read, Write};
use std::str::FromStr;

use tracing::debug;

use crate::wire::multihash::{Multihash, MultihashError};
use crate::wire::varint::{UnsignedVarint, VarintError};

mod bucket;
mod builder;
mod multihash;
mod sorted;

pub use bucket::SortedBucket;
pub use builder::IndexBuilder;
pub use multihash::MultihashIndexSorted;
pub use sorted::IndexSorted;

/// Represents a single entry in a CARv2 index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedIndexEntry {
    /// Raw hash digest of the block
    pub hash: Vec<u8>,
    /// Offset of the block section in the CARv1 payload
    pub offset: u64,
}

/// Represents a single entry in a CARv2 index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry<'a> {
    /// Raw hash digest of the block
    pub hash: &'a [u8],
    /// Offset of the block section in the CARv1 payload
    pub offset: u64,
}

impl<'a> From<&'a OwnedIndexEntry> for IndexEntry<'a> {
    fn from(entry: &'a OwnedIndexEntry) -> Self {
        IndexEntry {
            hash: &entry.hash,
            offset: entry.offset,
        }
    }
}

/// An entry as listed by [Index::entries]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexItem<'a> {
    /// Hash function code, only known for MultihashIndexSorted
    pub code: Option<u64>,
    pub entry: IndexEntry<'a>,
}

impl std::fmt::Display for IndexItem<'_> {
    /// Prints the full multihash when the hash function is known, the raw digest otherwise.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => {
                let multihash = Multihash::new(code, self.entry.hash.to_vec());
                write!(f, "{} @ {}", multihash, self.entry.offset)
            }
            None => write!(f, "{} @ {}", hex::encode(self.entry.hash), self.entry.offset),
        }
    }
}

/// Represents the header of an IndexSorted bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSortedBucketHeader {
    /// Width of each entry (hash size + 8 bytes for offset)
    pub entry_width: u32,
    /// Byte length of the bucket entries (entry width x entry count)
    pub byte_length: u64,
}

impl IndexSortedBucketHeader {
    /// Number of entries in this bucket
    pub fn entry_count(&self) -> u64 {
        match self.entry_width {
            0 => 0,
            width => self.byte_length / width as u64,
        }
    }

    /// Size of the hash digests of this bucket
    pub fn digest_len(&self) -> u32 {
        self.entry_width.saturating_sub(8)
    }

    pub(crate) fn read<R: Read>(reader: &mut R) -> Result<Self, IndexError> {
        let entry_width = read_u32_le(reader, "bucket width")?;
        let byte_length = read_u64_le(reader, "bucket length")?;
        // A width of 8 holds empty digests (identity hash of empty data)
        if entry_width < 8 {
            return Err(IndexError::CorruptIndex(format!(
                "bucket width must be at least 8 bytes, got {entry_width}"
            )));
        }
        if byte_length % entry_width as u64 != 0 {
            return Err(IndexError::CorruptIndex(format!(
                "bucket length {byte_length} is not a multiple of its width {entry_width}"
            )));
        }
        Ok(IndexSortedBucketHeader {
            entry_width,
            byte_length,
        })
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.entry_width.to_le_bytes())?;
        writer.write_all(&self.byte_length.to_le_bytes())
    }
}

/// Enum representing the format of a CARv2 index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexFormat {
    /// IndexSorted type (0x0400)
    IndexSorted = 0x0400,
    /// MultihashIndexSorted type (0x0401)
    #[default]
    MultihashIndexSorted = 0x0401,
}

impl IndexFormat {
    /// Creates an IndexFormat from its multicodec code
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0x0400 => Some(IndexFormat::IndexSorted),
            0x0401 => Some(IndexFormat::MultihashIndexSorted),
            _ => None,
        }
    }

    /// Multicodec code, written as the index discriminator
    pub fn code(self) -> u64 {
        self as u64
    }

    /// Peeks the format of a serialized index, without consuming anything
    ///
    /// Returns `None` if the discriminator is truncated or unknown.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        let (code, _) = UnsignedVarint::decode(bytes)?;
        Self::from_u64(code.0)
    }

    fn name(self) -> &'static str {
        match self {
            IndexFormat::IndexSorted => "IndexSorted",
            IndexFormat::MultihashIndexSorted => "MultihashIndexSorted",
        }
    }
}

impl std::fmt::Display for IndexFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndexFormat {
    type Err = ParseIndexFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [IndexFormat::IndexSorted, IndexFormat::MultihashIndexSorted]
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseIndexFormatError(s.to_string()))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown index format '{0}', expected IndexSorted or MultihashIndexSorted")]
pub struct ParseIndexFormatError(String);

/// Binary layout of an index format
///
/// `encode` and `decode` only deal with the body: the discriminator is handled by
/// [write_index] and [read_index].
pub trait IndexCodec: Sized {
    /// Format implemented by this codec
    const FORMAT: IndexFormat;

    /// Writes the index body
    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    /// Reads and validates an index body
    fn decode<R: Read>(reader: &mut R) -> Result<Self, IndexError>;

    /// Offset of the first block with the given multihash
    fn lookup(&self, multihash: &Multihash) -> Option<u64>;
}

/// An index in one of the supported formats
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Index {
    Sorted(IndexSorted),
    MultihashSorted(MultihashIndexSorted),
}

impl Index {
    /// An index without any entry
    pub fn empty(format: IndexFormat) -> Self {
        match format {
            IndexFormat::IndexSorted => Index::Sorted(IndexSorted::default()),
            IndexFormat::MultihashIndexSorted => {
                Index::MultihashSorted(MultihashIndexSorted::default())
            }
        }
    }

    pub fn format(&self) -> IndexFormat {
        match self {
            Index::Sorted(_) => IndexSorted::FORMAT,
            Index::MultihashSorted(_) => MultihashIndexSorted::FORMAT,
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        match self {
            Index::Sorted(index) => index.len(),
            Index::MultihashSorted(index) => index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up an encoded multihash (`varint(code) || varint(length) || digest`)
    ///
    /// ## Returns
    /// - `Ok(offset)` the section offset of the first block (in scan order) with this multihash
    /// - `Err(IndexError::MalformedMultihash)` if the bytes are not exactly one multihash
    /// - `Err(IndexError::NotFound)` if no block matches
    pub fn lookup(&self, multihash: &[u8]) -> Result<u64, IndexError> {
        let multihash = Multihash::decode_exact(multihash)?;
        self.lookup_multihash(&multihash)
    }

    /// Same as [Index::lookup], for an already decoded multihash
    pub fn lookup_multihash(&self, multihash: &Multihash) -> Result<u64, IndexError> {
        let found = match self {
            Index::Sorted(index) => index.lookup(multihash),
            Index::MultihashSorted(index) => index.lookup(multihash),
        };
        found.ok_or_else(|| IndexError::NotFound(multihash.clone()))
    }

    /// Iterates over all the entries, in the order they are stored
    pub fn entries(&self) -> Box<dyn Iterator<Item = IndexItem<'_>> + '_> {
        match self {
            Index::Sorted(index) => Box::new(index.entries().map(|entry| IndexItem {
                code: None,
                entry,
            })),
            Index::MultihashSorted(index) => Box::new(index.entries()),
        }
    }

    /// Serializes the index (discriminator included)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_index(self, &mut bytes)
            .expect("Writing to a Vec<u8> should never fail, it is a bug.");
        bytes
    }
}

impl From<IndexSorted> for Index {
    fn from(index: IndexSorted) -> Self {
        Index::Sorted(index)
    }
}

impl From<MultihashIndexSorted> for Index {
    fn from(index: MultihashIndexSorted) -> Self {
        Index::MultihashSorted(index)
    }
}

struct CountingWriter<'a, W> {
    inner: &'a mut W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writes the index to `writer`, discriminator first
///
/// ## Returns
/// The number of bytes written.
pub fn write_index<W: Write>(index: &Index, writer: &mut W) -> Result<u64, IndexError> {
    let mut writer = CountingWriter {
        inner: writer,
        written: 0,
    };
    UnsignedVarint(index.format().code())
        .write_to(&mut writer)
        .map_err(IndexError::WriteFailure)?;
    let body = match index {
        Index::Sorted(index) => index.encode(&mut writer),
        Index::MultihashSorted(index) => index.encode(&mut writer),
    };
    body.map_err(IndexError::WriteFailure)?;
    writer.flush().map_err(IndexError::WriteFailure)?;

    debug!(
        "Wrote {} index with {} entries ({} bytes)",
        index.format(),
        index.len(),
        writer.written
    );
    Ok(writer.written)
}

/// Reads an index from `reader`, whatever its format
pub fn read_index<R: Read>(reader: &mut R) -> Result<Index, IndexError> {
    let mut discriminator = Vec::with_capacity(2);
    let code = match UnsignedVarint::read_into(reader, &mut discriminator) {
        Ok(Some(code)) => code.0,
        Ok(None) | Err(VarintError::Truncated) => {
            return Err(IndexError::CorruptIndex("truncated index format code".to_string()));
        }
        Err(VarintError::Overflow) => {
            return Err(IndexError::CorruptIndex("invalid index format code".to_string()));
        }
        Err(VarintError::Io(e)) => return Err(IndexError::ReadFailure(e)),
    };
    let index: Index = match IndexFormat::from_u64(code) {
        Some(IndexFormat::IndexSorted) => IndexSorted::decode(reader)?.into(),
        Some(IndexFormat::MultihashIndexSorted) => MultihashIndexSorted::decode(reader)?.into(),
        None => return Err(IndexError::UnknownIndexFormat(code)),
    };
    debug!("Read {} index with {} entries", index.format(), index.len());
    Ok(index)
}

pub(crate) fn read_u32_le<R: Read>(reader: &mut R, what: &str) -> Result<u32, IndexError> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf, what)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64_le<R: Read>(reader: &mut R, what: &str) -> Result<u64, IndexError> {
    let mut buf = [0u8; 8];
    read_exact(reader, &mut buf, what)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<(), IndexError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => IndexError::CorruptIndex(format!("truncated {what}")),
        _ => IndexError::ReadFailure(e),
    })
}

/// Errors related to index encoding, decoding and lookups
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    #[error("Failed to write index: {0}")]
    WriteFailure(#[source] io::Error),
    #[error("Failed to read index: {0}")]
    ReadFailure(#[source] io::Error),
    #[error("Unknown index format code {0:#x}")]
    UnknownIndexFormat(u64),
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),
    #[error("Block not found in index: {0}")]
    NotFound(Multihash),
    #[error(transparent)]
    MalformedMultihash(#[from] MultihashError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::multihash::SHA2_256;

    fn sha256(byte: u8) -> Multihash {
        Multihash::new(SHA2_256, vec![byte; 32])
    }

    fn sample(format: IndexFormat) -> Index {
        let mut builder = IndexBuilder::new(format);
        builder.add_entry(&sha256(0x22), 100);
        builder.add_entry(&sha256(0x11), 200);
        builder.add_entry(&Multihash::new(0x00, b"id".to_vec()), 300);
        builder.finish()
    }

    #[test]
    fn test_index_format_codes() {
        assert_eq!(IndexFormat::IndexSorted.code(), 0x0400);
        assert_eq!(IndexFormat::MultihashIndexSorted.code(), 0x0401);
        assert_eq!(IndexFormat::from_u64(0x0401), Some(IndexFormat::MultihashIndexSorted));
        assert_eq!(IndexFormat::from_u64(0x0402), None);
        assert_eq!(IndexFormat::default(), IndexFormat::MultihashIndexSorted);
    }

    #[test]
    fn test_index_format_names() {
        assert_eq!(
            "IndexSorted".parse::<IndexFormat>(),
            Ok(IndexFormat::IndexSorted)
        );
        assert_eq!(
            "multihashindexsorted".parse::<IndexFormat>(),
            Ok(IndexFormat::MultihashIndexSorted)
        );
        assert!("CarIndex".parse::<IndexFormat>().is_err());
        assert_eq!(IndexFormat::MultihashIndexSorted.to_string(), "MultihashIndexSorted");
    }

    #[test]
    fn test_index_format_detect() {
        assert_eq!(IndexFormat::detect(&[0x80, 0x08, 0x00]), Some(IndexFormat::IndexSorted));
        assert_eq!(
            IndexFormat::detect(&[0x81, 0x08]),
            Some(IndexFormat::MultihashIndexSorted)
        );
        assert_eq!(IndexFormat::detect(&[0x82, 0x08]), None);
        assert_eq!(IndexFormat::detect(&[0x81]), None);
    }

    #[test]
    fn test_write_then_read_index() {
        for format in [IndexFormat::IndexSorted, IndexFormat::MultihashIndexSorted] {
            let index = sample(format);
            let mut bytes = Vec::new();
            let written = write_index(&index, &mut bytes).unwrap();
            assert_eq!(written, bytes.len() as u64);
            assert_eq!(IndexFormat::detect(&bytes), Some(format));

            let decoded = read_index(&mut bytes.as_slice()).unwrap();
            assert_eq!(decoded, index);
            assert_eq!(decoded.lookup_multihash(&sha256(0x11)).unwrap(), 200);
            assert_eq!(decoded.lookup_multihash(&sha256(0x22)).unwrap(), 100);
            assert_eq!(
                decoded.lookup(&Multihash::new(0x00, b"id".to_vec()).to_bytes()).unwrap(),
                300
            );
        }
    }

    #[test]
    fn test_lookup_errors() {
        let index = sample(IndexFormat::MultihashIndexSorted);
        assert!(matches!(
            index.lookup_multihash(&sha256(0x33)),
            Err(IndexError::NotFound(_))
        ));
        // Same digest, another hash function
        assert!(matches!(
            index.lookup_multihash(&Multihash::new(0x13, vec![0x11; 32])),
            Err(IndexError::NotFound(_))
        ));
        assert!(matches!(
            index.lookup(&[0x12, 0x20, 0x01]),
            Err(IndexError::MalformedMultihash(MultihashError::DigestOverrun { .. }))
        ));
    }

    #[test]
    fn test_index_sorted_ignores_hash_function() {
        let index = sample(IndexFormat::IndexSorted);
        assert_eq!(
            index.lookup_multihash(&Multihash::new(0x13, vec![0x11; 32])).unwrap(),
            200
        );
    }

    #[test]
    fn test_read_index_unknown_format() {
        let bytes = [0x82, 0x08, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(
            read_index(&mut &bytes[..]),
            Err(IndexError::UnknownIndexFormat(0x0402))
        ));
    }

    #[test]
    fn test_read_index_truncated_discriminator() {
        assert!(matches!(
            read_index(&mut &[][..]),
            Err(IndexError::CorruptIndex(_))
        ));
        assert!(matches!(
            read_index(&mut &[0x81][..]),
            Err(IndexError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_write_index_failure() {
        struct FailingWriter;
        impl Write for FailingWriter {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::other("disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let index = sample(IndexFormat::IndexSorted);
        assert!(matches!(
            write_index(&index, &mut FailingWriter),
            Err(IndexError::WriteFailure(_))
        ));
    }

    #[test]
    fn test_index_entries_display() {
        let index = sample(IndexFormat::MultihashIndexSorted);
        let lines: Vec<String> = index.entries().map(|item| item.to_string()).collect();
        assert_eq!(
            lines,
            vec![
                "00026964 @ 300".to_string(),
                format!("1220{} @ 200", "11".repeat(32)),
                format!("1220{} @ 100", "22".repeat(32)),
            ]
        );

        let index = sample(IndexFormat::IndexSorted);
        let first = index.entries().next().unwrap();
        assert_eq!(first.code, None);
        assert_eq!(first.to_string(), "6964 @ 300");
    }

    #[test]
    fn test_empty_index() {
        for format in [IndexFormat::IndexSorted, IndexFormat::MultihashIndexSorted] {
            let index = Index::empty(format);
            assert!(index.is_empty());
            let mut bytes = index.to_bytes();
            // discriminator + zero count
            assert_eq!(bytes.len(), 2 + 4);
            let decoded = read_index(&mut &bytes[..]).unwrap();
            assert!(decoded.is_empty());
            assert_eq!(decoded.format(), format);
            bytes.truncate(3);
            assert!(matches!(
                read_index(&mut &bytes[..]),
                Err(IndexError::CorruptIndex(_))
            ));
        }
    }
}
