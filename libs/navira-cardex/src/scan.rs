//! Archive scanning
//!
//! [BlockScanner] walks the sections of a CARv1 payload (the header must already be consumed, see
//! [read_car_header](crate::wire::header::read_car_header)) and yields a [BlockRecord] per block.
//!
//! Only the section length and the block identifier are read: block data is skipped, either by
//! seeking (see [BlockScanner::seekable]) or by discarding the bytes (see [BlockScanner::new]).
//! Scanning therefore runs in O(archive size) time and needs no memory for block payloads.

use std::io::{self, Read, Seek, SeekFrom};

use tracing::trace;

use crate::wire::cid::{CidFormatError, RawCid};
use crate::wire::multihash::{Multihash, MultihashError};
use crate::wire::varint::{UnsignedVarint, VarintError};

/// Location of a block inside a CAR payload.
///
/// All offsets are relative to the start of the CARv1 payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    /// Multihash of the block (extracted from its CID)
    pub multihash: Multihash,
    /// Offset of the section, i.e. of the section length prefix.
    ///
    /// This is the offset stored in CARv2 indexes.
    pub offset: u64,
    /// Offset of the first byte of block data
    pub block_offset: u64,
    /// Length of the block data (section length minus the CID size)
    pub length: u64,
}

/// Longest digest an index entry can hold (the entry width, digest + 8, is a u32)
pub const MAX_DIGEST_LENGTH: u64 = u32::MAX as u64 - 8;

type SkipFn<R> = fn(&mut R, u64) -> io::Result<u64>;

/// Lazy, non-restartable iterator over the blocks of a CAR payload.
///
/// The scanner owns the stream while scanning. After the first error, it yields nothing more.
///
/// ## Example
/// ```
/// use navira_cardex::scan::BlockScanner;
/// use navira_cardex::wire::header::read_car_header;
///
/// let mut car: &[u8] = include_bytes!("res/carv1-basic.car");
/// let layout = read_car_header(&mut car).unwrap();
/// let scanner = BlockScanner::new(car).at_position(layout.sections_start);
/// let records = scanner.collect::<Result<Vec<_>, _>>().unwrap();
/// assert_eq!(records.len(), 8);
/// assert_eq!(records[0].offset, 100);
/// ```
pub struct BlockScanner<R> {
    reader: R,
    skip: SkipFn<R>,
    /// Current offset in the payload
    position: u64,
    /// End of the payload (exclusive), when known
    end: Option<u64>,
    done: bool,
}

impl<R: Read> BlockScanner<R> {
    /// Creates a scanner which skips block data by reading and discarding it.
    ///
    /// The stream is expected to be positioned at the first section.
    pub fn new(reader: R) -> Self {
        BlockScanner {
            reader,
            skip: discard,
            position: 0,
            end: None,
            done: false,
        }
    }

    /// Sets the payload offset of the current stream position
    ///
    /// Typically, the size of the CAR header so that the records carry payload offsets.
    pub fn at_position(mut self, position: u64) -> Self {
        if let Some(end) = self.end.as_mut() {
            *end = end.saturating_sub(self.position).saturating_add(position);
        }
        self.position = position;
        self
    }

    /// Stops the scan at the given payload offset (e.g. the CARv2 data size)
    pub fn with_limit(mut self, end: u64) -> Self {
        self.end = Some(self.end.map_or(end, |current| current.min(end)));
        self
    }

    /// Current offset in the payload
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Gives the underlying stream back
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn read_varint(&mut self, buf: &mut Vec<u8>) -> Result<Option<u64>, VarintError> {
        let before = buf.len();
        let varint = UnsignedVarint::read_into(&mut self.reader, buf);
        self.position += (buf.len() - before) as u64;
        varint.map(|v| v.map(u64::from))
    }

    fn read_block(&mut self) -> Result<Option<BlockRecord>, ScanError> {
        if self.end.is_some_and(|end| self.position >= end) {
            return Ok(None);
        }

        let offset = self.position;
        let mut prefix = Vec::with_capacity(4);
        let length = match self.read_varint(&mut prefix) {
            Ok(Some(length)) => length,
            Ok(None) => return Ok(None),
            Err(VarintError::Truncated) => {
                return Err(ScanError::TruncatedBlock { offset, length: 0 });
            }
            Err(VarintError::Overflow) => return Err(ScanError::InvalidSectionLength { offset }),
            Err(VarintError::Io(e)) => return Err(ScanError::Io(e)),
        };
        if length == 0 {
            return Err(ScanError::ZeroLengthBlock { offset });
        }
        let section_end = self.position.checked_add(length);
        match (section_end, self.end) {
            (None, _) => return Err(ScanError::TruncatedBlock { offset, length }),
            (Some(section_end), Some(end)) if section_end > end => {
                return Err(ScanError::TruncatedBlock { offset, length });
            }
            _ => {}
        }

        let identifier = self.read_identifier(offset, length)?;
        let (cid, cid_size) = RawCid::try_read_bytes(&identifier).map_err(|e| match e {
            CidFormatError::Multihash(source) => ScanError::MalformedMultihash { offset, source },
            source => ScanError::InvalidIdentifier { offset, source },
        })?;
        debug_assert_eq!(cid_size, identifier.len());
        let multihash = cid.multihash().map_err(|e| match e {
            CidFormatError::Multihash(source) => ScanError::MalformedMultihash { offset, source },
            source => ScanError::InvalidIdentifier { offset, source },
        })?;

        let block_offset = self.position;
        let block_length = length - identifier.len() as u64;
        let skipped = (self.skip)(&mut self.reader, block_length)?;
        self.position += skipped;
        if skipped < block_length {
            return Err(ScanError::TruncatedBlock { offset, length });
        }

        trace!(
            "Scanned block {} at offset {} (data at {}, {} bytes)",
            multihash, offset, block_offset, block_length
        );
        Ok(Some(BlockRecord {
            multihash,
            offset,
            block_offset,
            length: block_length,
        }))
    }

    /// Reads the raw CID bytes of a section of `length` bytes starting at `offset`
    ///
    /// Only the bytes belonging to the CID are consumed, guided by its structure
    /// (CIDv0: bare multihash, CIDv1: version, multicodec, multihash).
    fn read_identifier(&mut self, offset: u64, length: u64) -> Result<Vec<u8>, ScanError> {
        let mut cid = Vec::with_capacity(40);
        let version = self.identifier_varint(&mut cid, offset, length)?;
        match version {
            // CIDv0 multihash code (SHA2-256)
            0x12 => {}
            0x01 => {
                let _multicodec = self.identifier_varint(&mut cid, offset, length)?;
                let _code = self.identifier_varint(&mut cid, offset, length)?;
            }
            _ => {
                return Err(ScanError::InvalidIdentifier {
                    offset,
                    source: CidFormatError::UnsupportedVersion,
                });
            }
        }
        let digest_length = self.identifier_varint(&mut cid, offset, length)?;
        if digest_length > MAX_DIGEST_LENGTH {
            return Err(ScanError::MalformedMultihash {
                offset,
                source: MultihashError::InvalidLength,
            });
        }
        let remaining = length - cid.len() as u64;
        if digest_length > remaining {
            return Err(ScanError::IdentifierOverrun { offset, length });
        }

        let start = cid.len();
        self.reader.by_ref().take(digest_length).read_to_end(&mut cid)?;
        let read = (cid.len() - start) as u64;
        self.position += read;
        if read < digest_length {
            return Err(ScanError::TruncatedBlock { offset, length });
        }
        Ok(cid)
    }

    fn identifier_varint(
        &mut self,
        cid: &mut Vec<u8>,
        offset: u64,
        length: u64,
    ) -> Result<u64, ScanError> {
        let value = match self.read_varint(cid) {
            Ok(Some(value)) => value,
            Ok(None) | Err(VarintError::Truncated) => {
                return Err(ScanError::TruncatedBlock { offset, length });
            }
            Err(VarintError::Overflow) => {
                return Err(ScanError::MalformedMultihash {
                    offset,
                    source: MultihashError::InvalidCode,
                });
            }
            Err(VarintError::Io(e)) => return Err(ScanError::Io(e)),
        };
        if cid.len() as u64 > length {
            return Err(ScanError::IdentifierOverrun { offset, length });
        }
        Ok(value)
    }
}

impl<R: Read + Seek> BlockScanner<R> {
    /// Creates a scanner which skips block data by seeking over it.
    ///
    /// The end of the stream is probed once so that truncated blocks are still detected.
    /// The stream is expected to be positioned at the first section.
    pub fn seekable(mut reader: R) -> io::Result<Self> {
        let current = reader.stream_position()?;
        let stream_end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(current))?;
        Ok(BlockScanner {
            reader,
            skip: seek_forward,
            position: 0,
            end: Some(stream_end.saturating_sub(current)),
            done: false,
        })
    }
}

fn discard<R: Read>(reader: &mut R, length: u64) -> io::Result<u64> {
    io::copy(&mut reader.by_ref().take(length), &mut io::sink())
}

// Bounds are checked against the probed end of stream before skipping
fn seek_forward<R: Read + Seek>(reader: &mut R, length: u64) -> io::Result<u64> {
    let mut remaining = length;
    while remaining > 0 {
        let step = remaining.min(i64::MAX as u64);
        reader.seek_relative(step as i64)?;
        remaining -= step;
    }
    Ok(length)
}

impl<R: Read> Iterator for BlockScanner<R> {
    type Item = Result<BlockRecord, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_block() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl<R: Read> std::iter::FusedIterator for BlockScanner<R> {}

/// Errors related to archive scanning
///
/// All of them are fatal to the current scan, `offset` is the offset of the faulty section.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// The block identifier embeds an invalid multihash
    #[error("Malformed multihash in section at offset {offset}: {source}")]
    MalformedMultihash {
        offset: u64,
        #[source]
        source: MultihashError,
    },
    /// The block identifier is not a CID
    #[error("Invalid block identifier in section at offset {offset}: {source}")]
    InvalidIdentifier {
        offset: u64,
        #[source]
        source: CidFormatError,
    },
    /// Fewer bytes remain than the section declares
    #[error("Truncated section at offset {offset} (declared length {length})")]
    TruncatedBlock { offset: u64, length: u64 },
    /// A section declares a zero length
    #[error("Zero-length section at offset {offset}")]
    ZeroLengthBlock { offset: u64 },
    /// The section length varint overflows
    #[error("Invalid section length at offset {offset}")]
    InvalidSectionLength { offset: u64 },
    /// The CID does not fit in the declared section length
    #[error("Block identifier overruns section at offset {offset} (declared length {length})")]
    IdentifierOverrun { offset: u64, length: u64 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
