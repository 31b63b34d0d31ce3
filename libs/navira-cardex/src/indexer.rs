//! Index construction pipeline: header -> scan -> build
//!
//! The pipeline is synchronous and single-pass. Scanning stops at the first error and the
//! partially built index is dropped, so a failed build never produces an index.

use std::io::{Read, Seek};

use tracing::debug;

use crate::index::{Index, IndexBuilder, IndexFormat};
use crate::scan::{BlockRecord, BlockScanner, ScanError};
use crate::wire::header::{CarLayout, HeaderError, read_car_header};

/// Index construction settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexConfig {
    /// Format of the produced index
    pub format: IndexFormat,
}

impl IndexConfig {
    pub fn new(format: IndexFormat) -> Self {
        IndexConfig { format }
    }
}

/// Indexes a CARv1 or CARv2 archive read from a stream
///
/// Block data is read and discarded. Prefer [index_car_seekable] when the archive can be seeked.
pub fn index_car<R: Read>(mut reader: R, config: IndexConfig) -> Result<Index, IndexerError> {
    let layout = read_car_header(&mut reader)?;
    let scanner = bounded(BlockScanner::new(reader), &layout);
    build_index(scanner, config)
}

/// Indexes a CARv1 or CARv2 archive, seeking over block data
pub fn index_car_seekable<R: Read + Seek>(
    mut reader: R,
    config: IndexConfig,
) -> Result<Index, IndexerError> {
    let layout = read_car_header(&mut reader)?;
    let scanner = bounded(BlockScanner::seekable(reader)?, &layout);
    build_index(scanner, config)
}

fn bounded<R: Read>(scanner: BlockScanner<R>, layout: &CarLayout) -> BlockScanner<R> {
    let scanner = scanner.at_position(layout.sections_start);
    match layout.payload_size() {
        Some(size) => scanner.with_limit(size),
        None => scanner,
    }
}

/// Builds an index from scanned records, failing on the first scan error
pub fn build_index<I>(records: I, config: IndexConfig) -> Result<Index, IndexerError>
where
    I: IntoIterator<Item = Result<BlockRecord, ScanError>>,
{
    let mut builder = IndexBuilder::new(config.format);
    for record in records {
        builder.add(&record?);
    }
    debug!("Scanned {} blocks", builder.len());
    Ok(builder.finish())
}

/// Errors related to index construction
#[derive(thiserror::Error, Debug)]
pub enum IndexerError {
    #[error("Invalid CAR header: {0}")]
    Header(#[from] HeaderError),
    #[error("Invalid CAR payload: {0}")]
    Scan(#[from] ScanError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
