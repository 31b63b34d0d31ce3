//! Implementation of the `cardex` commands
//!
//! Indexes are built entirely in memory before the output file is created, and a failed write
//! removes the output file: an interrupted or failed build never leaves a partial index behind.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use cid::Cid;
use navira_cardex::index::IndexItem;
use navira_cardex::wire::cid::RawCid;
use navira_cardex::wire::multihash::{Multihash, MultihashError};
use navira_cardex::{
    Index, IndexConfig, IndexError, IndexerError, index_car_seekable, read_index, write_index,
};
use tracing::{debug, info, warn};

/// Default index path: the CAR path with `.idx` appended
pub fn default_output(car: &Path) -> PathBuf {
    let mut path = car.as_os_str().to_owned();
    path.push(".idx");
    PathBuf::from(path)
}

/// Indexes `car` and writes the index to `output`
///
/// ## Returns
/// The number of bytes written.
pub fn build(car: &Path, output: &Path, config: IndexConfig) -> Result<u64, CliError> {
    let file = File::open(car).map_err(|source| CliError::Open {
        path: car.to_path_buf(),
        source,
    })?;
    let index = index_car_seekable(BufReader::new(file), config).map_err(|source| {
        CliError::Indexing {
            path: car.to_path_buf(),
            source,
        }
    })?;

    let written = write_file(&index, output)?;
    info!(
        "Indexed {} blocks of {:?} into {:?} ({}, {} bytes)",
        index.len(),
        car,
        output,
        index.format(),
        written
    );
    Ok(written)
}

fn write_file(index: &Index, output: &Path) -> Result<u64, CliError> {
    let file = File::create(output).map_err(|source| CliError::Create {
        path: output.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    let result = write_index(index, &mut writer).and_then(|written| {
        writer
            .into_inner()
            .map_err(|e| IndexError::WriteFailure(e.into_error()))?
            .sync_all()
            .map_err(IndexError::WriteFailure)?;
        Ok(written)
    });

    result.map_err(|source| {
        if let Err(err) = std::fs::remove_file(output) {
            warn!("Failed to remove partial index {:?}: {}", output, err);
        }
        CliError::Index {
            path: output.to_path_buf(),
            source,
        }
    })
}

fn load(path: &Path) -> Result<Index, CliError> {
    let file = File::open(path).map_err(|source| CliError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let index = read_index(&mut BufReader::new(file)).map_err(|source| CliError::Index {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Loaded {} index {:?}", index.format(), path);
    Ok(index)
}

/// Multicodec of raw binary blocks, used to print index entries as CIDs
const RAW_CODEC: u64 = 0x55;

/// Prints every entry of the index at `path`, one per line
///
/// MultihashIndexSorted entries are printed as a CIDv1 (raw codec, base32), IndexSorted entries
/// as their hexadecimal digest.
pub fn inspect(path: &Path, verbose: bool, out: &mut impl Write) -> Result<(), CliError> {
    let index = load(path)?;
    let mut count = 0;
    for item in index.entries() {
        write_entry(&item, out).map_err(CliError::Output)?;
        count += 1;
    }
    if verbose {
        writeln!(out, "---").map_err(CliError::Output)?;
        writeln!(out, "{} entries", count).map_err(CliError::Output)?;
    }
    Ok(())
}

fn write_entry(item: &IndexItem<'_>, out: &mut impl Write) -> std::io::Result<()> {
    let multihash = item
        .code
        .and_then(|code| cid::multihash::Multihash::<64>::wrap(code, item.entry.hash).ok());
    match multihash {
        Some(multihash) => {
            let cid = Cid::new_v1(RAW_CODEC, multihash);
            writeln!(out, "{} @ {}", cid, item.entry.offset)
        }
        // digests over 64 bytes do not fit a Cid
        None => writeln!(out, "{}", item),
    }
}

/// Looks a block up in the index at `path`
///
/// `key` is the hexadecimal form of either a CID or a bare multihash.
pub fn lookup(path: &Path, key: &str) -> Result<u64, CliError> {
    let multihash = parse_key(key)?;
    let index = load(path)?;
    index
        .lookup_multihash(&multihash)
        .map_err(|source| CliError::Index {
            path: path.to_path_buf(),
            source,
        })
}

fn parse_key(key: &str) -> Result<Multihash, CliError> {
    let bytes = hex::decode(key).map_err(|e| CliError::InvalidKey(MultihashError::InvalidHex(e)))?;
    match RawCid::try_read_bytes(&bytes) {
        Ok((cid, size)) if size == bytes.len() => {
            if let Ok(multihash) = cid.multihash() {
                return Ok(multihash);
            }
        }
        _ => {}
    }
    Multihash::decode_exact(&bytes).map_err(CliError::InvalidKey)
}

/// Errors of the `cardex` commands, with the path involved
#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error("Failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to create {path:?}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to index {path:?}: {source}")]
    Indexing { path: PathBuf, source: IndexerError },
    #[error("{path:?}: {source}")]
    Index { path: PathBuf, source: IndexError },
    #[error("Invalid multihash: {0}")]
    InvalidKey(#[source] MultihashError),
    #[error("Failed to write output: {0}")]
    Output(#[source] std::io::Error),
}
