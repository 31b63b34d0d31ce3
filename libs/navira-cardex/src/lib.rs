//! navira-cardex builds and queries CARv2 indexes for CAR (Content Addressable aRchive) files,
//! the archive format used in the IPFS ecosystem to store collections of content-addressed blocks.
//!
//! An index maps the multihash of every block to the offset of its section in the CARv1 payload,
//! which allows random access to blocks without scanning the whole archive.
//! Both CARv1 and CARv2 archives can be indexed, into either of the two CARv2 index formats
//! (IndexSorted and MultihashIndexSorted).
//!
//! The crate is organised in layers:
//! - [wire]: low-level encodings (varints, multihashes, CIDs, CAR headers),
//! - [scan]: a streaming scanner listing the blocks of an archive without reading their data,
//! - [index]: index structures, their binary codecs and lookups,
//! - [indexer]: the pipeline gluing everything together.
//!
//! ## Usages
//!
//! ### Index a CAR file, then look a block up
//! ```rust
//! use navira_cardex::{IndexConfig, IndexFormat, index_car, read_index, write_index};
//!
//! let car_bytes = include_bytes!("res/carv1-basic.car");
//! let config = IndexConfig::new(IndexFormat::MultihashIndexSorted);
//! let index = index_car(&car_bytes[..], config).unwrap();
//! assert_eq!(index.len(), 8);
//!
//! // Persist the index, then load it back
//! let mut file = Vec::new();
//! write_index(&index, &mut file).unwrap();
//! let index = read_index(&mut file.as_slice()).unwrap();
//!
//! // Section offset of a block, relative to the start of the CARv1 payload
//! let multihash =
//!     hex::decode("1220b6fbd675f98e2abd22d4ed29fdc83150fedc48597e92dd1a7a24381d44a27451");
//! let multihash = multihash.unwrap();
//! assert_eq!(index.lookup(&multihash).unwrap(), 325);
//! ```
//!
//! ### List the blocks of a CAR file
//! ```rust
//! use navira_cardex::scan::BlockScanner;
//! use navira_cardex::wire::header::read_car_header;
//!
//! let mut car: &[u8] = include_bytes!("res/carv1-basic.car");
//! let layout = read_car_header(&mut car).unwrap();
//! for record in BlockScanner::new(car).at_position(layout.sections_start) {
//!     let record = record.unwrap();
//!     println!("{} @ {} ({} bytes)", record.multihash, record.offset, record.length);
//! }
//! ```

pub mod index;
pub mod indexer;
pub mod scan;
pub mod wire;

pub use index::{Index, IndexError, IndexFormat, read_index, write_index};
pub use indexer::{IndexConfig, IndexerError, index_car, index_car_seekable};
