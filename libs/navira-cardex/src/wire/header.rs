//! CAR headers
//!
//! Before the first block, a CAR file carries a header:
//! - CARv1: `varint(length) || DAG-CBOR { roots: [CID], version: 1 }`, immediately followed by
//!   the sections.
//! - CARv2: the fixed [CAR_V2_PRAGMA], a 40-bytes [CarV2Header], then (at `data_offset`) a whole
//!   CARv1 payload, optionally followed by an index (at `index_offset`).
//!
//! Block offsets stored in an index are relative to the start of the CARv1 payload, which is the
//! start of the file for CARv1 and `data_offset` for CARv2. [read_car_header] consumes everything
//! up to the first section and reports where it stopped, see [CarLayout].

use std::io::{self, Read};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::wire::cid::RawCid;
use crate::wire::varint::{UnsignedVarint, VarintError};

/// CAR v2 pragma bytes
///
/// These bytes are used to identify the CAR v2 format in a file header.
/// The pragma is itself a CARv1 header (`varint(10) || { version: 2 }`) without roots, so that
/// CARv1-only readers fail on the version rather than on garbage.
pub const CAR_V2_PRAGMA: &[u8] = &[
    0x0a, 0xa1, 0x67, 0x76, 0x65, 0x72, 0x73, 0x69, 0x6f, 0x6e, 0x02,
];

/// Size of the CARv2 fixed header following the pragma
pub const CAR_V2_HEADER_SIZE: usize = 40;

/// CAR v1 Header structure
///
/// # Fields
/// - `version`: The version of the CAR format (1 for CAR v1, 2 for the CAR v2 pragma)
/// - `roots`: A vector of root CIDs in raw byte format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarHeader {
    version: u64,
    #[serde(default)]
    roots: Vec<RawCid>,
}

impl CarHeader {
    /// Creates a new CAR v1 header with the specified root CIDs
    pub fn new(roots: Vec<RawCid>) -> Self {
        CarHeader { roots, version: 1 }
    }

    /// Returns the version of the CAR format
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns a reference to the vector of root CIDs
    pub fn roots(&self) -> &[RawCid] {
        &self.roots
    }

    /// Encodes the header as it appears at the start of a CARv1 payload (length prefix included)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut cbor = Vec::new();
        ciborium::ser::into_writer(self, &mut cbor)
            .expect("Failed to serialize CAR header -- it is a bug if this happens");
        let mut bytes = UnsignedVarint(cbor.len() as u64).encode();
        bytes.extend_from_slice(&cbor);
        bytes
    }
}

/// CAR v2 header structure
///
/// The CARv2 header is a fixed-size structure that contains metadata
/// about the CARv2 file, including characteristics, data offset,
/// data size, and index offset.
///
/// The header is 40 bytes in size and is represented as follows:
/// - Bytes 0-15: Characteristics bitfield (u128, Little Endian)
/// - Bytes 16-23: Data offset from the start of the CARv2 pragma (u64, Little Endian)
/// - Bytes 24-31: Data size in bytes (u64, Little Endian)
/// - Bytes 32-39: Index offset from the start of the CARv2 pragma (u64, Little Endian,
///   0 if no index)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarV2Header {
    /// Characteristics bitfield
    pub characteristics: Characteristics,
    /// Data offset from the start of the CARv2 pragma
    pub data_offset: u64,
    /// Data size in bytes
    pub data_size: u64,
    /// Index offset from the start of the CARv2 pragma (0 if no index)
    pub index_offset: u64,
}

impl From<[u8; CAR_V2_HEADER_SIZE]> for CarV2Header {
    fn from(bytes: [u8; CAR_V2_HEADER_SIZE]) -> Self {
        let mut characteristics = [0u8; 16];
        characteristics.copy_from_slice(&bytes[0..16]);
        let mut fields = [0u64; 3];
        for (i, field) in fields.iter_mut().enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[16 + i * 8..24 + i * 8]);
            *field = u64::from_le_bytes(word);
        }
        CarV2Header {
            characteristics: Characteristics(u128::from_le_bytes(characteristics)),
            data_offset: fields[0],
            data_size: fields[1],
            index_offset: fields[2],
        }
    }
}

bitfield::bitfield! {
    /// Characteristics bitfield for CARv2 header
    ///
    /// The first 8 bytes of the bitfield are read as a little-endian word whose most significant
    /// bit is the "fully indexed" flag.
    pub struct Characteristics(u128);
    /// Indicates if the CARv2 file is fully indexed
    pub has_full_index, _: 63;
}

impl core::fmt::Debug for Characteristics {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Characteristics({:#x})", self.0)
    }
}

impl Clone for Characteristics {
    fn clone(&self) -> Self {
        *self
    }
}
impl Copy for Characteristics {}
impl PartialEq for Characteristics {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for Characteristics {}

/// What [read_car_header] found before the first section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarLayout {
    /// The CARv1 header (the inner one for CARv2 files)
    pub header: CarHeader,
    /// The CARv2 header, if the file is a CARv2
    pub v2: Option<CarV2Header>,
    /// Offset of the first section, relative to the start of the CARv1 payload
    pub sections_start: u64,
}

impl CarLayout {
    /// Size of the CARv1 payload, if known in advance (CARv2 only)
    pub fn payload_size(&self) -> Option<u64> {
        self.v2.as_ref().map(|v2| v2.data_size)
    }
}

/// Reads the CAR header(s) and leaves `reader` positioned on the first section.
///
/// Both CARv1 and CARv2 files are accepted. For CARv2 files, the bytes between the fixed header and
/// `data_offset` are skipped.
pub fn read_car_header<R: Read>(reader: &mut R) -> Result<CarLayout, HeaderError> {
    let (header, header_size) = read_v1_header(reader)?;
    match header.version() {
        1 => {
            debug!("CARv1 header with {} root(s)", header.roots().len());
            Ok(CarLayout {
                header,
                v2: None,
                sections_start: header_size,
            })
        }
        2 => {
            let mut fixed = [0u8; CAR_V2_HEADER_SIZE];
            read_exact(reader, &mut fixed)?;
            let v2 = CarV2Header::from(fixed);
            let consumed = header_size + CAR_V2_HEADER_SIZE as u64;
            if v2.data_offset < consumed {
                return Err(HeaderError::InvalidDataOffset(v2.data_offset));
            }
            let padding = v2.data_offset - consumed;
            let skipped = io::copy(&mut reader.by_ref().take(padding), &mut io::sink())?;
            if skipped < padding {
                return Err(HeaderError::Truncated);
            }

            let (inner, inner_size) = read_v1_header(reader)?;
            if inner.version() != 1 {
                return Err(HeaderError::InvalidVersion(inner.version()));
            }
            debug!(
                "CARv2 header (data offset {}, data size {}, index offset {}, full index: {}) \
                 with {} root(s)",
                v2.data_offset,
                v2.data_size,
                v2.index_offset,
                v2.characteristics.has_full_index(),
                inner.roots().len()
            );
            Ok(CarLayout {
                header: inner,
                v2: Some(v2),
                sections_start: inner_size,
            })
        }
        version => Err(HeaderError::InvalidVersion(version)),
    }
}

/// Reads a length-prefixed DAG-CBOR header, returning it with its total size (prefix included)
fn read_v1_header<R: Read>(reader: &mut R) -> Result<(CarHeader, u64), HeaderError> {
    let mut prefix = Vec::new();
    let length = match UnsignedVarint::read_into(reader, &mut prefix) {
        Ok(Some(length)) => length.0,
        Ok(None) | Err(VarintError::Truncated) => return Err(HeaderError::Truncated),
        Err(VarintError::Overflow) => return Err(HeaderError::InvalidFormat),
        Err(VarintError::Io(e)) => return Err(HeaderError::Io(e)),
    };
    if length == 0 {
        return Err(HeaderError::InvalidFormat);
    }

    let mut cbor = Vec::new();
    reader.by_ref().take(length).read_to_end(&mut cbor)?;
    if (cbor.len() as u64) < length {
        return Err(HeaderError::Truncated);
    }
    let header: CarHeader =
        ciborium::from_reader(cbor.as_slice()).map_err(HeaderError::InvalidHeader)?;
    Ok((header, prefix.len() as u64 + length))
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), HeaderError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => HeaderError::Truncated,
        _ => HeaderError::Io(e),
    })
}

/// Errors related to CAR header parsing
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// Invalid data format
    #[error("Invalid data format")]
    InvalidFormat,
    #[error("Invalid header format")]
    InvalidHeader(ciborium::de::Error<std::io::Error>),
    #[error("Invalid CAR version, expected 1 or 2, got {0}")]
    InvalidVersion(u64),
    #[error("Invalid CARv2 data offset: {0}")]
    InvalidDataOffset(u64),
    #[error("CAR file ends inside its header")]
    Truncated,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAR_V1: &[u8] = include_bytes!("../res/carv1-basic.car");
    const CAR_V2: &[u8] = include_bytes!("../res/carv2-basic.car");

    #[test]
    fn test_car_v1_header() {
        let mut reader = CAR_V1;
        let layout = read_car_header(&mut reader).unwrap();
        let cid1 = RawCid::from_hex(
            "01711220f88bc853804cf294fe417e4fa83028689fcdb1b1592c5102e1474dbc200fab8b",
        )
        .unwrap();
        let cid2 = RawCid::from_hex(
            "0171122069ea0740f9807a28f4d932c62e7c1c83be055e55072c90266ab3e79df63a365b",
        )
        .unwrap();
        assert_eq!(layout.header.version(), 1);
        assert_eq!(layout.header.roots(), &[cid1, cid2]);
        assert_eq!(layout.v2, None);
        assert_eq!(layout.sections_start, 100);
        assert_eq!(layout.payload_size(), None);
        // The reader is left on the first section
        assert_eq!(reader.len(), CAR_V1.len() - 100);
    }

    #[test]
    fn test_car_v2_header() {
        let mut reader = CAR_V2;
        let layout = read_car_header(&mut reader).unwrap();
        let v2 = layout.v2.clone().unwrap();
        assert_eq!(v2.characteristics.0, 0);
        assert!(!v2.characteristics.has_full_index());
        assert_eq!(v2.data_offset, 51);
        assert_eq!(v2.data_size, 448);
        assert_eq!(v2.index_offset, 499);
        assert_eq!(layout.header.version(), 1);
        assert_eq!(layout.header.roots().len(), 1);
        assert_eq!(layout.sections_start, 57);
        assert_eq!(layout.payload_size(), Some(448));
        assert_eq!(reader.len(), CAR_V2.len() - 51 - 57);
    }

    #[test]
    fn test_car_v2_fixed_header_fully_indexed() {
        let mut bytes = [0u8; CAR_V2_HEADER_SIZE];
        bytes[7] = 0x80;
        bytes[16..24].copy_from_slice(&51u64.to_le_bytes());
        bytes[24..32].copy_from_slice(&448u64.to_le_bytes());
        bytes[32..40].copy_from_slice(&499u64.to_le_bytes());
        let header = CarV2Header::from(bytes);
        assert!(header.characteristics.has_full_index());
        assert_eq!(header.data_offset, 51);
        assert_eq!(header.data_size, 448);
        assert_eq!(header.index_offset, 499);
    }

    #[test]
    fn test_car_header_to_bytes() {
        let header = CarHeader::new(vec![]);
        let bytes = header.to_bytes();
        let mut reader = bytes.as_slice();
        let layout = read_car_header(&mut reader).unwrap();
        assert_eq!(layout.header, header);
        assert_eq!(layout.sections_start, bytes.len() as u64);
    }

    #[test]
    fn test_car_header_truncated() {
        let mut reader = &CAR_V1[..50];
        assert!(matches!(
            read_car_header(&mut reader),
            Err(HeaderError::Truncated)
        ));
        let mut reader: &[u8] = &[];
        assert!(matches!(
            read_car_header(&mut reader),
            Err(HeaderError::Truncated)
        ));
    }

    #[test]
    fn test_car_header_invalid_version() {
        // { version: 3 }
        let bytes = [0x0a, 0xa1, 0x67, 0x76, 0x65, 0x72, 0x73, 0x69, 0x6f, 0x6e, 0x03];
        let mut reader = &bytes[..];
        assert!(matches!(
            read_car_header(&mut reader),
            Err(HeaderError::InvalidVersion(3))
        ));
    }

    #[test]
    fn test_car_header_not_cbor() {
        let bytes = [0x02, 0xFF, 0xFF];
        let mut reader = &bytes[..];
        assert!(matches!(
            read_car_header(&mut reader),
            Err(HeaderError::InvalidHeader(_))
        ));
    }
}
