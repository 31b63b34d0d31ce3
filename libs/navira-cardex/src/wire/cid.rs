use ciborium::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

use crate::wire::multihash::{Multihash, MultihashError};
use crate::wire::varint::UnsignedVarint;

/// Represents a raw CID (Content Identifier) in byte format
///
/// Blocks in a CAR file are identified by their CID. Only the multihash embedded in the CID
/// matters to an index, see [RawCid::multihash].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RawCid(Vec<u8>);

impl RawCid {
    /// Creates a new RawCid from a vector of bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        RawCid(bytes)
    }

    /// Creates a RawCid from a hexadecimal string representation
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        Ok(RawCid::new(bytes))
    }

    /// Returns the byte representation of the RawCid
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Position of the multihash inside the CID bytes
    ///
    /// - CIDv0 is a bare SHA2-256 multihash (prefix `0x12 0x20`, the famous Qm...).
    /// - CIDv1 is `0x01 || varint(multicodec) || multihash`.
    fn multihash_start(bytes: &[u8]) -> Result<usize, CidFormatError> {
        if bytes.len() < 2 {
            return Err(CidFormatError::InsufficientData);
        }
        if bytes.starts_with(&[0x12, 0x20]) {
            return Ok(0);
        }
        if bytes[0] == 0x01 {
            let (_multicodec, mc_size) =
                UnsignedVarint::decode(&bytes[1..]).ok_or(CidFormatError::InsufficientData)?;
            return Ok(1 + mc_size);
        }
        // Otherwise it is not supported yet
        Err(CidFormatError::UnsupportedVersion)
    }

    /// Tries to read a CID from the start of the given bytes
    ///
    /// # Returns
    ///
    /// * Ok((RawCid, cid_size)) - the CID and the number of bytes it spans
    /// * Err(CidFormatError) - the bytes do not start with a valid CID
    pub fn try_read_bytes(bytes: &[u8]) -> Result<(Self, usize), CidFormatError> {
        let mh_start = Self::multihash_start(bytes)?;
        let (_, mh_size) = Multihash::decode(&bytes[mh_start..])?;
        let total_cid_size = mh_start + mh_size;
        Ok((RawCid::new(bytes[..total_cid_size].to_vec()), total_cid_size))
    }

    /// Extracts the multihash (hash function code and digest) identifying the block
    pub fn multihash(&self) -> Result<Multihash, CidFormatError> {
        let mh_start = Self::multihash_start(&self.0)?;
        let (multihash, _) = Multihash::decode(&self.0[mh_start..])?;
        Ok(multihash)
    }
}

impl std::fmt::Debug for RawCid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawCid({})", hex::encode(&self.0))
    }
}

impl std::fmt::Display for RawCid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

// In DAG-CBOR (CAR headers), CIDs are encoded as tag 42 over the CID bytes
// prefixed by the identity multibase (0x00).
impl Serialize for RawCid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut bytes = Vec::with_capacity(self.0.len() + 1);
        bytes.push(0x00);
        bytes.extend_from_slice(&self.0);
        let value = Value::Tag(42, Box::new(Value::Bytes(bytes)));
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RawCid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if let Value::Tag(42, boxed_value) = value {
            if let Value::Bytes(mut bytes) = *boxed_value {
                if bytes.first() == Some(&0x00) {
                    bytes.remove(0);
                }
                return Ok(RawCid::new(bytes));
            }
        }
        Err(D::Error::custom("Invalid CID format"))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CidFormatError {
    #[error("Insufficient data for CID")]
    InsufficientData,
    #[error("Unsupported CID version")]
    UnsupportedVersion,
    #[error("Invalid CID multihash: {0}")]
    Multihash(#[from] MultihashError),
}
