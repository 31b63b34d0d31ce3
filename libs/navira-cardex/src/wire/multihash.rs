//! Multihash digest extraction
//!
//! A [multihash](https://multiformats.io/multihash/) is a self-describing hash value:
//! `varint(hash function code) || varint(digest length) || digest`.
//!
//! CAR indexes only need the hash function code and the raw digest, so this module does not
//! try to recognise or verify hash functions: any code is accepted as long as the encoding is
//! sound. Empty digests are valid (identity hash of empty data).

use crate::wire::varint::UnsignedVarint;

/// Multihash code of SHA2-256, the hash used by CIDv0
pub const SHA2_256: u64 = 0x12;

/// A decoded multihash: the hash function code and the raw digest bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Multihash {
    code: u64,
    digest: Vec<u8>,
}

impl Multihash {
    /// Creates a multihash from its hash function code and raw digest
    pub fn new(code: u64, digest: Vec<u8>) -> Self {
        Multihash { code, digest }
    }

    /// Hash function code (e.g. `0x12` for SHA2-256)
    pub fn code(&self) -> u64 {
        self.code
    }

    /// Raw digest bytes
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Decodes a multihash from the start of `bytes`.
    ///
    /// ## Returns
    /// - `Ok((Multihash, bytes_read))` on success, trailing bytes are left untouched.
    /// - `Err(MultihashError)` if one of the varint prefixes is invalid, or if the declared
    ///   digest length exceeds the remaining bytes.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), MultihashError> {
        let (code, code_size) =
            UnsignedVarint::decode(bytes).ok_or(MultihashError::InvalidCode)?;
        let (length, length_size) =
            UnsignedVarint::decode(&bytes[code_size..]).ok_or(MultihashError::InvalidLength)?;
        let digest_start = code_size + length_size;
        let available = bytes.len() - digest_start;
        if length.0 > available as u64 {
            return Err(MultihashError::DigestOverrun {
                declared: length.0,
                available,
            });
        }
        let digest_end = digest_start + length.0 as usize;
        Ok((
            Multihash::new(code.0, bytes[digest_start..digest_end].to_vec()),
            digest_end,
        ))
    }

    /// Decodes a multihash that must span the whole of `bytes`
    pub fn decode_exact(bytes: &[u8]) -> Result<Self, MultihashError> {
        let (multihash, size) = Self::decode(bytes)?;
        if size != bytes.len() {
            return Err(MultihashError::TrailingBytes(bytes.len() - size));
        }
        Ok(multihash)
    }

    /// Parses a multihash from its hexadecimal representation
    pub fn from_hex(hex_str: &str) -> Result<Self, MultihashError> {
        let bytes = hex::decode(hex_str)?;
        Self::decode_exact(&bytes)
    }

    /// Encodes the multihash back to `code || length || digest`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = UnsignedVarint(self.code).encode();
        bytes.extend_from_slice(&UnsignedVarint(self.digest.len() as u64).encode());
        bytes.extend_from_slice(&self.digest);
        bytes
    }
}

impl std::fmt::Debug for Multihash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Multihash({:#x}, {})", self.code, hex::encode(&self.digest))
    }
}

impl std::fmt::Display for Multihash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

/// Errors related to multihash decoding (all of them mean the multihash is malformed)
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MultihashError {
    #[error("Malformed multihash: invalid hash code varint")]
    InvalidCode,
    #[error("Malformed multihash: invalid digest length varint")]
    InvalidLength,
    #[error("Malformed multihash: digest length is {declared} but only {available} bytes remain")]
    DigestOverrun { declared: u64, available: usize },
    #[error("Malformed multihash: {0} unexpected trailing bytes")]
    TrailingBytes(usize),
    #[error("Malformed multihash: invalid hex ({0})")]
    InvalidHex(#[from] hex::FromHexError),
}
