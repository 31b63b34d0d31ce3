//! CAR archives and CARv2 indexes make use of unsigned variable-length integers (varints)
//! for section lengths, CID prefixes, multihash prefixes and index discriminators.
//!
//! Actually, those varints follow the
//! [LEB128 encoding scheme](https://en.wikipedia.org/wiki/LEB128) (unsigned flavour, at most
//! 10 bytes for a 64-bit value).

use std::io::{ErrorKind, Read, Write};

/// Unsigned variable-length integer (varint) as used in CAR files and multiformats.
///
/// - Use `UnsignedVarint::encode()` to encode the varint into a vector of bytes.
/// - Use `UnsignedVarint::decode(bytes)` to decode a varint from a slice of bytes, which returns
///   the decoded varint and the number of bytes read.
/// - Use `UnsignedVarint::read_into(reader, buf)` to pull a varint out of a byte stream.
///
/// ## Examples
/// ```
/// use navira_cardex::wire::varint::UnsignedVarint;
///
/// let varint = UnsignedVarint(0x0401);
/// let encoded = varint.encode();
/// assert_eq!(encoded, vec![0x81, 0x08]);
///
/// let (decoded, bytes_read) = UnsignedVarint::decode(&encoded).unwrap();
/// assert_eq!(decoded, UnsignedVarint(0x0401));
/// assert_eq!(bytes_read, encoded.len());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsignedVarint(
    /// The underlying unsigned integer value of the varint.
    pub u64,
);

/// Longest LEB128 encoding of a u64
pub const MAX_VARINT_LEN: usize = 10;

impl UnsignedVarint {
    /// Encodes the UnsignedVarint into a vector of bytes using LEB128 encoding.
    pub fn encode(self) -> Vec<u8> {
        let mut value = self.0;
        let mut bytes = Vec::with_capacity(MAX_VARINT_LEN);
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80; // Set continuation bit
            }
            bytes.push(byte);
            if value == 0 {
                break;
            }
        }
        bytes
    }

    /// Writes the LEB128 encoding of the varint to `writer`.
    ///
    /// ## Returns
    /// The number of bytes written.
    pub fn write_to<W: Write>(self, writer: &mut W) -> std::io::Result<usize> {
        let bytes = self.encode();
        writer.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Decodes an UnsignedVarint from a slice of bytes.
    ///
    /// ## Returns
    /// - `Some((UnsignedVarint, bytes_read))` if decoding is successful,
    ///   where `UnsignedVarint` is the decoded varint and `bytes_read` is the number of bytes
    ///   consumed during decoding.
    /// - `None` if the input bytes do not represent a valid varint (e.g., incomplete varint or
    ///   overflow).
    pub fn decode(bytes: &[u8]) -> Option<(Self, usize)> {
        let mut result = 0u64;
        let mut shift = 0;
        for (i, &byte) in bytes.iter().enumerate() {
            let value = (byte & 0x7F) as u64;
            if shift == 63 && value > 1 {
                return None; // Overflow
            }
            result |= value << shift;
            if (byte & 0x80) == 0 {
                return Some((UnsignedVarint(result), i + 1));
            }
            shift += 7;
            if shift >= 64 {
                return None; // Overflow
            }
        }
        None // Incomplete varint
    }

    /// Reads an UnsignedVarint from a byte stream, one byte at a time.
    ///
    /// Every byte consumed from the stream is appended to `buf`, so that callers which need
    /// the raw encoding (e.g. to rebuild a CID) get it for free.
    ///
    /// ## Returns
    /// - `Ok(Some(varint))` if a varint was read (its length is the number of bytes appended to
    ///   `buf`).
    /// - `Ok(None)` if the stream ended before the first byte.
    /// - `Err(VarintError)` if the stream ended in the middle of the varint, if it overflows a u64,
    ///   or if the underlying reader failed.
    pub fn read_into<R: Read>(
        reader: &mut R,
        buf: &mut Vec<u8>,
    ) -> Result<Option<Self>, VarintError> {
        let start = buf.len();
        let mut byte = [0u8; 1];
        loop {
            match reader.read(&mut byte) {
                Ok(0) if buf.len() == start => return Ok(None),
                Ok(0) => return Err(VarintError::Truncated),
                Ok(_) => {
                    buf.push(byte[0]);
                    if byte[0] & 0x80 == 0 {
                        return match Self::decode(&buf[start..]) {
                            Some((varint, _)) => Ok(Some(varint)),
                            None => Err(VarintError::Overflow),
                        };
                    }
                    if buf.len() - start >= MAX_VARINT_LEN {
                        return Err(VarintError::Overflow);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(VarintError::Io(e)),
            }
        }
    }
}

impl From<u64> for UnsignedVarint {
    fn from(value: u64) -> Self {
        UnsignedVarint(value)
    }
}

impl From<UnsignedVarint> for u64 {
    fn from(varint: UnsignedVarint) -> Self {
        varint.0
    }
}

/// Errors raised while pulling a varint out of a byte stream
#[derive(thiserror::Error, Debug)]
pub enum VarintError {
    /// The stream ended in the middle of the varint
    #[error("Stream ended inside a varint")]
    Truncated,
    /// The varint does not fit in 64 bits
    #[error("Varint overflows 64 bits")]
    Overflow,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::{UnsignedVarint, VarintError};

    #[test]
    fn test_unsigned_varint_encoding() {
        let varint = UnsignedVarint(624485);
        let expected = vec![0xE5, 0x8E, 0x26];
        assert_eq!(varint.encode(), expected);
    }

    #[test]
    fn test_unsigned_varint_decoding() {
        let varint = vec![0xE5, 0x8E, 0x26];
        let (decoded, bytes_read) = UnsignedVarint::decode(&varint).unwrap();
        assert_eq!(decoded, UnsignedVarint(624485));
        assert_eq!(bytes_read, varint.len());
    }

    #[test]
    fn test_unsigned_varint_index_codes() {
        assert_eq!(UnsignedVarint(0x0400).encode(), vec![0x80, 0x08]);
        assert_eq!(UnsignedVarint(0x0401).encode(), vec![0x81, 0x08]);
    }

    #[test]
    fn test_unsigned_varint_max_value() {
        let encoded = UnsignedVarint(u64::MAX).encode();
        assert_eq!(encoded.len(), 10);
        assert_eq!(
            UnsignedVarint::decode(&encoded),
            Some((UnsignedVarint(u64::MAX), 10))
        );
    }

    #[test]
    fn test_unsigned_varint_decode_overflow() {
        // 10th byte carries more than the single remaining bit
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x02];
        assert_eq!(UnsignedVarint::decode(&bytes), None);
        let bytes = [0xFF; 11];
        assert_eq!(UnsignedVarint::decode(&bytes), None);
    }

    #[test]
    fn test_unsigned_varint_decode_incomplete() {
        assert_eq!(UnsignedVarint::decode(&[0x80, 0x80]), None);
        assert_eq!(UnsignedVarint::decode(&[]), None);
    }

    #[test]
    fn test_unsigned_varint_decode_car_header_size() {
        const CAR_EXTRACT: [u8; 12] = [
            0x63, 0xA2, 0x65, 0x72, 0x6F, 0x6F, 0x74, 0x73, 0x82, 0xD8, 0x2A, 0x58,
        ];
        let (decoded, bytes_read) = UnsignedVarint::decode(&CAR_EXTRACT).unwrap();
        assert_eq!(decoded, UnsignedVarint(99));
        assert_eq!(bytes_read, 1);
    }

    #[test]
    fn test_unsigned_varint_read_into() {
        let mut stream: &[u8] = &[0xE5, 0x8E, 0x26, 0x01];
        let mut buf = Vec::new();
        let varint = UnsignedVarint::read_into(&mut stream, &mut buf).unwrap();
        assert_eq!(varint, Some(UnsignedVarint(624485)));
        assert_eq!(buf, vec![0xE5, 0x8E, 0x26]);
        // The trailing byte is left in the stream
        assert_eq!(stream, &[0x01]);
    }

    #[test]
    fn test_unsigned_varint_read_into_eof() {
        let mut stream: &[u8] = &[];
        let mut buf = Vec::new();
        assert!(matches!(
            UnsignedVarint::read_into(&mut stream, &mut buf),
            Ok(None)
        ));

        let mut stream: &[u8] = &[0x80, 0x80];
        assert!(matches!(
            UnsignedVarint::read_into(&mut stream, &mut buf),
            Err(VarintError::Truncated)
        ));
    }

    #[test]
    fn test_unsigned_varint_write_to() {
        let mut sink = Vec::new();
        let written = UnsignedVarint(300).write_to(&mut sink).unwrap();
        assert_eq!(written, 2);
        assert_eq!(sink, vec![0xAC, 0x02]);
    }
}
