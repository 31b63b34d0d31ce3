use std::io::{self, Read, Write};

use crate::index::{IndexEntry, IndexError, IndexSortedBucketHeader, OwnedIndexEntry};

/// Entries sharing the same digest size, sorted by digest
///
/// Sorting is stable: entries with equal digests keep their insertion (scan) order,
/// and [SortedBucket::find] returns the first of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedBucket {
    digest_len: u32,
    entries: Vec<OwnedIndexEntry>,
}

impl SortedBucket {
    /// Creates an empty bucket for digests of `digest_len` bytes
    pub fn new(digest_len: u32) -> Self {
        SortedBucket {
            digest_len,
            entries: Vec::new(),
        }
    }

    /// Appends an entry, the bucket must be sorted again before use
    pub(crate) fn push(&mut self, entry: OwnedIndexEntry) {
        debug_assert_eq!(entry.hash.len(), self.digest_len as usize);
        self.entries.push(entry);
    }

    pub(crate) fn sort(&mut self) {
        self.entries.sort_by(|a, b| a.hash.cmp(&b.hash));
    }

    pub fn digest_len(&self) -> u32 {
        self.digest_len
    }

    /// Width of an encoded entry (digest + u64 offset)
    pub fn width(&self) -> u32 {
        self.digest_len + 8
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = IndexEntry<'_>> + '_ {
        self.entries.iter().map(IndexEntry::from)
    }

    /// Binary search for the first entry with this digest
    pub fn find(&self, digest: &[u8]) -> Option<u64> {
        let first = self.entries.partition_point(|e| e.hash.as_slice() < digest);
        self.entries
            .get(first)
            .filter(|e| e.hash == digest)
            .map(|e| e.offset)
    }

    pub fn header(&self) -> IndexSortedBucketHeader {
        IndexSortedBucketHeader {
            entry_width: self.width(),
            byte_length: self.entries.len() as u64 * self.width() as u64,
        }
    }

    /// Writes the bucket header and its entries
    pub(crate) fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.header().write(writer)?;
        for entry in &self.entries {
            writer.write_all(&entry.hash)?;
            writer.write_all(&entry.offset.to_le_bytes())?;
        }
        Ok(())
    }

    /// Reads the entries announced by `header`, checking they are sorted
    pub(crate) fn decode<R: Read>(
        header: IndexSortedBucketHeader,
        reader: &mut R,
    ) -> Result<Self, IndexError> {
        // The length is not trusted for allocation: a truncated index stops the read early
        let mut data = Vec::new();
        reader
            .by_ref()
            .take(header.byte_length)
            .read_to_end(&mut data)
            .map_err(IndexError::ReadFailure)?;
        if (data.len() as u64) < header.byte_length {
            return Err(IndexError::CorruptIndex(format!(
                "bucket of width {} announces {} bytes, only {} available",
                header.entry_width,
                header.byte_length,
                data.len()
            )));
        }

        let digest_len = header.digest_len();
        let entries = data
            .chunks_exact(header.entry_width as usize)
            .map(|chunk| {
                let (hash, offset) = chunk.split_at(digest_len as usize);
                let mut offset_bytes = [0u8; 8];
                offset_bytes.copy_from_slice(offset);
                OwnedIndexEntry {
                    hash: hash.to_vec(),
                    offset: u64::from_le_bytes(offset_bytes),
                }
            })
            .collect::<Vec<_>>();
        if entries.windows(2).any(|pair| pair[0].hash > pair[1].hash) {
            return Err(IndexError::CorruptIndex(format!(
                "entries of the bucket of width {} are not sorted",
                header.entry_width
            )));
        }

        Ok(SortedBucket {
            digest_len,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: &[u8], offset: u64) -> OwnedIndexEntry {
        OwnedIndexEntry {
            hash: hash.to_vec(),
            offset,
        }
    }

    /// Bucket of the given entries, in scan order
    fn sorted_bucket(digest_len: u32, entries: Vec<OwnedIndexEntry>) -> SortedBucket {
        let mut bucket = SortedBucket::new(digest_len);
        entries.into_iter().for_each(|entry| bucket.push(entry));
        bucket.sort();
        bucket
    }

    #[test]
    fn test_bucket_sort_is_stable() {
        let bucket = sorted_bucket(
            2,
            vec![
                entry(&[0x02, 0x00], 10),
                entry(&[0x01, 0x00], 20),
                entry(&[0x02, 0x00], 30),
                entry(&[0x00, 0xFF], 40),
            ],
        );
        let offsets: Vec<u64> = bucket.iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![40, 20, 10, 30]);
        assert_eq!(bucket.find(&[0x02, 0x00]), Some(10));
        assert_eq!(bucket.find(&[0x00, 0xFF]), Some(40));
        assert_eq!(bucket.find(&[0x01, 0x01]), None);
        assert_eq!(bucket.find(&[0xFF, 0xFF]), None);
    }

    #[test]
    fn test_bucket_encoding() {
        let bucket = sorted_bucket(2, vec![entry(&[0xBB, 0xBB], 1), entry(&[0xAA, 0xAA], 2)]);
        let mut bytes = Vec::new();
        bucket.encode(&mut bytes).unwrap();
        assert_eq!(
            hex::encode(&bytes),
            concat!(
                "0a000000",         // width: 2 + 8
                "1400000000000000", // byte length: 2 x 10
                "aaaa", "0200000000000000",
                "bbbb", "0100000000000000",
            )
        );

        let mut reader = &bytes[..];
        let header = IndexSortedBucketHeader::read(&mut reader).unwrap();
        assert_eq!(header.entry_count(), 2);
        assert_eq!(header.digest_len(), 2);
        let decoded = SortedBucket::decode(header, &mut reader).unwrap();
        assert_eq!(decoded, bucket);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_bucket_decode_rejects_unsorted_entries() {
        let header = IndexSortedBucketHeader {
            entry_width: 9,
            byte_length: 18,
        };
        let bytes = hex::decode("020100000000000000010200000000000000").unwrap();
        assert!(matches!(
            SortedBucket::decode(header, &mut &bytes[..]),
            Err(IndexError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_bucket_decode_truncated() {
        let header = IndexSortedBucketHeader {
            entry_width: 40,
            byte_length: 40 * 1_000_000,
        };
        let bytes = [0u8; 60];
        assert!(matches!(
            SortedBucket::decode(header, &mut &bytes[..]),
            Err(IndexError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_bucket_empty_digests() {
        let bucket = sorted_bucket(0, vec![entry(&[], 12), entry(&[], 3)]);
        assert_eq!(bucket.width(), 8);
        assert_eq!(bucket.find(&[]), Some(12));

        let mut bytes = Vec::new();
        bucket.encode(&mut bytes).unwrap();
        assert_eq!(
            hex::encode(&bytes),
            concat!(
                "08000000",         // width: 0 + 8
                "1000000000000000", // byte length: 2 x 8
                "0c00000000000000",
                "0300000000000000",
            )
        );

        let mut reader = &bytes[..];
        let header = IndexSortedBucketHeader::read(&mut reader).unwrap();
        assert_eq!(header.entry_count(), 2);
        assert_eq!(header.digest_len(), 0);
        let decoded = SortedBucket::decode(header, &mut reader).unwrap();
        assert_eq!(decoded, bucket);
        assert_eq!(decoded.find(&[]), Some(12));
    }

    #[test]
    fn test_bucket_header_validation() {
        // no room for the offset
        let bytes = hex::decode("070000000000000000000000").unwrap();
        assert!(matches!(
            IndexSortedBucketHeader::read(&mut &bytes[..]),
            Err(IndexError::CorruptIndex(_))
        ));
        // 41 bytes is not a multiple of 40
        let bytes = hex::decode("280000002900000000000000").unwrap();
        assert!(matches!(
            IndexSortedBucketHeader::read(&mut &bytes[..]),
            Err(IndexError::CorruptIndex(_))
        ));
        let bytes = hex::decode("28000000").unwrap();
        assert!(matches!(
            IndexSortedBucketHeader::read(&mut &bytes[..]),
            Err(IndexError::CorruptIndex(_))
        ));
    }
}
