use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::io::{self, Read, Write};

use crate::index::{
    IndexCodec, IndexEntry, IndexError, IndexFormat, IndexSortedBucketHeader, OwnedIndexEntry,
    SortedBucket, read_u32_le,
};
use crate::wire::multihash::Multihash;

/// IndexSorted (0x0400): buckets of digests keyed by entry width
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSorted {
    buckets: BTreeMap<u32, SortedBucket>,
}

impl IndexSorted {
    /// Buckets, by ascending entry width
    pub fn buckets(&self) -> impl Iterator<Item = &SortedBucket> {
        self.buckets.values()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(SortedBucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(SortedBucket::is_empty)
    }

    /// All entries, bucket after bucket
    pub fn entries(&self) -> impl Iterator<Item = IndexEntry<'_>> + '_ {
        self.buckets.values().flat_map(SortedBucket::iter)
    }

    /// Offset of the first entry with this exact digest
    pub fn find(&self, digest: &[u8]) -> Option<u64> {
        let width = u32::try_from(digest.len()).ok()?.checked_add(8)?;
        self.buckets.get(&width)?.find(digest)
    }

    /// Adds an entry without sorting, see [IndexSorted::sort]
    pub(crate) fn push(&mut self, digest: &[u8], offset: u64) {
        let digest_len = digest.len() as u32;
        let bucket = match self.buckets.entry(digest_len + 8) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => vacant.insert(SortedBucket::new(digest_len)),
        };
        bucket.push(OwnedIndexEntry {
            hash: digest.to_vec(),
            offset,
        });
    }

    pub(crate) fn sort(&mut self) {
        self.buckets.values_mut().for_each(SortedBucket::sort);
    }
}

impl IndexCodec for IndexSorted {
    const FORMAT: IndexFormat = IndexFormat::IndexSorted;

    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&(self.buckets.len() as u32).to_le_bytes())?;
        for bucket in self.buckets.values() {
            bucket.encode(writer)?;
        }
        Ok(())
    }

    fn decode<R: Read>(reader: &mut R) -> Result<Self, IndexError> {
        let bucket_count = read_u32_le(reader, "bucket count")?;
        let mut buckets = BTreeMap::new();
        let mut previous_width = 0;
        for _ in 0..bucket_count {
            let header = IndexSortedBucketHeader::read(reader)?;
            if header.entry_width <= previous_width {
                return Err(IndexError::CorruptIndex(format!(
                    "bucket widths are not strictly ascending ({} after {})",
                    header.entry_width, previous_width
                )));
            }
            previous_width = header.entry_width;
            buckets.insert(header.entry_width, SortedBucket::decode(header, reader)?);
        }
        Ok(IndexSorted { buckets })
    }

    /// The hash function is ignored, only the digest is looked up.
    fn lookup(&self, multihash: &Multihash) -> Option<u64> {
        self.find(multihash.digest())
    }
}
