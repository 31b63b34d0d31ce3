use tracing::debug;

use crate::index::{Index, IndexFormat};
use crate::scan::BlockRecord;
use crate::wire::multihash::Multihash;

/// Accumulates block locations, then produces a sorted [Index]
///
/// Records are dispatched to their bucket as they are added and sorted once, in
/// [IndexBuilder::finish]. Duplicates are all kept; the first one added wins on lookup.
/// Dropping the builder without finishing it discards everything.
///
/// ## Example
/// ```
/// use navira_cardex::index::{IndexBuilder, IndexFormat};
/// use navira_cardex::wire::multihash::Multihash;
///
/// let mut builder = IndexBuilder::new(IndexFormat::MultihashIndexSorted);
/// let multihash = Multihash::new(0x12, vec![0xAB; 32]);
/// builder.add_entry(&multihash, 59);
/// let index = builder.finish();
/// assert_eq!(index.lookup(&multihash.to_bytes()).unwrap(), 59);
/// ```
#[derive(Debug)]
pub struct IndexBuilder {
    index: Index,
    count: usize,
}

impl IndexBuilder {
    pub fn new(format: IndexFormat) -> Self {
        IndexBuilder {
            index: Index::empty(format),
            count: 0,
        }
    }

    pub fn format(&self) -> IndexFormat {
        self.index.format()
    }

    /// Adds the section offset of a scanned block
    pub fn add(&mut self, record: &BlockRecord) {
        self.add_entry(&record.multihash, record.offset);
    }

    /// Adds a multihash located at the given section offset
    ///
    /// Digests are assumed to fit in an index entry, i.e. to be shorter than 4 GiB.
    pub fn add_entry(&mut self, multihash: &Multihash, offset: u64) {
        match &mut self.index {
            Index::Sorted(index) => index.push(multihash.digest(), offset),
            Index::MultihashSorted(index) => index.push(multihash, offset),
        }
        self.count += 1;
    }

    /// Number of entries added so far
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Sorts every bucket and returns the finished index
    pub fn finish(mut self) -> Index {
        match &mut self.index {
            Index::Sorted(index) => index.sort(),
            Index::MultihashSorted(index) => index.sort(),
        }
        debug!("Built {} index with {} entries", self.index.format(), self.count);
        self.index
    }
}

impl Extend<BlockRecord> for IndexBuilder {
    fn extend<T: IntoIterator<Item = BlockRecord>>(&mut self, records: T) {
        for record in records {
            self.add(&record);
        }
    }
}
