use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use crate::index::{
    IndexCodec, IndexError, IndexFormat, IndexItem, IndexSorted, read_u32_le, read_u64_le,
};
use crate::wire::multihash::Multihash;

/// MultihashIndexSorted (0x0401): one [IndexSorted] per hash function code
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultihashIndexSorted {
    indexes: BTreeMap<u64, IndexSorted>,
}

impl MultihashIndexSorted {
    /// Hash function codes with their sub-index, by ascending code
    pub fn indexes(&self) -> impl Iterator<Item = (u64, &IndexSorted)> {
        self.indexes.iter().map(|(code, index)| (*code, index))
    }

    pub fn len(&self) -> usize {
        self.indexes.values().map(IndexSorted::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.values().all(IndexSorted::is_empty)
    }

    pub fn entries(&self) -> impl Iterator<Item = IndexItem<'_>> + '_ {
        self.indexes.iter().flat_map(|(code, index)| {
            index.entries().map(move |entry| IndexItem {
                code: Some(*code),
                entry,
            })
        })
    }

    pub(crate) fn push(&mut self, multihash: &Multihash, offset: u64) {
        self.indexes
            .entry(multihash.code())
            .or_default()
            .push(multihash.digest(), offset);
    }

    pub(crate) fn sort(&mut self) {
        self.indexes.values_mut().for_each(IndexSorted::sort);
    }
}

impl IndexCodec for MultihashIndexSorted {
    const FORMAT: IndexFormat = IndexFormat::MultihashIndexSorted;

    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&(self.indexes.len() as u32).to_le_bytes())?;
        for (code, index) in &self.indexes {
            writer.write_all(&code.to_le_bytes())?;
            index.encode(writer)?;
        }
        Ok(())
    }

    fn decode<R: Read>(reader: &mut R) -> Result<Self, IndexError> {
        let code_count = read_u32_le(reader, "hash function count")?;
        let mut indexes = BTreeMap::new();
        let mut previous_code = None;
        for _ in 0..code_count {
            let code = read_u64_le(reader, "hash function code")?;
            if previous_code.is_some_and(|previous| code <= previous) {
                return Err(IndexError::CorruptIndex(format!(
                    "hash function codes are not strictly ascending ({code:#x} after {:#x})",
                    previous_code.unwrap_or_default()
                )));
            }
            previous_code = Some(code);
            indexes.insert(code, IndexSorted::decode(reader)?);
        }
        Ok(MultihashIndexSorted { indexes })
    }

    fn lookup(&self, multihash: &Multihash) -> Option<u64> {
        self.indexes.get(&multihash.code())?.find(multihash.digest())
    }
}
