// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Blocklet descriptors and the position of column chunks inside a block file.

use std::ops::{Range, RangeInclusive};
use std::sync::Arc;

use object_store::path::Path;
use serde::{Deserialize, Serialize};
use tessera_core::datatypes::SurrogateKey;

use crate::format::ColumnarFormatVersion;

/// Composite key over the dictionary dimensions of a row, compared
/// lexicographically. Used to prune blocklets by key range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexKey(pub Vec<SurrogateKey>);

impl IndexKey {
    pub fn new(keys: impl Into<Vec<SurrogateKey>>) -> Self {
        Self(keys.into())
    }
}

impl From<Vec<SurrogateKey>> for IndexKey {
    fn from(value: Vec<SurrogateKey>) -> Self {
        Self(value)
    }
}

/// How the pages of a chunk are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkEncoding {
    /// Little-endian `u32` surrogate keys.
    DictionaryKeys,
    /// Length-prefixed UTF-8 strings.
    Utf8,
    /// Null bitmap followed by little-endian `f64` values.
    Float64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLayout {
    pub length: u64,
    pub num_rows: u32,
}

/// Location of one column chunk in the block file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLayout {
    pub encoding: ChunkEncoding,
    pub offset: u64,
    pub pages: Vec<PageLayout>,
}

impl ChunkLayout {
    pub fn length(&self) -> u64 {
        self.pages.iter().map(|p| p.length).sum()
    }

    /// Bytes of the chunk in its file, `None` if the recorded layout
    /// overflows.
    pub fn byte_range(&self) -> Option<Range<usize>> {
        let length = self
            .pages
            .iter()
            .try_fold(0u64, |acc, p| acc.checked_add(p.length))?;
        let end = self.offset.checked_add(length)?;
        Some(usize::try_from(self.offset).ok()?..usize::try_from(end).ok()?)
    }
}

/// Where each dimension and measure chunk of a blocklet lives.
///
/// Chunk `i` of `dimensions` holds the block's `i`-th physical dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockletLayout {
    pub dimensions: Vec<ChunkLayout>,
    pub measures: Vec<ChunkLayout>,
}

/// Everything the block footer records about one blocklet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockletMeta {
    pub version: ColumnarFormatVersion,
    pub num_rows: u32,
    pub num_pages: u32,
    pub start_key: IndexKey,
    pub end_key: IndexKey,
    pub layout: BlockletLayout,
}

/// An immutable, independently scannable unit of a block file.
#[derive(Debug, Clone, PartialEq)]
pub struct Blocklet {
    pub path: Path,
    /// Position of the blocklet inside its block file.
    pub ordinal: u32,
    pub meta: Arc<BlockletMeta>,
}

impl Blocklet {
    pub fn new(path: Path, ordinal: u32, meta: BlockletMeta) -> Self {
        Self {
            path,
            ordinal,
            meta: Arc::new(meta),
        }
    }

    pub fn version(&self) -> ColumnarFormatVersion {
        self.meta.version
    }

    pub fn num_rows(&self) -> u32 {
        self.meta.num_rows
    }

    pub fn num_pages(&self) -> u32 {
        self.meta.num_pages
    }

    pub fn layout(&self) -> &BlockletLayout {
        &self.meta.layout
    }

    pub fn start_key(&self) -> &IndexKey {
        &self.meta.start_key
    }

    pub fn end_key(&self) -> &IndexKey {
        &self.meta.end_key
    }
}

/// Merge column indexes into runs of adjacent indexes.
///
/// Each run can be fetched with a single read for formats that store
/// chunks contiguously. Input order and duplicates do not matter.
pub fn group_column_indexes(indexes: &[usize]) -> Vec<RangeInclusive<usize>> {
    let mut sorted = indexes.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut groups: Vec<RangeInclusive<usize>> = Vec::new();
    for index in sorted {
        match groups.last_mut() {
            Some(last) if *last.end() + 1 == index => *last = *last.start()..=index,
            _ => groups.push(index..=index),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_column_indexes() {
        assert!(group_column_indexes(&[]).is_empty());
        assert_eq!(group_column_indexes(&[3]), vec![3..=3]);
        assert_eq!(
            group_column_indexes(&[5, 0, 1, 2, 7, 8, 2]),
            vec![0..=2, 5..=5, 7..=8]
        );
    }

    #[test]
    fn test_index_key_order() {
        assert!(IndexKey::new([1, 5]) < IndexKey::new([2, 0]));
        assert!(IndexKey::new([1]) < IndexKey::new([1, 0]));
        assert!(IndexKey::default() <= IndexKey::new([0]));
    }

    #[test]
    fn test_chunk_range() {
        let chunk = ChunkLayout {
            encoding: ChunkEncoding::Float64,
            offset: 10,
            pages: vec![
                PageLayout {
                    length: 5,
                    num_rows: 1,
                },
                PageLayout {
                    length: 7,
                    num_rows: 1,
                },
            ],
        };
        assert_eq!(chunk.length(), 12);
        assert_eq!(chunk.byte_range(), Some(10..22));

        let overflowing = ChunkLayout {
            offset: u64::MAX - 4,
            ..chunk
        };
        assert_eq!(overflowing.byte_range(), None);
    }
}
