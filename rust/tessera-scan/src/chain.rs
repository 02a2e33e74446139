// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Ordered traversal over the blocklets of a table.

use std::ops::RangeInclusive;
use std::sync::Arc;

use snafu::location;
use tessera_core::io::FileReader;
use tessera_core::{Error, Result};

use crate::layout::{Blocklet, IndexKey};
use crate::reader::{ChunkReader, RawChunk};

/// The blocklets of a table in physical write order.
///
/// The chain owns the list; [`BlockletNode`]s are copyable cursors into it.
/// Blocklets are expected to be sorted by their composite key range so that
/// [`Self::blocklets_in_range`] can prune.
#[derive(Debug, Clone)]
pub struct BlockletChain {
    blocklets: Arc<[Blocklet]>,
}

impl Default for BlockletChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl BlockletChain {
    pub fn new(blocklets: impl Into<Arc<[Blocklet]>>) -> Self {
        Self {
            blocklets: blocklets.into(),
        }
    }

    /// First node of the chain, `None` if the chain is empty.
    pub fn head(&self) -> Option<BlockletNode<'_>> {
        self.node(0)
    }

    /// Node at `index`, `None` past the end.
    pub fn node(&self, index: usize) -> Option<BlockletNode<'_>> {
        (index < self.blocklets.len()).then_some(BlockletNode { chain: self, index })
    }

    pub fn nodes(&self) -> impl Iterator<Item = BlockletNode<'_>> {
        std::iter::successors(self.head(), |node| node.next())
    }

    pub fn number_of_nodes(&self) -> usize {
        self.blocklets.len()
    }

    /// Total pages across all blocklets.
    pub fn number_of_pages(&self) -> usize {
        self.blocklets.iter().map(|b| b.num_pages() as usize).sum()
    }

    pub fn num_rows(&self) -> usize {
        self.blocklets.iter().map(|b| b.num_rows() as usize).sum()
    }

    pub fn blocklets(&self) -> &[Blocklet] {
        &self.blocklets
    }

    /// Start index and count of the blocklets whose key range overlaps
    /// `start..=end`.
    pub fn blocklets_in_range(&self, start: &IndexKey, end: &IndexKey) -> (usize, usize) {
        let first = self.blocklets.partition_point(|b| b.end_key() < start);
        let last = self.blocklets.partition_point(|b| b.start_key() <= end);
        (first, last.saturating_sub(first))
    }
}

/// A cursor at one blocklet of a [`BlockletChain`].
///
/// Nodes hold no decoded data: every chunk call reads from storage again.
#[derive(Debug, Clone, Copy)]
pub struct BlockletNode<'a> {
    chain: &'a BlockletChain,
    index: usize,
}

impl<'a> BlockletNode<'a> {
    /// The following node, `None` at the end of the chain.
    pub fn next(&self) -> Option<Self> {
        self.chain.node(self.index + 1)
    }

    /// Position of this node in the chain.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn blocklet(&self) -> &'a Blocklet {
        &self.chain.blocklets[self.index]
    }

    /// Position of the blocklet inside its block file.
    pub fn ordinal(&self) -> u32 {
        self.blocklet().ordinal
    }

    pub fn row_count(&self) -> u32 {
        self.blocklet().num_rows()
    }

    pub fn page_count(&self) -> u32 {
        self.blocklet().num_pages()
    }

    pub fn number_of_nodes(&self) -> usize {
        self.chain.number_of_nodes()
    }

    fn chunk_reader(&self) -> ChunkReader {
        ChunkReader::for_version(self.blocklet().version())
    }

    /// Raw dimension chunks for the column groups in `groups`.
    ///
    /// The result has one slot per dimension chunk of the blocklet; only
    /// the slots covered by `groups` are read and filled.
    pub async fn dimension_chunks(
        &self,
        reader: &dyn FileReader,
        groups: &[RangeInclusive<usize>],
    ) -> Result<Vec<Option<RawChunk>>> {
        self.chunk_reader()
            .read_dimension_chunks(reader, self.blocklet(), groups)
            .await
    }

    pub async fn dimension_chunk(&self, reader: &dyn FileReader, index: usize) -> Result<RawChunk> {
        self.dimension_chunks(reader, &[index..=index])
            .await?
            .into_iter()
            .nth(index)
            .flatten()
            .ok_or_else(|| {
                Error::internal(format!("dimension chunk {} was not read", index), location!())
            })
    }

    pub async fn measure_chunks(
        &self,
        reader: &dyn FileReader,
        groups: &[RangeInclusive<usize>],
    ) -> Result<Vec<Option<RawChunk>>> {
        self.chunk_reader()
            .read_measure_chunks(reader, self.blocklet(), groups)
            .await
    }

    pub async fn measure_chunk(&self, reader: &dyn FileReader, index: usize) -> Result<RawChunk> {
        self.measure_chunks(reader, &[index..=index])
            .await?
            .into_iter()
            .nth(index)
            .flatten()
            .ok_or_else(|| {
                Error::internal(format!("measure chunk {} was not read", index), location!())
            })
    }
}
