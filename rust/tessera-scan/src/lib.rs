// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Selective scanning of blocklet-structured block files.
//!
//! A block file is a sequence of blocklets, each holding one chunk per
//! dimension and per measure, followed by a footer describing their layout.
//! Chunks are written in one of three [`ColumnarFormatVersion`]s and read
//! back by the matching [`ChunkReader`].
//!
//! A scan starts from a [`BlockExecutionInfo`] that maps the logical query
//! onto the columns physically present in one block. The [`BlockScanner`]
//! then walks the [`BlockletChain`], fetching only the selected chunks,
//! dropping deleted rows and applying the filter.

pub mod chain;
pub mod codec;
pub mod delete_delta;
pub mod execution;
pub mod filter;
pub mod format;
pub mod layout;
pub mod reader;
pub mod scanner;
pub mod writer;

pub use chain::{BlockletChain, BlockletNode};
pub use delete_delta::{DeleteDeltaResolver, ObjectStoreDeleteDeltaResolver};
pub use execution::{BlockExecutionInfo, BlockExecutionInfoBuilder, BlockSchema};
pub use filter::{FilterExecutor, Predicate};
pub use format::ColumnarFormatVersion;
pub use layout::{Blocklet, BlockletMeta, IndexKey};
pub use reader::{ChunkReader, RawChunk};
pub use scanner::{BlockScanner, Row, ScanOutput};
pub use writer::{read_blocklets, BlockFileWriter, BlockletWriter};
