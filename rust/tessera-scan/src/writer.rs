// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Writing block files.
//!
//! A block file is the column chunks of each blocklet back to back, followed
//! by a JSON footer describing every blocklet, the footer length as a
//! little-endian `u64`, and [`MAGIC`].

use std::ops::Range;

use bytes::Bytes;
use object_store::{path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use snafu::location;
use tessera_core::datatypes::SurrogateKey;
use tessera_core::io::FileReader;
use tessera_core::{Error, Result};
use tracing::{debug, instrument};

use crate::codec::{encode_f64, encode_keys, encode_strings};
use crate::format::{ColumnarFormatVersion, FOOTER_TAIL_LEN, MAGIC};
use crate::layout::{
    Blocklet, BlockletLayout, BlockletMeta, ChunkEncoding, ChunkLayout, IndexKey, PageLayout,
};

pub const DEFAULT_ROWS_PER_PAGE: usize = 32_000;

/// Values of one dimension column of a blocklet.
#[derive(Debug, Clone, PartialEq)]
pub enum DimensionColumn {
    Dictionary(Vec<SurrogateKey>),
    Direct(Vec<Option<String>>),
}

impl DimensionColumn {
    fn len(&self) -> usize {
        match self {
            Self::Dictionary(keys) => keys.len(),
            Self::Direct(values) => values.len(),
        }
    }
}

/// Collects the columns of one blocklet.
#[derive(Debug, Clone)]
pub struct BlockletWriter {
    version: ColumnarFormatVersion,
    rows_per_page: usize,
    dimensions: Vec<DimensionColumn>,
    measures: Vec<Vec<Option<f64>>>,
}

impl BlockletWriter {
    pub fn new(version: ColumnarFormatVersion) -> Self {
        Self {
            version,
            rows_per_page: DEFAULT_ROWS_PER_PAGE,
            dimensions: vec![],
            measures: vec![],
        }
    }

    /// Only paged formats honor this.
    pub fn with_rows_per_page(mut self, rows_per_page: usize) -> Self {
        self.rows_per_page = rows_per_page.max(1);
        self
    }

    pub fn with_dictionary_column(mut self, keys: Vec<SurrogateKey>) -> Self {
        self.dimensions.push(DimensionColumn::Dictionary(keys));
        self
    }

    pub fn with_direct_column<S: Into<String>>(
        mut self,
        values: impl IntoIterator<Item = Option<S>>,
    ) -> Self {
        self.dimensions.push(DimensionColumn::Direct(
            values.into_iter().map(|v| v.map(Into::into)).collect(),
        ));
        self
    }

    pub fn with_measure_column(mut self, values: Vec<Option<f64>>) -> Self {
        self.measures.push(values);
        self
    }

    fn num_rows(&self) -> Result<usize> {
        let mut lengths = self
            .dimensions
            .iter()
            .map(DimensionColumn::len)
            .chain(self.measures.iter().map(Vec::len));
        let Some(num_rows) = lengths.next() else {
            return Err(Error::invalid_input(
                "a blocklet needs at least one column",
                location!(),
            ));
        };
        if lengths.any(|len| len != num_rows) {
            return Err(Error::invalid_input(
                "all columns of a blocklet must have the same number of rows",
                location!(),
            ));
        }
        u32::try_from(num_rows).map_err(|_| {
            Error::invalid_input(
                format!("blocklet with {} rows is too large", num_rows),
                location!(),
            )
        })?;
        Ok(num_rows)
    }

    fn page_ranges(&self, num_rows: usize) -> Vec<Range<usize>> {
        if !self.version.is_paged() {
            return vec![0..num_rows];
        }
        (0..num_rows)
            .step_by(self.rows_per_page)
            .map(|start| start..(start + self.rows_per_page).min(num_rows))
            .collect()
    }

    /// Min and max composite key over the dictionary columns.
    fn key_range(&self, num_rows: usize) -> (IndexKey, IndexKey) {
        let key_columns = self
            .dimensions
            .iter()
            .filter_map(|d| match d {
                DimensionColumn::Dictionary(keys) => Some(keys),
                DimensionColumn::Direct(_) => None,
            })
            .collect::<Vec<_>>();
        if key_columns.is_empty() {
            return (IndexKey::default(), IndexKey::default());
        }
        (0..num_rows)
            .map(|row| IndexKey(key_columns.iter().map(|keys| keys[row]).collect()))
            .fold(None, |range: Option<(IndexKey, IndexKey)>, key| match range {
                None => Some((key.clone(), key)),
                Some((min, max)) => Some((min.min(key.clone()), max.max(key))),
            })
            .unwrap_or_default()
    }

    /// Append the blocklet's chunks to `buf` and describe where they went.
    fn encode_into(self, buf: &mut Vec<u8>) -> Result<BlockletMeta> {
        let num_rows = self.num_rows()?;
        let pages = self.page_ranges(num_rows);
        let (start_key, end_key) = self.key_range(num_rows);

        let mut write_chunk = |encoding: ChunkEncoding, encode: &dyn Fn(Range<usize>) -> Vec<u8>| {
            let offset = buf.len() as u64;
            let pages = pages
                .iter()
                .map(|rows| {
                    let data = encode(rows.clone());
                    buf.extend_from_slice(&data);
                    PageLayout {
                        length: data.len() as u64,
                        num_rows: rows.len() as u32,
                    }
                })
                .collect();
            ChunkLayout {
                encoding,
                offset,
                pages,
            }
        };

        let mut layout = BlockletLayout::default();
        for dimension in &self.dimensions {
            let chunk = match dimension {
                DimensionColumn::Dictionary(keys) => {
                    write_chunk(ChunkEncoding::DictionaryKeys, &|rows| {
                        encode_keys(&keys[rows])
                    })
                }
                DimensionColumn::Direct(values) => {
                    write_chunk(ChunkEncoding::Utf8, &|rows| encode_strings(&values[rows]))
                }
            };
            layout.dimensions.push(chunk);
        }
        for values in &self.measures {
            layout
                .measures
                .push(write_chunk(ChunkEncoding::Float64, &|rows| {
                    encode_f64(&values[rows])
                }));
        }

        Ok(BlockletMeta {
            version: self.version,
            num_rows: num_rows as u32,
            num_pages: pages.len() as u32,
            start_key,
            end_key,
            layout,
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BlockFooter {
    blocklets: Vec<BlockletMeta>,
}

/// Writes blocklets one after another into a single block file.
#[derive(Debug)]
pub struct BlockFileWriter {
    path: Path,
    buf: Vec<u8>,
    footer: BlockFooter,
}

impl BlockFileWriter {
    pub fn new(path: Path) -> Self {
        Self {
            path,
            buf: Vec::new(),
            footer: BlockFooter::default(),
        }
    }

    pub fn add_blocklet(&mut self, blocklet: BlockletWriter) -> Result<Blocklet> {
        let meta = blocklet.encode_into(&mut self.buf)?;
        let ordinal = self.footer.blocklets.len() as u32;
        self.footer.blocklets.push(meta.clone());
        Ok(Blocklet::new(self.path.clone(), ordinal, meta))
    }

    /// The complete file image and the blocklets it holds.
    pub fn finish(mut self) -> Result<(Bytes, Vec<Blocklet>)> {
        let footer = serde_json::to_vec(&self.footer)?;
        self.buf.extend_from_slice(&footer);
        self.buf
            .extend_from_slice(&(footer.len() as u64).to_le_bytes());
        self.buf.extend_from_slice(MAGIC);
        let blocklets = blocklets_from_footer(&self.path, self.footer);
        Ok((Bytes::from(self.buf), blocklets))
    }

    #[instrument(level = "debug", skip_all, fields(path = %self.path))]
    pub async fn write(self, object_store: &dyn ObjectStore) -> Result<Vec<Blocklet>> {
        let path = self.path.clone();
        let (data, blocklets) = self.finish()?;
        debug!(
            num_bytes = data.len(),
            num_blocklets = blocklets.len(),
            "Writing block file"
        );
        object_store.put(&path, data.into()).await?;
        Ok(blocklets)
    }
}

fn blocklets_from_footer(path: &Path, footer: BlockFooter) -> Vec<Blocklet> {
    footer
        .blocklets
        .into_iter()
        .enumerate()
        .map(|(ordinal, meta)| Blocklet::new(path.clone(), ordinal as u32, meta))
        .collect()
}

/// Read the blocklet descriptors from the footer of a block file.
#[instrument(level = "debug", skip(reader))]
pub async fn read_blocklets(reader: &dyn FileReader, path: &Path) -> Result<Vec<Blocklet>> {
    let size = reader.size(path).await?;
    if size < FOOTER_TAIL_LEN {
        return Err(Error::corrupt_file(
            path.clone(),
            format!("file of {} bytes is too small to be a block file", size),
            location!(),
        ));
    }
    let tail = reader
        .read_range(path, size - FOOTER_TAIL_LEN..size)
        .await?;
    if &tail[8..] != MAGIC {
        return Err(Error::corrupt_file(
            path.clone(),
            "missing block file magic",
            location!(),
        ));
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&tail[..8]);
    let footer_len = u64::from_le_bytes(len_bytes) as usize;
    let footer_end = size - FOOTER_TAIL_LEN;
    let Some(footer_start) = footer_end.checked_sub(footer_len) else {
        return Err(Error::corrupt_file(
            path.clone(),
            format!("footer length {} exceeds file size {}", footer_len, size),
            location!(),
        ));
    };
    let data = reader.read_range(path, footer_start..footer_end).await?;
    let footer: BlockFooter = serde_json::from_slice(&data)
        .map_err(|e| Error::corrupt_file(path.clone(), e.to_string(), location!()))?;
    Ok(blocklets_from_footer(path, footer))
}
