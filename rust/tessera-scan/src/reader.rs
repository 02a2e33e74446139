// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Raw chunk retrieval, one reader per format version.

use std::ops::{Range, RangeInclusive};

use bytes::Bytes;
use futures::future::try_join_all;
use object_store::path::Path;
use snafu::location;
use tessera_core::io::FileReader;
use tessera_core::{Error, Result};
use tracing::instrument;

use crate::codec::{decode_page, ColumnValues};
use crate::format::ColumnarFormatVersion;
use crate::layout::{Blocklet, ChunkEncoding, ChunkLayout};

/// Undecoded bytes of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    pub num_rows: u32,
    pub data: Bytes,
}

/// Undecoded bytes of one column chunk of a blocklet.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    pub path: Path,
    pub column_index: usize,
    pub encoding: ChunkEncoding,
    pub pages: Vec<RawPage>,
}

impl RawChunk {
    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn num_rows(&self) -> usize {
        self.pages.iter().map(|p| p.num_rows as usize).sum()
    }

    pub fn decode_page(&self, page: usize) -> Result<ColumnValues> {
        let Some(raw) = self.pages.get(page) else {
            return Err(Error::invalid_input(
                format!(
                    "page {} out of range, chunk {} has {} pages",
                    page,
                    self.column_index,
                    self.pages.len()
                ),
                location!(),
            ));
        };
        decode_page(&self.path, self.encoding, &raw.data, raw.num_rows as usize)
    }

    /// Decode all pages into one column.
    pub fn decode(&self) -> Result<ColumnValues> {
        let mut values = ColumnValues::empty(self.encoding);
        for page in 0..self.pages.len() {
            values.append(self.decode_page(page)?)?;
        }
        Ok(values)
    }
}

/// Reads every chunk with its own request.
#[derive(Debug, Clone, Copy, Default)]
pub struct V1ChunkReader;

/// Reads each group of adjacent chunks with one request.
#[derive(Debug, Clone, Copy, Default)]
pub struct V2ChunkReader;

/// Reads like [`V2ChunkReader`] and splits each chunk into its pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct V3ChunkReader;

/// Chunk reader matching a blocklet's [`ColumnarFormatVersion`].
#[derive(Debug, Clone, Copy)]
pub enum ChunkReader {
    V1(V1ChunkReader),
    V2(V2ChunkReader),
    V3(V3ChunkReader),
}

impl ChunkReader {
    pub fn for_version(version: ColumnarFormatVersion) -> Self {
        match version {
            ColumnarFormatVersion::V1 => Self::V1(V1ChunkReader),
            ColumnarFormatVersion::V2 => Self::V2(V2ChunkReader),
            ColumnarFormatVersion::V3 => Self::V3(V3ChunkReader),
        }
    }

    /// Read the dimension chunks in `groups`.
    ///
    /// The result has one slot per dimension chunk of the blocklet; slots
    /// outside `groups` are `None` and were never read.
    pub async fn read_dimension_chunks(
        &self,
        reader: &dyn FileReader,
        blocklet: &Blocklet,
        groups: &[RangeInclusive<usize>],
    ) -> Result<Vec<Option<RawChunk>>> {
        self.read_chunks(reader, blocklet, &blocklet.layout().dimensions, groups)
            .await
    }

    pub async fn read_measure_chunks(
        &self,
        reader: &dyn FileReader,
        blocklet: &Blocklet,
        groups: &[RangeInclusive<usize>],
    ) -> Result<Vec<Option<RawChunk>>> {
        self.read_chunks(reader, blocklet, &blocklet.layout().measures, groups)
            .await
    }

    #[instrument(level = "debug", skip_all, fields(path = %blocklet.path, blocklet = blocklet.ordinal, num_groups = groups.len()))]
    async fn read_chunks(
        &self,
        reader: &dyn FileReader,
        blocklet: &Blocklet,
        chunks: &[ChunkLayout],
        groups: &[RangeInclusive<usize>],
    ) -> Result<Vec<Option<RawChunk>>> {
        for group in groups {
            if group.is_empty() || *group.end() >= chunks.len() {
                return Err(Error::invalid_input(
                    format!(
                        "column group {:?} out of range, blocklet has {} chunks",
                        group,
                        chunks.len()
                    ),
                    location!(),
                ));
            }
        }

        let read = try_join_all(groups.iter().map(|group| async move {
            match self {
                Self::V1(r) => r.read_group(reader, blocklet, chunks, group.clone()).await,
                Self::V2(r) => r.read_group(reader, blocklet, chunks, group.clone()).await,
                Self::V3(r) => r.read_group(reader, blocklet, chunks, group.clone()).await,
            }
        }))
        .await?;

        let mut out = vec![None; chunks.len()];
        for chunk in read.into_iter().flatten() {
            let index = chunk.column_index;
            out[index] = Some(chunk);
        }
        Ok(out)
    }
}

fn single_page(
    blocklet: &Blocklet,
    chunk: &ChunkLayout,
    column_index: usize,
    data: Bytes,
) -> Result<RawChunk> {
    if chunk.pages.len() != 1 {
        return Err(Error::corrupt_file(
            blocklet.path.clone(),
            format!(
                "{} chunk {} of blocklet {} has {} pages, expected 1",
                blocklet.version(),
                column_index,
                blocklet.ordinal,
                chunk.pages.len()
            ),
            location!(),
        ));
    }
    Ok(RawChunk {
        path: blocklet.path.clone(),
        column_index,
        encoding: chunk.encoding,
        pages: vec![RawPage {
            num_rows: blocklet.num_rows(),
            data,
        }],
    })
}

fn chunk_range(blocklet: &Blocklet, chunk: &ChunkLayout, index: usize) -> Result<Range<usize>> {
    chunk.byte_range().ok_or_else(|| {
        Error::corrupt_file(
            blocklet.path.clone(),
            format!(
                "chunk {} of blocklet {} has an overflowing byte range",
                index, blocklet.ordinal
            ),
            location!(),
        )
    })
}

/// Read `range` and fail if the file holds fewer bytes than the footer
/// recorded.
async fn read_exact(
    reader: &dyn FileReader,
    blocklet: &Blocklet,
    range: Range<usize>,
) -> Result<Bytes> {
    let expected = range.len();
    let data = reader.read_range(&blocklet.path, range.clone()).await?;
    if data.len() != expected {
        return Err(Error::corrupt_file(
            blocklet.path.clone(),
            format!(
                "blocklet {} expects bytes {:?} but only {} could be read",
                blocklet.ordinal,
                range,
                data.len()
            ),
            location!(),
        ));
    }
    Ok(data)
}

/// Fetch the bytes spanning every chunk of `group` with one request and
/// hand out a zero-copy slice per chunk.
async fn read_span(
    reader: &dyn FileReader,
    blocklet: &Blocklet,
    chunks: &[ChunkLayout],
    group: RangeInclusive<usize>,
) -> Result<Vec<(usize, Bytes)>> {
    let ranges = group
        .map(|index| Ok((index, chunk_range(blocklet, &chunks[index], index)?)))
        .collect::<Result<Vec<_>>>()?;
    let start = ranges.iter().map(|(_, r)| r.start).min().unwrap_or_default();
    let end = ranges.iter().map(|(_, r)| r.end).max().unwrap_or_default();
    let span = read_exact(reader, blocklet, start..end).await?;
    Ok(ranges
        .into_iter()
        .map(|(index, range)| (index, span.slice(range.start - start..range.end - start)))
        .collect())
}

impl V1ChunkReader {
    async fn read_group(
        &self,
        reader: &dyn FileReader,
        blocklet: &Blocklet,
        chunks: &[ChunkLayout],
        group: RangeInclusive<usize>,
    ) -> Result<Vec<RawChunk>> {
        let mut out = Vec::with_capacity(group.clone().count());
        for index in group {
            let chunk = &chunks[index];
            let data = read_exact(reader, blocklet, chunk_range(blocklet, chunk, index)?).await?;
            out.push(single_page(blocklet, chunk, index, data)?);
        }
        Ok(out)
    }
}

impl V2ChunkReader {
    async fn read_group(
        &self,
        reader: &dyn FileReader,
        blocklet: &Blocklet,
        chunks: &[ChunkLayout],
        group: RangeInclusive<usize>,
    ) -> Result<Vec<RawChunk>> {
        read_span(reader, blocklet, chunks, group)
            .await?
            .into_iter()
            .map(|(index, data)| single_page(blocklet, &chunks[index], index, data))
            .collect()
    }
}

impl V3ChunkReader {
    async fn read_group(
        &self,
        reader: &dyn FileReader,
        blocklet: &Blocklet,
        chunks: &[ChunkLayout],
        group: RangeInclusive<usize>,
    ) -> Result<Vec<RawChunk>> {
        read_span(reader, blocklet, chunks, group)
            .await?
            .into_iter()
            .map(|(index, data)| {
                let chunk = &chunks[index];
                let num_rows: u64 = chunk.pages.iter().map(|p| p.num_rows as u64).sum();
                if num_rows != blocklet.num_rows() as u64 {
                    return Err(Error::corrupt_file(
                        blocklet.path.clone(),
                        format!(
                            "chunk {} of blocklet {} has {} rows in its pages, expected {}",
                            index,
                            blocklet.ordinal,
                            num_rows,
                            blocklet.num_rows()
                        ),
                        location!(),
                    ));
                }
                let mut offset: usize = 0;
                let pages = chunk
                    .pages
                    .iter()
                    .map(|page| {
                        let end = usize::try_from(page.length)
                            .ok()
                            .and_then(|len| offset.checked_add(len))
                            .filter(|end| *end <= data.len())
                            .ok_or_else(|| {
                                Error::corrupt_file(
                                    blocklet.path.clone(),
                                    format!(
                                        "page of chunk {} in blocklet {} runs past the chunk",
                                        index, blocklet.ordinal
                                    ),
                                    location!(),
                                )
                            })?;
                        let page_data = data.slice(offset..end);
                        offset = end;
                        Ok(RawPage {
                            num_rows: page.num_rows,
                            data: page_data,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(RawChunk {
                    path: blocklet.path.clone(),
                    column_index: index,
                    encoding: chunk.encoding,
                    pages,
                })
            })
            .collect()
    }
}
