// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Scanning one block for one query.

use std::sync::Arc;

use arrow_array::builder::{Float64Builder, StringBuilder, UInt32Builder};
use arrow_array::{ArrayRef, RecordBatch};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use futures::{StreamExt, TryStreamExt};
use snafu::location;
use tessera_core::datatypes::{Value, NULL_SURROGATE_KEY};
use tessera_core::io::FileReader;
use tessera_core::utils::tokio::get_num_compute_intensive_cpus;
use tessera_core::{Error, Result};
use tessera_dict::TableDictionaryGenerator;
use tracing::{debug, instrument};

use crate::chain::BlockletNode;
use crate::codec::ColumnValues;
use crate::execution::BlockExecutionInfo;
use crate::reader::RawChunk;

/// Logical output row: query dimensions then query measures.
pub type Row = Vec<Value>;

/// Result of scanning one block, shaped by
/// [`BlockExecutionInfo::vector_batch`].
#[derive(Debug, Clone)]
pub enum ScanOutput {
    Rows(Vec<Row>),
    /// One batch per blocklet that produced rows.
    Batches(Vec<RecordBatch>),
}

impl ScanOutput {
    pub fn num_rows(&self) -> usize {
        match self {
            Self::Rows(rows) => rows.len(),
            Self::Batches(batches) => batches.iter().map(RecordBatch::num_rows).sum(),
        }
    }
}

/// Arrow schema of the rows produced for `info`.
///
/// Dictionary dimensions are `UInt32` keys in raw detail queries and
/// strings otherwise.
pub fn output_schema(info: &BlockExecutionInfo) -> SchemaRef {
    let dimensions = info.actual_query_dimensions().iter().map(|d| {
        let data_type = if info.raw_record_detail_query() && d.has_dictionary() {
            DataType::UInt32
        } else {
            DataType::Utf8
        };
        Field::new(&d.name, data_type, true)
    });
    let measures = info
        .actual_query_measures()
        .iter()
        .map(|m| Field::new(&m.name, DataType::Float64, true));
    Arc::new(Schema::new(dimensions.chain(measures).collect::<Vec<_>>()))
}

/// Decoded chunks of one blocklet, indexed by physical chunk index.
struct DecodedBlocklet {
    dimensions: Vec<Option<ColumnValues>>,
    measures: Vec<Option<ColumnValues>>,
}

fn decoded(column: &[Option<ColumnValues>], index: usize) -> Result<&ColumnValues> {
    column.get(index).and_then(Option::as_ref).ok_or_else(|| {
        Error::internal(
            format!("chunk {} is projected but was not read", index),
            location!(),
        )
    })
}

/// Turns a [`BlockExecutionInfo`] into rows or Arrow batches.
#[derive(Debug, Clone)]
pub struct BlockScanner {
    reader: Arc<dyn FileReader>,
    dictionaries: Option<Arc<TableDictionaryGenerator>>,
}

impl BlockScanner {
    pub fn new(reader: Arc<dyn FileReader>) -> Self {
        Self {
            reader,
            dictionaries: None,
        }
    }

    /// Dictionaries used to turn surrogate keys back into values.
    pub fn with_dictionaries(mut self, dictionaries: Arc<TableDictionaryGenerator>) -> Self {
        self.dictionaries = Some(dictionaries);
        self
    }

    pub async fn scan(&self, info: &BlockExecutionInfo) -> Result<ScanOutput> {
        if info.vector_batch() {
            Ok(ScanOutput::Batches(self.scan_batches(info).await?))
        } else {
            Ok(ScanOutput::Rows(self.scan_rows(info).await?))
        }
    }

    /// Scan several blocks concurrently. Outputs are in input order.
    pub async fn scan_blocks(&self, infos: &[BlockExecutionInfo]) -> Result<Vec<ScanOutput>> {
        futures::stream::iter(infos)
            .map(|info| self.scan(info))
            .buffered(get_num_compute_intensive_cpus())
            .try_collect()
            .await
    }

    pub async fn scan_rows(&self, info: &BlockExecutionInfo) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for node in info.nodes() {
            rows.extend(self.scan_blocklet(info, node).await?);
        }
        Ok(rows)
    }

    pub async fn scan_batches(&self, info: &BlockExecutionInfo) -> Result<Vec<RecordBatch>> {
        let schema = output_schema(info);
        let mut batches = Vec::new();
        for node in info.nodes() {
            let rows = self.scan_blocklet(info, node).await?;
            if !rows.is_empty() {
                batches.push(rows_to_batch(schema.clone(), &rows)?);
            }
        }
        Ok(batches)
    }

    #[instrument(level = "debug", skip_all, fields(block = %info.block_path(), blocklet = node.ordinal()))]
    async fn scan_blocklet(
        &self,
        info: &BlockExecutionInfo,
        node: BlockletNode<'_>,
    ) -> Result<Vec<Row>> {
        let reader = self.reader.as_ref();
        let dimension_chunks = node
            .dimension_chunks(reader, info.all_selected_dimension_blocks_indexes())
            .await?;
        let measure_chunks = node
            .measure_chunks(reader, info.all_selected_measure_blocks_indexes())
            .await?;
        let decode = |chunks: Vec<Option<RawChunk>>| {
            chunks
                .into_iter()
                .map(|chunk| chunk.map(|c| c.decode()).transpose())
                .collect::<Result<Vec<_>>>()
        };
        let blocklet = DecodedBlocklet {
            dimensions: decode(dimension_chunks)?,
            measures: decode(measure_chunks)?,
        };

        let deletions = info.deleted_records().get(node.ordinal());
        let num_rows = node.row_count();
        let mut rows = Vec::new();
        let mut num_deleted = 0;
        for row in 0..num_rows {
            if deletions.is_some_and(|d| d.contains(row)) {
                num_deleted += 1;
                continue;
            }
            let row = row as usize;
            let output = if info.raw_record_detail_query() {
                let raw = self.logical_row(info, &blocklet, row, false)?;
                if let Some(filter) = info.filter() {
                    let resolved = self.logical_row(info, &blocklet, row, true)?;
                    if !filter.matches(&resolved)? {
                        continue;
                    }
                }
                raw
            } else {
                let resolved = self.logical_row(info, &blocklet, row, true)?;
                if let Some(filter) = info.filter() {
                    if !filter.matches(&resolved)? {
                        continue;
                    }
                }
                resolved
            };
            rows.push(output);
        }
        debug!(
            num_rows,
            num_deleted,
            num_selected = rows.len(),
            "Scanned blocklet"
        );
        Ok(rows)
    }

    /// Build the logical row at `row`, filling defaults for missing columns.
    ///
    /// With `resolve` dictionary keys are replaced by their values.
    fn logical_row(
        &self,
        info: &BlockExecutionInfo,
        blocklet: &DecodedBlocklet,
        row: usize,
        resolve: bool,
    ) -> Result<Row> {
        let mut out = Vec::with_capacity(info.projection().len());
        for slot in info.dimension_slots() {
            let value = match info.projection()[slot] {
                Some(index) => {
                    let dimension = &info.actual_query_dimensions()[slot];
                    match decoded(&blocklet.dimensions, index)?.value(row) {
                        Value::Key(key) if resolve => self.resolve_key(&dimension.column_id, key)?,
                        value => value,
                    }
                }
                None if resolve => info.actual_query_dimensions()[slot]
                    .default_value
                    .clone()
                    .into(),
                None => info.default_dimension_value(slot),
            };
            out.push(value);
        }
        for (measure, slot) in info.measure_slots().enumerate() {
            let value = match info.projection()[slot] {
                Some(index) => decoded(&blocklet.measures, index)?.value(row),
                None => info.default_measure_value(measure),
            };
            out.push(value);
        }
        Ok(out)
    }

    fn resolve_key(&self, column_id: &str, key: u32) -> Result<Value> {
        if key == NULL_SURROGATE_KEY {
            return Ok(Value::Null);
        }
        let Some(dictionaries) = &self.dictionaries else {
            return Err(Error::invalid_input(
                format!(
                    "column {} is dictionary encoded but the scanner has no dictionaries",
                    column_id
                ),
                location!(),
            ));
        };
        dictionaries.reverse_resolve(column_id, key).map(Value::Utf8)
    }
}

fn rows_to_batch(schema: SchemaRef, rows: &[Row]) -> Result<RecordBatch> {
    let mismatch = |field: &Field, value: &Value| {
        Error::internal(
            format!(
                "value {} does not fit column {} of type {}",
                value,
                field.name(),
                field.data_type()
            ),
            location!(),
        )
    };

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for (slot, field) in schema.fields().iter().enumerate() {
        let values = rows.iter().map(|row| &row[slot]);
        let array: ArrayRef = match field.data_type() {
            DataType::Utf8 => {
                let mut builder = StringBuilder::with_capacity(rows.len(), 0);
                for value in values {
                    match value {
                        Value::Utf8(s) => builder.append_value(s),
                        Value::Null => builder.append_null(),
                        other => return Err(mismatch(field, other)),
                    }
                }
                Arc::new(builder.finish())
            }
            DataType::UInt32 => {
                let mut builder = UInt32Builder::with_capacity(rows.len());
                for value in values {
                    match value {
                        Value::Key(key) => builder.append_value(*key),
                        Value::Null => builder.append_null(),
                        other => return Err(mismatch(field, other)),
                    }
                }
                Arc::new(builder.finish())
            }
            DataType::Float64 => {
                let mut builder = Float64Builder::with_capacity(rows.len());
                for value in values {
                    match value {
                        Value::Float64(v) => builder.append_value(*v),
                        Value::Null => builder.append_null(),
                        other => return Err(mismatch(field, other)),
                    }
                }
                Arc::new(builder.finish())
            }
            other => {
                return Err(Error::not_supported(
                    format!("output column type {}", other),
                    location!(),
                ))
            }
        };
        columns.push(array);
    }
    Ok(RecordBatch::try_new(schema, columns)?)
}
