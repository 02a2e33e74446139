// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Per-block scan context handed from the planner to the scanner.

use std::collections::HashSet;
use std::ops::{Range, RangeInclusive};
use std::sync::Arc;

use object_store::path::Path;
use snafu::location;
use tessera_core::datatypes::{Dimension, Measure, Value, NULL_SURROGATE_KEY};
use tessera_core::utils::deletion::DeletedRecords;
use tessera_core::{Error, Result};

use crate::chain::{BlockletChain, BlockletNode};
use crate::delete_delta::DeleteDeltaResolver;
use crate::filter::FilterExecutor;
use crate::layout::{group_column_indexes, IndexKey};

/// Physical schema of one block: chunk `i` of a blocklet holds
/// `dimensions[i]` (or `measures[i]`).
///
/// Blocks written before a column was added do not have it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockSchema {
    pub dimensions: Vec<Dimension>,
    pub measures: Vec<Measure>,
}

impl BlockSchema {
    pub fn new(dimensions: Vec<Dimension>, measures: Vec<Measure>) -> Self {
        Self {
            dimensions,
            measures,
        }
    }
}

/// Everything needed to scan one block for one query.
///
/// Slots of the logical output row are the query dimensions followed by the
/// query measures. `projection[slot]` is the physical chunk index that feeds
/// the slot, or `None` when the block predates the column and the column's
/// default is used instead.
#[derive(Debug, Clone)]
pub struct BlockExecutionInfo {
    block_path: Path,
    chain: Arc<BlockletChain>,
    start_blocklet_index: usize,
    number_of_blocklets_to_scan: usize,
    start_key: Option<IndexKey>,
    end_key: Option<IndexKey>,

    actual_query_dimensions: Vec<Dimension>,
    actual_query_measures: Vec<Measure>,
    query_dimensions: Vec<Dimension>,
    query_measures: Vec<Measure>,
    projection: Vec<Option<usize>>,
    dictionary_column_indexes: Vec<usize>,
    no_dictionary_column_indexes: Vec<usize>,
    all_selected_dimension_blocks_indexes: Vec<RangeInclusive<usize>>,
    all_selected_measure_blocks_indexes: Vec<RangeInclusive<usize>>,

    filter: Option<Arc<dyn FilterExecutor>>,
    delete_delta_paths: Vec<Path>,
    deleted_records: Arc<DeletedRecords>,

    vector_batch: bool,
    raw_record_detail_query: bool,
    is_restructured_block: bool,
}

impl BlockExecutionInfo {
    pub fn block_path(&self) -> &Path {
        &self.block_path
    }

    pub fn chain(&self) -> &BlockletChain {
        &self.chain
    }

    pub fn start_blocklet_index(&self) -> usize {
        self.start_blocklet_index
    }

    pub fn number_of_blocklets_to_scan(&self) -> usize {
        self.number_of_blocklets_to_scan
    }

    /// Entry point into the chain, `None` when nothing is to be scanned.
    pub fn first_node(&self) -> Option<BlockletNode<'_>> {
        if self.number_of_blocklets_to_scan == 0 {
            return None;
        }
        self.chain.node(self.start_blocklet_index)
    }

    /// The nodes to scan, in chain order.
    pub fn nodes(&self) -> impl Iterator<Item = BlockletNode<'_>> {
        std::iter::successors(self.first_node(), |node| node.next())
            .take(self.number_of_blocklets_to_scan)
    }

    pub fn start_key(&self) -> Option<&IndexKey> {
        self.start_key.as_ref()
    }

    pub fn end_key(&self) -> Option<&IndexKey> {
        self.end_key.as_ref()
    }

    /// Query dimensions as the query sees them.
    pub fn actual_query_dimensions(&self) -> &[Dimension] {
        &self.actual_query_dimensions
    }

    pub fn actual_query_measures(&self) -> &[Measure] {
        &self.actual_query_measures
    }

    /// Query dimensions present in this block.
    pub fn query_dimensions(&self) -> &[Dimension] {
        &self.query_dimensions
    }

    pub fn query_measures(&self) -> &[Measure] {
        &self.query_measures
    }

    pub fn projection(&self) -> &[Option<usize>] {
        &self.projection
    }

    pub fn dimension_slots(&self) -> Range<usize> {
        0..self.actual_query_dimensions.len()
    }

    pub fn measure_slots(&self) -> Range<usize> {
        self.actual_query_dimensions.len()..self.projection.len()
    }

    pub fn dictionary_column_indexes(&self) -> &[usize] {
        &self.dictionary_column_indexes
    }

    pub fn no_dictionary_column_indexes(&self) -> &[usize] {
        &self.no_dictionary_column_indexes
    }

    pub fn all_selected_dimension_blocks_indexes(&self) -> &[RangeInclusive<usize>] {
        &self.all_selected_dimension_blocks_indexes
    }

    pub fn all_selected_measure_blocks_indexes(&self) -> &[RangeInclusive<usize>] {
        &self.all_selected_measure_blocks_indexes
    }

    pub fn filter(&self) -> Option<&dyn FilterExecutor> {
        self.filter.as_deref()
    }

    pub fn delete_delta_paths(&self) -> &[Path] {
        &self.delete_delta_paths
    }

    pub fn deleted_records(&self) -> &DeletedRecords {
        &self.deleted_records
    }

    /// Produce Arrow batches instead of rows.
    pub fn vector_batch(&self) -> bool {
        self.vector_batch
    }

    /// Return dictionary columns as surrogate keys instead of values.
    pub fn raw_record_detail_query(&self) -> bool {
        self.raw_record_detail_query
    }

    pub fn is_restructured_block(&self) -> bool {
        self.is_restructured_block
    }

    /// Value surfaced for a dimension slot the block does not have.
    ///
    /// Raw detail queries see the null key for missing dictionary columns.
    pub fn default_dimension_value(&self, slot: usize) -> Value {
        let dimension = &self.actual_query_dimensions[slot];
        if self.raw_record_detail_query && dimension.has_dictionary() {
            return Value::Key(NULL_SURROGATE_KEY);
        }
        dimension.default_value.clone().into()
    }

    pub fn default_measure_value(&self, measure: usize) -> Value {
        self.actual_query_measures[measure].default_value.into()
    }
}

/// The projection derived from the logical query and a block's schema.
#[derive(Debug, Clone, Default)]
struct Plan {
    actual_query_dimensions: Vec<Dimension>,
    actual_query_measures: Vec<Measure>,
    query_dimensions: Vec<Dimension>,
    query_measures: Vec<Measure>,
    projection: Vec<Option<usize>>,
    dictionary_column_indexes: Vec<usize>,
    no_dictionary_column_indexes: Vec<usize>,
    selected_measure_indexes: Vec<usize>,
}

fn plan(query_dimensions: &[Dimension], query_measures: &[Measure], block: &BlockSchema) -> Plan {
    let mut plan = Plan {
        actual_query_dimensions: query_dimensions.to_vec(),
        actual_query_measures: query_measures.to_vec(),
        ..Default::default()
    };
    for dimension in query_dimensions {
        let physical = block
            .dimensions
            .iter()
            .position(|d| d.column_id == dimension.column_id);
        if let Some(index) = physical {
            let stored = &block.dimensions[index];
            if stored.has_dictionary() {
                plan.dictionary_column_indexes.push(index);
            } else {
                plan.no_dictionary_column_indexes.push(index);
            }
            plan.query_dimensions.push(stored.clone());
        }
        plan.projection.push(physical);
    }
    for measure in query_measures {
        let physical = block
            .measures
            .iter()
            .position(|m| m.column_id == measure.column_id);
        if let Some(index) = physical {
            plan.query_measures.push(block.measures[index].clone());
            plan.selected_measure_indexes.push(index);
        }
        plan.projection.push(physical);
    }
    plan
}

/// Assembles and validates a [`BlockExecutionInfo`].
#[derive(Debug, Clone)]
pub struct BlockExecutionInfoBuilder {
    block_path: Path,
    chain: Arc<BlockletChain>,
    blocklet_range: Option<(usize, usize)>,
    key_range: Option<(IndexKey, IndexKey)>,
    plan: Option<Plan>,
    filter: Option<Arc<dyn FilterExecutor>>,
    delete_delta_paths: Vec<Path>,
    deleted_records: DeletedRecords,
    vector_batch: bool,
    raw_record_detail_query: bool,
}

impl BlockExecutionInfoBuilder {
    pub fn new(block_path: Path, chain: Arc<BlockletChain>) -> Self {
        Self {
            block_path,
            chain,
            blocklet_range: None,
            key_range: None,
            plan: None,
            filter: None,
            delete_delta_paths: vec![],
            deleted_records: DeletedRecords::default(),
            vector_batch: false,
            raw_record_detail_query: false,
        }
    }

    /// Derive the physical projection for `block` from the logical query
    /// columns. Columns are matched by id; query columns the block lacks
    /// make the block restructured.
    pub fn plan(
        mut self,
        query_dimensions: &[Dimension],
        query_measures: &[Measure],
        block: &BlockSchema,
    ) -> Self {
        self.plan = Some(plan(query_dimensions, query_measures, block));
        self
    }

    /// Scan `count` blocklets starting at chain index `start`.
    pub fn with_blocklet_range(mut self, start: usize, count: usize) -> Self {
        self.blocklet_range = Some((start, count));
        self
    }

    /// Skip blocklets whose composite keys fall outside `start..=end`.
    pub fn with_key_range(mut self, start: IndexKey, end: IndexKey) -> Self {
        self.key_range = Some((start, end));
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn FilterExecutor>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_deleted_records(mut self, paths: Vec<Path>, records: DeletedRecords) -> Self {
        self.delete_delta_paths = paths;
        self.deleted_records = records;
        self
    }

    /// Resolve `paths` and exclude the rows they delete.
    pub async fn with_delete_deltas(
        self,
        resolver: &dyn DeleteDeltaResolver,
        paths: Vec<Path>,
    ) -> Result<Self> {
        let records = resolver.resolve(&paths).await?;
        Ok(self.with_deleted_records(paths, records))
    }

    pub fn with_vector_batch(mut self, vector_batch: bool) -> Self {
        self.vector_batch = vector_batch;
        self
    }

    pub fn with_raw_record_detail_query(mut self, raw: bool) -> Self {
        self.raw_record_detail_query = raw;
        self
    }

    fn blocklets_to_scan(&self) -> Result<(usize, usize)> {
        let num_nodes = self.chain.number_of_nodes();
        let (start, count) = self.blocklet_range.unwrap_or((0, num_nodes));
        if start.checked_add(count).map_or(true, |end| end > num_nodes) {
            return Err(Error::invalid_input(
                format!(
                    "blocklet range {}+{} exceeds chain of {} blocklets",
                    start, count, num_nodes
                ),
                location!(),
            ));
        }
        let Some((start_key, end_key)) = &self.key_range else {
            return Ok((start, count));
        };
        let (first, matching) = self.chain.blocklets_in_range(start_key, end_key);
        let lo = first.max(start);
        let hi = (first + matching).min(start + count);
        Ok((lo, hi.saturating_sub(lo)))
    }

    pub fn build(self) -> Result<BlockExecutionInfo> {
        let (start_blocklet_index, number_of_blocklets_to_scan) = self.blocklets_to_scan()?;
        let Some(plan) = self.plan else {
            return Err(Error::invalid_input(
                "a block execution info needs a planned projection",
                location!(),
            ));
        };

        if plan.dictionary_column_indexes.len() + plan.no_dictionary_column_indexes.len()
            != plan.query_dimensions.len()
        {
            return Err(Error::internal(
                "dictionary and no-dictionary columns do not cover the selected dimensions",
                location!(),
            ));
        }
        let dictionary = plan
            .dictionary_column_indexes
            .iter()
            .collect::<HashSet<_>>();
        if plan
            .no_dictionary_column_indexes
            .iter()
            .any(|i| dictionary.contains(i))
        {
            return Err(Error::internal(
                "a column is both dictionary and no-dictionary encoded",
                location!(),
            ));
        }
        if plan.projection.len()
            != plan.actual_query_dimensions.len() + plan.actual_query_measures.len()
        {
            return Err(Error::internal(
                "projection does not cover the query columns",
                location!(),
            ));
        }

        let selected_dimensions = plan
            .dictionary_column_indexes
            .iter()
            .chain(plan.no_dictionary_column_indexes.iter())
            .copied()
            .collect::<Vec<_>>();
        let is_restructured_block = plan.query_dimensions.len()
            != plan.actual_query_dimensions.len()
            || plan.query_measures.len() != plan.actual_query_measures.len();
        let (start_key, end_key) = self.key_range.unzip();

        Ok(BlockExecutionInfo {
            block_path: self.block_path,
            chain: self.chain,
            start_blocklet_index,
            number_of_blocklets_to_scan,
            start_key,
            end_key,
            all_selected_dimension_blocks_indexes: group_column_indexes(&selected_dimensions),
            all_selected_measure_blocks_indexes: group_column_indexes(
                &plan.selected_measure_indexes,
            ),
            actual_query_dimensions: plan.actual_query_dimensions,
            actual_query_measures: plan.actual_query_measures,
            query_dimensions: plan.query_dimensions,
            query_measures: plan.query_measures,
            projection: plan.projection,
            dictionary_column_indexes: plan.dictionary_column_indexes,
            no_dictionary_column_indexes: plan.no_dictionary_column_indexes,
            filter: self.filter,
            delete_delta_paths: self.delete_delta_paths,
            deleted_records: Arc::new(self.deleted_records),
            vector_batch: self.vector_batch,
            raw_record_detail_query: self.raw_record_detail_query,
            is_restructured_block,
        })
    }
}

#[cfg(test)]
mod tests {
    use tessera_core::utils::address::RowAddress;

    use super::*;
    use crate::filter::Predicate;
    use crate::format::ColumnarFormatVersion;
    use crate::writer::{BlockFileWriter, BlockletWriter};

    fn chain(num_blocklets: u32) -> Arc<BlockletChain> {
        let mut file = BlockFileWriter::new(Path::from("b0"));
        let blocklets = (0..num_blocklets)
            .map(|i| {
                file.add_blocklet(
                    BlockletWriter::new(ColumnarFormatVersion::V3)
                        .with_dictionary_column(vec![i * 10 + 1, i * 10 + 10]),
                )
                .unwrap()
            })
            .collect::<Vec<_>>();
        Arc::new(BlockletChain::new(blocklets))
    }

    fn logical() -> (Vec<Dimension>, Vec<Measure>) {
        (
            vec![
                Dimension::dictionary("d0", "city", 0),
                Dimension::direct("d1", "comment", 1),
                Dimension::dictionary("d2", "region", 2).with_default("north"),
                Dimension::dictionary("d3", "country", 3),
                Dimension::direct("d4", "note", 4),
            ],
            vec![
                Measure::new("m0", "amount", 0),
                Measure::new("m1", "tax", 1).with_default(0.5),
            ],
        )
    }

    /// Written before region, note and tax existed, with its own column order.
    fn old_block() -> BlockSchema {
        BlockSchema::new(
            vec![
                Dimension::dictionary("d3", "country", 0),
                Dimension::dictionary("d0", "city", 1),
                Dimension::direct("d1", "comment", 2),
            ],
            vec![Measure::new("m0", "amount", 0)],
        )
    }

    #[test]
    fn test_restructured_plan() {
        let (dims, measures) = logical();
        let info = BlockExecutionInfoBuilder::new(Path::from("b0"), chain(1))
            .plan(&dims, &measures, &old_block())
            .build()
            .unwrap();

        assert!(info.is_restructured_block());
        assert_eq!(
            info.projection(),
            &[Some(1), Some(2), None, Some(0), None, Some(0), None]
        );
        assert_eq!(info.actual_query_dimensions().len(), 5);
        assert_eq!(info.query_dimensions().len(), 3);
        assert_eq!(info.query_measures().len(), 1);
        assert_eq!(info.dictionary_column_indexes(), &[1, 0]);
        assert_eq!(info.no_dictionary_column_indexes(), &[2]);
        assert_eq!(info.all_selected_dimension_blocks_indexes(), &[0..=2]);
        assert_eq!(info.all_selected_measure_blocks_indexes(), &[0..=0]);
        assert_eq!(info.dimension_slots(), 0..5);
        assert_eq!(info.measure_slots(), 5..7);

        assert_eq!(info.default_dimension_value(2), Value::Utf8("north".into()));
        assert_eq!(info.default_dimension_value(4), Value::Null);
        assert_eq!(info.default_measure_value(1), Value::Float64(0.5));
    }

    #[test]
    fn test_same_schema_is_not_restructured() {
        let (dims, measures) = logical();
        let block = BlockSchema::new(dims.clone(), measures.clone());
        let info = BlockExecutionInfoBuilder::new(Path::from("b0"), chain(1))
            .plan(&dims[..2], &measures[..1], &block)
            .with_raw_record_detail_query(true)
            .build()
            .unwrap();
        assert!(!info.is_restructured_block());
        assert_eq!(info.projection(), &[Some(0), Some(1), Some(0)]);
        assert!(info.raw_record_detail_query());
        assert!(!info.vector_batch());
    }

    #[test]
    fn test_raw_query_defaults_to_null_key() {
        let (dims, measures) = logical();
        let info = BlockExecutionInfoBuilder::new(Path::from("b0"), chain(1))
            .plan(&dims, &measures, &old_block())
            .with_raw_record_detail_query(true)
            .build()
            .unwrap();
        assert_eq!(info.default_dimension_value(2), Value::Key(NULL_SURROGATE_KEY));
        assert_eq!(info.default_dimension_value(4), Value::Null);
    }

    #[test]
    fn test_unselected_columns_are_not_selected() {
        let (dims, measures) = logical();
        let block = BlockSchema::new(dims.clone(), measures.clone());
        let info = BlockExecutionInfoBuilder::new(Path::from("b0"), chain(1))
            .plan(&[dims[4].clone(), dims[0].clone()], &[measures[1].clone()], &block)
            .build()
            .unwrap();
        assert_eq!(
            info.all_selected_dimension_blocks_indexes(),
            &[0..=0, 4..=4]
        );
        assert_eq!(info.all_selected_measure_blocks_indexes(), &[1..=1]);
    }

    #[test]
    fn test_blocklet_window() {
        let (dims, measures) = logical();
        let block = BlockSchema::new(dims.clone(), measures.clone());
        let builder =
            BlockExecutionInfoBuilder::new(Path::from("b0"), chain(5)).plan(&dims, &measures, &block);

        let info = builder.clone().build().unwrap();
        assert_eq!(info.start_blocklet_index(), 0);
        assert_eq!(info.number_of_blocklets_to_scan(), 5);
        assert_eq!(info.nodes().count(), 5);

        let info = builder.clone().with_blocklet_range(1, 3).build().unwrap();
        let ordinals = info.nodes().map(|n| n.ordinal()).collect::<Vec<_>>();
        assert_eq!(ordinals, [1, 2, 3]);

        // Keys of blocklet i span [10i + 1, 10i + 10].
        let info = builder
            .clone()
            .with_key_range(IndexKey::new([25]), IndexKey::new([41]))
            .build()
            .unwrap();
        assert_eq!(info.start_blocklet_index(), 2);
        assert_eq!(info.number_of_blocklets_to_scan(), 3);
        assert_eq!(info.start_key(), Some(&IndexKey::new([25])));

        let info = builder
            .clone()
            .with_blocklet_range(0, 3)
            .with_key_range(IndexKey::new([25]), IndexKey::new([41]))
            .build()
            .unwrap();
        assert_eq!(info.start_blocklet_index(), 2);
        assert_eq!(info.number_of_blocklets_to_scan(), 1);

        let info = builder
            .clone()
            .with_key_range(IndexKey::new([100]), IndexKey::new([200]))
            .build()
            .unwrap();
        assert_eq!(info.number_of_blocklets_to_scan(), 0);
        assert!(info.first_node().is_none());

        assert!(builder.with_blocklet_range(4, 2).build().is_err());
    }

    #[test]
    fn test_requires_plan() {
        let err = BlockExecutionInfoBuilder::new(Path::from("b0"), chain(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }), "{err}");
    }

    #[test]
    fn test_filter_and_deletions() {
        let (dims, measures) = logical();
        let block = BlockSchema::new(dims.clone(), measures.clone());
        let deleted: DeletedRecords = [RowAddress::new_from_parts(0, 1)].into_iter().collect();
        let info = BlockExecutionInfoBuilder::new(Path::from("b0"), chain(1))
            .plan(&dims, &measures, &block)
            .with_filter(Arc::new(Predicate::equals(0, "NYC")))
            .with_deleted_records(vec![Path::from("b0.1.deletedelta")], deleted)
            .with_vector_batch(true)
            .build()
            .unwrap();
        assert!(info.filter().is_some());
        assert!(info.vector_batch());
        assert_eq!(info.delete_delta_paths().len(), 1);
        assert!(info
            .deleted_records()
            .contains(RowAddress::new_from_parts(0, 1)));
    }
}
