// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Load two blocks across a schema change, persist the dictionaries, then
//! scan the blocks with a freshly opened dictionary registry.

use std::sync::Arc;

use arrow_array::cast::AsArray;
use object_store::{memory::InMemory, path::Path, ObjectStore};
use tessera_core::catalog::{InMemoryCatalog, TableSchema};
use tessera_core::config::LoadOptions;
use tessera_core::datatypes::{Dimension, Measure, Value};
use tessera_core::io::ObjectStoreFileReader;
use tessera_core::utils::address::RowAddress;
use tessera_core::utils::deletion::DeletedRecords;
use tessera_dict::{DictionaryMessage, ObjectStoreDictionaryStore, TableDictionaryGenerator};
use tessera_scan::delete_delta::write_delete_delta;
use tessera_scan::{
    read_blocklets, BlockExecutionInfo, BlockExecutionInfoBuilder, BlockFileWriter, BlockScanner,
    BlockSchema, BlockletChain, BlockletWriter, ColumnarFormatVersion,
    ObjectStoreDeleteDeltaResolver, Predicate, Row, ScanOutput,
};

const TABLE: &str = "retail.orders";

struct Warehouse {
    object_store: Arc<dyn ObjectStore>,
    catalog: Arc<InMemoryCatalog>,
    dictionary_store: ObjectStoreDictionaryStore,
    block_paths: [Path; 2],
    delete_delta: Path,
}

impl Warehouse {
    fn schema(&self) -> Arc<TableSchema> {
        self.catalog.table(TABLE).unwrap()
    }

    async fn dictionaries(&self) -> Arc<TableDictionaryGenerator> {
        let dictionaries = TableDictionaryGenerator::open(
            self.catalog.clone(),
            &self.schema().dimensions,
            &self.dictionary_store,
            TABLE,
        )
        .await
        .unwrap();
        Arc::new(dictionaries)
    }

    async fn chain(&self, block: usize) -> Arc<BlockletChain> {
        let reader = ObjectStoreFileReader::new(self.object_store.clone());
        let blocklets = read_blocklets(&reader, &self.block_paths[block])
            .await
            .unwrap();
        Arc::new(BlockletChain::new(blocklets))
    }

    /// Execution info for every column of the current schema.
    async fn builder(&self, block: usize) -> BlockExecutionInfoBuilder {
        let schema = self.schema();
        let block_schema = if block == 0 {
            BlockSchema::new(vec![schema.dimensions[0].clone()], schema.measures.clone())
        } else {
            BlockSchema::new(schema.dimensions.clone(), schema.measures.clone())
        };
        BlockExecutionInfoBuilder::new(self.block_paths[block].clone(), self.chain(block).await)
            .plan(&schema.dimensions, &schema.measures, &block_schema)
    }

    async fn infos(&self) -> Vec<BlockExecutionInfo> {
        let resolver = ObjectStoreDeleteDeltaResolver::new(self.object_store.clone());
        vec![
            self.builder(0).await.build().unwrap(),
            self.builder(1)
                .await
                .with_delete_deltas(&resolver, vec![self.delete_delta.clone()])
                .await
                .unwrap()
                .build()
                .unwrap(),
        ]
    }

    async fn scanner(&self) -> BlockScanner {
        BlockScanner::new(Arc::new(ObjectStoreFileReader::new(
            self.object_store.clone(),
        )))
        .with_dictionaries(self.dictionaries().await)
    }
}

/// Block 0 is written before `channel` and `comment` exist.
async fn load() -> Warehouse {
    let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    let city = Dimension::dictionary("c0", "city", 0);
    let amount = Measure::new("m0", "amount", 0);
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.register_table(
        TableSchema::new(TABLE)
            .with_dimension(city.clone())
            .with_measure(amount),
    );
    let loader = TableDictionaryGenerator::new(catalog.clone(), &city);
    let keys = |column: &str, values: &[&str]| {
        values
            .iter()
            .map(|v| {
                loader
                    .generate_key(&DictionaryMessage::new(TABLE, column, *v))
                    .unwrap()
            })
            .collect::<Vec<_>>()
    };

    let block_paths = [
        Path::from("orders/part-0.tsr"),
        Path::from("orders/part-1.tsr"),
    ];
    let mut block = BlockFileWriter::new(block_paths[0].clone());
    block
        .add_blocklet(
            BlockletWriter::new(ColumnarFormatVersion::V1)
                .with_dictionary_column(keys("city", &["NYC", "LA", "NYC"]))
                .with_measure_column(vec![Some(10.0), Some(20.0), Some(30.0)]),
        )
        .unwrap();
    block.write(object_store.as_ref()).await.unwrap();

    let channel = Dimension::dictionary("c1", "channel", 1).with_default("web");
    catalog.add_dimension(TABLE, channel.clone()).unwrap();
    catalog
        .add_dimension(TABLE, Dimension::direct("c2", "comment", 2))
        .unwrap();
    loader.update_generator(&channel);

    let mut block = BlockFileWriter::new(block_paths[1].clone());
    block
        .add_blocklet(
            BlockletWriter::new(ColumnarFormatVersion::V3)
                .with_rows_per_page(2)
                .with_dictionary_column(keys("city", &["SF", "NYC", "LA"]))
                .with_dictionary_column(keys("channel", &["store", "web", "store"]))
                .with_direct_column([Some("gift"), None, Some("rush")])
                .with_measure_column(vec![Some(5.0), None, Some(7.0)]),
        )
        .unwrap();
    block
        .add_blocklet(
            BlockletWriter::new(ColumnarFormatVersion::V3)
                .with_dictionary_column(keys("city", &["LA"]))
                .with_dictionary_column(keys("channel", &["web"]))
                .with_direct_column([None::<&str>])
                .with_measure_column(vec![Some(1.0)]),
        )
        .unwrap();
    block.write(object_store.as_ref()).await.unwrap();

    let dictionary_store =
        ObjectStoreDictionaryStore::new(object_store.clone(), Path::from("warehouse"));
    let report = loader
        .write_dictionary_data(TABLE, Arc::new(dictionary_store.clone()), &LoadOptions::new())
        .await;
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.num_entries_written(), 5);

    let delete_delta = Path::from("orders/part-1.1.deletedelta");
    let deleted: DeletedRecords = [RowAddress::new_from_parts(0, 1)].into_iter().collect();
    write_delete_delta(object_store.as_ref(), &delete_delta, &deleted)
        .await
        .unwrap();

    Warehouse {
        object_store,
        catalog,
        dictionary_store,
        block_paths,
        delete_delta,
    }
}

fn row(city: &str, channel: &str, comment: Option<&str>, amount: Option<f64>) -> Row {
    vec![city.into(), channel.into(), comment.into(), amount.into()]
}

fn rows(output: &ScanOutput) -> &[Row] {
    match output {
        ScanOutput::Rows(rows) => rows,
        ScanOutput::Batches(_) => panic!("expected rows"),
    }
}

#[tokio::test]
async fn test_scan_across_schema_change() {
    let warehouse = load().await;
    let infos = warehouse.infos().await;
    assert!(infos[0].is_restructured_block());
    assert!(!infos[1].is_restructured_block());

    let outputs = warehouse.scanner().await.scan_blocks(&infos).await.unwrap();
    assert_eq!(
        rows(&outputs[0]),
        &[
            row("NYC", "web", None, Some(10.0)),
            row("LA", "web", None, Some(20.0)),
            row("NYC", "web", None, Some(30.0)),
        ]
    );
    // The NYC row of blocklet 0 was deleted after load.
    assert_eq!(
        rows(&outputs[1]),
        &[
            row("SF", "store", Some("gift"), Some(5.0)),
            row("LA", "store", Some("rush"), Some(7.0)),
            row("LA", "web", None, Some(1.0)),
        ]
    );
}

#[tokio::test]
async fn test_filtered_scan() {
    let warehouse = load().await;
    let filter = Arc::new(Predicate::equals(1, "web").and(Predicate::between(3, Some(15.0), None)));
    let scanner = warehouse.scanner().await;

    let mut matched = Vec::new();
    for block in 0..2 {
        let info = warehouse
            .builder(block)
            .await
            .with_filter(filter.clone())
            .build()
            .unwrap();
        matched.extend(scanner.scan_rows(&info).await.unwrap());
    }
    assert_eq!(
        matched,
        vec![
            row("LA", "web", None, Some(20.0)),
            row("NYC", "web", None, Some(30.0)),
        ]
    );
}

#[tokio::test]
async fn test_raw_detail_scan_of_old_block() {
    let warehouse = load().await;
    let info = warehouse
        .builder(0)
        .await
        .with_raw_record_detail_query(true)
        .build()
        .unwrap();
    let rows = warehouse.scanner().await.scan_rows(&info).await.unwrap();
    assert_eq!(
        rows[1],
        vec![Value::Key(2), Value::Key(0), Value::Null, Value::Float64(20.0)]
    );
}

#[tokio::test]
async fn test_vector_batch_scan() {
    let warehouse = load().await;
    let infos = warehouse.infos().await;
    let info = warehouse
        .builder(1)
        .await
        .with_vector_batch(true)
        .with_deleted_records(
            infos[1].delete_delta_paths().to_vec(),
            infos[1].deleted_records().clone(),
        )
        .build()
        .unwrap();
    let ScanOutput::Batches(batches) = warehouse.scanner().await.scan(&info).await.unwrap() else {
        panic!("expected batches");
    };
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].num_rows(), 2);
    let names = batches[0]
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect::<Vec<_>>();
    assert_eq!(names, ["city", "channel", "comment", "amount"]);
    let channels = batches[0].column(1).as_string::<i32>();
    assert_eq!(channels.value(0), "store");
    assert_eq!(channels.value(1), "store");
}
