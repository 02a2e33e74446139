// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Registry of column dictionaries for one load.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::StreamExt;
use snafu::location;
use tessera_core::catalog::Catalog;
use tessera_core::config::LoadOptions;
use tessera_core::datatypes::{Dimension, SurrogateKey};
use tessera_core::{Error, Result};
use tracing::{error, info, instrument};

use crate::column::ColumnDictionaryGenerator;
use crate::store::DictionaryStore;
use crate::DictionaryGenerator;

/// A value to encode, addressed by table and column name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryMessage {
    pub table_unique_name: String,
    pub column_name: String,
    pub data: String,
}

impl DictionaryMessage {
    pub fn new(
        table_unique_name: impl Into<String>,
        column_name: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            table_unique_name: table_unique_name.into(),
            column_name: column_name.into(),
            data: data.into(),
        }
    }
}

/// Outcome of [`TableDictionaryGenerator::write_dictionary_data`].
///
/// Every registered column ends up in exactly one of `written`, `failed`
/// or `unfinished`.
#[derive(Debug, Default)]
pub struct DictionaryWriteReport {
    /// Columns persisted successfully, with the number of new entries.
    pub written: Vec<(String, usize)>,
    pub failed: Vec<(String, Error)>,
    /// Columns still in flight (or never started) when the deadline passed.
    pub unfinished: Vec<String>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl DictionaryWriteReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.timed_out
    }

    pub fn num_entries_written(&self) -> usize {
        self.written.iter().map(|(_, n)| n).sum()
    }
}

/// Routes values to per-column dictionaries, keyed by column id.
///
/// Column generators are created on demand with
/// [`Self::update_generator`]; at most one generator ever exists per column
/// even when many threads race to create it.
pub struct TableDictionaryGenerator {
    catalog: Arc<dyn Catalog>,
    columns: DashMap<String, Arc<ColumnDictionaryGenerator>>,
}

impl fmt::Debug for TableDictionaryGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDictionaryGenerator")
            .field("num_columns", &self.columns.len())
            .finish()
    }
}

impl TableDictionaryGenerator {
    pub fn new(catalog: Arc<dyn Catalog>, dimension: &Dimension) -> Self {
        let generator = Self {
            catalog,
            columns: DashMap::new(),
        };
        generator.update_generator(dimension);
        generator
    }

    /// Make sure a generator exists for `dimension`, creating it if needed.
    ///
    /// Returns the generator that is registered for the column afterwards.
    pub fn update_generator(&self, dimension: &Dimension) -> Arc<ColumnDictionaryGenerator> {
        if let Some(existing) = self.columns.get(&dimension.column_id) {
            return existing.clone();
        }
        self.columns
            .entry(dimension.column_id.clone())
            .or_insert_with(|| Arc::new(ColumnDictionaryGenerator::new(dimension.clone())))
            .value()
            .clone()
    }

    /// Register a generator rebuilt from `store`, unless one already exists.
    pub async fn load_generator(
        &self,
        dimension: &Dimension,
        store: &dyn DictionaryStore,
        table_unique_name: &str,
    ) -> Result<Arc<ColumnDictionaryGenerator>> {
        if let Some(existing) = self.column(&dimension.column_id) {
            return Ok(existing);
        }
        let loaded =
            ColumnDictionaryGenerator::load(dimension.clone(), store, table_unique_name).await?;
        Ok(self
            .columns
            .entry(dimension.column_id.clone())
            .or_insert_with(|| Arc::new(loaded))
            .value()
            .clone())
    }

    /// Rebuild the generators of every dictionary dimension in `dimensions`
    /// from `store`.
    pub async fn open(
        catalog: Arc<dyn Catalog>,
        dimensions: &[Dimension],
        store: &dyn DictionaryStore,
        table_unique_name: &str,
    ) -> Result<Self> {
        let loaded = futures::future::try_join_all(
            dimensions
                .iter()
                .filter(|d| d.has_dictionary())
                .map(|d| ColumnDictionaryGenerator::load(d.clone(), store, table_unique_name)),
        )
        .await?;
        let columns = loaded
            .into_iter()
            .map(|g| (g.column_id().to_string(), Arc::new(g)))
            .collect();
        Ok(Self { catalog, columns })
    }

    pub fn column(&self, column_id: &str) -> Option<Arc<ColumnDictionaryGenerator>> {
        self.columns.get(column_id).map(|g| g.value().clone())
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    fn resolve(&self, message: &DictionaryMessage) -> Option<Arc<ColumnDictionaryGenerator>> {
        let dimension = self
            .catalog
            .dimension_by_name(&message.table_unique_name, &message.column_name)?;
        self.column(&dimension.column_id)
    }

    /// Key for the message's value in the message's column.
    pub fn generate_key(&self, message: &DictionaryMessage) -> Result<SurrogateKey> {
        let Some(generator) = self.resolve(message) else {
            return Err(Error::dictionary_generation(
                format!(
                    "no dictionary generator for column {} of table {}",
                    message.column_name, message.table_unique_name
                ),
                location!(),
            ));
        };
        generator.generate_key(&message.data)
    }

    /// Number of keys in the message's column, or 0 if the column is unknown.
    pub fn size(&self, message: &DictionaryMessage) -> usize {
        self.resolve(message).map_or(0, |g| g.size())
    }

    /// Raw value behind `key` in column `column_id`.
    pub fn reverse_resolve(&self, column_id: &str, key: SurrogateKey) -> Result<String> {
        let Some(generator) = self.column(column_id) else {
            return Err(Error::InvalidSurrogateKey {
                column_id: column_id.to_string(),
                key,
                location: location!(),
            });
        };
        generator.get_value(key)
    }

    /// Persist new entries of every column, up to
    /// [`LoadOptions::num_cores_loading`] columns at a time.
    ///
    /// A failing column never prevents the others from being written. If
    /// the whole operation exceeds [`LoadOptions::dictionary_write_timeout`]
    /// it stops waiting; writes already started keep running in the
    /// background.
    #[instrument(level = "info", skip(self, store, options))]
    pub async fn write_dictionary_data(
        &self,
        table_unique_name: &str,
        store: Arc<dyn DictionaryStore>,
        options: &LoadOptions,
    ) -> DictionaryWriteReport {
        let start = Instant::now();
        let parallelism = options.num_cores_loading();
        let timeout = options.dictionary_write_timeout();

        let generators = self
            .columns
            .iter()
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>();
        let mut pending = generators
            .iter()
            .map(|g| g.column_id().to_string())
            .collect::<Vec<_>>();

        let table = table_unique_name.to_string();
        let mut writes = futures::stream::iter(generators)
            .map(|generator| {
                let store = store.clone();
                let table = table.clone();
                let column_id = generator.column_id().to_string();
                let handle = tokio::spawn(async move {
                    generator
                        .write_dictionary_data(&table, store.as_ref())
                        .await
                });
                async move { (column_id, handle.await) }
            })
            .buffer_unordered(parallelism);

        let mut report = DictionaryWriteReport::default();
        let collect = async {
            while let Some((column_id, result)) = writes.next().await {
                pending.retain(|id| id != &column_id);
                match result.map_err(Error::from).and_then(|r| r) {
                    Ok(num_entries) => report.written.push((column_id, num_entries)),
                    Err(err) => {
                        error!(
                            "Error while writing dictionary file for column {}: {}",
                            column_id, err
                        );
                        report.failed.push((column_id, err));
                    }
                }
            }
        };
        if tokio::time::timeout(timeout, collect).await.is_err() {
            error!(
                "Dictionary write for table {} did not finish within {:?}, {} column(s) unfinished",
                table_unique_name,
                timeout,
                pending.len()
            );
            report.timed_out = true;
        }
        report.unfinished = pending;
        report.elapsed = start.elapsed();
        info!(
            "Total time taken to write dictionary file is: {} ms",
            report.elapsed.as_millis()
        );
        report
    }
}

impl DictionaryGenerator<DictionaryMessage> for TableDictionaryGenerator {
    fn generate_key(&self, value: &DictionaryMessage) -> Result<SurrogateKey> {
        Self::generate_key(self, value)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tessera_core::catalog::{InMemoryCatalog, TableSchema};
    use tessera_core::config::{DICTIONARY_WRITE_TIMEOUT, NUM_CORES_LOADING};

    use super::*;
    use crate::store::{DictionaryEntry, InMemoryDictionaryStore};

    const TABLE: &str = "default.sales";

    fn catalog() -> Arc<InMemoryCatalog> {
        let catalog = InMemoryCatalog::new();
        catalog.register_table(
            TableSchema::new(TABLE)
                .with_dimension(Dimension::dictionary("c0", "city", 0))
                .with_dimension(Dimension::dictionary("c1", "country", 1))
                .with_dimension(Dimension::dictionary("c2", "product", 2)),
        );
        Arc::new(catalog)
    }

    fn dim(catalog: &InMemoryCatalog, name: &str) -> Dimension {
        catalog.dimension_by_name(TABLE, name).unwrap()
    }

    fn msg(column: &str, data: &str) -> DictionaryMessage {
        DictionaryMessage::new(TABLE, column, data)
    }

    /// Fails every write of one column and delegates the rest.
    #[derive(Debug)]
    struct FailingStore {
        inner: InMemoryDictionaryStore,
        failing_column: String,
    }

    #[async_trait]
    impl DictionaryStore for FailingStore {
        async fn write(
            &self,
            column_id: &str,
            entries: &[DictionaryEntry],
            table_unique_name: &str,
        ) -> Result<()> {
            if column_id == self.failing_column {
                return Err(Error::io("disk full", location!()));
            }
            self.inner.write(column_id, entries, table_unique_name).await
        }

        async fn read(&self, column_id: &str, table_unique_name: &str) -> Result<Vec<DictionaryEntry>> {
            self.inner.read(column_id, table_unique_name).await
        }
    }

    /// Records the peak number of concurrent writes.
    #[derive(Debug, Default)]
    struct SlowStore {
        delay: Duration,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl DictionaryStore for SlowStore {
        async fn write(&self, _: &str, _: &[DictionaryEntry], _: &str) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        async fn read(&self, _: &str, _: &str) -> Result<Vec<DictionaryEntry>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_generate_key_by_name() {
        let catalog = catalog();
        let generator = TableDictionaryGenerator::new(catalog.clone(), &dim(&catalog, "city"));
        assert_eq!(generator.generate_key(&msg("city", "NYC")).unwrap(), 1);
        assert_eq!(generator.generate_key(&msg("city", "LA")).unwrap(), 2);
        assert_eq!(generator.generate_key(&msg("CITY", "NYC")).unwrap(), 1);
        assert_eq!(generator.size(&msg("city", "")), 2);
        assert_eq!(generator.reverse_resolve("c0", 2).unwrap(), "LA");
    }

    #[test]
    fn test_unresolved_column() {
        let catalog = catalog();
        let generator = TableDictionaryGenerator::new(catalog.clone(), &dim(&catalog, "city"));

        // Known to the catalog but no generator registered yet.
        let err = generator.generate_key(&msg("country", "US")).unwrap_err();
        assert!(matches!(err, Error::DictionaryGeneration { .. }), "{err}");
        // Not known to the catalog at all.
        assert!(generator.generate_key(&msg("nope", "x")).is_err());
        assert!(generator
            .generate_key(&DictionaryMessage::new("default.other", "city", "x"))
            .is_err());

        assert_eq!(generator.size(&msg("country", "")), 0);
        assert_eq!(generator.size(&msg("nope", "")), 0);
        assert!(generator.reverse_resolve("c1", 1).is_err());
    }

    #[test]
    fn test_update_generator_is_idempotent() {
        let catalog = catalog();
        let city = dim(&catalog, "city");
        let generator = TableDictionaryGenerator::new(catalog.clone(), &city);
        generator.generate_key(&msg("city", "NYC")).unwrap();

        let again = generator.update_generator(&city);
        assert_eq!(again.size(), 1);
        assert_eq!(generator.num_columns(), 1);

        generator.update_generator(&dim(&catalog, "country"));
        assert_eq!(generator.num_columns(), 2);
        assert_eq!(generator.generate_key(&msg("country", "US")).unwrap(), 1);
    }

    #[test]
    fn test_concurrent_update_generator_creates_one() {
        let catalog = catalog();
        let generator = TableDictionaryGenerator::new(catalog.clone(), &dim(&catalog, "city"));
        let country = dim(&catalog, "country");

        let created = std::thread::scope(|s| {
            let handles = (0..16)
                .map(|_| s.spawn(|| generator.update_generator(&country)))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });
        let registered = generator.column("c1").unwrap();
        assert!(created.iter().all(|g| Arc::ptr_eq(g, &registered)));
    }

    #[test]
    fn test_concurrent_generate_key() {
        let catalog = catalog();
        let generator = TableDictionaryGenerator::new(catalog.clone(), &dim(&catalog, "city"));
        generator.update_generator(&dim(&catalog, "country"));

        std::thread::scope(|s| {
            for t in 0..8 {
                let generator = &generator;
                s.spawn(move || {
                    for i in 0..200 {
                        generator
                            .generate_key(&msg("city", &format!("city-{}", t * 7 + i)))
                            .unwrap();
                        generator
                            .generate_key(&msg("country", &format!("country-{}", i % 10)))
                            .unwrap();
                    }
                });
            }
        });
        let city = generator.column("c0").unwrap();
        // Thread t covers city-{7t}..city-{7t + 199}.
        assert_eq!(city.size(), 249);
        let values = city.entries().into_iter().map(|e| e.value).collect::<HashSet<_>>();
        assert_eq!(values.len(), 249);
        assert_eq!(generator.size(&msg("country", "")), 10);
    }

    #[tokio::test]
    async fn test_write_all_columns() {
        let catalog = catalog();
        let generator = TableDictionaryGenerator::new(catalog.clone(), &dim(&catalog, "city"));
        generator.update_generator(&dim(&catalog, "country"));
        generator.update_generator(&dim(&catalog, "product"));
        for (column, value) in [("city", "NYC"), ("city", "LA"), ("country", "US")] {
            generator.generate_key(&msg(column, value)).unwrap();
        }

        let store = Arc::new(InMemoryDictionaryStore::new());
        let report = generator
            .write_dictionary_data(TABLE, store.clone(), &LoadOptions::new())
            .await;
        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.written.len(), 3);
        assert_eq!(report.num_entries_written(), 3);
        assert!(report.unfinished.is_empty());
        assert_eq!(store.read("c0", TABLE).await.unwrap().len(), 2);
        assert_eq!(store.read("c1", TABLE).await.unwrap().len(), 1);
        assert!(store.read("c2", TABLE).await.unwrap().is_empty());

        // A second write only persists what is new.
        generator.generate_key(&msg("city", "SF")).unwrap();
        let report = generator
            .write_dictionary_data(TABLE, store.clone(), &LoadOptions::new())
            .await;
        assert_eq!(report.num_entries_written(), 1);
        assert_eq!(store.read("c0", TABLE).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_column_does_not_block_others() {
        let catalog = catalog();
        let generator = TableDictionaryGenerator::new(catalog.clone(), &dim(&catalog, "city"));
        generator.update_generator(&dim(&catalog, "country"));
        generator.update_generator(&dim(&catalog, "product"));
        for column in ["city", "country", "product"] {
            generator.generate_key(&msg(column, "x")).unwrap();
        }

        let store = Arc::new(FailingStore {
            inner: InMemoryDictionaryStore::new(),
            failing_column: "c1".to_string(),
        });
        let report = generator
            .write_dictionary_data(TABLE, store.clone(), &LoadOptions::new())
            .await;
        assert!(!report.is_success());
        assert!(!report.timed_out);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "c1");
        let mut written = report
            .written
            .iter()
            .map(|(c, _)| c.as_str())
            .collect::<Vec<_>>();
        written.sort();
        assert_eq!(written, ["c0", "c2"]);
        assert_eq!(store.inner.read("c0", TABLE).await.unwrap().len(), 1);
        assert_eq!(store.inner.read("c2", TABLE).await.unwrap().len(), 1);

        // The failed column is retried by the next write.
        let report = generator
            .write_dictionary_data(TABLE, Arc::new(InMemoryDictionaryStore::new()), &LoadOptions::new())
            .await;
        let c1 = report.written.iter().find(|(c, _)| c == "c1").unwrap();
        assert_eq!(c1.1, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallelism_is_bounded() {
        let catalog = catalog();
        let generator = TableDictionaryGenerator::new(catalog.clone(), &dim(&catalog, "city"));
        generator.update_generator(&dim(&catalog, "country"));
        generator.update_generator(&dim(&catalog, "product"));
        for column in ["city", "country", "product"] {
            generator.generate_key(&msg(column, "x")).unwrap();
        }

        let store = Arc::new(SlowStore {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let options = LoadOptions::new().with(NUM_CORES_LOADING, "2");
        let report = generator
            .write_dictionary_data(TABLE, store.clone(), &options)
            .await;
        assert!(report.is_success(), "{report:?}");
        assert!(store.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let catalog = catalog();
        let generator = TableDictionaryGenerator::new(catalog.clone(), &dim(&catalog, "city"));
        generator.generate_key(&msg("city", "NYC")).unwrap();

        let store = Arc::new(SlowStore {
            delay: Duration::from_secs(60),
            ..Default::default()
        });
        let options = LoadOptions::new().with(DICTIONARY_WRITE_TIMEOUT, "1");
        let report = generator
            .write_dictionary_data(TABLE, store, &options)
            .await;
        assert!(report.timed_out);
        assert!(!report.is_success());
        assert_eq!(report.unfinished, ["c0"]);
        assert!(report.written.is_empty());
    }

    #[tokio::test]
    async fn test_load_generator() {
        let catalog = catalog();
        let city = dim(&catalog, "city");
        let store = InMemoryDictionaryStore::new();
        store
            .write(
                "c1",
                &[DictionaryEntry::new(1, "US"), DictionaryEntry::new(2, "FR")],
                TABLE,
            )
            .await
            .unwrap();

        let generator = TableDictionaryGenerator::new(catalog.clone(), &city);
        let country = generator
            .load_generator(&dim(&catalog, "country"), &store, TABLE)
            .await
            .unwrap();
        assert_eq!(country.size(), 2);
        assert_eq!(generator.generate_key(&msg("country", "FR")).unwrap(), 2);
        assert_eq!(generator.generate_key(&msg("country", "DE")).unwrap(), 3);

        // Already registered generators are kept.
        let again = generator.load_generator(&city, &store, TABLE).await.unwrap();
        assert!(Arc::ptr_eq(&again, &generator.column("c0").unwrap()));
    }

    #[tokio::test]
    async fn test_open_from_store() {
        let catalog = catalog();
        let city = dim(&catalog, "city");
        let country = dim(&catalog, "country");
        let store = InMemoryDictionaryStore::new();
        store
            .write("c0", &[DictionaryEntry::new(1, "NYC")], TABLE)
            .await
            .unwrap();

        let generator =
            TableDictionaryGenerator::open(catalog, &[city, country], &store, TABLE)
                .await
                .unwrap();
        assert_eq!(generator.num_columns(), 2);
        assert_eq!(generator.reverse_resolve("c0", 1).unwrap(), "NYC");
        assert_eq!(generator.size(&msg("country", "US")), 0);
        assert_eq!(generator.generate_key(&msg("city", "LA")).unwrap(), 2);
    }
}
