// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Durable storage for dictionary entries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{memory::InMemory, path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use snafu::location;
use tessera_core::datatypes::SurrogateKey;
use tessera_core::{Error, Result};
use tracing::instrument;

pub(crate) const DICTIONARY_DIR: &str = "dictionary";

/// One assigned surrogate key and the raw value it stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub key: SurrogateKey,
    pub value: String,
}

impl DictionaryEntry {
    pub fn new(key: SurrogateKey, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

/// Where dictionaries are persisted when a load completes.
///
/// `write` receives only the entries added since the previous successful
/// write of the same column, in key order. `read` returns every entry ever
/// written for the column, in key order.
#[async_trait]
pub trait DictionaryStore: std::fmt::Debug + Send + Sync {
    async fn write(
        &self,
        column_id: &str,
        entries: &[DictionaryEntry],
        table_unique_name: &str,
    ) -> Result<()>;

    async fn read(&self, column_id: &str, table_unique_name: &str) -> Result<Vec<DictionaryEntry>>;
}

/// Keeps dictionaries in process memory.
#[derive(Debug, Default)]
pub struct InMemoryDictionaryStore {
    columns: Mutex<HashMap<(String, String), Vec<DictionaryEntry>>>,
}

impl InMemoryDictionaryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DictionaryStore for InMemoryDictionaryStore {
    async fn write(
        &self,
        column_id: &str,
        entries: &[DictionaryEntry],
        table_unique_name: &str,
    ) -> Result<()> {
        let mut columns = self.columns.lock().unwrap();
        columns
            .entry((table_unique_name.to_string(), column_id.to_string()))
            .or_default()
            .extend_from_slice(entries);
        Ok(())
    }

    async fn read(&self, column_id: &str, table_unique_name: &str) -> Result<Vec<DictionaryEntry>> {
        let columns = self.columns.lock().unwrap();
        Ok(columns
            .get(&(table_unique_name.to_string(), column_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

/// Persists each write as one JSON segment under
/// `{base}/{table}/dictionary/{column_id}/{first_key}-{last_key}.json`.
///
/// Segment names are zero padded so that listing order is key order.
#[derive(Debug, Clone)]
pub struct ObjectStoreDictionaryStore {
    object_store: Arc<dyn ObjectStore>,
    base: Path,
}

impl ObjectStoreDictionaryStore {
    pub fn new(object_store: Arc<dyn ObjectStore>, base: Path) -> Self {
        Self { object_store, base }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(InMemory::new()), Path::from("/"))
    }

    fn column_dir(&self, table_unique_name: &str, column_id: &str) -> Path {
        self.base
            .child(table_unique_name)
            .child(DICTIONARY_DIR)
            .child(column_id)
    }
}

pub(crate) fn segment_file_name(first: SurrogateKey, last: SurrogateKey) -> String {
    format!("{first:010}-{last:010}.json")
}

#[async_trait]
impl DictionaryStore for ObjectStoreDictionaryStore {
    #[instrument(level = "debug", skip(self, entries), fields(num_entries = entries.len()))]
    async fn write(
        &self,
        column_id: &str,
        entries: &[DictionaryEntry],
        table_unique_name: &str,
    ) -> Result<()> {
        let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
            return Ok(());
        };
        let path = self
            .column_dir(table_unique_name, column_id)
            .child(segment_file_name(first.key, last.key));
        let data = serde_json::to_vec(entries)?;
        self.object_store.put(&path, Bytes::from(data).into()).await?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn read(&self, column_id: &str, table_unique_name: &str) -> Result<Vec<DictionaryEntry>> {
        let dir = self.column_dir(table_unique_name, column_id);
        let mut segments = self
            .object_store
            .list(Some(&dir))
            .map_ok(|meta| meta.location)
            .try_collect::<Vec<_>>()
            .await?;
        segments.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));

        let mut entries: Vec<DictionaryEntry> = Vec::new();
        for segment in segments {
            let data = self.object_store.get(&segment).await?.bytes().await?;
            let mut batch: Vec<DictionaryEntry> = serde_json::from_slice(&data).map_err(|e| {
                Error::corrupt_file(segment.clone(), e.to_string(), location!())
            })?;
            if let (Some(prev), Some(next)) = (entries.last(), batch.first()) {
                if next.key != prev.key + 1 {
                    return Err(Error::corrupt_file(
                        segment,
                        format!(
                            "dictionary segment starts at key {} but previous segment ended at {}",
                            next.key, prev.key
                        ),
                        location!(),
                    ));
                }
            }
            entries.append(&mut batch);
        }
        Ok(entries)
    }
}
