// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Surrogate key dictionary for a single dimension column.

use std::fmt;
use std::sync::RwLock;

use dashmap::{mapref::entry::Entry, DashMap};
use snafu::location;
use tessera_core::datatypes::{Dimension, SurrogateKey, FIRST_SURROGATE_KEY};
use tessera_core::{Error, Result};
use tracing::{debug, instrument};

use crate::store::{DictionaryEntry, DictionaryStore};
use crate::DictionaryGenerator;

/// Assigns dense surrogate keys to the distinct values of one column.
///
/// Keys are handed out in first-seen order starting at the seed. Once a
/// value has a key it never changes and is never reassigned. Lookups may
/// run concurrently with key generation from any number of threads.
pub struct ColumnDictionaryGenerator {
    dimension: Dimension,
    seed: SurrogateKey,
    forward: DashMap<String, SurrogateKey>,
    // reverse[i] is the value with key `seed + i`.
    //
    // Lock order: a forward shard, then `reverse`. Never the other way round.
    reverse: RwLock<Vec<String>>,
    // Number of entries in `reverse` that the store already holds.
    persisted: tokio::sync::Mutex<usize>,
}

impl fmt::Debug for ColumnDictionaryGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDictionaryGenerator")
            .field("column_id", &self.dimension.column_id)
            .field("seed", &self.seed)
            .field("size", &self.size())
            .finish()
    }
}

impl ColumnDictionaryGenerator {
    pub fn new(dimension: Dimension) -> Self {
        Self::with_seed(dimension, FIRST_SURROGATE_KEY)
    }

    pub fn with_seed(dimension: Dimension, seed: SurrogateKey) -> Self {
        Self {
            dimension,
            seed,
            forward: DashMap::new(),
            reverse: RwLock::new(Vec::new()),
            persisted: tokio::sync::Mutex::new(0),
        }
    }

    /// Rebuild a generator from entries previously written to a store.
    ///
    /// The entries must be exactly the keys `seed..seed + n` in order. They
    /// are treated as already persisted.
    pub fn restore(
        dimension: Dimension,
        seed: SurrogateKey,
        entries: Vec<DictionaryEntry>,
    ) -> Result<Self> {
        let forward = DashMap::with_capacity(entries.len());
        let mut reverse = Vec::with_capacity(entries.len());
        for (i, entry) in entries.into_iter().enumerate() {
            let expected = u32::try_from(i)
                .ok()
                .and_then(|i| seed.checked_add(i))
                .ok_or_else(|| Error::dictionary_generation("too many entries", location!()))?;
            if entry.key != expected {
                return Err(Error::invalid_input(
                    format!(
                        "dictionary for column {} expected key {} but found {}",
                        dimension.column_id, expected, entry.key
                    ),
                    location!(),
                ));
            }
            if forward.insert(entry.value.clone(), entry.key).is_some() {
                return Err(Error::invalid_input(
                    format!(
                        "dictionary for column {} contains value {:?} twice",
                        dimension.column_id, entry.value
                    ),
                    location!(),
                ));
            }
            reverse.push(entry.value);
        }
        let persisted = reverse.len();
        Ok(Self {
            dimension,
            seed,
            forward,
            reverse: RwLock::new(reverse),
            persisted: tokio::sync::Mutex::new(persisted),
        })
    }

    /// Read the column's dictionary back from `store`.
    pub async fn load(
        dimension: Dimension,
        store: &dyn DictionaryStore,
        table_unique_name: &str,
    ) -> Result<Self> {
        let entries = store.read(&dimension.column_id, table_unique_name).await?;
        let seed = entries.first().map_or(FIRST_SURROGATE_KEY, |e| e.key);
        Self::restore(dimension, seed, entries)
    }

    pub fn dimension(&self) -> &Dimension {
        &self.dimension
    }

    pub fn column_id(&self) -> &str {
        &self.dimension.column_id
    }

    pub fn seed(&self) -> SurrogateKey {
        self.seed
    }

    /// Key for `value`, assigning the next free key if the value is new.
    pub fn generate_key(&self, value: &str) -> Result<SurrogateKey> {
        if let Some(key) = self.forward.get(value) {
            return Ok(*key);
        }
        match self.forward.entry(value.to_string()) {
            Entry::Occupied(entry) => Ok(*entry.get()),
            Entry::Vacant(entry) => {
                let mut reverse = self.reverse.write().unwrap();
                let key = u32::try_from(reverse.len())
                    .ok()
                    .and_then(|n| self.seed.checked_add(n))
                    .ok_or_else(|| {
                        Error::dictionary_generation(
                            format!(
                                "surrogate keys exhausted for column {}",
                                self.dimension.column_id
                            ),
                            location!(),
                        )
                    })?;
                reverse.push(entry.key().clone());
                entry.insert(key);
                Ok(key)
            }
        }
    }

    /// Key previously assigned to `value`, if any. Never assigns.
    pub fn get_key(&self, value: &str) -> Option<SurrogateKey> {
        self.forward.get(value).map(|key| *key)
    }

    /// Raw value for an assigned key.
    pub fn get_value(&self, key: SurrogateKey) -> Result<String> {
        let reverse = self.reverse.read().unwrap();
        key.checked_sub(self.seed)
            .and_then(|index| reverse.get(index as usize))
            .cloned()
            .ok_or_else(|| Error::InvalidSurrogateKey {
                column_id: self.dimension.column_id.clone(),
                key,
                location: location!(),
            })
    }

    /// Number of distinct values with a key.
    pub fn size(&self) -> usize {
        self.reverse.read().unwrap().len()
    }

    /// Highest assigned key, or `None` while the dictionary is empty.
    pub fn max_key(&self) -> Option<SurrogateKey> {
        let last = u32::try_from(self.size()).ok()?.checked_sub(1)?;
        self.seed.checked_add(last)
    }

    /// Entries from position `from` on, in key order.
    fn entries_from(&self, from: usize) -> Vec<DictionaryEntry> {
        let reverse = self.reverse.read().unwrap();
        reverse
            .iter()
            .enumerate()
            .skip(from)
            .map(|(i, value)| DictionaryEntry::new(self.seed + i as u32, value.clone()))
            .collect()
    }

    /// All entries in key order.
    pub fn entries(&self) -> Vec<DictionaryEntry> {
        self.entries_from(0)
    }

    /// Write the entries added since the last successful write.
    ///
    /// Returns the number of entries written. Concurrent calls for the same
    /// column are serialized so no entry is written twice.
    #[instrument(level = "debug", skip(self, store), fields(column_id = %self.dimension.column_id))]
    pub async fn write_dictionary_data(
        &self,
        table_unique_name: &str,
        store: &dyn DictionaryStore,
    ) -> Result<usize> {
        let mut persisted = self.persisted.lock().await;
        let pending = self.entries_from(*persisted);
        if pending.is_empty() {
            debug!("No new dictionary entries");
            return Ok(0);
        }
        store
            .write(&self.dimension.column_id, &pending, table_unique_name)
            .await?;
        *persisted += pending.len();
        debug!(num_entries = pending.len(), "Wrote dictionary entries");
        Ok(pending.len())
    }
}

impl DictionaryGenerator<str> for ColumnDictionaryGenerator {
    fn generate_key(&self, value: &str) -> Result<SurrogateKey> {
        Self::generate_key(self, value)
    }
}
