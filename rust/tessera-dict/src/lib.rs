// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Surrogate key dictionaries used while loading dimension data.
//!
//! A [`ColumnDictionaryGenerator`] owns the keys of one column. A
//! [`TableDictionaryGenerator`] routes values to the right column generator,
//! creates generators as columns appear, and persists every column's new
//! entries in parallel when a load finishes.

use tessera_core::datatypes::SurrogateKey;
use tessera_core::Result;

pub mod column;
pub mod store;
pub mod table;

pub use column::ColumnDictionaryGenerator;
pub use store::{DictionaryEntry, DictionaryStore, InMemoryDictionaryStore, ObjectStoreDictionaryStore};
pub use table::{DictionaryMessage, DictionaryWriteReport, TableDictionaryGenerator};

/// Something that can hand out a surrogate key for a value.
pub trait DictionaryGenerator<V: ?Sized> {
    fn generate_key(&self, value: &V) -> Result<SurrogateKey>;
}
