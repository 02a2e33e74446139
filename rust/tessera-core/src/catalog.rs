// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Table schema lookup.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use snafu::location;

use crate::datatypes::{Dimension, Measure};
use crate::{Error, Result};

/// Logical schema of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_unique_name: String,
    pub dimensions: Vec<Dimension>,
    pub measures: Vec<Measure>,
}

impl TableSchema {
    pub fn new(table_unique_name: impl Into<String>) -> Self {
        Self {
            table_unique_name: table_unique_name.into(),
            dimensions: vec![],
            measures: vec![],
        }
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.push(dimension);
        self
    }

    pub fn with_measure(mut self, measure: Measure) -> Self {
        self.measures.push(measure);
        self
    }

    /// Column names are matched case-insensitively.
    pub fn dimension_by_name(&self, name: &str) -> Option<&Dimension> {
        self.dimensions
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    pub fn dimension_by_id(&self, column_id: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.column_id == column_id)
    }
}

/// Resolves table and column names to schema metadata.
pub trait Catalog: std::fmt::Debug + Send + Sync {
    fn dimension_by_name(&self, table_unique_name: &str, column_name: &str) -> Option<Dimension>;

    fn dimension_by_id(&self, table_unique_name: &str, column_id: &str) -> Option<Dimension>;
}

/// A [`Catalog`] that keeps table schemas in memory.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tables: RwLock<HashMap<String, Arc<TableSchema>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_table(&self, schema: TableSchema) {
        self.tables
            .write()
            .unwrap()
            .insert(schema.table_unique_name.clone(), Arc::new(schema));
    }

    pub fn table(&self, table_unique_name: &str) -> Option<Arc<TableSchema>> {
        self.tables.read().unwrap().get(table_unique_name).cloned()
    }

    /// Add a dimension to an existing table, as done by `ALTER TABLE ADD COLUMNS`.
    pub fn add_dimension(&self, table_unique_name: &str, dimension: Dimension) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let Some(schema) = tables.get(table_unique_name) else {
            return Err(Error::invalid_input(
                format!("table {} is not registered", table_unique_name),
                location!(),
            ));
        };
        if schema.dimension_by_id(&dimension.column_id).is_some() {
            return Err(Error::invalid_input(
                format!(
                    "column {} already exists in table {}",
                    dimension.column_id, table_unique_name
                ),
                location!(),
            ));
        }
        let mut evolved = schema.as_ref().clone();
        evolved.dimensions.push(dimension);
        tables.insert(table_unique_name.to_string(), Arc::new(evolved));
        Ok(())
    }
}

impl Catalog for InMemoryCatalog {
    fn dimension_by_name(&self, table_unique_name: &str, column_name: &str) -> Option<Dimension> {
        self.table(table_unique_name)?
            .dimension_by_name(column_name)
            .cloned()
    }

    fn dimension_by_id(&self, table_unique_name: &str, column_id: &str) -> Option<Dimension> {
        self.table(table_unique_name)?
            .dimension_by_id(column_id)
            .cloned()
    }
}
