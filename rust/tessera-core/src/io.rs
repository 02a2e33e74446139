// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{memory::InMemory, path::Path, ObjectStore};
use snafu::location;
use tracing::instrument;

use crate::{Error, Result};

/// Shared handle used to read byte ranges out of data files.
///
/// One reader is handed to every chunk retrieval of a scan so that the
/// underlying connections (and any caching the implementation does) are
/// shared across blocklets.
#[async_trait]
pub trait FileReader: std::fmt::Debug + Send + Sync {
    /// Read a range of bytes from the file at `path`.
    async fn read_range(&self, path: &Path, range: Range<usize>) -> Result<Bytes>;

    /// Size of the file at `path`.
    async fn size(&self, path: &Path) -> Result<usize>;
}

/// [`FileReader`] over any [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct ObjectStoreFileReader {
    pub object_store: Arc<dyn ObjectStore>,
}

impl ObjectStoreFileReader {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self { object_store }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }
}

#[async_trait]
impl FileReader for ObjectStoreFileReader {
    #[instrument(level = "debug", skip(self))]
    async fn read_range(&self, path: &Path, range: Range<usize>) -> Result<Bytes> {
        if range.start > range.end {
            return Err(Error::invalid_input(
                format!("invalid read range {:?} for {}", range, path),
                location!(),
            ));
        }
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        Ok(self.object_store.get_range(path, range).await?)
    }

    async fn size(&self, path: &Path) -> Result<usize> {
        Ok(self.object_store.head(path).await?.size)
    }
}
