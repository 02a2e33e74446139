// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Delete-delta files.
//!
//! A delete-delta file lists rows deleted from a block after it was
//! written. It is a sequence of records, one per blocklet with deletions:
//!
//! ```text
//! | blocklet ordinal: u32 LE | bitmap length: u32 LE | roaring bitmap |
//! ```

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::{path::Path, ObjectStore};
use roaring::RoaringBitmap;
use snafu::location;
use tessera_core::utils::deletion::{DeletedRecords, DeletionVector};
use tessera_core::{Error, Result};
use tracing::{debug, instrument};

/// Turns delete-delta files into the set of deleted rows.
#[async_trait]
pub trait DeleteDeltaResolver: Debug + Send + Sync {
    async fn resolve(&self, paths: &[Path]) -> Result<DeletedRecords>;
}

pub fn encode_delete_delta(records: &DeletedRecords) -> Result<Bytes> {
    let mut entries = records.iter().collect::<Vec<_>>();
    entries.sort_by_key(|(blocklet, _)| *blocklet);

    let mut buf = Vec::new();
    for (blocklet, deletions) in entries {
        if deletions.is_empty() {
            continue;
        }
        let bitmap = RoaringBitmap::from(deletions);
        let mut serialized = Vec::with_capacity(bitmap.serialized_size());
        bitmap.serialize_into(&mut serialized)?;
        let len = u32::try_from(serialized.len()).map_err(|_| {
            Error::invalid_input(
                format!("deletions of blocklet {} are too large", blocklet),
                location!(),
            )
        })?;
        buf.extend_from_slice(&blocklet.to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&serialized);
    }
    Ok(Bytes::from(buf))
}

pub fn decode_delete_delta(path: &Path, data: &[u8]) -> Result<DeletedRecords> {
    let corrupt = |message: String| Error::corrupt_file(path.clone(), message, location!());

    let mut records = DeletedRecords::new();
    let mut remaining = data;
    while !remaining.is_empty() {
        let mut header = remaining;
        let blocklet = header
            .read_u32::<LittleEndian>()
            .map_err(|e| corrupt(format!("truncated record header: {}", e)))?;
        let len = header
            .read_u32::<LittleEndian>()
            .map_err(|e| corrupt(format!("truncated record header: {}", e)))?
            as usize;
        if header.len() < len {
            return Err(corrupt(format!(
                "bitmap of blocklet {} needs {} bytes, {} left",
                blocklet,
                len,
                header.len()
            )));
        }
        let (bitmap, rest) = header.split_at(len);
        let bitmap = RoaringBitmap::deserialize_from(bitmap)
            .map_err(|e| corrupt(format!("invalid bitmap for blocklet {}: {}", blocklet, e)))?;
        records.insert(blocklet, DeletionVector::from(bitmap));
        remaining = rest;
    }
    Ok(records)
}

pub async fn write_delete_delta(
    object_store: &dyn ObjectStore,
    path: &Path,
    records: &DeletedRecords,
) -> Result<()> {
    let data = encode_delete_delta(records)?;
    object_store.put(path, data.into()).await?;
    Ok(())
}

/// Reads delete-delta files from an [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct ObjectStoreDeleteDeltaResolver {
    object_store: Arc<dyn ObjectStore>,
    io_parallelism: usize,
}

impl ObjectStoreDeleteDeltaResolver {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            object_store,
            io_parallelism: 8,
        }
    }

    pub fn with_io_parallelism(mut self, io_parallelism: usize) -> Self {
        self.io_parallelism = io_parallelism.max(1);
        self
    }
}

#[async_trait]
impl DeleteDeltaResolver for ObjectStoreDeleteDeltaResolver {
    #[instrument(level = "debug", skip_all, fields(num_files = paths.len()))]
    async fn resolve(&self, paths: &[Path]) -> Result<DeletedRecords> {
        let records = futures::stream::iter(paths.to_vec())
            .map(|path| {
                let object_store = self.object_store.clone();
                async move {
                    let data = object_store.get(&path).await?.bytes().await?;
                    decode_delete_delta(&path, &data)
                }
            })
            .buffer_unordered(self.io_parallelism)
            .try_fold(DeletedRecords::new(), |mut acc, records| async move {
                acc.merge(records);
                Ok(acc)
            })
            .await?;
        debug!(
            num_deleted_rows = records.num_deleted_rows(),
            "Resolved delete deltas"
        );
        Ok(records)
    }
}
