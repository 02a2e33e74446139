// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::collections::HashMap;

use roaring::RoaringBitmap;

use crate::utils::address::RowAddress;

/// Row offsets that were deleted from a single blocklet after it was written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeletionVector(RoaringBitmap);

impl DeletionVector {
    pub fn len(&self) -> usize {
        self.0.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, row: u32) -> bool {
        self.0.contains(row)
    }

    /// Union another deletion vector into this one.
    pub fn merge(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Deleted row offsets in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter()
    }
}

impl From<RoaringBitmap> for DeletionVector {
    fn from(bitmap: RoaringBitmap) -> Self {
        Self(bitmap)
    }
}

impl From<&DeletionVector> for RoaringBitmap {
    fn from(value: &DeletionVector) -> Self {
        value.0.clone()
    }
}

impl FromIterator<u32> for DeletionVector {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Deleted rows of one block, keyed by blocklet ordinal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeletedRecords(HashMap<u32, DeletionVector>);

impl DeletedRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, blocklet: u32, deletions: DeletionVector) {
        self.0.entry(blocklet).or_default().merge(deletions);
    }

    pub fn get(&self, blocklet: u32) -> Option<&DeletionVector> {
        self.0.get(&blocklet).filter(|dv| !dv.is_empty())
    }

    pub fn contains(&self, address: RowAddress) -> bool {
        self.0
            .get(&address.blocklet())
            .map(|dv| dv.contains(address.row()))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(DeletionVector::is_empty)
    }

    /// Total number of deleted rows across all blocklets.
    pub fn num_deleted_rows(&self) -> usize {
        self.0.values().map(DeletionVector::len).sum()
    }

    pub fn merge(&mut self, other: Self) {
        for (blocklet, deletions) in other.0 {
            self.insert(blocklet, deletions);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &DeletionVector)> {
        self.0.iter().map(|(blocklet, dv)| (*blocklet, dv))
    }
}

impl FromIterator<RowAddress> for DeletedRecords {
    fn from_iter<T: IntoIterator<Item = RowAddress>>(iter: T) -> Self {
        let mut grouped: HashMap<u32, Vec<u32>> = HashMap::new();
        for address in iter {
            grouped
                .entry(address.blocklet())
                .or_default()
                .push(address.row());
        }
        Self(
            grouped
                .into_iter()
                .map(|(blocklet, rows)| (blocklet, DeletionVector::from_iter(rows)))
                .collect(),
        )
    }
}
