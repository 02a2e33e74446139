// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

/// Identifies a row within a block: the upper 32 bits are the blocklet
/// ordinal and the lower 32 bits the row offset inside that blocklet.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowAddress(u64);

impl RowAddress {
    pub fn new_from_parts(blocklet: u32, row: u32) -> Self {
        Self(((blocklet as u64) << 32) | row as u64)
    }

    pub fn blocklet(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn row(&self) -> u32 {
        self.0 as u32
    }
}

impl From<RowAddress> for u64 {
    fn from(address: RowAddress) -> Self {
        address.0
    }
}

impl std::fmt::Debug for RowAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self) // use Display
    }
}

impl std::fmt::Display for RowAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.blocklet(), self.row())
    }
}
