// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::location;
use tessera_core::{Error, Result};

/// Trailing bytes of every block file.
pub const MAGIC: &[u8; 4] = b"TSRA";
/// Footer length (u64) followed by [`MAGIC`].
pub const FOOTER_TAIL_LEN: usize = 8 + MAGIC.len();

/// On-disk layout version of a blocklet.
///
/// The set is closed: a version never changes once released, and readers
/// dispatch on it exhaustively.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "u32", into = "u32")]
pub enum ColumnarFormatVersion {
    /// One read per column chunk. A chunk is a single page.
    V1,
    /// One read per group of adjacent columns. A chunk is a single page.
    V2,
    /// One read per group of adjacent columns. Chunks are split into pages.
    #[default]
    V3,
}

impl ColumnarFormatVersion {
    pub fn number(&self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    /// Whether a chunk may hold more than one page.
    pub fn is_paged(&self) -> bool {
        matches!(self, Self::V3)
    }

    pub fn all() -> [Self; 3] {
        [Self::V1, Self::V2, Self::V3]
    }
}

impl TryFrom<u32> for ColumnarFormatVersion {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            _ => Err(Error::not_supported(
                format!("Unknown columnar format version: {}", value),
                location!(),
            )),
        }
    }
}

impl From<ColumnarFormatVersion> for u32 {
    fn from(value: ColumnarFormatVersion) -> Self {
        value.number()
    }
}

impl std::fmt::Display for ColumnarFormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "V{}", self.number())
    }
}

impl FromStr for ColumnarFormatVersion {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let lower = value.trim().to_lowercase();
        let number = lower.strip_prefix('v').unwrap_or(&lower);
        match number.parse::<u32>() {
            Ok(n) => Self::try_from(n),
            Err(_) => Err(Error::not_supported(
                format!("Unknown columnar format version: {}", value),
                location!(),
            )),
        }
    }
}
