// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Page encodings.
//!
//! * dictionary keys: `num_rows` little-endian `u32`
//! * UTF-8: per row a little-endian `u32` byte length followed by the bytes,
//!   [`NULL_STRING_LEN`] marks a null and carries no bytes
//! * float64: one byte per row (1 = valid, 0 = null) followed by `num_rows`
//!   little-endian `f64`; nulls are stored as `0.0`

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use object_store::path::Path;
use snafu::location;
use tessera_core::datatypes::{SurrogateKey, Value};
use tessera_core::{Error, Result};

use crate::layout::ChunkEncoding;

pub const NULL_STRING_LEN: u32 = u32::MAX;

/// Decoded values of one column chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Keys(Vec<SurrogateKey>),
    Utf8(Vec<Option<String>>),
    Float64(Vec<Option<f64>>),
}

impl ColumnValues {
    pub fn empty(encoding: ChunkEncoding) -> Self {
        match encoding {
            ChunkEncoding::DictionaryKeys => Self::Keys(vec![]),
            ChunkEncoding::Utf8 => Self::Utf8(vec![]),
            ChunkEncoding::Float64 => Self::Float64(vec![]),
        }
    }

    pub fn encoding(&self) -> ChunkEncoding {
        match self {
            Self::Keys(_) => ChunkEncoding::DictionaryKeys,
            Self::Utf8(_) => ChunkEncoding::Utf8,
            Self::Float64(_) => ChunkEncoding::Float64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Keys(v) => v.len(),
            Self::Utf8(v) => v.len(),
            Self::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `row`. Dictionary keys are returned uninterpreted.
    pub fn value(&self, row: usize) -> Value {
        match self {
            Self::Keys(v) => v.get(row).map_or(Value::Null, |k| Value::Key(*k)),
            Self::Utf8(v) => v.get(row).cloned().flatten().into(),
            Self::Float64(v) => v.get(row).copied().flatten().into(),
        }
    }

    /// Append the values of `other`, which must have the same encoding.
    pub fn append(&mut self, other: Self) -> Result<()> {
        match (self, other) {
            (Self::Keys(a), Self::Keys(b)) => a.extend(b),
            (Self::Utf8(a), Self::Utf8(b)) => a.extend(b),
            (Self::Float64(a), Self::Float64(b)) => a.extend(b),
            (this, other) => {
                return Err(Error::internal(
                    format!(
                        "cannot append {:?} values to {:?} values",
                        other.encoding(),
                        this.encoding()
                    ),
                    location!(),
                ))
            }
        }
        Ok(())
    }
}

pub fn encode_keys(keys: &[SurrogateKey]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(keys.len() * 4);
    for key in keys {
        buf.extend_from_slice(&key.to_le_bytes());
    }
    buf
}

pub fn encode_strings<S: AsRef<str>>(values: &[Option<S>]) -> Vec<u8> {
    let mut buf = Vec::new();
    for value in values {
        match value {
            Some(s) => {
                let bytes = s.as_ref().as_bytes();
                buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                buf.extend_from_slice(bytes);
            }
            None => buf.extend_from_slice(&NULL_STRING_LEN.to_le_bytes()),
        }
    }
    buf
}

pub fn encode_f64(values: &[Option<f64>]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(values.len() * 9);
    buf.extend(values.iter().map(|v| u8::from(v.is_some())));
    for value in values {
        buf.extend_from_slice(&value.unwrap_or_default().to_le_bytes());
    }
    buf
}

/// Decode one page holding `num_rows` values.
pub fn decode_page(
    path: &Path,
    encoding: ChunkEncoding,
    data: &[u8],
    num_rows: usize,
) -> Result<ColumnValues> {
    let corrupt = |message: String| Error::corrupt_file(path.clone(), message, location!());
    let short = |e: std::io::Error| {
        corrupt(format!(
            "{:?} page with {} rows is truncated: {}",
            encoding, num_rows, e
        ))
    };

    let min_row_size = match encoding {
        ChunkEncoding::DictionaryKeys | ChunkEncoding::Utf8 => 4,
        ChunkEncoding::Float64 => 9,
    };
    if num_rows.saturating_mul(min_row_size) > data.len() {
        return Err(corrupt(format!(
            "{:?} page with {} rows cannot fit in {} bytes",
            encoding,
            num_rows,
            data.len()
        )));
    }

    let mut cursor = Cursor::new(data);
    let values = match encoding {
        ChunkEncoding::DictionaryKeys => {
            let mut keys = Vec::with_capacity(num_rows);
            for _ in 0..num_rows {
                keys.push(cursor.read_u32::<LittleEndian>().map_err(short)?);
            }
            ColumnValues::Keys(keys)
        }
        ChunkEncoding::Utf8 => {
            let mut strings = Vec::with_capacity(num_rows);
            for _ in 0..num_rows {
                let len = cursor.read_u32::<LittleEndian>().map_err(short)?;
                if len == NULL_STRING_LEN {
                    strings.push(None);
                    continue;
                }
                let remaining = data.len() - cursor.position() as usize;
                if len as usize > remaining {
                    return Err(corrupt(format!(
                        "string of {} bytes runs past the page, {} bytes remain",
                        len, remaining
                    )));
                }
                let mut bytes = vec![0; len as usize];
                cursor.read_exact(&mut bytes).map_err(short)?;
                let s = String::from_utf8(bytes)
                    .map_err(|e| corrupt(format!("invalid UTF-8 in page: {}", e)))?;
                strings.push(Some(s));
            }
            ColumnValues::Utf8(strings)
        }
        ChunkEncoding::Float64 => {
            let mut validity = vec![0; num_rows];
            cursor.read_exact(&mut validity).map_err(short)?;
            let mut floats = Vec::with_capacity(num_rows);
            for valid in validity {
                let value = cursor.read_f64::<LittleEndian>().map_err(short)?;
                floats.push((valid != 0).then_some(value));
            }
            ColumnValues::Float64(floats)
        }
    };

    if cursor.position() as usize != data.len() {
        return Err(corrupt(format!(
            "{:?} page with {} rows has {} trailing bytes",
            encoding,
            num_rows,
            data.len() - cursor.position() as usize
        )));
    }
    Ok(values)
}
