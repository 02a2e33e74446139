// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Testing utilities

use std::ops::Range;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path;

use crate::io::FileReader;
use crate::Result;

/// A guard that sets an environment variable to a given value and restores the original value when dropped.
pub struct EnvVarGuard {
    name: String,
    old_value: Option<String>,
}

impl EnvVarGuard {
    pub fn new(name: &str, value: &str) -> Self {
        let old_value = std::env::var(name).ok();
        std::env::set_var(name, value);
        Self {
            name: name.to_string(),
            old_value,
        }
    }

    /// Remove the variable for the lifetime of the guard.
    pub fn unset(name: &str) -> Self {
        let old_value = std::env::var(name).ok();
        std::env::remove_var(name);
        Self {
            name: name.to_string(),
            old_value,
        }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        if let Some(value) = &self.old_value {
            std::env::set_var(&self.name, value);
        } else {
            std::env::remove_var(&self.name);
        }
    }
}

/// One intercepted read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRead {
    pub path: Path,
    pub range: Range<usize>,
}

/// A file reader that records every range it is asked for before delegating
/// to the wrapped reader.
///
/// Tests use this to assert which bytes a decoder touched.
#[derive(Debug)]
pub struct RecordingFileReader {
    target: Arc<dyn FileReader>,
    reads: Mutex<Vec<RecordedRead>>,
}

impl RecordingFileReader {
    pub fn new(target: Arc<dyn FileReader>) -> Self {
        Self {
            target,
            reads: Mutex::new(Vec::new()),
        }
    }

    pub fn reads(&self) -> Vec<RecordedRead> {
        self.reads.lock().unwrap().clone()
    }

    pub fn num_reads(&self) -> usize {
        self.reads.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.reads.lock().unwrap().clear();
    }
}

#[async_trait]
impl FileReader for RecordingFileReader {
    async fn read_range(&self, path: &Path, range: Range<usize>) -> Result<Bytes> {
        self.reads.lock().unwrap().push(RecordedRead {
            path: path.clone(),
            range: range.clone(),
        });
        self.target.read_range(path, range).await
    }

    async fn size(&self, path: &Path) -> Result<usize> {
        self.target.size(path).await
    }
}
