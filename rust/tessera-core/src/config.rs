// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Options that tune data loading.
//!
//! Options are plain strings so that they can be passed through from any
//! configuration source. Getters never fail: a missing or malformed value
//! falls back to the documented default.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

/// Number of worker threads used while loading (and persisting dictionaries).
pub const NUM_CORES_LOADING: &str = "tessera.number.of.cores.while.loading";
/// Environment variable consulted when [`NUM_CORES_LOADING`] is not set.
pub const NUM_CORES_LOADING_ENV: &str = "TESSERA_NUM_CORES_LOADING";
pub const NUM_CORES_DEFAULT: usize = 2;

/// Upper bound, in seconds, on waiting for dictionary persistence.
pub const DICTIONARY_WRITE_TIMEOUT: &str = "tessera.dictionary.write.timeout.secs";
pub const DICTIONARY_WRITE_TIMEOUT_DEFAULT: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions(pub HashMap<String, String>);

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Degree of parallelism for loading work.
    ///
    /// Resolution order is the option map, then [`NUM_CORES_LOADING_ENV`],
    /// then [`NUM_CORES_DEFAULT`]. Zero or unparsable values are ignored.
    pub fn num_cores_loading(&self) -> usize {
        let configured = self
            .get(NUM_CORES_LOADING)
            .cloned()
            .or_else(|| std::env::var(NUM_CORES_LOADING_ENV).ok());
        let Some(value) = configured else {
            return NUM_CORES_DEFAULT;
        };
        match value.trim().parse::<usize>() {
            Ok(cores) if cores > 0 => cores,
            _ => {
                warn!(
                    "Invalid value '{}' for {}, using default {}",
                    value, NUM_CORES_LOADING, NUM_CORES_DEFAULT
                );
                NUM_CORES_DEFAULT
            }
        }
    }

    pub fn dictionary_write_timeout(&self) -> Duration {
        self.get(DICTIONARY_WRITE_TIMEOUT)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DICTIONARY_WRITE_TIMEOUT_DEFAULT)
    }
}

impl From<HashMap<String, String>> for LoadOptions {
    fn from(value: HashMap<String, String>) -> Self {
        Self(value)
    }
}
