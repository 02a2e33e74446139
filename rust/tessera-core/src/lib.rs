// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

pub mod catalog;
pub mod config;
pub mod datatypes;
pub mod error;
pub mod io;
pub mod utils;

pub use error::{Error, Result};
