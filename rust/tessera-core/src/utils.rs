// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

pub mod address;
pub mod deletion;
pub mod testing;
pub mod tokio;
