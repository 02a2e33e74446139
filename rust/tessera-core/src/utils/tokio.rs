// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use tracing::warn;

/// Environment variable that overrides the number of CPUs used for
/// compute intensive work.
pub const CPU_THREADS_ENV: &str = "TESSERA_CPU_THREADS";

pub fn get_num_compute_intensive_cpus() -> usize {
    if let Ok(user_specified) = std::env::var(CPU_THREADS_ENV) {
        match user_specified.parse::<usize>() {
            Ok(cpus) if cpus > 0 => return cpus,
            _ => warn!(
                "Ignoring invalid {}={}, falling back to the number of CPUs",
                CPU_THREADS_ENV, user_specified
            ),
        }
    }
    num_cpus::get().max(1)
}

