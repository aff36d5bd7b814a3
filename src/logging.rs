/*
 * This file is part of chipmon.
 *
 * Copyright (C) 2025 chipmon contributors
 *
 * chipmon is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * chipmon is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with chipmon. If not, see <https://www.gnu.org/licenses/>.
 */

//! Logging setup
//!
//! `tracing-subscriber` with an `EnvFilter`. An explicit `--log-level`
//! wins over `RUST_LOG`; with neither, only warnings are shown.

use tracing_subscriber::EnvFilter;

const DEFAULT_LEVEL: &str = "warn";

/// Filter directive to use for a given `--log-level` and `RUST_LOG`
pub fn filter_directive(cli_level: Option<&str>, env_level: Option<&str>) -> String {
    cli_level
        .or(env_level)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_LEVEL)
        .to_string()
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable.
pub fn init_logging(cli_level: Option<&str>) -> anyhow::Result<()> {
    let env_level = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = filter_directive(cli_level, env_level.as_deref());
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| anyhow::anyhow!("invalid log level {:?}: {}", directive, e))?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install logger: {}", e))
}
