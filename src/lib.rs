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

//! chipmon - W83781D hardware monitor driver and command line tool
//!
//! The driver itself lives in `cm-core`; this crate wires it to real or
//! simulated buses, sets up logging, and provides the `chipmon` CLI.

pub mod cli;
pub mod hardware;
pub mod logging;
