// Copyright (C) 2025 Forgepool Developers (see AUTHORS)
//
// This file is part of Forgepool
//
// Forgepool is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Forgepool is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// Forgepool. If not, see <https://www.gnu.org/licenses/>.

//! Forgepool: a Stratum v1 mining pool server.
//!
//! The crate is organized around a single coordinator actor
//! ([`coordinator`]) that owns the in-memory entity store ([`store`]), the
//! job window ([`work`]), the VarDiff controller ([`vardiff`]) and the
//! reward calculators ([`rewards`]). The Stratum listener and sessions
//! ([`stratum`]) talk to it over typed commands; the HTTP stats crate reads
//! through the same handle.

pub mod banlist;
pub mod config;
pub mod coordinator;
pub mod difficulty;
pub mod ids;
pub mod logging;
pub mod rewards;
pub mod stats;
pub mod store;
pub mod stratum;
pub mod validator;
pub mod vardiff;
pub mod work;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
