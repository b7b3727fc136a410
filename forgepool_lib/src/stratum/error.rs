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

use crate::store::share::RejectReason;
use std::fmt;

/// Protocol-level failures surfaced to miners as Stratum error triples.
///
/// The code map: 20 unknown method / bad params, 21 job not found,
/// 22 duplicate, 23 low difficulty, 24 unauthorized worker,
/// 25 not subscribed, 26 stale.
#[derive(Debug)]
pub enum Error {
    UnknownMethod(String),
    InvalidParams(String),
    /// Message out of state order.
    NotSubscribed,
    /// Submit without an authorized worker.
    UnauthorizedWorker,
    /// Job id is not even parseable.
    JobNotFound,
    /// Share failed validation.
    Rejected(RejectReason),
    /// Miner or IP is banned; the session closes.
    Banned,
    /// Admission cap hit during registration; the session closes.
    AtCapacity(String),
    IoError(std::io::Error),
}

impl Error {
    pub fn code(&self) -> i32 {
        match self {
            Error::UnknownMethod(_) | Error::InvalidParams(_) => 20,
            Error::JobNotFound => 21,
            Error::Rejected(reason) => reason.code(),
            Error::UnauthorizedWorker | Error::Banned | Error::AtCapacity(_) => 24,
            Error::NotSubscribed => 25,
            Error::IoError(_) => 20,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Error::UnknownMethod(method) => format!("Unknown method: {method}"),
            Error::InvalidParams(msg) => format!("Invalid params: {msg}"),
            Error::NotSubscribed => "Not subscribed".to_string(),
            Error::UnauthorizedWorker => "Unauthorized worker".to_string(),
            Error::JobNotFound => "Job not found".to_string(),
            Error::Rejected(reason) => reason.message().to_string(),
            Error::Banned => "Banned".to_string(),
            Error::AtCapacity(msg) => msg.clone(),
            Error::IoError(err) => format!("IO error: {err}"),
        }
    }

    /// Whether the connection must close after this error is sent.
    pub fn closes_session(&self) -> bool {
        matches!(self, Error::Banned | Error::AtCapacity(_) | Error::IoError(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}
