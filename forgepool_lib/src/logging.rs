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

use crate::config::LoggingConfig;
use std::error::Error;
use tracing::info;
use tracing_appender::non_blocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Sets up logging according to the logging configuration.
///
/// If console logging is disabled and no file is configured, console logging
/// is enabled as a fallback to prevent silent operation. The returned guard
/// must live as long as the process when file logging is active.
pub fn setup_logging(
    logging_config: &LoggingConfig,
) -> Result<Option<non_blocking::WorkerGuard>, Box<dyn Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging_config.level));

    let console_explicitly_disabled = logging_config.console == Some(false);
    let file_configured = logging_config.file.is_some();

    let enable_console = if console_explicitly_disabled && !file_configured {
        eprintln!(
            "Warning: Console logging disabled but no file configured. Enabling console logging as fallback."
        );
        true
    } else {
        logging_config.console.unwrap_or(true)
    };

    let console_layer = if enable_console { Some(fmt::layer()) } else { None };

    let (file_layer, guard) = if let Some(file_path) = &logging_config.file {
        if let Some(parent) = std::path::Path::new(file_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file_path = std::path::Path::new(file_path);
        let directory = file_path
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."));
        let filename = file_path
            .file_name()
            .unwrap_or_default()
            .to_str()
            .unwrap_or("forgepool.log");

        let file_appender = RollingFileAppender::new(Rotation::DAILY, directory, filename);
        let (non_blocking_appender, guard) = non_blocking(file_appender);
        let layer = fmt::layer()
            .with_writer(non_blocking_appender)
            .with_ansi(false);

        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    Registry::default()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized at level {}", logging_config.level);
    Ok(guard)
}
