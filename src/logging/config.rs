// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Output of the structured backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Terminal,
    Json,
}

/// The `gateway.logging` settings block.
///
/// Without `structured` only `level` matters and `env_logger` is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub structured: bool,
    pub format: LogFormat,
    pub level: String,
    /// Adds the emitting module to every structured record.
    pub include_location: bool,
    pub include_thread_id: bool,
    /// Extra key/value pairs on every structured record.
    pub static_fields: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            structured: false,
            format: LogFormat::Terminal,
            level: "info".to_string(),
            include_location: true,
            include_thread_id: true,
            static_fields: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Unknown level names fall back to info.
    pub fn level_filter(&self) -> LevelFilter {
        super::parse_level(&self.level).unwrap_or(LevelFilter::Info)
    }

    pub fn slog_level(&self) -> slog::Level {
        match self.level_filter() {
            LevelFilter::Off | LevelFilter::Error => slog::Level::Error,
            LevelFilter::Warn => slog::Level::Warning,
            LevelFilter::Info => slog::Level::Info,
            LevelFilter::Debug => slog::Level::Debug,
            LevelFilter::Trace => slog::Level::Trace,
        }
    }
}
