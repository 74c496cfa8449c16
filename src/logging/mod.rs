// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logging utilities for the gateway.
//!
//! All code logs through the `log` facade.  The process-wide backend is either
//! `env_logger` (the default) or the `slog` pipeline from [`structured`] when
//! `gateway.logging.structured` is set.  Components that carry a `Logger`
//! reference in their manifest log through a [`ComponentLogger`], which adds
//! its own target and level on top of the global filter.

pub mod config;
pub mod structured;
pub mod wrapper;


pub use config::LoggingConfig;

use async_trait::async_trait;
use log::{Level, LevelFilter, Record, info};
use std::fmt;
use std::sync::{Arc, Mutex, Once};

use crate::container::{Component, Factory, Resolver, unexpected_spec};
use crate::error::GatewayError;
use crate::logging::structured::{LoggerGuard, install};
use crate::manifest::{CORE_V1, KIND_LOGGER, KindSpec, ManifestObject};

static INIT: Once = Once::new();
static GUARD: Mutex<Option<LoggerGuard>> = Mutex::new(None);

/// Initialize logging with the specified level.
///
/// This function ensures logging is only initialized once.
pub fn init(level: Option<LevelFilter>) {
    INIT.call_once(|| {
        let env = env_logger::Env::default().filter_or("RUST_LOG", level_name(level));

        let _ = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .format_target(true)
            .try_init();

        info!("Logging initialized at level: {}", log::max_level());
    });
}

/// Initialize logging from a [`LoggingConfig`].
///
/// Structured configs install the slog drain and bridge the `log` facade into
/// it; everything else falls back to [`init`].
pub fn init_with_config(level: Option<LevelFilter>, config: Option<LoggingConfig>) {
    let config = match config {
        Some(c) if c.structured => c,
        Some(c) => return init(Some(c.level_filter())),
        None => return init(level),
    };

    INIT.call_once(|| {
        let guard = install(&config);
        if slog_stdlog::init_with_level(config.level_filter().to_level().unwrap_or(Level::Info)).is_err() {
            eprintln!("A logger was already installed; structured logging bridge skipped");
        }
        if let Ok(mut slot) = GUARD.lock() {
            *slot = Some(guard);
        }
        info!("Structured logging initialized in {:?} format", config.format);
    });
}

fn level_name(level: Option<LevelFilter>) -> &'static str {
    level.map_or("info", |l| match l {
        LevelFilter::Trace => "trace",
        LevelFilter::Debug => "debug",
        LevelFilter::Info => "info",
        LevelFilter::Warn => "warn",
        LevelFilter::Error => "error",
        LevelFilter::Off => "off",
    })
}

/// Parse a level name as used in manifests and settings files.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name.to_ascii_lowercase().as_str() {
        "trace" => Some(LevelFilter::Trace),
        "debug" => Some(LevelFilter::Debug),
        "info" => Some(LevelFilter::Info),
        "warn" | "warning" => Some(LevelFilter::Warn),
        "error" => Some(LevelFilter::Error),
        "off" | "none" => Some(LevelFilter::Off),
        _ => None,
    }
}

/// A logger bound to one manifest object.
///
/// Messages are emitted under `target` and dropped when more verbose than
/// `level`.  The global filter installed by [`init`] still applies.
#[derive(Debug, Clone)]
pub struct ComponentLogger {
    target: String,
    level: LevelFilter,
}

impl ComponentLogger {
    pub fn new(target: impl Into<String>, level: LevelFilter) -> Self {
        Self { target: target.into(), level }
    }

    /// Logger used when a component has no `Logger` reference.
    pub fn for_component(name: &str) -> Self {
        Self::new(format!("gatehouse::{name}"), LevelFilter::Trace)
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level && level <= log::max_level()
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        log::logger().log(
            &Record::builder()
                .args(args)
                .level(level)
                .target(&self.target)
                .module_path_static(Some(module_path!()))
                .build(),
        );
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    pub fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Trace, args);
    }
}

/// Builds `core/v1 Logger` objects.
#[derive(Debug, Default)]
pub struct LoggerFactory;

#[async_trait]
impl Factory for LoggerFactory {
    fn api_version(&self) -> &'static str {
        CORE_V1
    }

    fn kind(&self) -> &'static str {
        KIND_LOGGER
    }

    async fn create(&self, _resolver: &Resolver<'_>, object: &ManifestObject) -> Result<Component, GatewayError> {
        let KindSpec::Logger(spec) = &object.spec else {
            return Err(unexpected_spec(object));
        };
        let target = spec.target.clone().unwrap_or_else(|| {
            format!("gatehouse::{}::{}", object.identity.namespace, object.identity.name)
        });
        // The level name was checked during manifest validation.
        let level = parse_level(&spec.level).unwrap_or(LevelFilter::Info);
        Ok(Component::new().provide(Arc::new(ComponentLogger::new(target, level))))
    }
}
