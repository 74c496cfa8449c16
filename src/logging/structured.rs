// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The slog backend used when `gateway.logging.structured` is set.

use slog::{Drain, FnValue, Logger, Record, o};
use slog_async::Async;
use slog_json::Json;
use slog_term::{FullFormat, TermDecorator};

use super::config::{LogFormat, LoggingConfig};

/// Root logger carrying the gateway's own fields and the configured ones.
pub fn root_logger(config: &LoggingConfig) -> Logger {
    match config.format {
        LogFormat::Terminal => {
            let decorator = TermDecorator::new().stderr().build();
            with_fields(FullFormat::new(decorator).build().fuse(), config)
        }
        LogFormat::Json => with_fields(Json::new(std::io::stdout()).add_default_keys().build().fuse(), config),
    }
}

fn with_fields<D>(drain: D, config: &LoggingConfig) -> Logger
where
    D: Drain<Ok = (), Err = slog::Never> + Send + 'static,
{
    let drain = Async::new(drain.filter_level(config.slog_level()).fuse()).build().fuse();
    let mut logger = Logger::root(drain, o!("service" => "gatehouse", "version" => env!("CARGO_PKG_VERSION")));

    if config.include_thread_id {
        logger = logger.new(o!("thread" => FnValue(|_: &Record| format!("{:?}", std::thread::current().id()))));
    }
    if config.include_location {
        logger = logger.new(o!("module" => FnValue(|r: &Record| r.module().to_string())));
    }
    for (key, value) in &config.static_fields {
        // Keys must be 'static; they live as long as the process logger.
        let key: &'static str = Box::leak(key.clone().into_boxed_str());
        logger = logger.new(o!(key => value.clone()));
    }
    logger
}

/// Keeps the global slog logger installed while alive.
pub struct LoggerGuard {
    _scope: slog_scope::GlobalLoggerGuard,
}

pub fn install(config: &LoggingConfig) -> LoggerGuard {
    LoggerGuard {
        _scope: slog_scope::set_global_logger(root_logger(config)),
    }
}
