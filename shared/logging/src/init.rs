use std::error::Error;
use std::fmt::{Display, Formatter};

use slog::{Drain, Level};
use slog_scope::GlobalLoggerGuard;

/// Env var consulted by [init] for the level, e.g. `NAV_LOG=debug`
pub const LEVEL_ENV: &str = "NAV_LOG";

/// Keeps the global logger registered. Drop it last
pub struct Logger {
    level: Level,
    _guard: GlobalLoggerGuard,
}

#[derive(Debug)]
pub enum LogError {
    BadLevel(String),
}

/// Terminal logger at the level named by `NAV_LOG`, or info when unset
pub fn init() -> Result<Logger, LogError> {
    let level = match std::env::var(LEVEL_ENV) {
        Ok(raw) => raw.parse().map_err(|_| LogError::BadLevel(raw))?,
        Err(_) => Level::Info,
    };
    Ok(init_with_level(level))
}

pub fn init_with_level(level: Level) -> Logger {
    let decorator = slog_term::TermDecorator::new().stdout().build();
    let drain = slog_term::FullFormat::new(decorator)
        .use_original_order()
        .build()
        .fuse();
    let drain = drain.filter_level(level).fuse();
    // the worker and game threads both log; serialize off-thread
    let drain = slog_async::Async::new(drain)
        .thread_name("logging".to_owned())
        .chan_size(1024)
        .build_no_guard()
        .fuse();

    let root = slog::Logger::root(drain, slog::o!());
    Logger {
        level,
        _guard: slog_scope::set_global_logger(root),
    }
}

impl Logger {
    pub fn level(&self) -> Level {
        self.level
    }
}

impl Display for LogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LogError::BadLevel(raw) => {
                write!(f, "{} names an unknown log level {:?}", LEVEL_ENV, raw)
            }
        }
    }
}

impl Error for LogError {}
