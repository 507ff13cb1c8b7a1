//! Global structured logging for the nav crates, over slog. Binaries call
//! [init] once and hold the returned guard; library tests call [for_tests]
//! so log statements run without spamming the harness output.

use once_cell::sync::OnceCell;
use slog_scope::GlobalLoggerGuard;

#[cfg(feature = "binary")]
mod init;

#[cfg(feature = "binary")]
pub use init::{init, init_with_level, LogError, Logger, LEVEL_ENV};

static TEST_LOGGER: OnceCell<GlobalLoggerGuard> = OnceCell::new();

/// Installs a drain that swallows everything, once per process
pub fn for_tests() {
    TEST_LOGGER.get_or_init(|| {
        let root = slog::Logger::root(slog::Discard, slog::o!());
        slog_scope::set_global_logger(root)
    });
}

pub mod prelude {
    pub use slog_scope::crit;
    pub use slog_scope::debug;
    pub use slog_scope::error;
    pub use slog_scope::info;
    pub use slog_scope::trace;
    pub use slog_scope::warn;

    pub use slog::{
        self, b, o, Drain as SlogDrain, FnValue, Key, Level as LogLevel, Record,
        Result as SlogResult, Serializer,
    };

    pub use slog_scope::{self, logger};
}

#[macro_export]
macro_rules! slog_value_debug {
    ($ty:ty) => {
        impl $crate::prelude::slog::Value for $ty {
            fn serialize(
                &self,
                _: &$crate::prelude::slog::Record,
                key: $crate::prelude::slog::Key,
                serializer: &mut dyn $crate::prelude::slog::Serializer,
            ) -> $crate::prelude::slog::Result<()> {
                serializer.emit_arguments(key, &format_args!("{:?}", self))
            }
        }
    };
}

#[macro_export]
macro_rules! slog_value_display {
    ($ty:ty) => {
        impl $crate::prelude::slog::Value for $ty {
            fn serialize(
                &self,
                _: &$crate::prelude::slog::Record,
                key: $crate::prelude::slog::Key,
                serializer: &mut dyn $crate::prelude::slog::Serializer,
            ) -> $crate::prelude::slog::Result<()> {
                serializer.emit_arguments(key, &format_args!("{}", self))
            }
        }
    };
}
