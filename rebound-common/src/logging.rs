use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

#[macro_export]
macro_rules! redelivery {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "redelivery", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::redelivery!(level = DEBUG, $($msg),*)
    };
}

/// Emit an event at a level chosen at runtime
///
/// `tracing` needs its levels to be known statically, so this dispatches
/// to the matching macro.
#[macro_export]
macro_rules! event_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            $crate::logging::LogLevel::Off => {}
            $crate::logging::LogLevel::Error => $crate::tracing::error!($($arg)+),
            $crate::logging::LogLevel::Warn => $crate::tracing::warn!($($arg)+),
            $crate::logging::LogLevel::Info => $crate::tracing::info!($($arg)+),
            $crate::logging::LogLevel::Debug => $crate::tracing::debug!($($arg)+),
            $crate::logging::LogLevel::Trace => $crate::tracing::trace!($($arg)+),
        }
    };
}

/// Configurable level for engine events, `Off` silences them entirely
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    #[default]
    Debug,
    Trace,
}

pub fn init() {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    let level = std::env::var("LOG_LEVEL").map_or(default, |level| {
        LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    });

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("rebound")
                })),
        )
        .init();
}
