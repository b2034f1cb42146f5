//! Installs the non-blocking, daily-rolling file logger (spec §2 "Ambient
//! stack / Logging"), matching `application/logging/tracing.rs` exactly: an
//! `EnvFilter` layer over `tracing-subscriber`'s registry, a
//! `tracing-appender` non-blocking writer whose guard is parked in a static
//! `OnceCell` so it outlives every caller.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use super::config::Configuration;

static LOGGER_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

pub fn tracing_subscribe(config: &Configuration) -> bool {
    let env_filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_appender = tracing_appender::rolling::daily(config.log_dir(), "indexserver.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOGGER_GUARD.set(guard);
    let log_writer_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
    let stderr_layer = fmt::layer();

    tracing_subscriber::registry()
        .with(env_filter_layer)
        .with(log_writer_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok()
}
