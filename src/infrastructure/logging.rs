//! File and console logging
//!
//! File logging writes one rolling daily log per concern under a base directory:
//! - `<dir>/main` - everything, JSON lines
//! - `<dir>/error` - WARN and ERROR only
//! - `<dir>/ws` - transport and handshake (target `ws`)
//! - `<dir>/feed` - subscriptions, decoding and auth (target `feed`)
//!
//! `RUST_LOG` overrides the default `info` filter.

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_TYPES: [&str; 4] = ["main", "error", "ws", "feed"];

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize file logging plus a console layer.
///
/// The returned guards flush the background writers and must be kept alive
/// for the duration of the program.
pub fn init_logging(dir: impl AsRef<Path>) -> io::Result<Vec<WorkerGuard>> {
    let dir = dir.as_ref();
    for log_type in LOG_TYPES {
        fs::create_dir_all(dir.join(log_type))?;
    }

    let mut guards = Vec::with_capacity(LOG_TYPES.len());

    let (main_appender, guard) = create_appender(dir, "main");
    guards.push(guard);
    let (error_appender, guard) = create_appender(dir, "error");
    guards.push(guard);
    let (ws_appender, guard) = create_appender(dir, "ws");
    guards.push(guard);
    let (feed_appender, guard) = create_appender(dir, "feed");
    guards.push(guard);

    let main_layer = tracing_subscriber::fmt::layer()
        .with_writer(main_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json();

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::LevelFilter::WARN);

    let ws_layer = tracing_subscriber::fmt::layer()
        .with_writer(ws_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target() == "ws" || metadata.target().contains("tungstenite")
        }));

    let feed_layer = tracing_subscriber::fmt::layer()
        .with_writer(feed_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target() == "feed"
        }));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(main_layer)
        .with(error_layer)
        .with(ws_layer)
        .with(feed_layer)
        .with(console_layer)
        .try_init()
        .map_err(io::Error::other)?;

    tracing::info!(dir = %dir.display(), "logging initialized");
    Ok(guards)
}

/// Console-only logging. Does nothing if a subscriber is already installed.
pub fn init_console_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .try_init();
}

fn create_appender(dir: &Path, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, dir.join(name), name);
    tracing_appender::non_blocking(appender)
}

/// Transport and handshake events
#[macro_export]
macro_rules! log_ws {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "ws", $level, $($arg)+)
    };
}

/// Subscription, decode and auth events
#[macro_export]
macro_rules! log_feed {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "feed", $level, $($arg)+)
    };
}
