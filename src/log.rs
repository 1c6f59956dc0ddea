//! Engine log.
//!
//! What goes where:
//! - ERROR: pool creation failures, panicking jobs
//! - WARN: usage diagnostics and refused calls (re-entrant or already running)
//! - INFO: tree start, finish and stop
//! - DEBUG: group early stops, async hand-off and cancellation
//! - TRACE: every leaf transition and routed completion, stale ones included
//!
//! Nothing is written until [`init`] or [`init_with_debug`] names a target
//! file. The macros check the level before formatting, so disabled levels
//! cost one atomic load.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};

static TARGET: OnceLock<Mutex<File>> = OnceLock::new();
static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    const ALL: [LogLevel; 5] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

/// Truthy values of `TASKTREE_DEBUG`.
pub(crate) fn env_debug() -> bool {
    std::env::var("TASKTREE_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Log to `path` at INFO.
pub fn init(path: impl AsRef<Path>) {
    init_with_debug(path, false);
}

/// Log to `path`, at DEBUG when `debug` is set or `TASKTREE_DEBUG=1`.
///
/// The first call creates (truncates) the file; later calls only change
/// the level.
pub fn init_with_debug(path: impl AsRef<Path>, debug: bool) {
    set_level(if debug || env_debug() {
        LogLevel::Debug
    } else {
        LogLevel::Info
    });

    if TARGET.get().is_some() {
        return;
    }
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(file) = File::create(path) {
        let _ = TARGET.set(Mutex::new(file));
    }
}

pub fn set_level(level: LogLevel) {
    LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn level() -> LogLevel {
    let index = usize::from(LEVEL.load(Ordering::Relaxed));
    LogLevel::ALL[index.min(LogLevel::ALL.len() - 1)]
}

/// Whether a record at `level` would be written.
pub fn enabled(level: LogLevel) -> bool {
    level <= self::level() && TARGET.get().is_some()
}

#[doc(hidden)]
pub fn write(level: LogLevel, args: fmt::Arguments<'_>) {
    let Some(target) = TARGET.get() else {
        return;
    };
    let mut file = target.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let _ = writeln!(
        file,
        "[{}] [{}] [{}] {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        level.as_str(),
        std::thread::current().name().unwrap_or("-"),
        args
    );
}

#[doc(hidden)]
#[macro_export]
macro_rules! __ttlog_at {
    ($level:expr, $($arg:tt)*) => {
        if $crate::log::enabled($level) {
            $crate::log::write($level, format_args!($($arg)*));
        }
    };
}

/// Log at INFO.
#[macro_export]
macro_rules! ttlog {
    ($($arg:tt)*) => {
        $crate::__ttlog_at!($crate::log::LogLevel::Info, $($arg)*)
    };
}

#[macro_export]
macro_rules! ttlog_error {
    ($($arg:tt)*) => {
        $crate::__ttlog_at!($crate::log::LogLevel::Error, $($arg)*)
    };
}

#[macro_export]
macro_rules! ttlog_warn {
    ($($arg:tt)*) => {
        $crate::__ttlog_at!($crate::log::LogLevel::Warn, $($arg)*)
    };
}

#[macro_export]
macro_rules! ttlog_debug {
    ($($arg:tt)*) => {
        $crate::__ttlog_at!($crate::log::LogLevel::Debug, $($arg)*)
    };
}

#[macro_export]
macro_rules! ttlog_trace {
    ($($arg:tt)*) => {
        $crate::__ttlog_at!($crate::log::LogLevel::Trace, $($arg)*)
    };
}
