//! Leveled logging for GANG, gated by `GANG_LOG_LEVEL`. Same shape as
//! `iomux_core::log`, duplicated rather than shared since the two
//! subsystems run in separate processes with independent env vars.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "off" => Some(Self::Off),
            "1" | "error" => Some(Self::Error),
            "2" | "warn" => Some(Self::Warn),
            "3" | "info" => Some(Self::Info),
            "4" | "debug" => Some(Self::Debug),
            "5" | "trace" => Some(Self::Trace),
            _ => None,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::Off => "",
            Self::Error => "[ERROR]",
            Self::Warn => "[WARN]",
            Self::Info => "[INFO]",
            Self::Debug => "[DEBUG]",
            Self::Trace => "[TRACE]",
        }
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

pub fn init() {
    if INITIALIZED.swap(true, Ordering::AcqRel) {
        return;
    }
    if let Ok(raw) = std::env::var("GANG_LOG_LEVEL") {
        if let Some(level) = LogLevel::from_str(&raw) {
            set_level(level);
        }
    }
}

pub fn set_level(level: LogLevel) {
    LEVEL.store(level as u8, Ordering::Release);
}

pub fn level_enabled(level: LogLevel) -> bool {
    init();
    (level as u8) <= LEVEL.load(Ordering::Acquire)
}

#[doc(hidden)]
pub fn _log_impl(level: LogLevel, args: fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    eprintln!("{} gang: {}", level.prefix(), args);
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::log::_log_impl($crate::log::LogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::log::_log_impl($crate::log::LogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::log::_log_impl($crate::log::LogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::log::_log_impl($crate::log::LogLevel::Debug, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(LogLevel::Error < LogLevel::Debug);
    }

    #[test]
    fn parses_numeric_and_named() {
        assert_eq!(LogLevel::from_str("3"), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_str("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("bogus"), None);
    }

    #[test]
    fn macros_compile_and_respect_level() {
        set_level(LogLevel::Off);
        log_error!("should not panic even though suppressed: {}", 1);
        set_level(LogLevel::Trace);
        log_debug!("now visible: {}", 2);
    }
}
