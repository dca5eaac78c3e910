//! Logger implementation for the log crate.

use core::fmt::{self, Display};
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::TinyResult;
use crate::error::TinyError;
use crate::println;

pub struct KernelLogger;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorCode {
    Red = 31,
    Green = 32,
    Yellow = 33,
    Cyan = 36,
    BrightBlack = 90,
}

impl Display for ColorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\u{1B}[{}m", *self as u8)
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let file = record.file().unwrap_or("none");
        let line = record.line().unwrap_or(0);
        let args = record.args();
        let color_reset = "\u{1B}[0m";

        let args_color = match record.level() {
            Level::Error => ColorCode::Red,
            Level::Warn => ColorCode::Yellow,
            Level::Info => ColorCode::Green,
            Level::Debug => ColorCode::Cyan,
            Level::Trace => ColorCode::BrightBlack,
        };

        println!("[{file}:{line}] {args_color}{args}{color_reset}");
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Maps the `LOG` build variable to a level filter.
pub fn level_filter(level: Option<&str>) -> LevelFilter {
    match level {
        Some("error") => LevelFilter::Error,
        Some("warn") => LevelFilter::Warn,
        Some("info") => LevelFilter::Info,
        Some("debug") => LevelFilter::Debug,
        Some("trace") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// Initialize the logger.
pub fn init() -> TinyResult<()> {
    println!(
        "Initializing logger with level: {}",
        option_env!("LOG").unwrap_or("off")
    );
    log::set_logger(&LOGGER).map_err(|_| TinyError::LoggerInitFailed)?;
    log::set_max_level(level_filter(option_env!("LOG")));
    Ok(())
}
