use core::any::Any;
use std::io::Write as _;

use anyhow::{Error, Result};
use chrono::{Local, SecondsFormat};
use env_logger::{Builder, Env, WriteStyle};
use log::{error, LevelFilter};
use rayon::ThreadPoolBuilder;

const LOG_ENV: &str = "STATE_REGEN_LOG";
const LOG_STYLE_ENV: &str = "STATE_REGEN_LOG_STYLE";

const LIBRARY_CRATES: &[&str] = &[
    "binary_utils",
    "deposit_tree",
    "epoch_context",
    "genesis",
    "helper_functions",
    "interop",
    "state_cache",
    "transition_functions",
];

/// Logs messages from this workspace at `info` and everything else not at all.
///
/// Directives in `STATE_REGEN_LOG` are applied on top of the defaults.
pub fn initialize_logger(module_path: &str, always_write_style: bool) -> Result<()> {
    let mut builder = Builder::new();

    builder.filter_level(LevelFilter::Off);

    for crate_name in LIBRARY_CRATES.iter().copied().chain([module_path]) {
        builder.filter_module(crate_name, LevelFilter::Info);
    }

    builder.format(|formatter, record| {
        writeln!(
            formatter,
            "[{}] {:>5} {}: {}",
            Local::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            record.level(),
            record.target(),
            record.args(),
        )
    });

    if always_write_style {
        builder.write_style(WriteStyle::Always);
    }

    builder.parse_env(Env::new().filter(LOG_ENV).write_style(LOG_STYLE_ENV));
    builder.try_init()?;

    Ok(())
}

pub fn initialize_rayon() -> Result<()> {
    ThreadPoolBuilder::new()
        .thread_name(|index| format!("rayon-{index}"))
        .panic_handler(log_panic)
        .build_global()
        .map_err(Into::into)
}

fn log_panic(payload: Box<dyn Any + Send + 'static>) {
    let thread = std::thread::current();
    // Use the same default as the standard library.
    let name = thread.name().unwrap_or("<unnamed>");
    let error = payload_into_error(payload);
    error!("thread {name} panicked: {error}");
}

fn payload_into_error(payload: Box<dyn Any + Send + 'static>) -> Error {
    let payload = match payload.downcast::<String>() {
        Ok(string) => return Error::msg(*string),
        Err(other) => other,
    };

    if let Ok(string) = payload.downcast::<&str>() {
        return Error::msg(*string);
    }

    Error::msg("panic with payload of unknown type")
}
