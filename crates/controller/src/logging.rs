//! Log output: always stderr, plus an append-only plain-text file when
//! `system.log_file` is set. `RUST_LOG` overrides the configured level.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::SystemSection;

pub fn init(system: &SystemSection) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&system.log_level))
        .with_context(|| format!("invalid log level: {}", system.log_level))?;

    let file_layer = match &system.log_file {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(path)?)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("failed to install log subscriber")?;
    Ok(())
}

fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn log_file_is_appended_not_truncated() {
        let path = std::env::temp_dir().join(format!("wtr-log-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);

        writeln!(open_log_file(&path).unwrap(), "first").unwrap();
        writeln!(open_log_file(&path).unwrap(), "second").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn unwritable_log_path_is_an_error() {
        let path = std::env::temp_dir().join("wtr-no-such-dir").join("wtr.log");
        assert!(open_log_file(&path).is_err());
    }
}
