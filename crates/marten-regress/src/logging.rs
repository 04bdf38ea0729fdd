//! Logging sink setup.
//!
//! Builds the tracing subscriber from the `[logging]` table: a per-run log
//! file under the configured directory, optionally mirrored to stderr with
//! a configurable prefix. With logging disabled, events go to stderr only,
//! filtered by the CLI verbosity.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::LoggingConfig;
use crate::error::{HarnessError, Result};

/// Stderr writer that prepends a fixed prefix to every complete line.
///
/// Buffers until the event's writer is dropped, then emits line by line so
/// the prefix survives multi-line log entries.
struct PrefixedStderr {
    prefix: String,
    buf: Vec<u8>,
}

impl PrefixedStderr {
    fn new(prefix: String) -> Self {
        Self {
            prefix,
            buf: Vec::new(),
        }
    }
}

impl Write for PrefixedStderr {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for PrefixedStderr {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buf);
        let mut stderr = std::io::stderr().lock();
        for line in text.lines() {
            let _ = writeln!(stderr, "{}{}", self.prefix, line);
        }
    }
}

fn default_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Timestamped log file path for this run
fn log_file_path(config: &LoggingConfig) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    config
        .dir
        .join(format!("regress-{stamp}.{}", config.file_extension))
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber. Called once, from the binary.
pub fn init(config: &LoggingConfig, verbosity: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbosity)));
    let compact = config.format == "compact";

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.enabled {
        std::fs::create_dir_all(&config.dir).map_err(|e| HarnessError::LogFile {
            path: config.dir.clone(),
            source: e,
        })?;
        let path = log_file_path(config);
        let file = std::fs::File::create(&path)
            .map_err(|e| HarnessError::LogFile { path, source: e })?;
        let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
        layers.push(if compact {
            layer.compact().boxed()
        } else {
            layer.boxed()
        });
    }

    if !config.enabled || config.mirror_to_stderr {
        let prefix = config.stderr_prefix.clone();
        let layer = fmt::layer()
            .with_ansi(false)
            .with_writer(move || PrefixedStderr::new(prefix.clone()));
        layers.push(if compact {
            layer.compact().boxed()
        } else {
            layer.boxed()
        });
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .init();

    Ok(())
}
