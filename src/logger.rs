use std::{fs::OpenOptions, path::Path};

use chrono::Local;
use eyre::WrapErr;
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_PREFIX: &str = "engine";

/// Keeps the non-blocking writers flushing. Logging stops once this is dropped.
pub struct TracingGuards {
    _file: Option<WorkerGuard>,
    _stdout: WorkerGuard,
}

/// Logs to stdout, and to `<log_dir>/engine.YYYY-MM-DD.log` when a directory is given.
///
/// `RUST_LOG` refines the stdout filter; the file always records INFO and above.
pub fn init_tracing(log_dir: Option<&Path>) -> eyre::Result<TracingGuards> {
    let (stdout_writer, stdout_guard) = non_blocking(std::io::stdout());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, file_guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) = daily_file_appender(dir, LOG_PREFIX)?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new("info"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            fmt::layer()
                .with_writer(stdout_writer)
                .with_ansi(true)
                .with_filter(env_filter),
        )
        .try_init()
        .wrap_err("tracing subscriber already installed")?;

    Ok(TracingGuards {
        _file: file_guard,
        _stdout: stdout_guard,
    })
}

fn daily_file_path(dir: &Path, prefix: &str) -> std::path::PathBuf {
    let date = Local::now().format("%Y-%m-%d");
    dir.join(format!("{prefix}.{date}.log"))
}

fn daily_file_appender(dir: &Path, prefix: &str) -> eyre::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)
        .wrap_err_with(|| format!("cannot create log directory {}", dir.display()))?;
    let path = daily_file_path(dir, prefix);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .wrap_err_with(|| format!("cannot open log file {}", path.display()))?;
    Ok(non_blocking(file))
}
