//! Tracing setup for the SuperCI binary.
//!
//! Two sinks: the console (stderr, `RUST_LOG` or the CLI level, optionally
//! JSON) and a persistent DEBUG log appended under the log directory, so
//! unattended cron polls leave a full trail behind.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{Level, Subscriber};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

/// File name of the persistent log inside the log directory.
pub const LOG_FILE: &str = "superci.log";

/// HTTP internals stay at INFO even in the debug log.
const FILE_FILTER: &str = "debug,hyper=info,hyper_util=info,reqwest=info,h2=info,rustls=info";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn console_layer(json: bool, level: Level) -> BoxedLayer {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let layer = fmt::layer().with_target(false).with_writer(io::stderr);
    if json {
        layer.json().with_filter(filter).boxed()
    } else {
        layer.with_filter(filter).boxed()
    }
}

fn file_layer(path: &Path) -> io::Result<BoxedLayer> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_filter(EnvFilter::new(FILE_FILTER))
        .boxed())
}

/// Path of the persistent log for a log directory.
pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILE)
}

/// Build the subscriber without installing it.
///
/// `log_dir: None` gives a console-only subscriber.
pub fn subscriber(
    json: bool,
    level: Level,
    log_dir: Option<&Path>,
) -> io::Result<impl Subscriber + Send + Sync + 'static> {
    let mut layers = vec![console_layer(json, level)];
    if let Some(dir) = log_dir {
        layers.push(file_layer(&log_file_path(dir))?);
    }
    Ok(Registry::default().with(layers))
}

/// Install the global subscriber.
///
/// Fails only when the log file cannot be opened. Repeat calls are
/// ignored, since the global subscriber can only be set once per process.
pub fn init_tracing(json: bool, level: Level, log_dir: Option<&Path>) -> io::Result<()> {
    subscriber(json, level, log_dir)?.try_init().ok();
    Ok(())
}
