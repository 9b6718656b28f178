use std::{fs::OpenOptions, io, path::PathBuf, sync::Once};

use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_subscriber::{
    filter::LevelFilter, fmt::MakeWriter, layer::SubscriberExt, registry::LookupSpan, EnvFilter,
    Layer,
};

use crate::KestrelConfig;

/// `[logging]` section.
///
/// Events go to stderr and/or an append-only file, each sink formatted as
/// plain text or one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// A bare level (`warning` is accepted for `warn`) or any `EnvFilter`
    /// directive list such as `info,kestrel.debug=trace`.
    pub level: String,
    pub json: bool,
    pub stderr: bool,
    /// A file that cannot be opened is skipped with a warning; stderr keeps
    /// working.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
            stderr: true,
            file: None,
        }
    }
}

impl LoggingConfig {
    /// The configured level as filter directives.
    pub fn directives(&self) -> String {
        let level = self.level.trim();
        match level.to_ascii_lowercase().as_str() {
            "" => "info".to_owned(),
            "warning" => "warn".to_owned(),
            lower @ ("trace" | "debug" | "info" | "warn" | "error" | "off") => lower.to_owned(),
            _ => level.to_owned(),
        }
    }

    /// Filter built from the configured level, with `RUST_LOG` layered on
    /// top when set.
    pub fn env_filter(&self) -> EnvFilter {
        let rust_log = std::env::var("RUST_LOG").ok();
        build_filter(&self.directives(), rust_log.as_deref())
    }
}

/// Later directives win, so `RUST_LOG` overrides the config for the targets
/// it names. Whichever half fails to parse is dropped.
fn build_filter(configured: &str, rust_log: Option<&str>) -> EnvFilter {
    let rust_log = rust_log.map(str::trim).filter(|s| !s.is_empty());
    let candidates = match rust_log {
        Some(env) => vec![format!("{configured},{env}"), env.to_owned(), configured.to_owned()],
        None => vec![configured.to_owned()],
    };
    candidates
        .iter()
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::default().add_directive(LevelFilter::INFO.into()))
}

fn sink<S, W>(json: bool, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer);
    if json {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

static INSTALL: Once = Once::new();

pub fn init_tracing_with_config(config: &KestrelConfig) -> bool {
    init_tracing(&config.logging)
}

/// Installs the global subscriber described by `logging`.
///
/// Only the first call in a process does anything; it returns `true` if the
/// subscriber was installed.
pub fn init_tracing(logging: &LoggingConfig) -> bool {
    let mut installed = false;
    INSTALL.call_once(|| {
        let opened = logging.file.as_ref().map(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| (path, err))
        });
        let (file, open_error) = match opened {
            Some(Ok(file)) => (Some(file), None),
            Some(Err(failure)) => (None, Some(failure)),
            None => (None, None),
        };

        let subscriber = tracing_subscriber::registry()
            .with(logging.env_filter())
            .with(logging.stderr.then(|| sink(logging.json, io::stderr)))
            .with(file.map(|file| sink(logging.json, file)));
        installed = tracing::subscriber::set_global_default(subscriber).is_ok();

        if let (true, Some((path, err))) = (installed, open_error) {
            tracing::warn!(
                target: "kestrel.config",
                path = %path.display(),
                error = %err,
                "cannot open log file; logging to the remaining sinks"
            );
        }
    });
    installed
}
