use crate::config::*;

use std::{io::Error as IoError, path::Path};
use tracing::{Level, Metadata, Subscriber};
use tracing_core::LevelFilter;
use tracing_subscriber::{
    filter::{filter_fn, Targets},
    fmt::MakeWriter,
    prelude::*,
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer,
};

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Which events a single log target accepts.
#[derive(Clone, Debug)]
struct TargetFilter {
    level: LevelFilter,
    modules: Vec<String>,
}

impl TargetFilter {
    fn new(entry: &LogEntry) -> Self {
        Self {
            level: entry.level.map_or(LevelFilter::TRACE, Into::into),
            modules: entry.modules.clone(),
        }
    }

    fn allows(&self, level: &Level, module_path: Option<&str>) -> bool {
        if level > &self.level {
            return false;
        }
        match module_path {
            // Events with no module path can't be attributed, so let them through
            None => true,
            Some(_) if self.modules.is_empty() => true,
            Some(module) => self.modules.iter().any(|m| module.starts_with(m.as_str())),
        }
    }

    fn accepts(&self, metadata: &Metadata<'_>) -> bool {
        self.allows(metadata.level(), metadata.module_path())
    }
}

fn fmt_layer<S, W>(writer: W, ansi: bool) -> BoxedLayer<S>
where
    S: Subscriber + Send + Sync,
    for<'span> S: LookupSpan<'span>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .boxed()
}

fn target_layer<S>(entry: &LogEntry, dir: &Path) -> BoxedLayer<S>
where
    S: Subscriber + Send + Sync,
    for<'span> S: LookupSpan<'span>,
{
    let layer = match &entry.target {
        LogTarget::File { filename } => {
            fmt_layer(tracing_appender::rolling::daily(dir, filename), false)
        }
        LogTarget::Builtin(BuiltinLogTarget::Stdout) => fmt_layer(std::io::stdout, true),
        LogTarget::Builtin(BuiltinLogTarget::Stderr) => fmt_layer(std::io::stderr, true),
    };

    let filter = TargetFilter::new(entry);
    layer.with_filter(filter_fn(move |metadata| filter.accepts(metadata))).boxed()
}

/// Build a subscriber for `binary` from `conf`.
///
/// If `conf` names no targets, `binary`'s own events and the engine's go to
/// stderr. File targets are created under `conf.dir`, which must exist.
pub fn build_subscriber(conf: &LoggingConfig, binary: &str) -> impl Subscriber {
    let layers: Vec<_> = conf
        .targets_for(binary)
        .iter()
        .map(|entry| target_layer(entry, &conf.dir))
        .collect();

    let global = Targets::new()
        .with_default(LevelFilter::from(conf.default_level.unwrap_or(LogLevel::Trace)))
        .with_targets(
            conf.module_levels
                .iter()
                .map(|(module, level)| (module.clone(), LevelFilter::from(*level))),
        );

    tracing_subscriber::registry().with(global).with(layers)
}

/// Create the log directory if a file target needs it, then install the
/// subscriber for `binary` as the global default.
pub fn init(conf: &LoggingConfig, binary: &str) -> Result<(), IoError> {
    if conf.has_file_targets() && !conf.dir.is_dir() {
        std::fs::create_dir_all(&conf.dir)?;
    }

    build_subscriber(conf, binary)
        .try_init()
        .map_err(|e| IoError::new(std::io::ErrorKind::Other, e))
}
