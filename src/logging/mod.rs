//! Queued logging pipeline.
//!
//! The installed [`log::Log`] implementation ([`QueueLogger`]) turns every
//! record into an owned [`LogRecord`] and pushes it onto an unbounded
//! channel. A single worker task drains the channel and offers each record
//! to every configured sink in order, so slow sinks (Telegram) never block
//! the code that logs.
//!
//! Sinks are declared in the `logging` section of the config file:
//!
//! ```yaml
//! logging:
//!   sinks:
//!     - kind: console
//!     - kind: file
//!       folder: logs
//!       file: mips-relay.log
//!     - kind: telegram
//!       user_to_tag_on_error: 123456
//!       filters:
//!         - type: attribute
//!           name: tg
//!           allow_value: true
//!           default_value: false
//! ```
//!
//! Records opt into attribute filters through `log` key-values, e.g.
//! `info!(tg = true; "run finished")`.

pub mod cleaner;
pub mod filter;
pub mod sink;

use crate::config::ConfigError;
use crate::telegram::TelegramGateway;
use chrono::{DateTime, Utc};
use filter::FilterConfig;
use log::kv::{Key, Value, VisitSource};
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::Deserialize;
use sink::{ConsoleSink, FileSink, Sink, TelegramSink};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Records from other crates are only let through at this level or above.
const FOREIGN_MAX_LEVEL: Level = Level::Warn;
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Owned copy of a [`log::Record`] that can cross into the worker task.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub module_path: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub attributes: BTreeMap<String, String>,
}

struct CollectAttributes<'a>(&'a mut BTreeMap<String, String>);

impl<'kvs> VisitSource<'kvs> for CollectAttributes<'_> {
    fn visit_pair(&mut self, key: Key<'kvs>, value: Value<'kvs>) -> Result<(), log::kv::Error> {
        self.0.insert(key.as_str().to_string(), value.to_string());
        Ok(())
    }
}

impl LogRecord {
    pub fn new(level: Level, target: &str, message: &str) -> Self {
        Self {
            level,
            target: target.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
            module_path: None,
            file: None,
            line: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn from_record(record: &Record<'_>) -> Self {
        let mut attributes = BTreeMap::new();
        // a failing visit only loses attributes, never the record
        let _ = record
            .key_values()
            .visit(&mut CollectAttributes(&mut attributes));
        Self {
            level: record.level(),
            target: record.target().to_string(),
            message: record.args().to_string(),
            timestamp: Utc::now(),
            module_path: record.module_path().map(str::to_string),
            file: record.file().map(str::to_string),
            line: record.line(),
            attributes,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// One entry of the sink registry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    Console {
        #[serde(default)]
        filters: Vec<FilterConfig>,
    },
    File {
        folder: PathBuf,
        file: String,
        #[serde(default)]
        filters: Vec<FilterConfig>,
    },
    Telegram {
        #[serde(default)]
        user_to_tag_on_error: Option<i64>,
        #[serde(default)]
        filters: Vec<FilterConfig>,
    },
}

impl SinkConfig {
    fn name(&self) -> &'static str {
        match self {
            SinkConfig::Console { .. } => "console",
            SinkConfig::File { .. } => "file",
            SinkConfig::Telegram { .. } => "telegram",
        }
    }

    fn filters(&self) -> &[FilterConfig] {
        match self {
            SinkConfig::Console { filters }
            | SinkConfig::File { filters, .. }
            | SinkConfig::Telegram { filters, .. } => filters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    pub sinks: Vec<SinkConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            sinks: vec![SinkConfig::Console {
                filters: Vec::new(),
            }],
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sinks.is_empty() {
            return Err(ConfigError::Logging("at least one sink is required".into()));
        }
        for sink in &self.sinks {
            if let SinkConfig::File { file, .. } = sink {
                if file.trim().is_empty() || file.contains(['/', '\\']) {
                    return Err(ConfigError::Logging(format!(
                        "file sink needs a plain file name, got {file:?}"
                    )));
                }
            }
        }
        Ok(())
    }
}

struct Route {
    name: &'static str,
    filters: Vec<FilterConfig>,
    sink: Sink,
}

impl Route {
    fn allows(&self, record: &LogRecord) -> bool {
        self.sink.accepts(record) && self.filters.iter().all(|f| f.allows(record))
    }
}

/// Sinks built from a [`LoggingConfig`], in declaration order.
pub struct Pipeline {
    routes: Vec<Route>,
}

impl Pipeline {
    pub fn build(
        cfg: &LoggingConfig,
        level: LevelFilter,
        telegram: Option<Arc<TelegramGateway>>,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let mut routes = Vec::with_capacity(cfg.sinks.len());
        for sink_cfg in &cfg.sinks {
            let sink = match sink_cfg {
                SinkConfig::Console { .. } => Sink::Console(ConsoleSink::new(level)),
                SinkConfig::File { folder, file, .. } => Sink::File(
                    FileSink::open(folder, file).map_err(|source| ConfigError::Io {
                        path: folder.clone(),
                        source,
                    })?,
                ),
                SinkConfig::Telegram {
                    user_to_tag_on_error,
                    ..
                } => {
                    let gateway = telegram.clone().ok_or_else(|| {
                        ConfigError::Logging("telegram sink configured without a gateway".into())
                    })?;
                    Sink::Telegram(TelegramSink::new(gateway, *user_to_tag_on_error))
                }
            };
            routes.push(Route {
                name: sink_cfg.name(),
                filters: sink_cfg.filters().to_vec(),
                sink,
            });
        }
        Ok(Self { routes })
    }

    /// Offers `record` to every sink. A failing sink is reported on stderr
    /// and does not keep the record from the remaining sinks.
    pub async fn dispatch(&mut self, record: &LogRecord) {
        for route in &mut self.routes {
            if !route.allows(record) {
                continue;
            }
            if let Err(e) = route.sink.emit(record).await {
                eprintln!(
                    "{} - log sink {} failed: {}; record: {}",
                    Utc::now().format("%Y-%m-%d %H:%M:%S"),
                    route.name,
                    e,
                    sink::format_line(record)
                );
            }
        }
    }
}

enum Message {
    Record(LogRecord),
    Shutdown(oneshot::Sender<()>),
}

/// [`log::Log`] front end of the pipeline; never blocks the caller.
pub struct QueueLogger {
    tx: mpsc::UnboundedSender<Message>,
    level: LevelFilter,
}

impl Log for QueueLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
            && (metadata.target().starts_with(OWN_TARGET) || metadata.level() <= FOREIGN_MAX_LEVEL)
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // the worker is gone after shutdown; late records are dropped
        let _ = self.tx.send(Message::Record(LogRecord::from_record(record)));
    }

    fn flush(&self) {}
}

/// Owner side of the worker task.
pub struct LoggingHandle {
    tx: mpsc::UnboundedSender<Message>,
    worker: JoinHandle<()>,
}

impl LoggingHandle {
    /// Waits until every record queued before this call has been dispatched,
    /// then stops the worker.
    pub async fn shutdown(self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        let _ = self.worker.await;
    }
}

/// Starts the worker for `pipeline`. Must be called inside a tokio runtime.
pub fn spawn(mut pipeline: Pipeline, level: LevelFilter) -> (QueueLogger, LoggingHandle) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let worker = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                Message::Record(record) => pipeline.dispatch(&record).await,
                Message::Shutdown(done) => {
                    let _ = done.send(());
                    break;
                }
            }
        }
    });
    (
        QueueLogger {
            tx: tx.clone(),
            level,
        },
        LoggingHandle { tx, worker },
    )
}

/// Builds the pipeline from `cfg` and installs it as the global logger.
pub fn install(
    cfg: &LoggingConfig,
    level: LevelFilter,
    telegram: Option<Arc<TelegramGateway>>,
) -> Result<LoggingHandle, ConfigError> {
    let pipeline = Pipeline::build(cfg, level, telegram)?;
    let (logger, handle) = spawn(pipeline, level);
    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| ConfigError::Logging(e.to_string()))?;
    log::set_max_level(level);
    Ok(handle)
}
