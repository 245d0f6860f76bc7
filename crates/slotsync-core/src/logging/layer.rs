//! `tracing` layer writing to a [`JsonlWriter`], and the builder that
//! installs it next to console output.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use super::entry::LogRecord;
use super::writer::JsonlWriter;
use crate::error::{EngineError, EngineResult};

/// Writes every event it sees as one [`LogRecord`] line
pub struct JsonlLayer {
    writer: Arc<JsonlWriter>,
}

impl JsonlLayer {
    pub fn new(logs_dir: impl AsRef<Path>, instance: impl Into<String>) -> std::io::Result<Self> {
        Ok(Self::from_writer(JsonlWriter::open(logs_dir, instance)?))
    }

    pub fn from_writer(writer: JsonlWriter) -> Self {
        Self {
            writer: Arc::new(writer),
        }
    }

    pub fn log_path(&self) -> &Path {
        self.writer.path()
    }

    pub fn instance(&self) -> &str {
        self.writer.instance()
    }
}

impl<S> Layer<S> for JsonlLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut record = LogRecord::new(
            chrono::Utc::now(),
            metadata.level().as_str().to_lowercase(),
            self.writer.instance(),
            metadata.target(),
            visitor.message.unwrap_or_default(),
        );
        record.fields = visitor.fields;

        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !spans.is_empty() {
                record = record.with_span(spans.join(" > "));
            }
        }

        // A failed write must not take the engine down
        let _ = self.writer.append(&record);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(buf, "{value:?}");
        if field.name() == "message" {
            self.message = Some(buf);
        } else {
            self.insert(field, Value::String(buf));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.insert(field, Value::Number(n));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::String(value.to_string()));
    }
}

/// Filter directive for a `-v` count
pub fn verbosity_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Installs the global subscriber: `EnvFilter`, optional console output and
/// an optional JSONL file.
///
/// `RUST_LOG` takes precedence over the configured default filter.
pub struct LoggingBuilder {
    instance: String,
    logs_dir: Option<PathBuf>,
    console: bool,
    default_filter: String,
}

impl LoggingBuilder {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            logs_dir: None,
            console: true,
            default_filter: "warn".to_string(),
        }
    }

    /// Also write `<logs_dir>/raw/<date>_<instance>.jsonl`
    pub fn logs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = Some(dir.into());
        self
    }

    pub fn no_console(mut self) -> Self {
        self.console = false;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    pub fn verbosity(self, verbosity: u8) -> Self {
        self.with_filter(verbosity_filter(verbosity))
    }

    /// Build the JSONL layer alone, for manual composition.
    pub fn build_layer(&self) -> EngineResult<Option<JsonlLayer>> {
        self.logs_dir
            .as_ref()
            .map(|dir| JsonlLayer::new(dir, self.instance.clone()))
            .transpose()
            .map_err(EngineError::from)
    }

    fn env_filter(&self) -> EngineResult<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.default_filter)
                .map_err(|e| EngineError::Config(format!("log filter {}: {e}", self.default_filter))),
        }
    }

    /// Install as the global default. Returns the JSONL path when a logs
    /// directory was configured.
    pub fn init(self) -> EngineResult<Option<PathBuf>> {
        let jsonl = self.build_layer()?;
        let path = jsonl.as_ref().map(|layer| layer.log_path().to_path_buf());
        let console = self
            .console
            .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

        tracing_subscriber::registry()
            .with(self.env_filter()?)
            .with(console)
            .with(jsonl)
            .try_init()
            .map_err(|e| EngineError::Config(format!("logging already initialized: {e}")))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::writer::read_records;
    use tempfile::TempDir;

    #[test]
    fn test_layer_writes_structured_fields() {
        let temp = TempDir::new().unwrap();
        let layer = JsonlLayer::new(temp.path(), "test").unwrap();
        let log_path = layer.log_path().to_path_buf();

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("Connection online");
            let span = tracing::info_span!("watch");
            let _entered = span.enter();
            tracing::warn!(attempt = 2u32, key = %"availability:t1", "Retrying subscription");
        });

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 2);

        let (records, _) = read_records(temp.path()).unwrap();
        let warn = records.iter().find(|r| r.level == "warn").unwrap();
        assert_eq!(warn.msg, "Retrying subscription");
        assert_eq!(warn.field("attempt"), Some(&Value::from(2u64)));
        assert_eq!(warn.field("key"), Some(&Value::from("availability:t1")));
        assert_eq!(warn.span.as_deref(), Some("watch"));
    }

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(verbosity_filter(0), "warn");
        assert_eq!(verbosity_filter(1), "info");
        assert_eq!(verbosity_filter(2), "debug");
        assert_eq!(verbosity_filter(9), "trace");
    }

    #[test]
    fn test_builder_without_dir_builds_no_layer() {
        assert!(LoggingBuilder::new("x").build_layer().unwrap().is_none());

        let temp = TempDir::new().unwrap();
        let layer = LoggingBuilder::new("x")
            .logs_dir(temp.path())
            .build_layer()
            .unwrap()
            .unwrap();
        assert_eq!(layer.instance(), "x");
    }
}
