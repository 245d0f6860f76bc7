//! One JSONL log line.
//!
//! Every record is self-contained so several engine instances can append to
//! their own files and the files can be merged by timestamp afterwards.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single structured log event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// RFC 3339 timestamp with millisecond precision
    pub ts: String,
    /// trace, debug, info, warn or error
    pub level: String,
    /// Engine instance that produced the record
    pub instance: String,
    /// Module path, e.g. `slotsync_core::connection::manager`
    pub target: String,
    pub msg: String,
    /// Event fields other than the message (`owner_id`, `version`, ...)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
    /// Enclosing spans, root first, joined with " > "
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

impl LogRecord {
    pub fn new(
        at: DateTime<Utc>,
        level: impl Into<String>,
        instance: impl Into<String>,
        target: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            ts: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            level: level.into(),
            instance: instance.into(),
            target: target.into(),
            msg: msg.into(),
            fields: Map::new(),
            span: None,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Serialize to one line without the trailing newline.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Record counts per level and per target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogSummary {
    pub total: usize,
    pub by_level: BTreeMap<String, usize>,
    pub by_target: BTreeMap<String, usize>,
}

impl LogSummary {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a LogRecord>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.total += 1;
            *summary.by_level.entry(record.level.clone()).or_default() += 1;
            *summary.by_target.entry(record.target.clone()).or_default() += 1;
        }
        summary
    }

    pub fn count(&self, level: &str) -> usize {
        self.by_level.get(level).copied().unwrap_or(0)
    }
}
