use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type EventPayload = Map<String, Value>;

/// Append-only JSONL diagnostics for one consultation.
///
/// Each line carries `type`, `session_id` and `ts`; the caller payload is
/// merged last and may override them. A log without a file still returns the
/// assembled event, which keeps callers free of `Option` checks.
#[derive(Debug, Clone)]
pub struct SessionLog {
    session_id: Arc<str>,
    sink: Option<Arc<FileSink>>,
}

#[derive(Debug)]
struct FileSink {
    path: PathBuf,
    // Serialises appends from clones held on other threads.
    write_lock: Mutex<()>,
}

impl SessionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            session_id: fresh_session_id(),
            sink: Some(Arc::new(FileSink {
                path: path.into(),
                write_lock: Mutex::new(()),
            })),
        }
    }

    pub fn disabled() -> Self {
        Self {
            session_id: fresh_session_id(),
            sink: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.sink.as_deref().map(|sink| sink.path.as_path())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let event = self.envelope(event_type, payload);
        if let Some(sink) = self.sink.as_deref() {
            sink.append(&event)?;
        }
        Ok(Value::Object(event))
    }

    fn envelope(&self, event_type: &str, payload: EventPayload) -> EventPayload {
        let mut event = EventPayload::new();
        event.insert("type".into(), event_type.into());
        event.insert("session_id".into(), self.session_id().into());
        event.insert(
            "ts".into(),
            Utc::now()
                .to_rfc3339_opts(SecondsFormat::Micros, false)
                .into(),
        );
        event.extend(payload);
        event
    }
}

impl FileSink {
    fn append(&self, event: &EventPayload) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| format!("failed appending to {}", self.path.display()))
    }
}

fn fresh_session_id() -> Arc<str> {
    Arc::from(Uuid::new_v4().to_string())
}
