//! Shared sink for user-action events.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::config::HarnessConfig;
use crate::telemetry::jsonl::{ActionEvent, JsonlConfig, JsonlWriter};

#[derive(Debug, Default)]
struct Inner {
    writer: Option<JsonlWriter>,
    events: Vec<ActionEvent>,
}

/// Cloneable handle; every clone appends to the same log.
#[derive(Debug, Clone, Default)]
pub struct ActionRecorder {
    inner: Arc<Mutex<Inner>>,
}

impl ActionRecorder {
    /// Recorder keeping events in memory only.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Recorder that also appends every event to a JSONL file.
    pub fn with_writer(config: JsonlConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                writer: Some(JsonlWriter::open(config)),
                events: Vec::new(),
            })),
        }
    }

    /// Recorder honouring the `telemetry` section.
    pub fn from_config(config: &HarnessConfig) -> Self {
        if config.telemetry.enabled {
            Self::with_writer(JsonlConfig::from_harness(config))
        } else {
            Self::in_memory()
        }
    }

    pub fn record(&self, event: ActionEvent) {
        tracing::debug!(
            action = %event.name,
            ok = event.ok,
            duration_ms = event.duration_ms,
            "[ITH-ACTION] recorded"
        );
        let mut inner = self.inner.lock();
        if let Some(writer) = inner.writer.as_mut() {
            writer.write_record(&event);
        }
        inner.events.push(event);
    }

    /// Copy of every event recorded so far.
    pub fn events(&self) -> Vec<ActionEvent> {
        self.inner.lock().events.clone()
    }

    pub fn flush(&self) {
        if let Some(writer) = self.inner.lock().writer.as_mut() {
            writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_one_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = HarnessConfig::default();
        cfg.paths.telemetry_log = dir.path().join("ua.jsonl");
        let recorder = ActionRecorder::from_config(&cfg);
        let other = recorder.clone();
        recorder.record(ActionEvent::new("a"));
        other.record(ActionEvent::new("b"));
        recorder.flush();

        assert_eq!(recorder.events().len(), 2);
        let raw = std::fs::read_to_string(&cfg.paths.telemetry_log).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn disabled_telemetry_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = HarnessConfig::default();
        cfg.telemetry.enabled = false;
        cfg.paths.telemetry_log = dir.path().join("ua.jsonl");
        let recorder = ActionRecorder::from_config(&cfg);
        recorder.record(ActionEvent::new("a"));
        assert_eq!(recorder.events().len(), 1);
        assert!(!cfg.paths.telemetry_log.exists());
    }
}
