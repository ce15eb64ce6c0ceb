//! Optional experiment-tracking sink.
//!
//! The trainer treats tracking as fire-and-forget: a sink receives a one-time
//! parameter dump at run start and scalar metric maps keyed by step, and a
//! sink that cannot write must never take the run down with it. The provided
//! [`JsonlSink`] appends one JSON object per event to a local file; anything
//! heavier (a tracking server, a database) implements the same trait outside
//! this crate.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::MemSegResult;

/// Receiver for run parameters and per-step scalar metrics.
pub trait MetricsSink {
    /// One-time dump of the run configuration at start.
    fn log_params(&self, params: &Value);

    /// Scalar metrics for one step.
    fn log_metrics(&self, metrics: &[(&str, f64)], step: u64);
}

/// Appends tracking events to a JSONL file, one object per line.
pub struct JsonlSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    /// Open (or create) the event file in append mode.
    pub fn new(path: impl AsRef<Path>) -> MemSegResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn append(&self, event: Value) {
        let Ok(mut writer) = self.writer.lock() else {
            warn!("tracking writer poisoned, dropping event");
            return;
        };
        let outcome = serde_json::to_writer(&mut *writer, &event)
            .map_err(std::io::Error::from)
            .and_then(|()| writeln!(writer))
            .and_then(|()| writer.flush());
        if let Err(err) = outcome {
            warn!(error = %err, "failed to write tracking event");
        }
    }
}

impl MetricsSink for JsonlSink {
    fn log_params(&self, params: &Value) {
        self.append(json!({
            "ts": Utc::now().to_rfc3339(),
            "params": params,
        }));
    }

    fn log_metrics(&self, metrics: &[(&str, f64)], step: u64) {
        let mut record = serde_json::Map::new();
        for &(key, value) in metrics {
            record.insert(key.to_string(), Value::from(value));
        }
        self.append(json!({
            "ts": Utc::now().to_rfc3339(),
            "step": step,
            "metrics": record,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_append_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = JsonlSink::new(&path).unwrap();
        sink.log_params(&json!({"num_training_steps": 10}));
        sink.log_metrics(&[("train_loss", 0.5), ("lr", 1e-4)], 3);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let event: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(event["step"], 3);
        assert_eq!(event["metrics"]["train_loss"], 0.5);
    }
}
