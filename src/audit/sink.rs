//! Durable append-only sink for audit events.
//!
//! [`JsonlSink`] writes one JSON line per event, chained with SHA-256
//! digests (`hash = sha256(prev_hash || payload)`) so truncation or
//! in-place edits of the file are detectable. The writer task drains the
//! pipeline's broadcast bus; sink failures are logged under
//! `target: "telemetry"` and never reach a request path, and because the
//! task is detached, a cancelled request cannot cancel the write.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use super::event::AuditEvent;

pub trait AuditSink: Send + Sync {
    fn append(&self, event: &AuditEvent) -> io::Result<()>;
}

struct SinkState {
    file: File,
    prev_hash: Option<String>,
}

pub struct JsonlSink {
    state: Mutex<SinkState>,
}

impl JsonlSink {
    /// Open (or create) the sink file for appending. When the file already
    /// has entries, the chain continues from the last recorded hash.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let prev_hash = last_hash(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            state: Mutex::new(SinkState { file, prev_hash }),
        })
    }
}

impl AuditSink for JsonlSink {
    fn append(&self, event: &AuditEvent) -> io::Result<()> {
        let payload = serde_json::to_string(event)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut hasher = Sha256::new();
        if let Some(prev) = &state.prev_hash {
            hasher.update(prev.as_bytes());
        }
        hasher.update(payload.as_bytes());
        let hash = hex::encode(hasher.finalize());

        let line = serde_json::json!({
            "event": event,
            "prev_hash": state.prev_hash,
            "hash": hash,
        });

        state.file.write_all(line.to_string().as_bytes())?;
        state.file.write_all(b"\n")?;
        state.file.flush()?;
        state.prev_hash = Some(hash);
        Ok(())
    }
}

fn last_hash(path: &Path) -> io::Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let reader = BufReader::new(File::open(path)?);
    let mut last = None;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) {
            if let Some(hash) = value.get("hash").and_then(|h| h.as_str()) {
                last = Some(hash.to_string());
            }
        }
    }
    Ok(last)
}

/// Drain the audit bus into a sink until every sender is gone. Spawned as a
/// detached task by the pipeline.
pub async fn run_sink_writer(
    mut rx: broadcast::Receiver<Arc<AuditEvent>>,
    sink: Arc<dyn AuditSink>,
) {
    tracing::info!(target: "telemetry", "audit sink writer started");
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(err) = sink.append(&event) {
                    tracing::error!(
                        target: "telemetry",
                        error = %err,
                        kind = event.kind.as_str(),
                        "failed to persist audit event"
                    );
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(
                    target: "telemetry",
                    missed,
                    "audit sink writer lagged; durable log is missing events"
                );
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::info!(target: "telemetry", "audit sink writer stopped");
}

/// Verify the hash chain of a sink file. Returns the number of valid
/// entries; any break yields an error naming the offending line.
pub fn verify_chain(path: impl AsRef<Path>) -> io::Result<usize> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut prev_hash: Option<String> = None;
    let mut count = 0usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        let recorded_prev = value.get("prev_hash").and_then(|h| h.as_str());
        if recorded_prev != prev_hash.as_deref() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("hash chain broken at line {}", index + 1),
            ));
        }

        let payload = value
            .get("event")
            .map(|event| event.to_string())
            .unwrap_or_default();
        let mut hasher = Sha256::new();
        if let Some(prev) = &prev_hash {
            hasher.update(prev.as_bytes());
        }
        hasher.update(payload.as_bytes());
        let expected = hex::encode(hasher.finalize());

        let recorded = value.get("hash").and_then(|h| h.as_str()).unwrap_or("");
        if recorded != expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("hash mismatch at line {}", index + 1),
            ));
        }

        prev_hash = Some(expected);
        count += 1;
    }

    Ok(count)
}
