//! Audit & security telemetry pipeline.
//!
//! `emit` is the single entry point: it appends to the in-memory log,
//! dispatches registered hooks, feeds the security monitor, and publishes
//! on the broadcast bus for the durable sink writer. None of those steps
//! can fail the caller — telemetry trouble is absorbed here and logged at
//! `target: "telemetry"` on a best-effort basis.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::errors::{GateError, GateResult};

pub mod event;
pub mod log;
pub mod monitor;
pub mod sink;

pub use event::{AuditEvent, AuditEventKind, Severity};
pub use log::{ActivitySummary, AuditPage, AuditQuery, EventLog};
pub use monitor::{AlertHook, AlertKind, MonitorConfig, SecurityAlert, SecurityMonitor};
pub use sink::{AuditSink, JsonlSink};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// In-memory log ring size.
    pub capacity: usize,
    /// Broadcast bus depth between `emit` and the sink writer.
    pub channel_capacity: usize,
    /// Durable JSONL sink destination; `None` keeps the log in memory only.
    pub sink_path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            channel_capacity: 1024,
            sink_path: None,
        }
    }
}

/// Per-kind event consumer. An `Err` is logged and the remaining hooks
/// still run.
pub trait AuditHook: Send + Sync {
    fn on_event(&self, event: &AuditEvent) -> anyhow::Result<()>;
}

impl<F> AuditHook for F
where
    F: Fn(&AuditEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &AuditEvent) -> anyhow::Result<()> {
        self(event)
    }
}

pub struct AuditPipeline {
    log: EventLog,
    monitor: SecurityMonitor,
    hooks: RwLock<HashMap<AuditEventKind, Vec<Arc<dyn AuditHook>>>>,
    bus: broadcast::Sender<Arc<AuditEvent>>,
}

impl AuditPipeline {
    /// Build the pipeline and, when a sink path is configured, spawn the
    /// detached writer task. Must run inside a tokio runtime in that case;
    /// an unopenable sink is a startup configuration error, not a runtime
    /// telemetry failure.
    pub fn new(config: AuditConfig, monitor_config: MonitorConfig) -> GateResult<Self> {
        let (bus, _) = broadcast::channel(config.channel_capacity.max(1));

        if let Some(path) = &config.sink_path {
            let sink = JsonlSink::create(path).map_err(|err| {
                GateError::configuration(format!(
                    "cannot open audit sink {}: {err}",
                    path.display()
                ))
            })?;
            tokio::spawn(sink::run_sink_writer(
                bus.subscribe(),
                Arc::new(sink) as Arc<dyn AuditSink>,
            ));
        }

        Ok(Self {
            log: EventLog::new(config.capacity),
            monitor: SecurityMonitor::new(monitor_config),
            hooks: RwLock::new(HashMap::new()),
            bus,
        })
    }

    /// Record one event. Synchronous, infallible from the caller's point
    /// of view, and ordered with respect to other events emitted by the
    /// same request.
    pub fn emit(&self, event: AuditEvent) {
        let event = Arc::new(event);
        let seq = self.log.append(Arc::clone(&event));

        tracing::debug!(
            target: "audit",
            seq,
            kind = event.kind.as_str(),
            severity = event.severity.as_str(),
            success = event.success,
            "audit event"
        );

        self.dispatch_hooks(&event);
        self.monitor.observe(&event);

        // Fire and forget: no subscriber just means no durable sink.
        let _ = self.bus.send(event);
    }

    fn dispatch_hooks(&self, event: &AuditEvent) {
        let hooks = self.hooks.read().unwrap_or_else(|e| e.into_inner());
        let Some(registered) = hooks.get(&event.kind) else {
            return;
        };
        for hook in registered {
            if let Err(err) = hook.on_event(event) {
                tracing::warn!(
                    target: "telemetry",
                    error = %err,
                    kind = event.kind.as_str(),
                    "audit hook failed"
                );
            }
        }
    }

    pub fn register_hook(&self, kind: AuditEventKind, hook: Arc<dyn AuditHook>) {
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(kind)
            .or_default()
            .push(hook);
    }

    pub fn register_alert_hook(&self, hook: Arc<dyn AlertHook>) {
        self.monitor.register_hook(hook);
    }

    /// Independent consumer of the raw event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AuditEvent>> {
        self.bus.subscribe()
    }

    pub fn query(&self, query: &AuditQuery) -> AuditPage {
        self.log.query(query)
    }

    pub fn activity_summary(
        &self,
        identity_id: Uuid,
        from: Option<chrono::DateTime<chrono::Utc>>,
        to: Option<chrono::DateTime<chrono::Utc>>,
    ) -> ActivitySummary {
        self.log.activity_summary(identity_id, from, to)
    }

    pub fn open_alerts(&self) -> Vec<SecurityAlert> {
        self.monitor.open_alerts()
    }

    pub fn event_count(&self) -> usize {
        self.log.len()
    }
}
