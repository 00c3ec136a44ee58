//! Append-only in-memory event log with a cursor-based query surface.
//!
//! The log keeps the most recent events in a bounded ring (oldest entries
//! fall off once capacity is reached) and hands out monotonically
//! increasing sequence numbers, so a cursor stays valid across pages even
//! while new events arrive.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::event::{AuditEvent, AuditEventKind, Severity};

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub kinds: Option<Vec<AuditEventKind>>,
    pub identity_id: Option<Uuid>,
    pub min_severity: Option<Severity>,
    /// Resume point from a previous page's `next_cursor`.
    pub cursor: Option<u64>,
    /// Page size; zero falls back to the default.
    pub limit: usize,
}

impl AuditQuery {
    const DEFAULT_LIMIT: usize = 100;

    fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            Self::DEFAULT_LIMIT
        } else {
            self.limit
        }
    }

    fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(from) = self.from {
            if event.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.timestamp >= to {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(identity_id) = self.identity_id {
            if event.identity_id != Some(identity_id) {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct AuditPage {
    pub events: Vec<Arc<AuditEvent>>,
    /// Present when the page filled up; feed it back as the next cursor.
    pub next_cursor: Option<u64>,
}

/// Per-identity event breakdown over a time range.
#[derive(Debug, Clone, Serialize)]
pub struct ActivitySummary {
    pub identity_id: Uuid,
    pub total: u64,
    pub by_kind: BTreeMap<&'static str, u64>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

struct LogInner {
    events: VecDeque<Arc<AuditEvent>>,
    /// Sequence number of the next appended event; the front of the ring
    /// holds seq `next_seq - events.len()`.
    next_seq: u64,
}

pub struct EventLog {
    inner: RwLock<LogInner>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(LogInner {
                events: VecDeque::new(),
                next_seq: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Append an event and return its sequence number.
    pub fn append(&self, event: Arc<AuditEvent>) -> u64 {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.events.len() == self.capacity {
            inner.events.pop_front();
        }
        let seq = inner.next_seq;
        inner.events.push_back(event);
        inner.next_seq += 1;
        seq
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events matching the filters, in emission order, one page at a time.
    pub fn query(&self, query: &AuditQuery) -> AuditPage {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let base = inner.next_seq - inner.events.len() as u64;
        let limit = query.effective_limit();

        let start = query.cursor.unwrap_or(0).max(base);
        let mut events = Vec::new();
        let mut next_cursor = None;

        for (offset, event) in inner
            .events
            .iter()
            .enumerate()
            .skip((start - base) as usize)
        {
            let seq = base + offset as u64;
            if !query.matches(event) {
                continue;
            }
            if events.len() == limit {
                next_cursor = Some(seq);
                break;
            }
            events.push(Arc::clone(event));
        }

        AuditPage { events, next_cursor }
    }

    /// Counts by event kind for one identity over a time range.
    pub fn activity_summary(
        &self,
        identity_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> ActivitySummary {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut summary = ActivitySummary {
            identity_id,
            total: 0,
            by_kind: BTreeMap::new(),
            first_seen: None,
            last_seen: None,
        };

        for event in inner.events.iter() {
            if event.identity_id != Some(identity_id) {
                continue;
            }
            if let Some(from) = from {
                if event.timestamp < from {
                    continue;
                }
            }
            if let Some(to) = to {
                if event.timestamp >= to {
                    continue;
                }
            }
            summary.total += 1;
            *summary.by_kind.entry(event.kind.as_str()).or_insert(0) += 1;
            if summary.first_seen.is_none() {
                summary.first_seen = Some(event.timestamp);
            }
            summary.last_seen = Some(event.timestamp);
        }

        summary
    }
}
