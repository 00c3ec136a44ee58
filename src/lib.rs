//! Access-control enforcement core for the medical-report portal.
//!
//! Every inbound request flows through [`AccessGate::authorize`]: route
//! matching, brute-force gating, session resolution, permission checking,
//! and a synchronous audit trail, failing closed on any ambiguity. The
//! HTTP layer and the relational stores live in the enclosing application;
//! this crate consumes them through the traits in [`store`].

pub mod audit;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod errors;
pub mod guard;
pub mod matcher;
pub mod models;
pub mod resolver;
pub mod store;
pub mod utils;

pub use audit::{
    AuditEvent, AuditEventKind, AuditQuery, SecurityAlert, Severity,
};
pub use config::GateConfig;
pub use engine::{AccessGate, Decision, DenyKind, Outcome};
pub use errors::{GateError, GateResult};
pub use guard::{AttemptOutcome, BackoffPolicy};
pub use matcher::{Method, RouteRule};
pub use models::{Permission, RequireMode};

/// Install the tracing subscriber the way the portal's services do:
/// env-filtered, terse fmt output. Call once at process start; audit and
/// telemetry lines are tagged with their own targets so operators can
/// route them separately.
pub fn init_telemetry() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
