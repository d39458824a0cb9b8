//! Metrics instrumentation for catalog-ns1.
//!
//! All metrics are prefixed with `catalog_ns1.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Which remote a mirror fetches from.
#[derive(Debug, Clone, Copy)]
pub enum FetchSource {
    /// The service registry catalog.
    Registry,
    /// The NS1 zone.
    Zone,
}

impl FetchSource {
    fn as_str(&self) -> &'static str {
        match self {
            FetchSource::Registry => "registry",
            FetchSource::Zone => "zone",
        }
    }
}

/// Record one mirror refresh attempt.
pub fn record_fetch(source: FetchSource, success: bool) {
    let result = if success { "success" } else { "error" };
    counter!("catalog_ns1.fetch.count", "source" => source.as_str(), "result" => result)
        .increment(1);
}

/// Record the size of a mirror's snapshot after a successful refresh.
pub fn record_state_count(source: FetchSource, services: usize) {
    gauge!("catalog_ns1.state.services.count", "source" => source.as_str())
        .set(services as f64);
}

/// Kinds of record writes issued against NS1.
#[derive(Debug, Clone, Copy)]
pub enum WriteOp {
    /// A record was created.
    Create,
    /// An existing record was updated.
    Update,
    /// A record was deleted.
    Delete,
}

impl WriteOp {
    fn as_str(&self) -> &'static str {
        match self {
            WriteOp::Create => "create",
            WriteOp::Update => "update",
            WriteOp::Delete => "delete",
        }
    }
}

/// Record one record write against NS1.
pub fn record_write(op: WriteOp, success: bool) {
    let result = if success { "success" } else { "error" };
    counter!("catalog_ns1.record.write.count", "op" => op.as_str(), "result" => result)
        .increment(1);
}

/// Record a completed reconciliation pass.
pub fn record_reconcile_pass(upserted: u64, deleted: u64, duration: std::time::Duration) {
    counter!("catalog_ns1.reconcile.pass.count").increment(1);
    counter!("catalog_ns1.reconcile.upserted.count").increment(upserted);
    counter!("catalog_ns1.reconcile.deleted.count").increment(deleted);
    histogram!("catalog_ns1.reconcile.duration.seconds").record(duration.as_secs_f64());
}

/// Wall-clock timer for measuring a reconciliation pass.
pub struct Timer {
    started_at: Instant,
}

impl Timer {
    /// Begin timing now.
    pub fn start() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    /// How long the timed operation has been running.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}
