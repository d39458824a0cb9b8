//! Service snapshots and the differencing step of the reconciliation engine.
//!
//! Both mirrors publish `ServiceMap` snapshots through a [`ServiceCache`];
//! the reconciler diffs a desired snapshot (registry side) against an
//! observed one (zone side) with [`upserts`] and [`deletions`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

/// Services keyed by service name.
pub type ServiceMap = HashMap<String, Service>;

/// Health of a single registered instance, as reported by the registry.
///
/// Captured for every instance but currently not gating projection; see
/// [`crate::config::SyncConfig::filter_critical`] for the opt-in gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Health {
    /// All checks for the instance pass.
    Passing,
    /// At least one check is critical.
    Critical,
    /// Anything the registry reports that is neither passing nor critical.
    #[default]
    Unknown,
}

impl From<&str> for Health {
    fn from(status: &str) -> Self {
        match status {
            "passing" => Health::Passing,
            "critical" => Health::Critical,
            _ => Health::Unknown,
        }
    }
}

/// One answer of an SRV record.
///
/// The NS1 short form is `"priority weight port address"`, whitespace
/// separated; `Display` and `FromStr` round-trip that form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvAnswer {
    /// Relative priority of this target (lower is preferred).
    pub priority: u32,
    /// Relative weight among targets of equal priority.
    pub weight: u32,
    /// Port the service answers on.
    pub port: u16,
    /// Target address.
    pub address: String,
}

impl fmt::Display for SrvAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.priority, self.weight, self.port, self.address
        )
    }
}

/// Why an SRV short-form answer could not be parsed.
#[derive(Debug, Error)]
pub enum SrvParseError {
    /// The answer did not split into exactly four fields.
    #[error("expected 4 fields, got {0}")]
    FieldCount(usize),
    /// One of the numeric fields did not parse.
    #[error("invalid {field}: {source}")]
    Field {
        /// Which field failed: `priority`, `weight` or `port`.
        field: &'static str,
        /// The underlying integer parse failure.
        source: std::num::ParseIntError,
    },
}

impl FromStr for SrvAnswer {
    type Err = SrvParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(SrvParseError::FieldCount(fields.len()));
        }
        let int = |field: &'static str, raw: &str| {
            raw.parse::<u32>()
                .map_err(|source| SrvParseError::Field { field, source })
        };
        let port = fields[2]
            .parse::<u16>()
            .map_err(|source| SrvParseError::Field {
                field: "port",
                source,
            })?;
        Ok(SrvAnswer {
            priority: int("priority", fields[0])?,
            weight: int("weight", fields[1])?,
            port,
            address: fields[3].to_string(),
        })
    }
}

/// One address at which a service answers, keyed by that address in
/// [`Service::instances`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instance {
    /// Address published in the A record; empty if this instance does not
    /// contribute an A answer.
    pub a_answer: String,
    /// SRV answers keyed by port. One instance may expose several ports.
    pub srv_answers: HashMap<u16, SrvAnswer>,
}

/// Provider-assigned record identifiers for a service's projection.
///
/// An empty string means the record has not been created yet; any non-empty
/// value was observed from NS1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordIds {
    /// ID of the A record.
    pub a: String,
    /// ID of the SRV record.
    pub srv: String,
}

/// Per-record-type TTLs in seconds. Zero means "unset"; the diff backfills
/// unset TTLs from the observed side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordTtls {
    /// TTL of the A record.
    pub a: u32,
    /// TTL of the SRV record.
    pub srv: u32,
}

/// A named unit projected into DNS: one A record and one SRV record, with
/// one answer per live instance on each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Service {
    /// Service name; also the left-most label of its projected domain.
    pub name: String,
    /// Opaque identifier in the registry (equals `name` in the common case).
    pub registry_id: String,
    /// Instances keyed by address.
    pub instances: HashMap<String, Instance>,
    /// Instance health keyed by the registry-assigned instance ID.
    pub healths: HashMap<String, Health>,
    /// NS1 record identifiers, where known.
    pub record_ids: RecordIds,
    /// Record TTLs, where known.
    pub ttls: RecordTtls,
}

impl Service {
    /// A bare service carrying only its registry identity.
    pub fn named(name: &str) -> Self {
        Service {
            name: name.to_string(),
            registry_id: name.to_string(),
            ..Default::default()
        }
    }
}

/// Thread-safe, swap-on-refresh cache of one side's services.
///
/// The refreshing task replaces the whole map under a short exclusive lock;
/// readers get a cloned value and never observe partial updates. Snapshots
/// are values, so callers may hold them across reconciliation passes.
#[derive(Debug, Clone, Default)]
pub struct ServiceCache {
    inner: Arc<RwLock<ServiceMap>>,
}

impl ServiceCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of the current snapshot.
    pub fn snapshot(&self) -> ServiceMap {
        self.inner.read().clone()
    }

    /// Replace the snapshot wholesale.
    pub fn replace(&self, services: ServiceMap) {
        *self.inner.write() = services;
    }

    /// Number of services currently cached.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when no services are cached.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Services that must be written to the zone.
///
/// A key contributes when it is desired but not observed, or when it is on
/// both sides with a differing instance set or TTL pair. The returned
/// payload carries the desired instances and merges identifiers from both
/// sides: empty record IDs, zero TTLs, and empty name/registry ID in the
/// desired service are backfilled from the observed one, since NS1 updates
/// need the record ID that only the zone side knows.
pub fn upserts(desired: &ServiceMap, observed: &ServiceMap) -> ServiceMap {
    let mut result = ServiceMap::new();
    for (key, want) in desired {
        let Some(have) = observed.get(key) else {
            result.insert(key.clone(), want.clone());
            continue;
        };
        if want.instances == have.instances && want.ttls == have.ttls {
            continue;
        }
        let mut merged = want.clone();
        if merged.name.is_empty() {
            merged.name = have.name.clone();
        }
        if merged.registry_id.is_empty() {
            merged.registry_id = have.registry_id.clone();
        }
        if merged.record_ids.a.is_empty() {
            merged.record_ids.a = have.record_ids.a.clone();
        }
        if merged.record_ids.srv.is_empty() {
            merged.record_ids.srv = have.record_ids.srv.clone();
        }
        if merged.ttls.a == 0 {
            merged.ttls.a = have.ttls.a;
        }
        if merged.ttls.srv == 0 {
            merged.ttls.srv = have.ttls.srv;
        }
        result.insert(key.clone(), merged);
    }
    result
}

/// Services that must be removed from the zone: observed but no longer
/// desired. Instance differences alone never produce a deletion.
pub fn deletions(observed: &ServiceMap, desired: &ServiceMap) -> ServiceMap {
    observed
        .iter()
        .filter(|(key, _)| !desired.contains_key(*key))
        .map(|(key, service)| (key.clone(), service.clone()))
        .collect()
}
