//! The differencing-and-apply step between the two mirrors.
//!
//! The [`Reconciler`] waits until both mirrors have refreshed since its
//! last pass, then computes the record upserts and deletions and applies
//! them through a [`ZoneWriter`]. Per-record failures never abort a pass.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::SyncError;
use crate::metrics::{self, WriteOp};
use crate::ns1::{Answer, DnsApi, Record, RecordType, ZoneInfo};
use crate::state::{self, RecordIds, Service, ServiceCache, ServiceMap};

/// Applies record writes for one zone.
///
/// Cheap to clone; per-service work is spawned onto the runtime so writes
/// for different services proceed in parallel.
#[derive(Clone)]
pub struct ZoneWriter {
    dns: Arc<dyn DnsApi>,
    zone: ZoneInfo,
    prefix: String,
    dns_ttl: u32,
}

impl ZoneWriter {
    /// Create a writer for the resolved target zone.
    pub fn new(dns: Arc<dyn DnsApi>, zone: ZoneInfo, prefix: &str, dns_ttl: u32) -> Self {
        Self {
            dns,
            zone,
            prefix: prefix.to_string(),
            dns_ttl,
        }
    }

    /// The DNS name a service is published under:
    /// `prefix + name + "." + zone`. A service named exactly like the zone
    /// projects to the apex, on the upsert and the deletion path alike.
    pub fn projected_domain(&self, name: &str) -> String {
        if name == self.zone.name {
            self.zone.name.clone()
        } else {
            format!("{}{}.{}", self.prefix, name, self.zone.name)
        }
    }

    /// Create or update the A and SRV records for every given service.
    /// Returns the number of records written successfully.
    pub async fn apply_upserts(&self, services: &ServiceMap) -> u64 {
        let mut tasks = JoinSet::new();
        for (key, service) in services {
            let writer = self.clone();
            let key = key.clone();
            let service = service.clone();
            tasks.spawn(async move { writer.upsert_service(&key, &service).await });
        }
        let mut count = 0;
        while let Some(result) = tasks.join_next().await {
            count += result.unwrap_or(0);
        }
        count
    }

    /// Delete the projected records of every given service. Returns the
    /// number of records deleted successfully.
    pub async fn apply_deletions(&self, services: &ServiceMap) -> u64 {
        let mut tasks = JoinSet::new();
        for (key, service) in services {
            let writer = self.clone();
            let key = key.clone();
            let ids = service.record_ids.clone();
            tasks.spawn(async move { writer.remove_service(&key, &ids).await });
        }
        let mut count = 0;
        while let Some(result) = tasks.join_next().await {
            count += result.unwrap_or(0);
        }
        count
    }

    async fn upsert_service(&self, key: &str, service: &Service) -> u64 {
        let domain = self.projected_domain(key);
        let mut a_record = self
            .generate(&service.record_ids.a, &domain, RecordType::A)
            .await;
        let mut srv_record = self
            .generate(&service.record_ids.srv, &domain, RecordType::Srv)
            .await;

        for instance in service.instances.values() {
            if !instance.a_answer.is_empty() {
                a_record.answers.push(Answer::a(&instance.a_answer));
            }
            for answer in instance.srv_answers.values() {
                srv_record.answers.push(Answer::srv(answer));
            }
        }

        let (a_ok, srv_ok) = tokio::join!(
            self.write(&service.record_ids.a, &a_record),
            self.write(&service.record_ids.srv, &srv_record),
        );
        u64::from(a_ok) + u64::from(srv_ok)
    }

    /// The record that will be written: a fresh one when no ID is known,
    /// otherwise the provider's current record with its answers wiped and
    /// the TTL overwritten. A failed fetch falls back to a fresh record so
    /// the write can still be attempted.
    async fn generate(&self, id: &str, domain: &str, record_type: RecordType) -> Record {
        let mut record = if id.is_empty() {
            Record::new(&self.zone.name, domain, record_type)
        } else {
            match self
                .dns
                .get_record(&self.zone.name, domain, record_type)
                .await
            {
                Ok(record) => record,
                Err(e) => {
                    error!(
                        domain,
                        r#type = %record_type,
                        id,
                        error = %e,
                        "cannot fetch record, generating a fresh one"
                    );
                    Record::new(&self.zone.name, domain, record_type)
                }
            }
        };
        record.answers.clear();
        record.ttl = self.dns_ttl;
        record
    }

    async fn write(&self, existing_id: &str, record: &Record) -> bool {
        let (op, result) = if existing_id.is_empty() {
            debug!(domain = %record.domain, r#type = %record.record_type, "creating record");
            (WriteOp::Create, self.dns.create_record(record).await)
        } else {
            debug!(domain = %record.domain, r#type = %record.record_type, "updating record");
            (WriteOp::Update, self.dns.update_record(record).await)
        };
        match result {
            Ok(()) => {
                metrics::record_write(op, true);
                true
            }
            Err(e) => {
                error!(
                    domain = %record.domain,
                    r#type = %record.record_type,
                    error = %e,
                    "cannot create or update record"
                );
                metrics::record_write(op, false);
                false
            }
        }
    }

    async fn remove_service(&self, key: &str, ids: &RecordIds) -> u64 {
        let domain = self.projected_domain(key);
        let delete_a = async {
            if ids.a.is_empty() {
                false
            } else {
                self.delete(&domain, RecordType::A).await
            }
        };
        let delete_srv = async {
            if ids.srv.is_empty() {
                false
            } else {
                self.delete(&domain, RecordType::Srv).await
            }
        };
        let (a_ok, srv_ok) = tokio::join!(delete_a, delete_srv);
        u64::from(a_ok) + u64::from(srv_ok)
    }

    async fn delete(&self, domain: &str, record_type: RecordType) -> bool {
        debug!(zone = %self.zone.name, domain, r#type = %record_type, "removing record");
        match self
            .dns
            .delete_record(&self.zone.name, domain, record_type)
            .await
        {
            Ok(()) => {
                metrics::record_write(WriteOp::Delete, true);
                true
            }
            Err(e) => {
                error!(
                    domain,
                    r#type = %record_type,
                    error = %e,
                    "record could not be deleted"
                );
                metrics::record_write(WriteOp::Delete, false);
                false
            }
        }
    }
}

/// Drives reconciliation passes from the mirrors' refresh signals.
pub struct Reconciler {
    writer: ZoneWriter,
    desired: ServiceCache,
    observed: ServiceCache,
    registry_refreshes: mpsc::Receiver<()>,
    dns_refreshes: mpsc::Receiver<()>,
}

impl Reconciler {
    /// Wire the reconciler to its writer, the two snapshot caches, and the
    /// mirrors' refresh channels.
    pub fn new(
        writer: ZoneWriter,
        desired: ServiceCache,
        observed: ServiceCache,
        registry_refreshes: mpsc::Receiver<()>,
        dns_refreshes: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            writer,
            desired,
            observed,
            registry_refreshes,
            dns_refreshes,
        }
    }

    /// Run passes until cancelled.
    ///
    /// A pass only happens once both sides have signalled a refresh since
    /// the previous pass; tokens arriving while a side is already fresh
    /// coalesce. No pass runs before each mirror has refreshed at least
    /// once.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), SyncError> {
        let mut registry_fresh = false;
        let mut dns_fresh = false;
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Ok(()),
                token = self.registry_refreshes.recv() => match token {
                    Some(()) => registry_fresh = true,
                    None => return Err(SyncError::RefreshChannelClosed("registry")),
                },
                token = self.dns_refreshes.recv() => match token {
                    Some(()) => dns_fresh = true,
                    None => return Err(SyncError::RefreshChannelClosed("zone")),
                },
            }
            if registry_fresh && dns_fresh {
                self.reconcile_once().await;
                registry_fresh = false;
                dns_fresh = false;
            }
        }
    }

    async fn reconcile_once(&self) {
        let timer = metrics::Timer::start();
        let desired = self.desired.snapshot();
        let observed = self.observed.snapshot();
        debug!(
            desired = desired.len(),
            observed = observed.len(),
            "running reconciliation pass"
        );

        let upserts = state::upserts(&desired, &observed);
        let upserted = self.writer.apply_upserts(&upserts).await;

        let removals = state::deletions(&observed, &desired);
        let deleted = self.writer.apply_deletions(&removals).await;

        metrics::record_reconcile_pass(upserted, deleted, timer.elapsed());
        if upserted > 0 || deleted > 0 {
            info!(upserted, deleted, "zone reconciled");
        }
    }
}
