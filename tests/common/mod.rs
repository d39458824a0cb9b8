//! Shared test infrastructure: in-process fakes of the registry and NS1
//! clients, plus service builders.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use catalog_ns1::config::SyncConfig;
use catalog_ns1::error::SyncError;
use catalog_ns1::ns1::{Answer, DnsApi, Record, RecordType, Zone, ZoneInfo, ZoneRecord};
use catalog_ns1::reconcile::ZoneWriter;
use catalog_ns1::registry::{CatalogInstance, HealthCheck, RegistryClient};
use catalog_ns1::state::{RecordIds, RecordTtls, Service, ServiceMap, SrvAnswer};

// --- Constants ---

pub const ZONE_NAME: &str = "example.com";
pub const ZONE_ID: &str = "z-example";

// --- FakeRegistry ---

/// In-process registry fake.
///
/// `list_services` answers immediately on the initial index and emulates
/// the long-poll by sleeping for the wait bound afterwards; the index
/// advances on every call. Whole-call and per-service failures can be
/// scripted.
#[derive(Default)]
pub struct FakeRegistry {
    services: Mutex<HashMap<String, Vec<String>>>,
    instances: Mutex<HashMap<String, Vec<CatalogInstance>>>,
    checks: Mutex<HashMap<String, Vec<HealthCheck>>>,
    fail_services: AtomicBool,
    fail_instances: Mutex<HashSet<String>>,
}

impl FakeRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a service with one instance per `(address, port)` pair.
    pub fn add_service(&self, name: &str, addresses: &[(&str, u16)]) {
        self.services
            .lock()
            .unwrap()
            .insert(name.to_string(), Vec::new());
        let nodes = addresses
            .iter()
            .map(|(address, port)| CatalogInstance {
                service_address: address.to_string(),
                service_port: *port,
                service_id: format!("{name}-{address}"),
                ..Default::default()
            })
            .collect();
        self.instances.lock().unwrap().insert(name.to_string(), nodes);
    }

    pub fn remove_service(&self, name: &str) {
        self.services.lock().unwrap().remove(name);
        self.instances.lock().unwrap().remove(name);
        self.checks.lock().unwrap().remove(name);
    }

    pub fn set_checks(&self, name: &str, checks: Vec<HealthCheck>) {
        self.checks.lock().unwrap().insert(name.to_string(), checks);
    }

    /// Every subsequent `list_services` call fails.
    pub fn fail_everything(&self) {
        self.fail_services.store(true, Ordering::SeqCst);
    }

    /// Instance listings for `name` fail; the service itself stays listed.
    pub fn fail_instances_for(&self, name: &str) {
        self.fail_instances.lock().unwrap().insert(name.to_string());
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn list_services(
        &self,
        wait_index: u64,
        wait: Duration,
    ) -> Result<(HashMap<String, Vec<String>>, u64), SyncError> {
        if self.fail_services.load(Ordering::SeqCst) {
            return Err(SyncError::Payload("registry unavailable".into()));
        }
        if wait_index > 1 {
            tokio::time::sleep(wait).await;
        }
        let services = self.services.lock().unwrap().clone();
        Ok((services, wait_index + 1))
    }

    async fn list_instances(&self, service: &str) -> Result<Vec<CatalogInstance>, SyncError> {
        if self.fail_instances.lock().unwrap().contains(service) {
            return Err(SyncError::Payload(format!("no instances for {service}")));
        }
        Ok(self
            .instances
            .lock()
            .unwrap()
            .get(service)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_health_checks(&self, service: &str) -> Result<Vec<HealthCheck>, SyncError> {
        Ok(self
            .checks
            .lock()
            .unwrap()
            .get(service)
            .cloned()
            .unwrap_or_default())
    }
}

// --- FakeDns ---

/// In-process NS1 fake serving a single zone.
///
/// Writes are logged for assertions and also applied to the zone's record
/// list, so a subsequent `get_zone` observes what was written.
#[derive(Default)]
pub struct FakeDns {
    missing: AtomicBool,
    next_id: AtomicU32,
    pub records: Mutex<Vec<ZoneRecord>>,
    pub created: Mutex<Vec<Record>>,
    pub updated: Mutex<Vec<Record>>,
    pub deleted: Mutex<Vec<(String, RecordType)>>,
    fail_domains: Mutex<HashSet<String>>,
}

impl FakeDns {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A fake whose zone does not exist.
    pub fn missing_zone() -> Arc<Self> {
        let fake = Self::default();
        fake.missing.store(true, Ordering::SeqCst);
        Arc::new(fake)
    }

    /// Seed the zone with an existing record.
    pub fn seed_record(
        &self,
        domain: &str,
        id: &str,
        record_type: RecordType,
        ttl: u32,
        answers: &[&str],
    ) {
        self.records.lock().unwrap().push(ZoneRecord {
            id: id.to_string(),
            domain: domain.to_string(),
            record_type: record_type.as_str().to_string(),
            ttl,
            short_answers: answers.iter().map(|a| a.to_string()).collect(),
        });
    }

    /// Every write touching `domain` fails.
    pub fn fail_domain(&self, domain: &str) {
        self.fail_domains.lock().unwrap().insert(domain.to_string());
    }

    fn check_writable(&self, domain: &str) -> Result<(), SyncError> {
        if self.fail_domains.lock().unwrap().contains(domain) {
            return Err(SyncError::Payload(format!("write to {domain} refused")));
        }
        Ok(())
    }

    pub fn created_domains(&self) -> Vec<(String, RecordType)> {
        let mut domains: Vec<_> = self
            .created
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.domain.clone(), r.record_type))
            .collect();
        domains.sort();
        domains
    }

    pub fn deleted_domains(&self) -> Vec<(String, RecordType)> {
        let mut domains = self.deleted.lock().unwrap().clone();
        domains.sort();
        domains
    }
}

#[async_trait]
impl DnsApi for FakeDns {
    async fn get_zone(&self, name: &str) -> Result<Zone, SyncError> {
        if self.missing.load(Ordering::SeqCst) {
            return Err(SyncError::ZoneMissing {
                zone: name.to_string(),
            });
        }
        Ok(Zone {
            id: ZONE_ID.to_string(),
            name: ZONE_NAME.to_string(),
            records: self.records.lock().unwrap().clone(),
        })
    }

    async fn get_record(
        &self,
        _zone: &str,
        domain: &str,
        record_type: RecordType,
    ) -> Result<Record, SyncError> {
        let records = self.records.lock().unwrap();
        records
            .iter()
            .find(|r| r.domain == domain && r.record_type == record_type.as_str())
            .map(|r| Record {
                id: r.id.clone(),
                zone: ZONE_NAME.to_string(),
                domain: r.domain.clone(),
                record_type,
                ttl: r.ttl,
                answers: r
                    .short_answers
                    .iter()
                    .map(|a| Answer {
                        rdata: a.split_whitespace().map(String::from).collect(),
                    })
                    .collect(),
            })
            .ok_or_else(|| SyncError::Payload(format!("no {record_type} record at {domain}")))
    }

    async fn create_record(&self, record: &Record) -> Result<(), SyncError> {
        self.check_writable(&record.domain)?;
        self.created.lock().unwrap().push(record.clone());
        let id = format!("gen-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.records.lock().unwrap().push(ZoneRecord {
            id,
            domain: record.domain.clone(),
            record_type: record.record_type.as_str().to_string(),
            ttl: record.ttl,
            short_answers: record.answers.iter().map(|a| a.rdata.join(" ")).collect(),
        });
        Ok(())
    }

    async fn update_record(&self, record: &Record) -> Result<(), SyncError> {
        self.check_writable(&record.domain)?;
        self.updated.lock().unwrap().push(record.clone());
        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records
            .iter_mut()
            .find(|r| r.domain == record.domain && r.record_type == record.record_type.as_str())
        {
            existing.ttl = record.ttl;
            existing.short_answers = record.answers.iter().map(|a| a.rdata.join(" ")).collect();
        }
        Ok(())
    }

    async fn delete_record(
        &self,
        _zone: &str,
        domain: &str,
        record_type: RecordType,
    ) -> Result<(), SyncError> {
        self.check_writable(domain)?;
        self.deleted
            .lock()
            .unwrap()
            .push((domain.to_string(), record_type));
        self.records
            .lock()
            .unwrap()
            .retain(|r| !(r.domain == domain && r.record_type == record_type.as_str()));
        Ok(())
    }
}

// --- Builders ---

pub struct ServiceBuilder {
    service: Service,
}

/// Start building a service with the given name.
pub fn service(name: &str) -> ServiceBuilder {
    ServiceBuilder {
        service: Service::named(name),
    }
}

impl ServiceBuilder {
    pub fn ttls(mut self, a: u32, srv: u32) -> Self {
        self.service.ttls = RecordTtls { a, srv };
        self
    }

    pub fn record_ids(mut self, a: &str, srv: &str) -> Self {
        self.service.record_ids = RecordIds {
            a: a.to_string(),
            srv: srv.to_string(),
        };
        self
    }

    /// Add an instance answering on each given port.
    pub fn instance(mut self, address: &str, ports: &[u16]) -> Self {
        let instance = self
            .service
            .instances
            .entry(address.to_string())
            .or_default();
        instance.a_answer = address.to_string();
        for &port in ports {
            instance.srv_answers.insert(
                port,
                SrvAnswer {
                    priority: 1,
                    weight: 1,
                    port,
                    address: address.to_string(),
                },
            );
        }
        self
    }

    pub fn build(self) -> Service {
        self.service
    }
}

/// Key services by name.
pub fn service_map<I: IntoIterator<Item = Service>>(services: I) -> ServiceMap {
    services.into_iter().map(|s| (s.name.clone(), s)).collect()
}

/// A writer against the fake's zone.
pub fn test_writer(dns: Arc<FakeDns>, prefix: &str) -> ZoneWriter {
    ZoneWriter::new(
        dns,
        ZoneInfo {
            id: ZONE_ID.to_string(),
            name: ZONE_NAME.to_string(),
        },
        prefix,
        60,
    )
}

/// Configuration pointing at the fakes' zone.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        domain: ZONE_NAME.to_string(),
        service_prefix: String::new(),
        poll_interval: Duration::from_secs(30),
        dns_ttl: 60,
        endpoint: None,
        api_key: "test-key".to_string(),
        ignore_ssl: false,
        registry_addr: "http://127.0.0.1:8500".to_string(),
        registry_token: None,
        allow_stale: true,
        filter_critical: false,
    }
}
