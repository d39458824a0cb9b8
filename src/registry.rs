//! Registry side: catalog client and the mirror that long-polls it.
//!
//! The client speaks the HashiCorp-style catalog HTTP API: a blocking
//! list-services call with index semantics, plus per-service instance and
//! health-check listings.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::metrics::{self, FetchSource};
use crate::state::{Health, Instance, Service, ServiceCache, ServiceMap, SrvAnswer};

/// Wait bound passed to the blocking list-services call.
pub const WAIT_TIME: Duration = Duration::from_secs(10);

/// Delay before retrying after a failed refresh.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// A mirror gives up once its consecutive-failure count exceeds this.
pub(crate) const MAX_SUBSEQUENT_FAILURES: u32 = 10;

/// One instance of a service as listed by the registry catalog.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogInstance {
    /// Address the service itself registered, preferred when non-empty.
    #[serde(rename = "ServiceAddress")]
    pub service_address: String,
    /// Address of the node hosting the instance.
    #[serde(rename = "Address")]
    pub address: String,
    /// Port the instance answers on.
    #[serde(rename = "ServicePort")]
    pub service_port: u16,
    /// Registry-assigned instance identifier.
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    /// Arbitrary metadata registered with the instance.
    #[serde(rename = "ServiceMeta")]
    pub service_meta: HashMap<String, String>,
}

/// One health check associated with a service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HealthCheck {
    /// Check status text, e.g. `"passing"`.
    #[serde(rename = "Status")]
    pub status: String,
    /// Instance the check belongs to.
    #[serde(rename = "ServiceID")]
    pub service_id: String,
}

/// The subset of the registry API the synchronizer consumes.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Blocking long-poll over the full service list. Returns service names
    /// with their tags and the new index to wait on.
    async fn list_services(
        &self,
        wait_index: u64,
        wait: Duration,
    ) -> Result<(HashMap<String, Vec<String>>, u64), SyncError>;

    /// List the instances registered for one service.
    async fn list_instances(&self, service: &str) -> Result<Vec<CatalogInstance>, SyncError>;

    /// List the health checks associated with one service.
    async fn list_health_checks(&self, service: &str) -> Result<Vec<HealthCheck>, SyncError>;
}

/// HTTP implementation of [`RegistryClient`].
pub struct HttpRegistryClient {
    http: reqwest::Client,
    base: String,
    allow_stale: bool,
}

impl HttpRegistryClient {
    /// Build a client from configuration.
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("catalog-ns1/", env!("CARGO_PKG_VERSION")));
        if let Some(token) = &config.registry_token {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = reqwest::header::HeaderValue::from_str(token)
                .map_err(|_| SyncError::Config("registry token is not valid in a header".into()))?;
            headers.insert("X-Consul-Token", value);
            builder = builder.default_headers(headers);
        }
        Ok(Self {
            http: builder.build()?,
            base: config.registry_addr.trim_end_matches('/').to_string(),
            allow_stale: config.allow_stale,
        })
    }

    fn stale_param(&self) -> &'static [(&'static str, &'static str)] {
        if self.allow_stale {
            &[("stale", "")]
        } else {
            &[]
        }
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn list_services(
        &self,
        wait_index: u64,
        wait: Duration,
    ) -> Result<(HashMap<String, Vec<String>>, u64), SyncError> {
        let url = format!("{}/v1/catalog/services", self.base);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("index", wait_index.to_string()),
                ("wait", format!("{}s", wait.as_secs())),
            ])
            .query(self.stale_param())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SyncError::from_response(resp).await);
        }
        let new_index = resp
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| SyncError::Payload("missing or invalid X-Consul-Index header".into()))?;
        let services = resp.json().await?;
        Ok((services, new_index))
    }

    async fn list_instances(&self, service: &str) -> Result<Vec<CatalogInstance>, SyncError> {
        let url = format!("{}/v1/catalog/service/{}", self.base, service);
        let resp = self
            .http
            .get(&url)
            .query(self.stale_param())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SyncError::from_response(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn list_health_checks(&self, service: &str) -> Result<Vec<HealthCheck>, SyncError> {
        let url = format!("{}/v1/health/checks/{}", self.base, service);
        let resp = self
            .http
            .get(&url)
            .query(self.stale_param())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SyncError::from_response(resp).await);
        }
        Ok(resp.json().await?)
    }
}

/// Turn catalog instances into the projection's instance map.
///
/// The DNS address is `service_address` when non-empty, the node address
/// otherwise. The first occurrence of an address wins the A answer; every
/// (address, port) pair contributes one SRV answer with priority 1 and
/// weight 1. Instances in `excluded` are skipped.
fn transform_instances(
    nodes: &[CatalogInstance],
    excluded: &HashSet<String>,
) -> HashMap<String, Instance> {
    let mut instances: HashMap<String, Instance> = HashMap::new();
    for node in nodes {
        if excluded.contains(&node.service_id) {
            continue;
        }
        let address = if node.service_address.is_empty() {
            &node.address
        } else {
            &node.service_address
        };
        let instance = instances.entry(address.clone()).or_default();
        if instance.a_answer.is_empty() {
            instance.a_answer = address.clone();
        }
        instance
            .srv_answers
            .entry(node.service_port)
            .or_insert_with(|| SrvAnswer {
                priority: 1,
                weight: 1,
                port: node.service_port,
                address: address.clone(),
            });
    }
    instances
}

/// Map check statuses onto instance health, keyed by instance ID.
fn transform_health(checks: &[HealthCheck]) -> HashMap<String, Health> {
    checks
        .iter()
        .map(|check| (check.service_id.clone(), Health::from(check.status.as_str())))
        .collect()
}

/// Maintains a fresh snapshot of all services known to the registry.
///
/// A single task long-polls the catalog; each successful refresh replaces
/// the snapshot wholesale and offers one token on the refresh channel
/// (non-blocking, a pending token is left in place).
pub struct RegistryMirror {
    client: Arc<dyn RegistryClient>,
    cache: ServiceCache,
    refreshes: mpsc::Sender<()>,
    dns_ttl: u32,
    filter_critical: bool,
}

impl RegistryMirror {
    /// Create the mirror and the receiving half of its refresh channel.
    pub fn new(
        client: Arc<dyn RegistryClient>,
        dns_ttl: u32,
        filter_critical: bool,
    ) -> (Self, mpsc::Receiver<()>) {
        let (refreshes, rx) = mpsc::channel(1);
        (
            Self {
                client,
                cache: ServiceCache::new(),
                refreshes,
                dns_ttl,
                filter_critical,
            },
            rx,
        )
    }

    /// Handle to the snapshot cache this mirror publishes into.
    pub fn cache(&self) -> ServiceCache {
        self.cache.clone()
    }

    /// Long-poll the registry until cancelled or the failure budget is spent.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), SyncError> {
        let mut wait_index = 1u64;
        let mut failures = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            debug!(wait_index, "fetching catalog");
            match self.refresh(wait_index).await {
                Ok(new_index) => {
                    failures = 0;
                    wait_index = new_index;
                    metrics::record_fetch(FetchSource::Registry, true);
                    metrics::record_state_count(FetchSource::Registry, self.cache.len());
                    let _ = self.refreshes.try_send(());
                }
                Err(e) => {
                    error!(error = %e, "catalog fetch failed");
                    metrics::record_fetch(FetchSource::Registry, false);
                    failures += 1;
                    if failures > MAX_SUBSEQUENT_FAILURES {
                        return Err(e);
                    }
                    tokio::select! {
                        biased;

                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }
    }

    /// One full catalog fetch: list services, enrich each with instances and
    /// health, then swap the snapshot. Returns the next wait index.
    async fn refresh(&self, wait_index: u64) -> Result<u64, SyncError> {
        let (names, new_index) = self.client.list_services(wait_index, WAIT_TIME).await?;
        debug!(index = new_index, services = names.len(), "catalog listed");

        let mut services: ServiceMap = names
            .keys()
            .map(|name| (name.clone(), Service::named(name)))
            .collect();
        for (name, service) in services.iter_mut() {
            let nodes = match self.client.list_instances(name).await {
                Ok(nodes) => nodes,
                Err(e) => {
                    // The service stays in the snapshot without enrichment.
                    error!(service = %name, error = %e, "instance fetch failed");
                    continue;
                }
            };
            match self.client.list_health_checks(name).await {
                Ok(checks) => service.healths = transform_health(&checks),
                Err(e) => error!(service = %name, error = %e, "health fetch failed"),
            }
            let excluded: HashSet<String> = if self.filter_critical {
                service
                    .healths
                    .iter()
                    .filter(|(_, health)| **health == Health::Critical)
                    .map(|(id, _)| id.clone())
                    .collect()
            } else {
                HashSet::new()
            };
            service.instances = transform_instances(&nodes, &excluded);
            service.ttls.a = self.dns_ttl;
            service.ttls.srv = self.dns_ttl;
        }

        self.cache.replace(services);
        Ok(new_index)
    }
}
