//! NS1 side: REST client and the mirror that polls the target zone.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::metrics::{self, FetchSource};
use crate::registry::MAX_SUBSEQUENT_FAILURES;
use crate::state::{Service, ServiceCache, ServiceMap, SrvAnswer};

/// Public NS1 API endpoint, used when no override is configured.
pub const DEFAULT_ENDPOINT: &str = "https://api.nsone.net/v1";

/// The two record types the synchronizer manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// Address record.
    #[serde(rename = "A")]
    A,
    /// Service-location record.
    #[serde(rename = "SRV")]
    Srv,
}

impl RecordType {
    /// Canonical wire form, `"A"` or `"SRV"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Srv => "SRV",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One answer of a record, as NS1 models it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// Rdata fields: one address for A, four fields for SRV.
    #[serde(rename = "answer")]
    pub rdata: Vec<String>,
}

impl Answer {
    /// An A answer carrying one IPv4 address.
    pub fn a(address: &str) -> Self {
        Self {
            rdata: vec![address.to_string()],
        }
    }

    /// An SRV answer carrying the four-field rdata.
    pub fn srv(answer: &SrvAnswer) -> Self {
        Self {
            rdata: vec![
                answer.priority.to_string(),
                answer.weight.to_string(),
                answer.port.to_string(),
                answer.address.clone(),
            ],
        }
    }
}

/// A full record, as sent to and returned by the records API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Provider-assigned identifier; empty until the record exists.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Zone the record lives in.
    pub zone: String,
    /// Fully qualified domain of the record.
    pub domain: String,
    /// Record type.
    #[serde(rename = "type")]
    pub record_type: RecordType,
    /// TTL in seconds.
    pub ttl: u32,
    /// Record answers.
    #[serde(default)]
    pub answers: Vec<Answer>,
}

impl Record {
    /// A fresh record with provider-default TTL and no answers.
    pub fn new(zone: &str, domain: &str, record_type: RecordType) -> Self {
        Self {
            id: String::new(),
            zone: zone.to_string(),
            domain: domain.to_string(),
            record_type,
            ttl: 3600,
            answers: Vec::new(),
        }
    }
}

/// One record as embedded in a zone listing (short-answer form).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneRecord {
    /// Provider-assigned record identifier.
    pub id: String,
    /// Fully qualified domain of the record.
    pub domain: String,
    /// Record type text; anything but `A` and `SRV` is ignored.
    #[serde(rename = "type")]
    pub record_type: String,
    /// TTL in seconds.
    pub ttl: u32,
    /// Answers in short form.
    pub short_answers: Vec<String>,
}

/// A zone with its records, as returned by the zones API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Zone {
    /// Provider-assigned zone identifier.
    pub id: String,
    /// Zone name.
    #[serde(rename = "zone")]
    pub name: String,
    /// Records contained in the zone.
    pub records: Vec<ZoneRecord>,
}

/// Identity of the resolved target zone.
#[derive(Debug, Clone)]
pub struct ZoneInfo {
    /// Provider-assigned zone identifier.
    pub id: String,
    /// Zone name.
    pub name: String,
}

/// The subset of the NS1 API the synchronizer consumes.
#[async_trait]
pub trait DnsApi: Send + Sync {
    /// Fetch a zone with its records. Returns [`SyncError::ZoneMissing`]
    /// when the zone does not exist.
    async fn get_zone(&self, name: &str) -> Result<Zone, SyncError>;

    /// Fetch one record.
    async fn get_record(
        &self,
        zone: &str,
        domain: &str,
        record_type: RecordType,
    ) -> Result<Record, SyncError>;

    /// Create a record that does not exist yet.
    async fn create_record(&self, record: &Record) -> Result<(), SyncError>;

    /// Update an existing record.
    async fn update_record(&self, record: &Record) -> Result<(), SyncError>;

    /// Delete a record.
    async fn delete_record(
        &self,
        zone: &str,
        domain: &str,
        record_type: RecordType,
    ) -> Result<(), SyncError>;
}

/// reqwest-based implementation of [`DnsApi`] against the NS1 v1 REST API.
pub struct Ns1RestClient {
    http: reqwest::Client,
    endpoint: String,
}

impl Ns1RestClient {
    /// Build a client from configuration. The API key is mandatory.
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        if config.api_key.is_empty() {
            return Err(SyncError::Config(
                "NS1 API key must be provided via the NS1_APIKEY environment variable \
                 or the --ns1-apikey flag"
                    .into(),
            ));
        }
        let mut headers = reqwest::header::HeaderMap::new();
        let mut key = reqwest::header::HeaderValue::from_str(&config.api_key)
            .map_err(|_| SyncError::Config("NS1 API key is not valid in a header".into()))?;
        key.set_sensitive(true);
        headers.insert("X-NSONE-Key", key);

        let http = reqwest::Client::builder()
            .user_agent(concat!("catalog-ns1/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .danger_accept_invalid_certs(config.ignore_ssl)
            .build()?;
        let endpoint = config
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/')
            .to_string();
        Ok(Self { http, endpoint })
    }

    fn record_url(&self, zone: &str, domain: &str, record_type: RecordType) -> String {
        format!("{}/zones/{}/{}/{}", self.endpoint, zone, domain, record_type)
    }
}

#[async_trait]
impl DnsApi for Ns1RestClient {
    async fn get_zone(&self, name: &str) -> Result<Zone, SyncError> {
        let url = format!("{}/zones/{}", self.endpoint, name);
        let resp = self.http.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SyncError::ZoneMissing {
                zone: name.to_string(),
            });
        }
        if !resp.status().is_success() {
            return Err(SyncError::from_response(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn get_record(
        &self,
        zone: &str,
        domain: &str,
        record_type: RecordType,
    ) -> Result<Record, SyncError> {
        let url = self.record_url(zone, domain, record_type);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(SyncError::from_response(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn create_record(&self, record: &Record) -> Result<(), SyncError> {
        let url = self.record_url(&record.zone, &record.domain, record.record_type);
        let resp = self.http.put(&url).json(record).send().await?;
        if !resp.status().is_success() {
            return Err(SyncError::from_response(resp).await);
        }
        Ok(())
    }

    async fn update_record(&self, record: &Record) -> Result<(), SyncError> {
        let url = self.record_url(&record.zone, &record.domain, record.record_type);
        let resp = self.http.post(&url).json(record).send().await?;
        if !resp.status().is_success() {
            return Err(SyncError::from_response(resp).await);
        }
        Ok(())
    }

    async fn delete_record(
        &self,
        zone: &str,
        domain: &str,
        record_type: RecordType,
    ) -> Result<(), SyncError> {
        let url = self.record_url(zone, domain, record_type);
        let resp = self.http.delete(&url).send().await?;
        if !resp.status().is_success() {
            return Err(SyncError::from_response(resp).await);
        }
        Ok(())
    }
}

/// Group a zone's A and SRV records into services.
///
/// The service name is the record's domain with the configured prefix and
/// the `"." + zone` suffix stripped; the apex record maps to the service
/// named exactly like the zone. Unparseable SRV answers are logged and
/// skipped without dropping the record.
pub fn transform_zone_records(zone: &Zone, prefix: &str) -> ServiceMap {
    let mut services = ServiceMap::new();
    let suffix = format!(".{}", zone.name);
    for record in &zone.records {
        let record_type = match record.record_type.as_str() {
            "A" => RecordType::A,
            "SRV" => RecordType::Srv,
            other => {
                debug!(id = %record.id, r#type = other, "ignoring non-service record in zone");
                continue;
            }
        };
        let trimmed = record
            .domain
            .strip_prefix(prefix)
            .unwrap_or(&record.domain);
        let name = trimmed.strip_suffix(&suffix).unwrap_or(trimmed);
        let service = services
            .entry(name.to_string())
            .or_insert_with(|| Service {
                name: name.to_string(),
                ..Default::default()
            });
        match record_type {
            RecordType::A => {
                service.record_ids.a = record.id.clone();
                service.ttls.a = record.ttl;
            }
            RecordType::Srv => {
                service.record_ids.srv = record.id.clone();
                service.ttls.srv = record.ttl;
            }
        }
        for answer in &record.short_answers {
            match record_type {
                RecordType::A => {
                    let fields: Vec<&str> = answer.split_whitespace().collect();
                    let Some(address) = (if fields.len() == 4 {
                        fields.last()
                    } else {
                        fields.first()
                    }) else {
                        continue;
                    };
                    let instance = service.instances.entry(address.to_string()).or_default();
                    instance.a_answer = address.to_string();
                }
                RecordType::Srv => match answer.parse::<SrvAnswer>() {
                    Ok(srv) => {
                        let instance =
                            service.instances.entry(srv.address.clone()).or_default();
                        instance.srv_answers.insert(srv.port, srv);
                    }
                    Err(e) => {
                        error!(
                            domain = %record.domain,
                            answer = %answer,
                            error = %e,
                            "skipping unparseable SRV answer"
                        );
                    }
                },
            }
        }
    }
    services
}

/// Maintains a snapshot of the services currently projected into the zone.
///
/// The zone is resolved once at setup; afterwards a single task re-fetches
/// it at a fixed interval, replacing the snapshot wholesale and offering
/// one token on the refresh channel after each successful fetch.
pub struct DnsMirror {
    client: Arc<dyn DnsApi>,
    zone: ZoneInfo,
    prefix: String,
    poll_interval: Duration,
    cache: ServiceCache,
    refreshes: mpsc::Sender<()>,
}

impl DnsMirror {
    /// Resolve the target zone and create the mirror. A missing zone is
    /// fatal: there is nothing to synchronize into.
    pub async fn setup(
        client: Arc<dyn DnsApi>,
        config: &SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<()>), SyncError> {
        let zone = client.get_zone(&config.domain).await?;
        let zone = ZoneInfo {
            id: zone.id,
            name: zone.name,
        };
        info!(zone = %zone.name, id = %zone.id, "resolved target zone");
        let (refreshes, rx) = mpsc::channel(1);
        Ok((
            Self {
                client,
                zone,
                prefix: config.service_prefix.clone(),
                poll_interval: config.poll_interval,
                cache: ServiceCache::new(),
                refreshes,
            },
            rx,
        ))
    }

    /// Handle to the snapshot cache this mirror publishes into.
    pub fn cache(&self) -> ServiceCache {
        self.cache.clone()
    }

    /// Identity of the resolved target zone.
    pub fn zone(&self) -> &ZoneInfo {
        &self.zone
    }

    /// Poll the zone until cancelled or the failure budget is spent.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), SyncError> {
        let mut failures = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            match self.refresh().await {
                Ok(()) => {
                    failures = 0;
                    metrics::record_fetch(FetchSource::Zone, true);
                    metrics::record_state_count(FetchSource::Zone, self.cache.len());
                    let _ = self.refreshes.try_send(());
                }
                Err(e) => {
                    error!(zone = %self.zone.name, error = %e, "zone fetch failed");
                    metrics::record_fetch(FetchSource::Zone, false);
                    failures += 1;
                    if failures > MAX_SUBSEQUENT_FAILURES {
                        return Err(e);
                    }
                }
            }
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn refresh(&self) -> Result<(), SyncError> {
        debug!(zone = %self.zone.name, "fetching zone");
        let zone = self.client.get_zone(&self.zone.name).await?;
        self.cache
            .replace(transform_zone_records(&zone, &self.prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone_with(records: Vec<ZoneRecord>) -> Zone {
        Zone {
            id: "57d95da659272400013334de".into(),
            name: "test.zone".into(),
            records,
        }
    }

    fn record(domain: &str, id: &str, record_type: &str, answers: &[&str]) -> ZoneRecord {
        ZoneRecord {
            id: id.to_string(),
            domain: domain.to_string(),
            record_type: record_type.to_string(),
            ttl: 60,
            short_answers: answers.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_groups_record_pairs_into_services() {
        let zone = zone_with(vec![
            record("s1.test.zone", "ra", "A", &["1.1.1.1"]),
            record("s1.test.zone", "rs", "SRV", &["1 1 1 1.1.1.1"]),
            record("s2.test.zone", "rx", "SRV", &["1 1 2 2.2.2.2"]),
        ]);
        let services = transform_zone_records(&zone, "");

        assert_eq!(services.len(), 2);
        let s1 = &services["s1"];
        assert_eq!(s1.record_ids.a, "ra");
        assert_eq!(s1.record_ids.srv, "rs");
        assert_eq!(s1.ttls.a, 60);
        assert_eq!(s1.instances["1.1.1.1"].a_answer, "1.1.1.1");
        assert_eq!(s1.instances["1.1.1.1"].srv_answers[&1].address, "1.1.1.1");

        let s2 = &services["s2"];
        assert!(s2.record_ids.a.is_empty());
        assert_eq!(s2.record_ids.srv, "rx");
        assert!(s2.instances["2.2.2.2"].a_answer.is_empty());
    }

    #[test]
    fn test_strips_configured_prefix() {
        let zone = zone_with(vec![record("svc-s9.test.zone", "r1", "A", &["1.1.1.1"])]);
        let services = transform_zone_records(&zone, "svc-");
        assert!(services.contains_key("s9"));
    }

    #[test]
    fn test_apex_record_maps_to_zone_named_service() {
        let zone = zone_with(vec![record("test.zone", "r1", "A", &["1.1.1.1"])]);
        let services = transform_zone_records(&zone, "");
        assert!(services.contains_key("test.zone"));
    }

    #[test]
    fn test_ignores_other_record_types() {
        let zone = zone_with(vec![
            record("test.zone", "r1", "NS", &["dns1.p01.nsone.net"]),
            record("mail.test.zone", "r2", "MX", &["10 mx.test.zone"]),
        ]);
        assert!(transform_zone_records(&zone, "").is_empty());
    }

    #[test]
    fn test_malformed_srv_answer_is_dropped_but_siblings_survive() {
        let zone = zone_with(vec![record(
            "s1.test.zone",
            "rs",
            "SRV",
            &["1 bogus 1 1.1.1.1", "1 1 2 2.2.2.2"],
        )]);
        let services = transform_zone_records(&zone, "");
        let s1 = &services["s1"];
        assert_eq!(s1.record_ids.srv, "rs");
        assert_eq!(s1.instances.len(), 1);
        assert_eq!(s1.instances["2.2.2.2"].srv_answers[&2].port, 2);
    }

    #[test]
    fn test_a_answer_in_srv_shape_takes_last_field() {
        let zone = zone_with(vec![record("s1.test.zone", "ra", "A", &["1 1 1 1.1.1.1"])]);
        let services = transform_zone_records(&zone, "");
        assert_eq!(services["s1"].instances["1.1.1.1"].a_answer, "1.1.1.1");
    }

    #[test]
    fn test_record_type_wire_forms() {
        assert_eq!(RecordType::A.to_string(), "A");
        assert_eq!(RecordType::Srv.to_string(), "SRV");
        assert_eq!(
            serde_json::to_string(&RecordType::Srv).unwrap(),
            "\"SRV\""
        );
    }

    #[test]
    fn test_record_serializes_without_empty_id() {
        let record = Record::new("test.zone", "s1.test.zone", RecordType::A);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["type"], "A");
    }

    #[test]
    fn test_srv_answer_rdata_has_four_fields() {
        let answer = Answer::srv(&SrvAnswer {
            priority: 1,
            weight: 2,
            port: 443,
            address: "1.1.1.1".into(),
        });
        assert_eq!(answer.rdata, vec!["1", "2", "443", "1.1.1.1"]);
    }
}
