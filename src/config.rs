//! Configuration types for catalog-ns1.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Synchronizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Name of the NS1 zone records are created in.
    ///
    /// Any record in this zone that does not correspond to a registry
    /// service will be deleted.
    pub domain: String,

    /// Prefix prepended to every service name written to NS1.
    #[serde(default)]
    pub service_prefix: String,

    /// Interval between zone fetches from NS1.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// TTL in seconds applied to records created or updated in NS1.
    #[serde(default = "default_dns_ttl")]
    pub dns_ttl: u32,

    /// NS1 API endpoint override; `None` uses the public API.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// NS1 API key.
    #[serde(default, skip_serializing)]
    pub api_key: String,

    /// Skip TLS certificate verification when talking to NS1.
    #[serde(default)]
    pub ignore_ssl: bool,

    /// Base URL of the registry HTTP API.
    #[serde(default = "default_registry_addr")]
    pub registry_addr: String,

    /// Registry ACL token, if the registry requires one.
    #[serde(default, skip_serializing)]
    pub registry_token: Option<String>,

    /// Allow stale reads from registry followers.
    #[serde(default = "default_allow_stale")]
    pub allow_stale: bool,

    /// Exclude instances with a critical health check from the projection.
    ///
    /// Off by default: the projection is unconditional and critical
    /// instances still appear as DNS answers.
    #[serde(default)]
    pub filter_critical: bool,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "catalog_ns1=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<std::net::SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_dns_ttl() -> u32 {
    60
}

fn default_registry_addr() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_allow_stale() -> bool {
    true
}
