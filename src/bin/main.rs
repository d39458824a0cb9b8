//! catalog-ns1 binary entry point.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use catalog_ns1::config::{SyncConfig, TelemetryConfig};
use catalog_ns1::{telemetry, CatalogSync, HttpRegistryClient, Ns1RestClient, SyncError};

/// Sync NS1 records with a service registry catalog.
#[derive(Parser, Debug)]
#[command(name = "catalog-ns1", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync registry services into an NS1 zone.
    SyncCatalog(SyncArgs),
    /// Print the version and exit.
    Version,
}

#[derive(Args, Debug)]
struct SyncArgs {
    /// Prefix prepended to all services written to NS1.
    #[arg(long = "ns1-service-prefix", default_value = "")]
    service_prefix: String,

    /// Interval between fetches from NS1, e.g. "300ms", "10s", "1.5m".
    #[arg(
        long = "ns1-poll-interval",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    poll_interval: Duration,

    /// DNS TTL in seconds for records created in NS1.
    #[arg(long = "ns1-dns-ttl", default_value_t = 60)]
    dns_ttl: u32,

    /// Absolute URL of the NS1 API endpoint.
    #[arg(long = "ns1-endpoint")]
    endpoint: Option<String>,

    /// Name of the NS1 zone to create records in. WARNING: records in this
    /// zone that do not correspond to a registry service will be deleted.
    #[arg(long = "ns1-domain")]
    domain: Option<String>,

    /// API key used when communicating with NS1.
    #[arg(
        long = "ns1-apikey",
        env = "NS1_APIKEY",
        hide_env_values = true,
        default_value = ""
    )]
    api_key: String,

    /// Skip TLS verification when communicating with NS1.
    #[arg(long = "ns1-ignoressl")]
    ignore_ssl: bool,

    /// Base URL of the registry HTTP API.
    #[arg(long = "http-addr", default_value = "http://127.0.0.1:8500")]
    registry_addr: String,

    /// ACL token for the registry.
    #[arg(long = "token")]
    registry_token: Option<String>,

    /// Allow stale reads from registry followers.
    #[arg(long = "stale", default_value_t = true, action = clap::ArgAction::Set)]
    allow_stale: bool,

    /// Do not publish instances whose health checks are critical.
    #[arg(long = "filter-critical")]
    filter_critical: bool,

    /// Log level filter (e.g. "info", "catalog_ns1=debug,warn").
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    /// Prometheus metrics exporter address.
    #[arg(long = "prometheus-addr")]
    prometheus_addr: Option<std::net::SocketAddr>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Version => {
            println!("catalog-ns1 v{}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Command::SyncCatalog(args) => sync_catalog(args).await,
    }
}

async fn sync_catalog(args: SyncArgs) -> ExitCode {
    let telemetry_config = TelemetryConfig {
        log_level: args.log_level.clone(),
        prometheus_addr: args.prometheus_addr,
    };
    if let Err(e) = telemetry::init(&telemetry_config) {
        eprintln!("cannot initialize telemetry: {e}");
        return ExitCode::FAILURE;
    }

    let Some(domain) = args.domain else {
        error!("please provide --ns1-domain");
        return ExitCode::FAILURE;
    };
    let config = SyncConfig {
        domain,
        service_prefix: args.service_prefix,
        poll_interval: args.poll_interval,
        dns_ttl: args.dns_ttl,
        endpoint: args.endpoint,
        api_key: args.api_key,
        ignore_ssl: args.ignore_ssl,
        registry_addr: args.registry_addr,
        registry_token: args.registry_token,
        allow_stale: args.allow_stale,
        filter_critical: args.filter_critical,
    };

    let registry = match HttpRegistryClient::new(&config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "cannot build registry client");
            return ExitCode::FAILURE;
        }
    };
    let dns = match Ns1RestClient::new(&config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "cannot build NS1 client");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                cancel.cancel();
            }
        }
    });

    match CatalogSync::new(config, registry, dns).run(cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(SyncError::ZoneMissing { zone }) => {
            error!(zone = %zone, "zone not found in NS1");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "synchronizer stopped unexpectedly");
            ExitCode::FAILURE
        }
    }
}
