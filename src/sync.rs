//! Supervisor wiring the mirrors and the reconciler together.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::ns1::{DnsApi, DnsMirror};
use crate::reconcile::{Reconciler, ZoneWriter};
use crate::registry::{RegistryClient, RegistryMirror};

/// Outcome of one agent task: `Ok` only for a solicited stop.
type AgentResult = (&'static str, Result<(), SyncError>);

/// The catalog synchronizer: registry mirror, zone mirror and reconciler,
/// coordinated by a supervisor.
pub struct CatalogSync {
    config: SyncConfig,
    registry: Arc<dyn RegistryClient>,
    dns: Arc<dyn DnsApi>,
}

impl CatalogSync {
    /// Create a synchronizer over the given clients.
    pub fn new(
        config: SyncConfig,
        registry: Arc<dyn RegistryClient>,
        dns: Arc<dyn DnsApi>,
    ) -> Self {
        Self {
            config,
            registry,
            dns,
        }
    }

    /// Run until the caller cancels or an agent gives up.
    ///
    /// The target zone is resolved first; failure there (including a
    /// missing zone) refuses to start. Afterwards the three agents run as
    /// separate tasks. An agent returning on its own, cleanly or with an
    /// error, is the failure signal: the remaining agents are told to
    /// stop, awaited, and an error is returned so the process exits
    /// non-zero. Only a caller-initiated cancellation returns `Ok`.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), SyncError> {
        info!(
            domain = %self.config.domain,
            prefix = %self.config.service_prefix,
            poll_interval = ?self.config.poll_interval,
            dns_ttl = self.config.dns_ttl,
            "starting catalog synchronizer"
        );

        let (dns_mirror, dns_refreshes) = DnsMirror::setup(self.dns.clone(), &self.config).await?;
        let (registry_mirror, registry_refreshes) = RegistryMirror::new(
            self.registry.clone(),
            self.config.dns_ttl,
            self.config.filter_critical,
        );

        let writer = ZoneWriter::new(
            self.dns.clone(),
            dns_mirror.zone().clone(),
            &self.config.service_prefix,
            self.config.dns_ttl,
        );
        let reconciler = Reconciler::new(
            writer,
            registry_mirror.cache(),
            dns_mirror.cache(),
            registry_refreshes,
            dns_refreshes,
        );

        let stop = cancel.child_token();
        let mut agents: JoinSet<AgentResult> = JoinSet::new();
        {
            let stop = stop.clone();
            agents.spawn(async move { ("registry-mirror", registry_mirror.run(stop).await) });
        }
        {
            let stop = stop.clone();
            agents.spawn(async move { ("zone-mirror", dns_mirror.run(stop).await) });
        }
        {
            let stop = stop.clone();
            agents.spawn(async move { ("reconciler", reconciler.run(stop).await) });
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("shutdown requested, stopping agents");
                Self::drain(&mut agents).await;
                info!("catalog synchronizer stopped");
                Ok(())
            }
            Some(first) = agents.join_next() => {
                stop.cancel();
                let failure = match first {
                    Ok((name, Ok(()))) => {
                        error!(agent = name, "agent stopped unexpectedly, shutting down");
                        SyncError::AgentStopped(name)
                    }
                    Ok((name, Err(e))) => {
                        error!(agent = name, error = %e, "agent failed, shutting down");
                        e
                    }
                    Err(join_err) => {
                        error!(error = %join_err, "agent task died, shutting down");
                        join_err.into()
                    }
                };
                Self::drain(&mut agents).await;
                Err(failure)
            }
        }
    }

    async fn drain(agents: &mut JoinSet<AgentResult>) {
        while let Some(joined) = agents.join_next().await {
            match joined {
                Ok((name, Ok(()))) => info!(agent = name, "agent stopped"),
                Ok((name, Err(e))) => error!(agent = name, error = %e, "agent failed during shutdown"),
                Err(e) => error!(error = %e, "agent task died during shutdown"),
            }
        }
    }
}
