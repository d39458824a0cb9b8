//! Error types for catalog-ns1.

use thiserror::Error;

/// Errors that can occur while synchronizing the catalog.
#[derive(Debug, Error)]
pub enum SyncError {
    /// IO error (network, signal handling, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error from either remote API
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The target zone does not exist in NS1
    #[error("zone {zone} does not exist in NS1")]
    ZoneMissing {
        /// Name of the zone that was requested.
        zone: String,
    },

    /// A remote API answered with an unexpected status
    #[error("unexpected status {status} from {url}: {body}")]
    Api {
        /// HTTP status returned by the remote.
        status: reqwest::StatusCode,
        /// URL of the failed request.
        url: String,
        /// Response body, truncated by the caller.
        body: String,
    },

    /// A remote API answered with a body we could not interpret
    #[error("malformed API payload: {0}")]
    Payload(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A mirror dropped its refresh channel while the reconciler was still running
    #[error("{0} refresh channel closed")]
    RefreshChannelClosed(&'static str),

    /// An agent task returned without being asked to stop
    #[error("agent {0} stopped unexpectedly")]
    AgentStopped(&'static str),

    /// An agent task panicked or was aborted
    #[error("agent task died: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// Turn a non-success HTTP response into an [`SyncError::Api`],
    /// consuming the body (truncated to keep log lines bounded).
    pub(crate) async fn from_response(resp: reqwest::Response) -> SyncError {
        let status = resp.status();
        let url = resp.url().to_string();
        let body: String = resp
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(256)
            .collect();
        SyncError::Api { status, url, body }
    }
}
