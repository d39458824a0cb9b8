//! catalog-ns1 - One-way synchronizer projecting a service registry catalog
//! onto an NS1 DNS zone.
//!
//! For every service in the registry catalog, the synchronizer maintains one
//! A record and one SRV record in a single NS1 zone. Each live instance
//! contributes one answer to the A record (its address) and one to the SRV
//! record (`priority weight port address`). DNS is never a source of truth:
//! records in the target zone that do not correspond to a registry service
//! are deleted.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         catalog-ns1                              │
//! │                                                                  │
//! │  ┌────────────────┐ long-poll   ┌───────────────┐                │
//! │  │ RegistryMirror │────────────▶│ desired state │──┐             │
//! │  └────────────────┘             └───────────────┘  │  diff +     │
//! │                                                    ├─ writes ──▶ NS1
//! │  ┌────────────────┐ zone poll   ┌───────────────┐  │             │
//! │  │   DnsMirror    │────────────▶│observed state │──┘             │
//! │  └────────────────┘             └───────────────┘                │
//! │                                  (Reconciler)                    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each mirror signals the reconciler after replacing its snapshot; a
//! reconciliation pass runs only once both sides have signalled since the
//! previous pass, so every pass sees fresh state from both remotes and
//! bursts on one side coalesce.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use catalog_ns1::{CatalogSync, HttpRegistryClient, Ns1RestClient, SyncConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: SyncConfig = load_config();
//!     let registry = Arc::new(HttpRegistryClient::new(&config).unwrap());
//!     let dns = Arc::new(Ns1RestClient::new(&config).unwrap());
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn({
//!         let cancel = cancel.clone();
//!         async move {
//!             tokio::signal::ctrl_c().await.ok();
//!             cancel.cancel();
//!         }
//!     });
//!
//!     CatalogSync::new(config, registry, dns)
//!         .run(cancel)
//!         .await
//!         .unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod ns1;
pub mod reconcile;
pub mod registry;
pub mod state;
pub mod sync;
pub mod telemetry;

// Re-export main types
pub use config::{SyncConfig, TelemetryConfig};
pub use error::SyncError;
pub use ns1::{DnsApi, DnsMirror, Ns1RestClient};
pub use registry::{HttpRegistryClient, RegistryClient, RegistryMirror};
pub use sync::CatalogSync;
