//! # Site-to-Site client
//! Peer tracking, ranking and failover for clients pushing data into a
//! remote dataflow cluster over the Site-to-Site protocol.
//!
//! A [PeerTracker] discovers the members of the cluster from a set of seed
//! urls, keeps them ranked by health and load, logs into each peer lazily
//! and retries every operation against the next peer when one fails.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use sitetosite_client::{HttpConnectionOpener, PeerTracker, SiteToSiteClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SiteToSiteClientConfig::new()
//!         .with_peer_update_interval(Duration::from_secs(60))
//!         .with_credentials("device-42", "secret");
//!     let opener = Arc::new(HttpConnectionOpener::new(&config));
//!
//!     let tracker = PeerTracker::connect(
//!         opener,
//!         ["http://nifi-1:8080/nifi", "http://nifi-2:8080/nifi"],
//!         config,
//!     )
//!     .await?;
//!
//!     let port = tracker.get_port_identifier("From Devices").await?;
//!     let transaction = tracker.create_transaction(&port).await?;
//!     println!("Opened {}", transaction.transaction_url());
//!
//!     transaction.close();
//!     tracker.shutdown();
//!     Ok(())
//! }
//! ```

#[macro_use]
extern crate tracing;

mod auth;
mod config;
mod connection;
mod error;
mod keep_alive;
pub mod parser;
mod peer;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
mod tracker;
mod transaction;

pub use auth::{Authenticator, ACCESS_TOKEN_PATH};
pub use config::{
    MemoryPeerStatusStore,
    PeerStatusStore,
    SiteToSiteClientConfig,
    DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_PEER_UPDATE_INTERVAL,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use connection::{read_body, ConnectionOpener, HttpConnectionOpener};
pub use error::{BoxedError, SiteToSiteError};
pub use keep_alive::{KeepAliveHandle, KeepAliveScheduler, KeepAliveTask};
pub use peer::{canonical_peer_url, get_unix_timestamp_ms, Peer, PeerStatus, API_ROOT};
pub use tracker::{PeerTracker, PEERS_PATH, SITE_TO_SITE_PATH};
pub use transaction::{
    Transaction,
    DEFAULT_TRANSACTION_TTL,
    PROTOCOL_VERSION,
    PROTOCOL_VERSION_HEADER,
    SERVER_TTL_HEADER,
};
