//! # Site-to-Site
//! Tooling for pushing data into a remote dataflow cluster over the
//! Site-to-Site protocol.
//!
//! This is a convenience package which re-exports the sub-projects of the
//! workspace:
//!
//! ### Features
//! - `sitetosite-client` - Peer discovery, ranking, authentication and failover
//!   for opening transactions against the members of a cluster.
//! - `test-utils` - A scripted connection opener for testing code built on the client.

#[cfg(feature = "sitetosite-client")]
pub use sitetosite_client as client;
