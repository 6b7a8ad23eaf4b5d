use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SiteToSiteError;

/// The API root every canonical peer url ends with.
pub const API_ROOT: &str = "/nifi-api";

/// Derives the canonical base url of a peer (`scheme://host:port/nifi-api`).
///
/// Any path, query or fragment of the raw url is dropped. When no port is
/// given the well known port of the scheme is used.
pub fn canonical_peer_url(raw: &str) -> Result<String, SiteToSiteError> {
    let url = Url::parse(raw).map_err(|source| SiteToSiteError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| SiteToSiteError::MissingHost {
            url: raw.to_string(),
        })?;

    match url.port_or_known_default() {
        Some(port) => Ok(format!("{}://{}:{}{}", url.scheme(), host, port, API_ROOT)),
        None => Ok(format!("{}://{}{}", url.scheme(), host, API_ROOT)),
    }
}

/// Milliseconds since the unix epoch.
pub fn get_unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A single remote node which can accept site-to-site transactions.
pub struct Peer {
    url: String,
    flow_file_count: u64,
    #[serde(default)]
    failed: bool,
}

impl Peer {
    /// Creates a new, healthy peer.
    pub fn new(url: impl Into<String>, flow_file_count: u64) -> Self {
        Self {
            url: url.into(),
            flow_file_count,
            failed: false,
        }
    }

    #[inline]
    /// The canonical base url of the peer.
    pub fn url(&self) -> &str {
        &self.url
    }

    #[inline]
    /// The last known number of queued flow files on the peer.
    pub fn flow_file_count(&self) -> u64 {
        self.flow_file_count
    }

    #[inline]
    pub fn set_flow_file_count(&mut self, flow_file_count: u64) {
        self.flow_file_count = flow_file_count;
    }

    #[inline]
    /// Returns if an operation against this peer has failed since the
    /// record was created.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Demotes the peer in the ranking.
    ///
    /// The flag is only cleared by replacing the record with a freshly
    /// reported one.
    pub fn mark_failure(&mut self) {
        self.failed = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A ranked snapshot of the known peers.
pub struct PeerStatus {
    peers: Vec<Peer>,
    last_update_ms: u64,
}

impl PeerStatus {
    /// Creates a new status from a set of peers.
    ///
    /// Duplicate urls are dropped, keeping the first occurrence, and the
    /// remaining peers are ranked.
    pub fn new(peers: impl IntoIterator<Item = Peer>, last_update_ms: u64) -> Self {
        let mut seen = HashSet::new();
        let peers = peers
            .into_iter()
            .filter(|peer| seen.insert(peer.url.clone()))
            .collect();

        let mut status = Self {
            peers,
            last_update_ms,
        };
        status.sort();
        status
    }

    #[inline]
    /// The peers in order of preference.
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    #[inline]
    pub(crate) fn peer_mut(&mut self, idx: usize) -> Option<&mut Peer> {
        self.peers.get_mut(idx)
    }

    /// Gets a peer by its url.
    pub fn get(&self, url: &str) -> Option<&Peer> {
        self.peers.iter().find(|peer| peer.url == url)
    }

    #[inline]
    /// The time of the last successful refresh, 0 if it never happened.
    pub fn last_update_ms(&self) -> u64 {
        self.last_update_ms
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Re-ranks the peers.
    ///
    /// Healthy peers come before failed ones, then peers with fewer queued
    /// flow files come first. The sort is stable so ties keep their order.
    pub fn sort(&mut self) {
        self.peers
            .sort_by_key(|peer| (peer.failed, peer.flow_file_count));
    }

    /// Returns if more than `interval` has passed between the last refresh
    /// and `now_ms`.
    pub fn is_stale(&self, now_ms: u64, interval: Duration) -> bool {
        let elapsed = now_ms.saturating_sub(self.last_update_ms);
        elapsed as u128 > interval.as_millis()
    }
}
