use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::auth::{authorized_get, Authenticator};
use crate::config::SiteToSiteClientConfig;
use crate::connection::ConnectionOpener;
use crate::error::SiteToSiteError;
use crate::keep_alive::KeepAliveScheduler;
use crate::parser::{parse_peers, port_identifier};
use crate::peer::{canonical_peer_url, get_unix_timestamp_ms, Peer, PeerStatus};
use crate::transaction::Transaction;

pub const PEERS_PATH: &str = "/site-to-site/peers";
pub const SITE_TO_SITE_PATH: &str = "/site-to-site";

struct TrackerState {
    peer_status: PeerStatus,
    auth: Authenticator,
}

/// Tracks the members of a remote cluster and picks the peer to talk to.
///
/// Every public operation holds a single lock over the peer status and the
/// token cache for its whole duration, remote calls included. A slow peer
/// therefore blocks every other caller of the tracker until it answers or
/// the connection opener gives up on it.
pub struct PeerTracker {
    opener: Arc<dyn ConnectionOpener>,
    config: SiteToSiteClientConfig,
    seed_urls: Vec<String>,
    keep_alive: KeepAliveScheduler,
    state: Mutex<TrackerState>,
}

impl PeerTracker {
    /// Creates a new tracker for the cluster reachable through `seed_urls`.
    ///
    /// If the config holds a persisted peer status it is used as-is,
    /// otherwise the peer list is fetched from the seeds before returning.
    /// Failing to reach any seed in that case is an error.
    ///
    /// The keep-alive scheduler started here is released with
    /// [PeerTracker::shutdown].
    pub async fn connect(
        opener: Arc<dyn ConnectionOpener>,
        seed_urls: impl IntoIterator<Item = impl AsRef<str>>,
        config: SiteToSiteClientConfig,
    ) -> Result<Self, SiteToSiteError> {
        let mut seeds = Vec::new();
        for raw in seed_urls {
            let url = canonical_peer_url(raw.as_ref())?;
            if !seeds.contains(&url) {
                seeds.push(url);
            }
        }

        let (peer_status, needs_refresh) = match config.peer_status() {
            Some(status) => {
                debug!(num_peers = status.len(), "Using persisted peer status.");
                (status, false)
            },
            None => {
                let peers = seeds.iter().map(|url| Peer::new(url.clone(), 0));
                (PeerStatus::new(peers, 0), true)
            },
        };

        let state = TrackerState {
            peer_status,
            auth: Authenticator::from_config(&config),
        };
        let tracker = Self {
            opener,
            config,
            seed_urls: seeds,
            keep_alive: KeepAliveScheduler::start(),
            state: Mutex::new(state),
        };

        if needs_refresh {
            if let Err(e) = tracker.update_peers().await {
                error!(
                    seed_urls = %tracker.seed_urls.join(", "),
                    error = %e,
                    "Unable to fetch the peer list from any seed peer."
                );
                tracker.shutdown();
                return Err(e);
            }
        }

        info!(
            seed_urls = %tracker.seed_urls.join(", "),
            "Peer tracker ready."
        );

        Ok(tracker)
    }

    #[inline]
    /// The canonical urls of the seed peers.
    pub fn seed_urls(&self) -> &[String] {
        &self.seed_urls
    }

    #[inline]
    /// The scheduler handed to transactions to extend their TTL.
    pub fn keep_alive(&self) -> &KeepAliveScheduler {
        &self.keep_alive
    }

    /// A snapshot of the ranked peers.
    pub async fn peer_status(&self) -> PeerStatus {
        self.state.lock().await.peer_status.clone()
    }

    /// Stops the keep-alive scheduler.
    ///
    /// Transactions created afterwards no longer have their TTL extended.
    pub fn shutdown(&self) {
        self.keep_alive.shutdown();
    }

    /// Fetches the peer list from the first peer which answers and merges
    /// it into the tracked status.
    ///
    /// If no peer answers the tracked status is left untouched and the
    /// error of the last peer tried is returned.
    pub async fn update_peers(&self) -> Result<(), SiteToSiteError> {
        let mut state = self.state.lock().await;
        self.update_peers_locked(&mut state).await
    }

    /// Opens a transaction against the port with the given identifier on
    /// the most preferred peer which accepts it.
    pub async fn create_transaction(
        &self,
        port_identifier: &str,
    ) -> Result<Transaction, SiteToSiteError> {
        let mut state = self.state.lock().await;
        self.run_with_failover(&mut state, &OpenTransaction { port_identifier })
            .await
    }

    /// Resolves the identifier of the input port named `port_name`.
    ///
    /// A peer which does not know of the port counts as failed and the next
    /// peer is asked.
    pub async fn get_port_identifier(
        &self,
        port_name: &str,
    ) -> Result<String, SiteToSiteError> {
        let mut state = self.state.lock().await;
        self.run_with_failover(&mut state, &ResolvePort { port_name })
            .await
    }

    async fn update_peers_if_necessary(
        &self,
        state: &mut TrackerState,
    ) -> Result<(), SiteToSiteError> {
        let now = get_unix_timestamp_ms();
        if state
            .peer_status
            .is_stale(now, self.config.peer_update_interval)
        {
            debug!(
                last_update_ms = state.peer_status.last_update_ms(),
                "Peer list is stale, refreshing."
            );
            self.update_peers_locked(state).await?;
        }

        Ok(())
    }

    async fn update_peers_locked(
        &self,
        state: &mut TrackerState,
    ) -> Result<(), SiteToSiteError> {
        let started_at = get_unix_timestamp_ms();
        let mut last_error = None;

        for idx in 0..state.peer_status.len() {
            let peer_url = state.peer_status.peers()[idx].url().to_string();

            match self.fetch_peers(&mut state.auth, &peer_url).await {
                Ok(reported) => {
                    let merged =
                        merge_peers(&state.peer_status, reported, &self.seed_urls);
                    let status = PeerStatus::new(merged, started_at);

                    info!(
                        peer_url = %peer_url,
                        num_peers = status.len(),
                        "Updated peer list."
                    );

                    self.config.set_peer_status(&status);
                    state.peer_status = status;
                    return Ok(());
                },
                Err(e) => {
                    debug!(
                        peer_url = %peer_url,
                        error = %e,
                        "Unable to get peer list."
                    );
                    last_error = Some(e);
                },
            }
        }

        Err(last_error.unwrap_or(SiteToSiteError::NoPeers))
    }

    async fn fetch_peers(
        &self,
        auth: &mut Authenticator,
        peer_url: &str,
    ) -> Result<BTreeMap<String, Peer>, SiteToSiteError> {
        auth.login_if_necessary(self.opener.as_ref(), peer_url)
            .await?;

        let url = format!("{}{}", peer_url, PEERS_PATH);
        let body = authorized_get(self.opener.as_ref(), auth, peer_url, &url).await?;
        parse_peers(&body).ok_or(SiteToSiteError::InvalidPeerList { url })
    }

    /// Tries the action against each peer in ranked order until one
    /// succeeds.
    ///
    /// Every peer which fails is marked as failed. If any peer failed the
    /// ranking is refreshed before returning.
    async fn run_with_failover<A: PeerAction>(
        &self,
        state: &mut TrackerState,
        action: &A,
    ) -> Result<A::Output, SiteToSiteError> {
        self.update_peers_if_necessary(state).await?;

        let mut last_error = None;
        for idx in 0..state.peer_status.len() {
            let peer_url = state.peer_status.peers()[idx].url().to_string();

            let result = match state
                .auth
                .login_if_necessary(self.opener.as_ref(), &peer_url)
                .await
            {
                Ok(()) => action.attempt(self, &state.auth, &peer_url).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(output) => {
                    if last_error.is_some() {
                        state.peer_status.sort();
                    }

                    trace!(peer_url = %peer_url, action = A::NAME, "Peer accepted request.");
                    return Ok(output);
                },
                Err(e) => {
                    if let Some(peer) = state.peer_status.peer_mut(idx) {
                        peer.mark_failure();
                    }

                    warn!(
                        peer_url = %peer_url,
                        action = A::NAME,
                        resource = %action.target(),
                        retryable = e.is_retryable(),
                        error = %e,
                        "Peer failed, trying next peer."
                    );
                    last_error = Some(e);
                },
            }
        }

        state.peer_status.sort();
        Err(last_error.unwrap_or(SiteToSiteError::NoPeers))
    }
}

/// Merges a freshly reported peer list into the current status.
///
/// Peers which are already tracked keep their record, and with it their
/// health, taking only the new flow file count. Seed peers are kept even
/// when the cluster no longer reports them.
fn merge_peers(
    current: &PeerStatus,
    mut reported: BTreeMap<String, Peer>,
    seed_urls: &[String],
) -> Vec<Peer> {
    let mut merged = Vec::with_capacity(current.len() + reported.len());

    for existing in current.peers() {
        match reported.remove(existing.url()) {
            Some(fresh) => {
                let mut peer = existing.clone();
                peer.set_flow_file_count(fresh.flow_file_count());
                merged.push(peer);
            },
            None if seed_urls.iter().any(|url| url == existing.url()) => {
                merged.push(existing.clone());
            },
            None => {
                trace!(peer_url = %existing.url(), "Peer is no longer part of the cluster.");
            },
        }
    }

    merged.extend(reported.into_values());
    merged
}

#[async_trait]
/// A remote operation which may be attempted against any peer.
trait PeerAction: Send + Sync {
    const NAME: &'static str;

    type Output: Send;

    /// The port or resource the action targets, used for logging.
    fn target(&self) -> &str;

    async fn attempt(
        &self,
        tracker: &PeerTracker,
        auth: &Authenticator,
        peer_url: &str,
    ) -> Result<Self::Output, SiteToSiteError>;
}

struct OpenTransaction<'a> {
    port_identifier: &'a str,
}

#[async_trait]
impl<'a> PeerAction for OpenTransaction<'a> {
    const NAME: &'static str = "create_transaction";

    type Output = Transaction;

    fn target(&self) -> &str {
        self.port_identifier
    }

    async fn attempt(
        &self,
        tracker: &PeerTracker,
        auth: &Authenticator,
        peer_url: &str,
    ) -> Result<Self::Output, SiteToSiteError> {
        Transaction::create(
            tracker.opener.clone(),
            peer_url,
            auth.authorization(peer_url),
            self.port_identifier,
            &tracker.keep_alive,
        )
        .await
    }
}

struct ResolvePort<'a> {
    port_name: &'a str,
}

#[async_trait]
impl<'a> PeerAction for ResolvePort<'a> {
    const NAME: &'static str = "get_port_identifier";

    type Output = String;

    fn target(&self) -> &str {
        self.port_name
    }

    async fn attempt(
        &self,
        tracker: &PeerTracker,
        auth: &Authenticator,
        peer_url: &str,
    ) -> Result<Self::Output, SiteToSiteError> {
        let url = format!("{}{}", peer_url, SITE_TO_SITE_PATH);
        let body = authorized_get(tracker.opener.as_ref(), auth, peer_url, &url).await?;

        port_identifier(&body, self.port_name).ok_or_else(|| {
            SiteToSiteError::PortNotFound {
                url,
                port: self.port_name.to_string(),
            }
        })
    }
}
