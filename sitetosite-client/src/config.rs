use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::peer::PeerStatus;

pub const DEFAULT_PEER_UPDATE_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Persistence for the tracked peer status.
///
/// A status loaded at start up lets a new process skip the initial
/// peer refresh.
pub trait PeerStatusStore: Send + Sync + 'static {
    /// Loads a previously stored status, if any.
    fn load(&self) -> Option<PeerStatus>;

    /// Stores the status after a successful refresh.
    fn store(&self, status: &PeerStatus);
}

#[derive(Debug, Default)]
/// A [PeerStatusStore] which only lives as long as the process.
pub struct MemoryPeerStatusStore {
    status: RwLock<Option<PeerStatus>>,
}

impl MemoryPeerStatusStore {
    /// Creates a store pre-populated with a status.
    pub fn with_status(status: PeerStatus) -> Self {
        Self {
            status: RwLock::new(Some(status)),
        }
    }
}

impl PeerStatusStore for MemoryPeerStatusStore {
    fn load(&self) -> Option<PeerStatus> {
        self.status.read().clone()
    }

    fn store(&self, status: &PeerStatus) {
        *self.status.write() = Some(status.clone());
    }
}

#[derive(Clone)]
/// Configuration for the site-to-site client.
pub struct SiteToSiteClientConfig {
    /// How long a peer list is used before it is refreshed from the cluster.
    pub peer_update_interval: Duration,

    /// The username to log in with.
    ///
    /// When this is `None` requests are made anonymously.
    pub username: Option<String>,

    /// The password sent along with `username`.
    pub password: Option<String>,

    /// The maximum time spent establishing a connection to a peer.
    pub connect_timeout: Duration,

    /// The maximum time a single request may take, including the body.
    pub request_timeout: Duration,

    /// Where the peer status is loaded from and persisted to.
    pub peer_status_store: Arc<dyn PeerStatusStore>,
}

impl SiteToSiteClientConfig {
    /// Creates a new config with the default intervals and no credentials.
    pub fn new() -> Self {
        Self {
            peer_update_interval: DEFAULT_PEER_UPDATE_INTERVAL,
            username: None,
            password: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            peer_status_store: Arc::new(MemoryPeerStatusStore::default()),
        }
    }

    /// Set how often the peer list is refreshed.
    pub fn with_peer_update_interval(mut self, interval: Duration) -> Self {
        self.peer_update_interval = interval;
        self
    }

    /// Set the credentials used to obtain bearer tokens from each peer.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the connect and request timeouts.
    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    /// Set the store used to persist the peer status.
    pub fn with_peer_status_store(mut self, store: Arc<dyn PeerStatusStore>) -> Self {
        self.peer_status_store = store;
        self
    }

    #[inline]
    /// The persisted peer status, if any.
    pub fn peer_status(&self) -> Option<PeerStatus> {
        self.peer_status_store.load()
    }

    #[inline]
    pub fn set_peer_status(&self, status: &PeerStatus) {
        self.peer_status_store.store(status)
    }
}

impl Default for SiteToSiteClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for SiteToSiteClientConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteToSiteClientConfig")
            .field("peer_update_interval", &self.peer_update_interval)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
