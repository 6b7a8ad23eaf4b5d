use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::header::{ACCEPT, AUTHORIZATION, LOCATION};
use http::{HeaderMap, HeaderValue, Method, Request};
use hyper::Body;
use url::Url;

use crate::connection::{ensure_success, ConnectionOpener};
use crate::error::SiteToSiteError;
use crate::keep_alive::{KeepAliveHandle, KeepAliveScheduler, KeepAliveTask};

pub const PROTOCOL_VERSION_HEADER: &str = "x-nifi-site-to-site-protocol-version";
pub const SERVER_TTL_HEADER: &str = "x-nifi-site-to-site-server-transaction-ttl";
pub const PROTOCOL_VERSION: &str = "1";
pub const DEFAULT_TRANSACTION_TTL: Duration = Duration::from_secs(30);

/// Servers announcing a TTL of zero or below a second are not extended
/// more often than this.
const MIN_EXTENSION_INTERVAL: Duration = Duration::from_millis(500);

/// An open data-transfer session against an input port of a peer.
///
/// While the transaction is alive its TTL is extended in the background on
/// the [KeepAliveScheduler] it was created with. Closing or dropping the
/// transaction stops the extension.
pub struct Transaction {
    peer_url: String,
    port: String,
    ttl: Duration,
    extender: Arc<TtlExtender>,
    keep_alive: Option<KeepAliveHandle>,
}

impl Transaction {
    /// Asks the peer to open a new transaction for the given port.
    pub(crate) async fn create(
        opener: Arc<dyn ConnectionOpener>,
        peer_url: &str,
        authorization: Option<&HeaderValue>,
        port: &str,
        scheduler: &KeepAliveScheduler,
    ) -> Result<Self, SiteToSiteError> {
        let url = transactions_url(peer_url, port)?;

        let mut headers = HeaderMap::new();
        headers.insert(PROTOCOL_VERSION_HEADER, HeaderValue::from_static(PROTOCOL_VERSION));
        if let Some(authorization) = authorization {
            headers.insert(AUTHORIZATION, authorization.clone());
        }

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(url.as_str())
            .header(ACCEPT, "application/json")
            .body(Body::empty())?;
        request.headers_mut().extend(headers.clone());

        let response = opener.open(request).await?;
        ensure_success(url.as_str(), &response)?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| SiteToSiteError::InvalidTransaction {
                url: url.to_string(),
                reason: "Missing transaction location".to_string(),
            })?;
        let transaction_url = url.join(location).map_err(|e| {
            SiteToSiteError::InvalidTransaction {
                url: url.to_string(),
                reason: format!("Invalid transaction location {:?}: {}", location, e),
            }
        })?;

        let ttl = response
            .headers()
            .get(SERVER_TTL_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TRANSACTION_TTL);

        debug!(
            peer_url = %peer_url,
            port = port,
            transaction_url = %transaction_url,
            ttl = ?ttl,
            "Opened transaction."
        );

        let extender = Arc::new(TtlExtender {
            opener,
            transaction_url: transaction_url.to_string(),
            headers,
        });
        let keep_alive = scheduler.schedule(extension_interval(ttl), extender.clone());

        Ok(Self {
            peer_url: peer_url.to_string(),
            port: port.to_string(),
            ttl,
            extender,
            keep_alive: Some(keep_alive),
        })
    }

    #[inline]
    /// The base url of the peer serving the transaction.
    pub fn peer_url(&self) -> &str {
        &self.peer_url
    }

    #[inline]
    /// The url the peer assigned to the transaction.
    pub fn transaction_url(&self) -> &str {
        &self.extender.transaction_url
    }

    #[inline]
    /// The identifier of the port the transaction targets.
    pub fn port(&self) -> &str {
        &self.port
    }

    #[inline]
    /// How long the peer keeps the transaction without a keep-alive.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[inline]
    /// The authorization header used for the peer, if any.
    pub fn authorization(&self) -> Option<&HeaderValue> {
        self.extender.headers.get(AUTHORIZATION)
    }

    /// Extends the TTL of the transaction immediately.
    pub async fn extend_ttl(&self) -> Result<(), SiteToSiteError> {
        self.extender.keep_alive().await
    }

    /// Stops extending the TTL of the transaction.
    pub fn close(mut self) {
        if let Some(handle) = self.keep_alive.take() {
            handle.cancel();
        }
    }
}

struct TtlExtender {
    opener: Arc<dyn ConnectionOpener>,
    transaction_url: String,
    headers: HeaderMap,
}

#[async_trait]
impl KeepAliveTask for TtlExtender {
    async fn keep_alive(&self) -> Result<(), SiteToSiteError> {
        let mut request = Request::builder()
            .method(Method::PUT)
            .uri(&self.transaction_url)
            .header(ACCEPT, "application/json")
            .body(Body::empty())?;
        request.headers_mut().extend(self.headers.clone());

        let response = self.opener.open(request).await?;
        ensure_success(&self.transaction_url, &response)?;

        trace!(transaction_url = %self.transaction_url, "Extended transaction TTL.");
        Ok(())
    }
}

fn transactions_url(peer_url: &str, port: &str) -> Result<Url, SiteToSiteError> {
    let mut url = Url::parse(peer_url).map_err(|source| SiteToSiteError::InvalidUrl {
        url: peer_url.to_string(),
        source,
    })?;

    url.path_segments_mut()
        .map_err(|_| SiteToSiteError::MissingHost {
            url: peer_url.to_string(),
        })?
        .pop_if_empty()
        .extend(["data-transfer", "input-ports", port, "transactions"]);

    Ok(url)
}

/// How often the TTL of a transaction is extended, half of the TTL.
fn extension_interval(ttl: Duration) -> Duration {
    (ttl / 2).max(MIN_EXTENSION_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_interval() {
        assert_eq!(extension_interval(Duration::from_secs(30)), Duration::from_secs(15));
        assert_eq!(extension_interval(Duration::from_secs(1)), Duration::from_millis(500));
        assert_eq!(extension_interval(Duration::ZERO), MIN_EXTENSION_INTERVAL);
    }

    #[test]
    fn test_transactions_url() {
        let url = transactions_url("http://node-1:8080/nifi-api", "1234-abcd").unwrap();
        assert_eq!(
            url.as_str(),
            "http://node-1:8080/nifi-api/data-transfer/input-ports/1234-abcd/transactions",
        );

        let url = transactions_url("http://node-1:8080/nifi-api", "a port/with slash").unwrap();
        assert_eq!(
            url.as_str(),
            "http://node-1:8080/nifi-api/data-transfer/input-ports/a%20port%2Fwith%20slash/transactions",
        );
    }
}
