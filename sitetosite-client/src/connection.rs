use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use hyper::client::HttpConnector;
use hyper::{Body, Client};
use tokio::time::timeout;

use crate::config::SiteToSiteClientConfig;
use crate::error::SiteToSiteError;

#[async_trait]
/// Opens a single request/response exchange against a peer.
///
/// Implementations own every transport concern (TLS, proxies, pooling).
/// A failure to exchange the request must be returned as an error, while
/// any response the peer sends, regardless of its status, is returned as `Ok`
/// so callers can tell protocol failures apart from transport failures.
///
/// The returned response owns whatever connection resources back it; they
/// are released once it is dropped.
pub trait ConnectionOpener: Send + Sync + 'static {
    async fn open(&self, request: Request<Body>) -> Result<Response<Body>, SiteToSiteError>;
}

#[derive(Clone)]
/// A plain HTTP [ConnectionOpener] built on a pooled hyper client.
///
/// The response body is buffered before it is returned, so the underlying
/// connection goes back to the pool before the caller sees the response.
pub struct HttpConnectionOpener {
    client: Client<HttpConnector, Body>,
    request_timeout: Duration,
}

impl HttpConnectionOpener {
    /// Creates a new opener using the timeouts of the given config.
    pub fn new(config: &SiteToSiteClientConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder().build(connector);

        Self {
            client,
            request_timeout: config.request_timeout,
        }
    }

    async fn exchange(
        &self,
        url: &str,
        request: Request<Body>,
    ) -> Result<Response<Body>, SiteToSiteError> {
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| SiteToSiteError::transport(url, e))?;

        let (parts, body) = response.into_parts();
        let body = hyper::body::to_bytes(body)
            .await
            .map_err(|e| SiteToSiteError::transport(url, e))?;

        Ok(Response::from_parts(parts, Body::from(body)))
    }
}

#[async_trait]
impl ConnectionOpener for HttpConnectionOpener {
    async fn open(&self, request: Request<Body>) -> Result<Response<Body>, SiteToSiteError> {
        let url = request.uri().to_string();
        trace!(method = %request.method(), url = %url, "Opening connection.");

        match timeout(self.request_timeout, self.exchange(&url, request)).await {
            Ok(result) => result,
            Err(_) => Err(SiteToSiteError::Timeout { url }),
        }
    }
}

/// Returns an error if the response status is outside of `200..=299`.
pub(crate) fn ensure_success(
    url: &str,
    response: &Response<Body>,
) -> Result<(), SiteToSiteError> {
    let status = response.status();
    if !status.is_success() {
        return Err(SiteToSiteError::Status {
            url: url.to_string(),
            status,
        });
    }

    Ok(())
}

/// Reads the complete body of a response.
pub async fn read_body(
    url: &str,
    response: Response<Body>,
) -> Result<Bytes, SiteToSiteError> {
    hyper::body::to_bytes(response.into_body())
        .await
        .map_err(|e| SiteToSiteError::transport(url, e))
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;

    #[test]
    fn test_ensure_success() {
        let ok = Response::new(Body::empty());
        assert!(ensure_success("http://a:8080/nifi-api", &ok).is_ok());

        let mut redirect = Response::new(Body::empty());
        *redirect.status_mut() = StatusCode::FOUND;
        let err = ensure_success("http://a:8080/nifi-api", &redirect).unwrap_err();
        match err {
            SiteToSiteError::Status { status, .. } => assert_eq!(status, StatusCode::FOUND),
            other => panic!("Unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_body() {
        let response = Response::new(Body::from("token-value"));
        let body = read_body("http://a:8080/nifi-api", response).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"token-value"));
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport_error() {
        let addr = test_helper::get_unused_addr();
        let opener = HttpConnectionOpener::new(&SiteToSiteClientConfig::new());

        let request = Request::get(format!("http://{}/nifi-api/site-to-site", addr))
            .body(Body::empty())
            .unwrap();
        let err = opener.open(request).await.unwrap_err();
        assert!(
            matches!(err, SiteToSiteError::Transport { .. }),
            "Expected transport error, got {:?}",
            err,
        );
    }
}
