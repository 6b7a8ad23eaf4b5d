use std::collections::HashMap;

use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, Request};
use hyper::Body;

use crate::config::SiteToSiteClientConfig;
use crate::connection::{ensure_success, read_body, ConnectionOpener};
use crate::error::SiteToSiteError;

pub const ACCESS_TOKEN_PATH: &str = "/access/token";

#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

/// Obtains and caches a bearer token for each peer.
///
/// A token is requested at most once per peer for the lifetime of the
/// authenticator. Cached tokens are never refreshed or evicted.
pub struct Authenticator {
    credentials: Option<Credentials>,
    authorizations: HashMap<String, HeaderValue>,
}

impl Authenticator {
    /// Creates a new authenticator.
    ///
    /// Without a username every peer is accessed anonymously. A username
    /// without a password logs in with an empty password.
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        let credentials = username.map(|username| Credentials {
            username,
            password: password.unwrap_or_default(),
        });

        Self {
            credentials,
            authorizations: HashMap::new(),
        }
    }

    pub fn from_config(config: &SiteToSiteClientConfig) -> Self {
        Self::new(config.username.clone(), config.password.clone())
    }

    /// Logs into the peer unless a token for it is already cached.
    ///
    /// A rejected login caches nothing, so the next use of the peer tries
    /// again.
    pub async fn login_if_necessary(
        &mut self,
        opener: &dyn ConnectionOpener,
        peer_url: &str,
    ) -> Result<(), SiteToSiteError> {
        if self.authorizations.contains_key(peer_url) {
            return Ok(());
        }

        let credentials = match self.credentials.as_ref() {
            None => return Ok(()),
            Some(credentials) => credentials,
        };

        let url = format!("{}{}", peer_url, ACCESS_TOKEN_PATH);
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("username", &credentials.username)
            .append_pair("password", &credentials.password)
            .finish();

        let request = Request::builder()
            .method(Method::POST)
            .uri(&url)
            .header(ACCEPT, "text/plain")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form))?;

        let response = opener.open(request).await?;
        let status = response.status();
        if !status.is_success() {
            warn!(peer_url = %peer_url, status = %status, "Login rejected by peer.");
            return Err(SiteToSiteError::Authentication { url, status });
        }

        let token = read_body(&url, response).await?;
        let mut header =
            HeaderValue::from_str(&format!("Bearer {}", String::from_utf8_lossy(&token)))?;
        header.set_sensitive(true);

        debug!(peer_url = %peer_url, "Obtained access token.");
        self.authorizations.insert(peer_url.to_string(), header);

        Ok(())
    }

    #[inline]
    /// The cached `Authorization` header value for the peer.
    pub fn authorization(&self, peer_url: &str) -> Option<&HeaderValue> {
        self.authorizations.get(peer_url)
    }

    /// Headers every authenticated request to the peer must carry.
    pub fn headers_for(&self, peer_url: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(authorization) = self.authorization(peer_url) {
            headers.insert(AUTHORIZATION, authorization.clone());
        }
        headers
    }
}

/// Performs a GET request against a peer with its cached headers, failing
/// on any non-success response.
pub(crate) async fn authorized_get(
    opener: &dyn ConnectionOpener,
    auth: &Authenticator,
    peer_url: &str,
    url: &str,
) -> Result<bytes::Bytes, SiteToSiteError> {
    let mut request = Request::builder()
        .method(Method::GET)
        .uri(url)
        .body(Body::empty())?;
    request.headers_mut().extend(auth.headers_for(peer_url));

    let response = opener.open(request).await?;
    ensure_success(url, &response)?;
    read_body(url, response).await
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::test_utils::{respond, ScriptedOpener};

    const PEER: &str = "http://node-1:8080/nifi-api";
    const TOKEN_URL: &str = "http://node-1:8080/nifi-api/access/token";

    #[tokio::test]
    async fn test_login_is_cached() {
        let opener = ScriptedOpener::new(|req| {
            assert_eq!(req.url, TOKEN_URL);
            respond(StatusCode::CREATED, "abc.def.ghi")
        });
        let mut auth = Authenticator::new(Some("bob".into()), Some("p@ss word".into()));

        auth.login_if_necessary(&opener, PEER).await.unwrap();
        auth.login_if_necessary(&opener, PEER).await.unwrap();

        assert_eq!(opener.count(&Method::POST, TOKEN_URL), 1);
        assert_eq!(
            auth.authorization(PEER).unwrap(),
            &HeaderValue::from_static("Bearer abc.def.ghi"),
        );

        let request = &opener.requests()[0];
        assert_eq!(request.body.as_ref(), b"username=bob&password=p%40ss+word");
        assert_eq!(request.headers[ACCEPT], "text/plain");
        assert_eq!(
            request.headers[CONTENT_TYPE],
            "application/x-www-form-urlencoded"
        );

        let headers = auth.headers_for(PEER);
        assert_eq!(headers[AUTHORIZATION], "Bearer abc.def.ghi");
    }

    #[tokio::test]
    async fn test_anonymous_access() {
        let opener = ScriptedOpener::new(|_| panic!("No requests should be made"));
        let mut auth = Authenticator::new(None, Some("ignored".into()));

        auth.login_if_necessary(&opener, PEER).await.unwrap();
        assert!(auth.authorization(PEER).is_none());
        assert!(auth.headers_for(PEER).is_empty());
        assert!(opener.requests().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_login_is_not_cached() {
        let opener = ScriptedOpener::new(|_| respond(StatusCode::UNAUTHORIZED, ""));
        let mut auth = Authenticator::new(Some("bob".into()), None);

        let err = auth.login_if_necessary(&opener, PEER).await.unwrap_err();
        assert!(matches!(err, SiteToSiteError::Authentication { .. }));
        assert!(auth.authorization(PEER).is_none());

        let _ = auth.login_if_necessary(&opener, PEER).await;
        assert_eq!(opener.count(&Method::POST, TOKEN_URL), 2, "Failed logins are retried");
    }
}
