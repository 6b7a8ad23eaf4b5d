use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response, StatusCode};
use hyper::Body;
use parking_lot::Mutex;

use crate::connection::ConnectionOpener;
use crate::error::SiteToSiteError;

#[derive(Debug, Clone)]
/// A request seen by a [ScriptedOpener].
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

type Script =
    Box<dyn Fn(&RecordedRequest) -> Result<Response<Body>, SiteToSiteError> + Send + Sync>;

/// A [ConnectionOpener] which answers requests with a user provided
/// script and records every request it receives.
pub struct ScriptedOpener {
    script: Script,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedOpener {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&RecordedRequest) -> Result<Response<Body>, SiteToSiteError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// The number of requests received with the given method and url.
    pub fn count(&self, method: &Method, url: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|req| &req.method == method && req.url == url)
            .count()
    }

    /// Forgets every recorded request.
    pub fn clear(&self) {
        self.requests.lock().clear();
    }
}

#[async_trait]
impl ConnectionOpener for ScriptedOpener {
    async fn open(&self, request: Request<Body>) -> Result<Response<Body>, SiteToSiteError> {
        let (parts, body) = request.into_parts();
        let body = hyper::body::to_bytes(body)
            .await
            .map_err(|e| SiteToSiteError::transport(parts.uri.to_string(), e))?;

        let recorded = RecordedRequest {
            method: parts.method,
            url: parts.uri.to_string(),
            headers: parts.headers,
            body,
        };

        self.requests.lock().push(recorded.clone());
        (self.script)(&recorded)
    }
}

/// Creates a response with the given status and body.
pub fn respond(
    status: StatusCode,
    body: impl Into<Body>,
) -> Result<Response<Body>, SiteToSiteError> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    Ok(response)
}

/// Creates a transport error as if the peer refused the connection.
pub fn refused(url: &str) -> Result<Response<Body>, SiteToSiteError> {
    Err(SiteToSiteError::transport(
        url,
        io::Error::new(io::ErrorKind::ConnectionRefused, "Connection refused"),
    ))
}

/// Renders a peer discovery body from `(hostname, port, flow file count)`.
pub fn peers_body(peers: &[(&str, u16, u64)]) -> String {
    let peers = peers
        .iter()
        .map(|(hostname, port, count)| {
            serde_json::json!({
                "hostname": hostname,
                "port": port,
                "secure": false,
                "flowFileCount": count,
            })
        })
        .collect::<Vec<_>>();

    serde_json::json!({ "peers": peers }).to_string()
}

/// Renders a site-to-site descriptor body from `(id, name)` input ports.
pub fn descriptor_body(ports: &[(&str, &str)]) -> String {
    let ports = ports
        .iter()
        .map(|(id, name)| serde_json::json!({ "id": id, "name": name }))
        .collect::<Vec<_>>();

    serde_json::json!({
        "controller": {
            "inputPorts": ports,
            "outputPorts": [],
        }
    })
    .to_string()
}

/// Creates the response of a peer accepting a new transaction.
pub fn transaction_created(
    location: &str,
    ttl_secs: u64,
) -> Result<Response<Body>, SiteToSiteError> {
    let response = Response::builder()
        .status(StatusCode::CREATED)
        .header(http::header::LOCATION, location)
        .header("x-location-uri-intent", "transaction-url")
        .header(crate::transaction::SERVER_TTL_HEADER, ttl_secs.to_string())
        .body(Body::empty())?;
    Ok(response)
}
