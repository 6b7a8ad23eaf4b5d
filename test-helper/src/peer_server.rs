use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http::{HeaderMap, Method, Request, Response, StatusCode};
use hyper::service::{make_service_fn, service_fn};
use hyper::Body;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::addr::{get_unused_addr, peer_url};

#[derive(Clone)]
struct Route {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: String,
}

#[derive(Debug, Clone)]
/// A request received by a [PeerServer].
pub struct ServedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: String,
}

#[derive(Default)]
struct ServerState {
    routes: RwLock<HashMap<(Method, String), Route>>,
    requests: Mutex<Vec<ServedRequest>>,
}

/// A HTTP server standing in for a single cluster peer.
///
/// Every route answers with a fixed, scripted response and unknown routes
/// answer with `404 Not Found`.
pub struct PeerServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    handle: JoinHandle<()>,
}

impl PeerServer {
    /// Starts a new server on an unused local address.
    pub async fn start() -> Self {
        let addr = get_unused_addr();
        let state = Arc::new(ServerState::default());

        let service_state = state.clone();
        let make_service = make_service_fn(move |_| {
            let state = service_state.clone();

            async move {
                let service = move |req| handle_request(req, state.clone());
                Ok::<_, Infallible>(service_fn(service))
            }
        });

        let server = hyper::Server::try_bind(&addr)
            .expect("Bind peer server")
            .serve(make_service);

        let handle = tokio::spawn(async move {
            if let Err(e) = server.await {
                tracing::error!(error = ?e, "Peer server failed to handle requests.");
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    #[inline]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[inline]
    /// The canonical base url of this peer.
    pub fn url(&self) -> String {
        peer_url(self.addr)
    }

    /// Answers `method path` with the given status and body.
    pub fn route(&self, method: Method, path: &str, status: u16, body: impl Into<String>) {
        self.route_with_headers(method, path, status, &[], body)
    }

    /// Answers `method path` with the given status, headers and body.
    pub fn route_with_headers(
        &self,
        method: Method,
        path: &str,
        status: u16,
        headers: &[(&str, &str)],
        body: impl Into<String>,
    ) {
        let route = Route {
            status: StatusCode::from_u16(status).expect("Valid status code"),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.into(),
        };

        self.state
            .routes
            .write()
            .insert((method, path.to_string()), route);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ServedRequest> {
        self.state.requests.lock().clone()
    }

    /// The number of requests received for `method path`.
    pub fn hits(&self, method: &Method, path: &str) -> usize {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|req| &req.method == method && req.path == path)
            .count()
    }

    /// Stops the server, connections to it are refused afterwards.
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

async fn handle_request(
    req: Request<Body>,
    state: Arc<ServerState>,
) -> Result<Response<Body>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = hyper::body::to_bytes(body).await.unwrap_or_default();
    let path = parts.uri.path().to_string();

    state.requests.lock().push(ServedRequest {
        method: parts.method.clone(),
        path: path.clone(),
        headers: parts.headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    let route = state.routes.read().get(&(parts.method, path)).cloned();

    let response = match route {
        None => {
            let mut response = Response::new(Body::from("Not Found"));
            (*response.status_mut()) = StatusCode::NOT_FOUND;
            response
        },
        Some(route) => {
            let mut response = Response::new(Body::from(route.body));
            (*response.status_mut()) = route.status;
            for (key, value) in route.headers {
                if let (Ok(key), Ok(value)) = (
                    http::header::HeaderName::from_bytes(key.as_bytes()),
                    http::HeaderValue::from_str(&value),
                ) {
                    response.headers_mut().insert(key, value);
                }
            }
            response
        },
    };

    Ok(response)
}
