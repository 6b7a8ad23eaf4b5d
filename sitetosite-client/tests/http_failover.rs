use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use sitetosite_client::{
    HttpConnectionOpener,
    PeerTracker,
    SiteToSiteClientConfig,
    SiteToSiteError,
};
use test_helper::{get_unused_addr, peer_url, PeerServer};

const PEERS: &str = "/nifi-api/site-to-site/peers";
const DESCRIPTOR: &str = "/nifi-api/site-to-site";
const TOKEN: &str = "/nifi-api/access/token";

fn peers_body(peers: &[(SocketAddr, u64)]) -> String {
    let peers = peers
        .iter()
        .map(|(addr, count)| {
            serde_json::json!({
                "hostname": addr.ip().to_string(),
                "port": addr.port(),
                "secure": false,
                "flowFileCount": count,
            })
        })
        .collect::<Vec<_>>();

    serde_json::json!({ "peers": peers }).to_string()
}

fn descriptor_body(ports: &[(&str, &str)]) -> String {
    let ports = ports
        .iter()
        .map(|(id, name)| serde_json::json!({ "id": id, "name": name }))
        .collect::<Vec<_>>();

    serde_json::json!({ "controller": { "inputPorts": ports } }).to_string()
}

fn config() -> SiteToSiteClientConfig {
    SiteToSiteClientConfig::new()
        .with_credentials("device", "secret")
        .with_timeouts(Duration::from_secs(2), Duration::from_secs(5))
}

#[tokio::test]
async fn test_tracker_fails_over_between_live_peers() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let dead_addr = get_unused_addr();
    let peer_b = PeerServer::start().await;
    let peer_c = PeerServer::start().await;

    for peer in [&peer_b, &peer_c] {
        peer.route(Method::POST, TOKEN, 201, format!("token-{}", peer.addr().port()));
        peer.route(
            Method::GET,
            PEERS,
            200,
            peers_body(&[(peer_b.addr(), 5), (peer_c.addr(), 1)]),
        );
    }
    peer_b.route(Method::GET, DESCRIPTOR, 200, descriptor_body(&[("port-b", "in")]));
    peer_c.route(Method::GET, DESCRIPTOR, 200, descriptor_body(&[("port-c", "in")]));

    let config = config();
    let opener = Arc::new(HttpConnectionOpener::new(&config));
    let tracker = PeerTracker::connect(
        opener,
        [
            format!("http://{}/nifi/", dead_addr),
            format!("http://{}/", peer_b.addr()),
        ],
        config,
    )
    .await?;

    // The unreachable seed is kept even though the cluster never reports it.
    let status = tracker.peer_status().await;
    assert_eq!(status.len(), 3);
    assert!(status.get(&peer_url(dead_addr)).is_some());
    assert_eq!(peer_b.hits(&Method::GET, PEERS), 1);

    let identifier = tracker.get_port_identifier("in").await?;
    assert_eq!(identifier, "port-c", "The least loaded live peer answers");

    let status = tracker.peer_status().await;
    assert_eq!(status.peers()[0].url(), peer_c.url());
    assert!(status.get(&peer_url(dead_addr)).unwrap().is_failed());

    let descriptor_request = peer_c
        .requests()
        .into_iter()
        .find(|req| req.path == DESCRIPTOR)
        .expect("Descriptor was requested");
    let expected = format!("Bearer token-{}", peer_c.addr().port());
    assert_eq!(descriptor_request.headers["authorization"], expected.as_str());

    let login = peer_c
        .requests()
        .into_iter()
        .find(|req| req.path == TOKEN)
        .expect("Login was requested");
    assert_eq!(login.body, "username=device&password=secret");
    assert_eq!(login.headers["accept"], "text/plain");

    tracker.get_port_identifier("in").await?;
    assert_eq!(peer_c.hits(&Method::POST, TOKEN), 1, "Tokens are cached");

    tracker.shutdown();
    peer_b.shutdown();
    peer_c.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_transaction_is_opened_on_live_peer() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let peer_a = PeerServer::start().await;
    let peer_b = PeerServer::start().await;
    let transactions = "/nifi-api/data-transfer/input-ports/port-1/transactions";

    for peer in [&peer_a, &peer_b] {
        peer.route(Method::POST, TOKEN, 201, "token");
        peer.route(
            Method::GET,
            PEERS,
            200,
            peers_body(&[(peer_a.addr(), 0), (peer_b.addr(), 0)]),
        );
    }
    peer_a.route(Method::POST, transactions, 503, "Port is not running");

    let location = format!("{}/data-transfer/input-ports/port-1/transactions/tx-1", peer_b.url());
    peer_b.route_with_headers(
        Method::POST,
        transactions,
        201,
        &[
            ("location", location.as_str()),
            ("x-location-uri-intent", "transaction-url"),
            ("x-nifi-site-to-site-server-transaction-ttl", "1"),
        ],
        r#"{"flowFileSent":0,"responseCode":1,"message":"Handshake properties are valid"}"#,
    );
    peer_b.route(
        Method::PUT,
        "/nifi-api/data-transfer/input-ports/port-1/transactions/tx-1",
        200,
        "",
    );

    let config = config();
    let opener = Arc::new(HttpConnectionOpener::new(&config));
    let tracker =
        PeerTracker::connect(opener, [peer_a.url(), peer_b.url()], config).await?;

    let transaction = tracker.create_transaction("port-1").await?;
    assert_eq!(transaction.peer_url(), peer_b.url());
    assert_eq!(transaction.transaction_url(), location);
    assert_eq!(peer_a.hits(&Method::POST, transactions), 1);

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert!(
        peer_b.hits(
            &Method::PUT,
            "/nifi-api/data-transfer/input-ports/port-1/transactions/tx-1"
        ) >= 1,
        "Transaction TTL should be extended while it is open",
    );

    transaction.close();
    tracker.shutdown();
    peer_a.shutdown();
    peer_b.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_unreachable_cluster_fails_to_connect() {
    let config = config();
    let opener = Arc::new(HttpConnectionOpener::new(&config));

    let result = PeerTracker::connect(
        opener,
        [
            format!("http://{}", get_unused_addr()),
            format!("http://{}", get_unused_addr()),
        ],
        config,
    )
    .await;

    assert!(matches!(result, Err(SiteToSiteError::Transport { .. })));
}
