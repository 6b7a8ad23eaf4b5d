//! Parsing of the peer discovery and site-to-site descriptor bodies.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::SiteToSiteError;
use crate::peer::{canonical_peer_url, Peer};

#[derive(Deserialize)]
struct PeersEntity {
    peers: Vec<PeerDto>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerDto {
    hostname: String,
    port: u16,
    #[serde(default)]
    secure: bool,
    #[serde(default)]
    flow_file_count: u64,
}

impl PeerDto {
    /// The canonical url of the reported peer, matching the form used for
    /// seed urls.
    fn url(&self) -> Result<String, SiteToSiteError> {
        let scheme = if self.secure { "https" } else { "http" };
        let host = self.hostname.trim();

        if host.contains(':') && !host.starts_with('[') {
            canonical_peer_url(&format!("{}://[{}]:{}", scheme, host, self.port))
        } else {
            canonical_peer_url(&format!("{}://{}:{}", scheme, host, self.port))
        }
    }
}

#[derive(Deserialize)]
struct ControllerEntity {
    controller: ControllerDto,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControllerDto {
    #[serde(default)]
    input_ports: Vec<PortDto>,
}

#[derive(Deserialize)]
struct PortDto {
    id: String,
    name: String,
}

/// Parses a peer discovery response into peers keyed by their url.
///
/// Returns `None` if the body is not a peer list.
pub fn parse_peers(body: &[u8]) -> Option<BTreeMap<String, Peer>> {
    let entity: PeersEntity = match serde_json::from_slice(body) {
        Ok(entity) => entity,
        Err(e) => {
            debug!(error = ?e, "Body is not a valid peer list.");
            return None;
        },
    };

    let peers = entity
        .peers
        .into_iter()
        .filter_map(|dto| match dto.url() {
            Ok(url) => Some((url.clone(), Peer::new(url, dto.flow_file_count))),
            Err(e) => {
                warn!(
                    hostname = %dto.hostname,
                    port = dto.port,
                    error = %e,
                    "Ignoring reported peer with an invalid address."
                );
                None
            },
        })
        .collect();

    Some(peers)
}

/// Looks up the identifier of the input port named `port_name`.
///
/// Returns `None` if the port does not exist or the body is not a
/// site-to-site descriptor.
pub fn port_identifier(body: &[u8], port_name: &str) -> Option<String> {
    let entity: ControllerEntity = match serde_json::from_slice(body) {
        Ok(entity) => entity,
        Err(e) => {
            debug!(error = ?e, "Body is not a valid site-to-site descriptor.");
            return None;
        },
    };

    entity
        .controller
        .input_ports
        .into_iter()
        .find(|port| port.name == port_name)
        .map(|port| port.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peers() {
        let body = br#"{
            "peers": [
                {"hostname": "node-1", "port": 8080, "secure": false, "flowFileCount": 12},
                {"hostname": "node-2", "port": 8443, "secure": true, "flowFileCount": 0},
                {"hostname": "node-3", "port": 8080}
            ]
        }"#;

        let peers = parse_peers(body).expect("Valid peer list");
        assert_eq!(peers.len(), 3);
        assert_eq!(peers["http://node-1:8080/nifi-api"].flow_file_count(), 12);
        assert_eq!(peers["https://node-2:8443/nifi-api"].flow_file_count(), 0);
        assert!(peers.contains_key("http://node-3:8080/nifi-api"));
        assert!(peers.values().all(|peer| !peer.is_failed()));
    }

    #[test]
    fn test_reported_urls_are_canonical() {
        let body = br#"{
            "peers": [
                {"hostname": "NODE-A", "port": 8080, "secure": false, "flowFileCount": 3},
                {"hostname": "::1", "port": 8443, "secure": true, "flowFileCount": 1},
                {"hostname": "[fe80::2]", "port": 8080},
                {"hostname": "bad host", "port": 8080}
            ]
        }"#;

        let peers = parse_peers(body).expect("Valid peer list");
        let urls = peers.keys().map(String::as_str).collect::<Vec<_>>();
        assert_eq!(
            urls,
            [
                "http://[fe80::2]:8080/nifi-api",
                "http://node-a:8080/nifi-api",
                "https://[::1]:8443/nifi-api",
            ],
        );
        assert_eq!(peers["http://node-a:8080/nifi-api"].url(), "http://node-a:8080/nifi-api");
        assert_eq!(peers["http://node-a:8080/nifi-api"].flow_file_count(), 3);
    }

    #[test]
    fn test_parse_invalid_peers() {
        assert!(parse_peers(b"<html>Not json</html>").is_none());
        assert!(parse_peers(br#"{"controller": {}}"#).is_none());

        let empty = parse_peers(br#"{"peers": []}"#).expect("Empty list is valid");
        assert!(empty.is_empty());
    }

    #[test]
    fn test_port_identifier() {
        let body = br#"{
            "controller": {
                "id": "root",
                "inputPorts": [
                    {"id": "1234-abcd", "name": "From Device"},
                    {"id": "5678-efgh", "name": "Metrics"}
                ],
                "outputPorts": []
            }
        }"#;

        assert_eq!(port_identifier(body, "Metrics"), Some("5678-efgh".to_string()));
        assert_eq!(port_identifier(body, "Missing"), None);
        assert_eq!(port_identifier(b"garbage", "Metrics"), None);
        assert_eq!(port_identifier(br#"{"controller": {}}"#, "Metrics"), None);
    }
}
