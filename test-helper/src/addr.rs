use std::net::{SocketAddr, TcpListener};

/// Gets a new socket address allocated by the OS.
///
/// Nothing listens on the address once this returns, which also makes it
/// usable as a peer that refuses every connection.
pub fn get_unused_addr() -> SocketAddr {
    let socket = TcpListener::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap()
}

/// The canonical base url of a peer listening on `addr`.
pub fn peer_url(addr: SocketAddr) -> String {
    format!("http://{}/nifi-api", addr)
}
