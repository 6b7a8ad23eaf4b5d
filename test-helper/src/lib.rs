mod addr;
mod peer_server;

pub use addr::{get_unused_addr, peer_url};
pub use peer_server::{PeerServer, ServedRequest};
