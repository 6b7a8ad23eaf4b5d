use std::error::Error as StdError;

use http::header::InvalidHeaderValue;
use http::StatusCode;
use thiserror::Error;

pub type BoxedError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum SiteToSiteError {
    #[error("Invalid peer url {url:?}: {source}")]
    /// A peer url could not be parsed.
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Peer url {url:?} has no host")]
    /// A peer url was parsed but cannot address a remote host.
    MissingHost { url: String },

    #[error("Transport error while contacting {url}: {source}")]
    /// The connection was refused, reset or otherwise failed below HTTP.
    Transport {
        url: String,
        #[source]
        source: BoxedError,
    },

    #[error("Request to {url} did not complete within the deadline")]
    /// The request exceeded the configured request timeout.
    Timeout { url: String },

    #[error("Received response code {status} when opening {url}")]
    /// The peer answered with a status outside of the success range.
    Status { url: String, status: StatusCode },

    #[error("Login against {url} failed with response code {status}")]
    /// The login endpoint rejected the configured credentials.
    Authentication { url: String, status: StatusCode },

    #[error("Didn't find port named {port:?} on {url}")]
    /// The site-to-site descriptor of a peer does not contain the port.
    PortNotFound { url: String, port: String },

    #[error("Response from {url} is not a valid peer list")]
    /// The peer discovery body could not be parsed.
    InvalidPeerList { url: String },

    #[error("Unable to open transaction at {url}: {reason}")]
    /// The transaction was accepted but the response could not be used.
    InvalidTransaction { url: String, reason: String },

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    #[error("Failed to build request: {0}")]
    Http(#[from] http::Error),

    #[error("No peers are available to handle the request")]
    /// The tracked peer list is empty.
    NoPeers,
}

impl SiteToSiteError {
    /// Creates a new transport error for the given url.
    pub fn transport(url: impl Into<String>, source: impl Into<BoxedError>) -> Self {
        Self::Transport {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Returns if the error was produced by a single candidate peer and
    /// the operation may succeed against another peer.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidUrl { .. }
                | Self::MissingHost { .. }
                | Self::InvalidHeader(_)
                | Self::Http(_)
                | Self::NoPeers
        )
    }
}
