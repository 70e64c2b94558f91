//! Errors produced while dispatching requests.

use crate::BoxError;

/// Errors encountered while routing a request to one of a host's addresses.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Host resolution errors
    #[error("resolving {host}")]
    Resolve {
        /// Host that failed to resolve.
        host: String,
        /// Error reported by the resolver backend.
        #[source]
        source: BoxError,
    },
    /// Produced when a request URI carries no host to route on
    #[error("request uri has no host")]
    MissingHost,
    /// Produced when a host resolved successfully but to no addresses
    #[error("no addresses found for {0}")]
    NoAddresses(String),
    /// Dial and TLS errors
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// HTTP protocol errors from an established connection
    #[error(transparent)]
    Http(#[from] hyper::Error),
    /// Errors from the plain HTTP/1 client
    #[error(transparent)]
    Client(#[from] hyper_util::client::legacy::Error),
}
