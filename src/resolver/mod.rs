//! Host resolvers.

use async_trait::async_trait;
use std::net::IpAddr;

mod cache;
pub use cache::{Resolver, DEFAULT_REFRESH_INTERVAL, LOOKUP_PACING, MIN_REFRESH_INTERVAL};

#[cfg(feature = "hickory")]
mod hickory;

/// Represents the ability to resolve a hostname into IP addresses.
#[async_trait]
pub trait HostLookup: Send + Sync {
    /// Errors encountered during resolution.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Resolves `host` into its addresses, in the order the backend returned
    /// them. An empty list is a successful answer, not an error.
    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, Self::Error>;
}

/// Resolver backed by the operating system (`getaddrinfo`), run on Tokio's
/// blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

#[async_trait]
impl HostLookup for SystemLookup {
    type Error = std::io::Error;

    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, Self::Error> {
        let mut ips = Vec::new();
        for addr in tokio::net::lookup_host((host, 0)).await? {
            // getaddrinfo repeats addresses once per socket type on some platforms
            if !ips.contains(&addr.ip()) {
                ips.push(addr.ip());
            }
        }
        Ok(ips)
    }
}
