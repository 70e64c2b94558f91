//! Host resolver backed by [`hickory_resolver`].

use super::HostLookup;
use async_trait::async_trait;
use hickory_resolver::{name_server::ConnectionProvider, ResolveError, Resolver};
use std::net::IpAddr;

#[async_trait]
impl<P> HostLookup for Resolver<P>
where
    P: ConnectionProvider,
{
    type Error = ResolveError;

    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, Self::Error> {
        let lookup = self.lookup_ip(host).await?;
        Ok(lookup.iter().collect())
    }
}
