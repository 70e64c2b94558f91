//! Connection establishment that prefers a [`Resolver`]'s cached addresses.

use crate::resolver::{HostLookup, Resolver, SystemLookup};
use async_trait::async_trait;
use std::{
    io,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use tokio::net::TcpStream;

/// Raw dial primitive: opens a connection to `address` (`host:port`) over
/// `network`.
#[async_trait]
pub trait Connect: Send + Sync {
    /// Connection produced by a successful dial.
    type Conn: Send;

    /// Opens a connection to `address`.
    async fn connect(&self, network: &str, address: &str) -> io::Result<Self::Conn>;
}

/// Dials TCP connections with Tokio. Hostnames are resolved by the system.
///
/// Supported networks are `tcp`, `tcp4` and `tcp6`; the latter two only
/// connect to addresses of their family.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnect;

#[async_trait]
impl Connect for TcpConnect {
    type Conn = TcpStream;

    async fn connect(&self, network: &str, address: &str) -> io::Result<TcpStream> {
        let family: fn(&SocketAddr) -> bool = match network {
            "tcp" => return TcpStream::connect(address).await,
            "tcp4" => SocketAddr::is_ipv4,
            "tcp6" => SocketAddr::is_ipv6,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported network {other:?}"),
                ))
            }
        };
        let mut last_err = None;
        for addr in tokio::net::lookup_host(address).await?.filter(family) {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no {network} address for {address}"),
            )
        }))
    }
}

/// Hook used by protocol transports to open their TCP connections.
#[async_trait]
pub trait Dial: Send + Sync {
    /// Opens a TCP connection to `address` (`host:port`) over `network`.
    async fn dial_tcp(&self, network: &str, address: &str) -> io::Result<TcpStream>;
}

/// Dialer that tries each of a host's cached addresses in order before
/// falling back to dialing the hostname itself.
pub struct Dialer<L = SystemLookup, C = TcpConnect> {
    resolver: Arc<Resolver<L>>,
    connector: C,
}

impl<L> Dialer<L> {
    /// Creates a dialer that looks up hosts in `resolver` and dials over TCP.
    pub fn new(resolver: Arc<Resolver<L>>) -> Self {
        Self::with_connector(resolver, TcpConnect)
    }
}

impl<L, C> Dialer<L, C> {
    /// Creates a dialer that looks up hosts in `resolver` and dials with
    /// `connector`.
    pub fn with_connector(resolver: Arc<Resolver<L>>, connector: C) -> Self {
        Self {
            resolver,
            connector,
        }
    }

    /// Gets the resolver consulted for candidate addresses.
    pub fn resolver(&self) -> &Arc<Resolver<L>> {
        &self.resolver
    }
}

impl<L: HostLookup, C: Connect> Dialer<L, C> {
    /// Connects to `address` (`host:port`).
    ///
    /// Each address the resolver knows for `host` is tried in turn with the
    /// original port; the first connection that succeeds is returned. When
    /// none do (or the host could not be resolved), `address` is dialed as is,
    /// and only the error of that final attempt is reported.
    pub async fn dial(&self, network: &str, address: &str) -> io::Result<C::Conn> {
        let (host, port) = split_host_port(address)?;
        // Literal addresses have nothing to resolve
        if host.parse::<IpAddr>().is_ok() {
            return self.connector.connect(network, address).await;
        }

        let candidates: Arc<[IpAddr]> = match self.resolver.get(host).await {
            Ok(ips) => ips,
            Err(_err) => {
                #[cfg(feature = "log")]
                tracing::debug!(host, error = %_err, "resolution failed, dialing host directly");
                Arc::new([])
            }
        };
        for ip in candidates.iter() {
            let target = SocketAddr::new(*ip, port).to_string();
            match self.connector.connect(network, &target).await {
                Ok(conn) => return Ok(conn),
                Err(_err) => {
                    #[cfg(feature = "log")]
                    tracing::debug!(address = %target, error = %_err, "dial attempt failed");
                }
            }
        }
        self.connector.connect(network, address).await
    }
}

#[async_trait]
impl<L, C> Dial for Dialer<L, C>
where
    L: HostLookup,
    C: Connect<Conn = TcpStream>,
{
    async fn dial_tcp(&self, network: &str, address: &str) -> io::Result<TcpStream> {
        self.dial(network, address).await
    }
}

/// Splits `host:port` (or `[v6]:port`) into its host and numeric port.
pub fn split_host_port(address: &str) -> io::Result<(&str, u16)> {
    let invalid = |reason: &str| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{reason} in address {address:?}"),
        )
    };
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| invalid("missing port"))?;
    let host = match host.strip_prefix('[') {
        Some(bracketed) => bracketed
            .strip_suffix(']')
            .ok_or_else(|| invalid("missing ']'"))?,
        None if host.contains(':') => return Err(invalid("too many colons")),
        None => host,
    };
    let port = port.parse().map_err(|_| invalid("invalid port"))?;
    Ok((host, port))
}
