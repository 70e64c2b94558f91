//! Request dispatch across every address a host resolves to.

use crate::{
    dial::Dialer,
    resolver::{HostLookup, Resolver, SystemLookup},
    Body, BoxError, Error,
};
use async_trait::async_trait;
use http::{Request, Response};
use hyper::body::Incoming;
use parking_lot::Mutex;
use rand::Rng;
use std::{
    collections::HashMap,
    fmt,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

mod h2;
pub use h2::{Http2Config, Http2Transport};

mod plain;
pub use plain::Http1Transport;

/// Represents the ability to send a request and receive its response.
#[async_trait]
pub trait RoundTrip: Send + Sync {
    /// Sends `req`, making a single attempt.
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Incoming>, Error>;
}

#[async_trait]
impl<T: RoundTrip + ?Sized> RoundTrip for Arc<T> {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Incoming>, Error> {
        (**self).round_trip(req).await
    }
}

/// Transport that spreads HTTP/2 requests over all of a host's addresses.
///
/// Every address a request's host resolves to gets its own pooled
/// [`Http2Transport`]; each request is sent through one of them, picked
/// uniformly at random. Requests that are not `https` (or `http` when
/// [`Http2Config::allow_http`] is set) go to the plain transport instead.
///
/// Pooled transports are kept for the lifetime of the `Transport`, even once
/// their address stops being returned by resolution.
pub struct Transport<L = SystemLookup> {
    config: Arc<Http2Config>,
    plain: Arc<dyn RoundTrip>,
    resolver: Option<Arc<Resolver<L>>>,
    pool: Mutex<HashMap<SocketAddr, Arc<Http2Transport>>>,
}

/// Builder for a [`Transport`].
pub struct Builder<L = SystemLookup> {
    config: Option<Http2Config>,
    plain: Option<Arc<dyn RoundTrip>>,
    resolver: Option<Arc<Resolver<L>>>,
}

impl Transport {
    /// Creates a builder for a transport that resolves hosts directly on every
    /// request until a resolver is set.
    pub fn builder() -> Builder {
        Builder {
            config: None,
            plain: None,
            resolver: None,
        }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<L> Builder<L> {
    /// Sets the resolver used to look up request hosts. When the HTTP/2
    /// configuration has no dial hook, a [`Dialer`] over this resolver is
    /// installed as one.
    ///
    /// Pooled transports always dial their own `ip:port`, which the
    /// [`Dialer`] connects to directly without consulting the resolver; the
    /// resolver's addresses are applied when picking the pooled transport.
    pub fn resolver<R: HostLookup + 'static>(self, resolver: Arc<Resolver<R>>) -> Builder<R> {
        Builder {
            resolver: Some(resolver),
            config: self.config,
            plain: self.plain,
        }
    }

    /// Sets the configuration shared by pooled HTTP/2 transports.
    pub fn http2(self, config: Http2Config) -> Self {
        Self {
            config: Some(config),
            ..self
        }
    }

    /// Sets the transport used for requests the HTTP/2 pool does not serve.
    pub fn plain(self, plain: impl RoundTrip + 'static) -> Self {
        Self {
            plain: Some(Arc::new(plain)),
            ..self
        }
    }
}

impl<L: HostLookup + 'static> Builder<L> {
    /// Builds the transport.
    pub fn build(self) -> Transport<L> {
        let mut config = self.config.unwrap_or_default();
        if config.dial.is_none() {
            if let Some(resolver) = &self.resolver {
                config.dial = Some(Arc::new(Dialer::new(resolver.clone())));
            }
        }
        Transport {
            config: Arc::new(config),
            plain: self
                .plain
                .unwrap_or_else(|| Arc::new(Http1Transport::default())),
            resolver: self.resolver,
            pool: Mutex::new(HashMap::new()),
        }
    }
}

impl<L: HostLookup> Transport<L> {
    /// Gets the pooled transport to send `req` through.
    ///
    /// Resolves the request host, makes sure every resolved address has a
    /// pooled transport, and returns the one for a randomly chosen address.
    pub async fn get_transport<B>(&self, req: &Request<B>) -> Result<Arc<Http2Transport>, Error> {
        let uri = req.uri();
        let host = uri.host().ok_or(Error::MissingHost)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let addrs = self.addrs(host).await?;

        let chosen = match addrs.len() {
            0 | 1 => 0,
            n => rand::rng().random_range(0..n),
        };
        let hostport = match uri.authority() {
            // Userinfo is not part of the address
            Some(authority) => authority.as_str().rsplit('@').next().unwrap_or(host),
            None => host,
        };
        let port = get_port(uri.scheme_str().unwrap_or_default(), hostport);

        let mut pool = self.pool.lock();
        let mut selected = None;
        for (idx, ip) in addrs.iter().enumerate() {
            let peer = SocketAddr::new(*ip, port);
            let transport = pool.entry(peer).or_insert_with(|| {
                #[cfg(feature = "log")]
                tracing::debug!(host, peer = %peer, "pooling new transport");
                Arc::new(Http2Transport::new(self.config.clone(), peer))
            });
            if idx == chosen {
                selected = Some(transport.clone());
            }
        }
        selected.ok_or_else(|| Error::NoAddresses(host.to_owned()))
    }

    async fn addrs(&self, host: &str) -> Result<Arc<[IpAddr]>, Error> {
        let resolve_error = |source: BoxError| Error::Resolve {
            host: host.to_owned(),
            source,
        };
        match &self.resolver {
            Some(resolver) => resolver
                .get(host)
                .await
                .map_err(|err| resolve_error(err.into())),
            None => SystemLookup
                .lookup_host(host)
                .await
                .map(Into::into)
                .map_err(|err| resolve_error(err.into())),
        }
    }

    /// Addresses that currently have a pooled transport.
    pub fn pooled_peers(&self) -> Vec<SocketAddr> {
        self.pool.lock().keys().copied().collect()
    }

    /// Configuration shared by pooled transports.
    pub fn config(&self) -> &Arc<Http2Config> {
        &self.config
    }

    /// Resolver used to look up request hosts, if any.
    pub fn resolver(&self) -> Option<&Arc<Resolver<L>>> {
        self.resolver.as_ref()
    }
}

#[async_trait]
impl<L: HostLookup> RoundTrip for Transport<L> {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Incoming>, Error> {
        let pooled = match req.uri().scheme_str() {
            Some("https") => true,
            Some("http") => self.config.allow_http,
            _ => false,
        };
        if !pooled {
            return self.plain.round_trip(req).await;
        }
        let transport = self.get_transport(&req).await?;
        transport.round_trip(req).await
    }
}

impl<L> fmt::Debug for Transport<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("config", &self.config)
            .field("resolver", &self.resolver.is_some())
            .field("pooled", &self.pool.lock().len())
            .finish_non_exhaustive()
    }
}

/// Gets the port of `hostport`, or the default port of `scheme` when it has
/// none: 80 for `http`, 443 otherwise.
pub fn get_port(scheme: &str, hostport: &str) -> u16 {
    crate::dial::split_host_port(hostport)
        .map(|(_, port)| port)
        .unwrap_or(if scheme == "http" { 80 } else { 443 })
}
