//! HTTP/2 transport bound to a single peer address.

use super::RoundTrip;
use crate::{dial::Dial, Body, Error};
use async_trait::async_trait;
use http::{header::ACCEPT_ENCODING, HeaderValue, Request, Response, Uri, Version};
use hyper::{
    body::Incoming,
    client::conn::http2::{self, SendRequest},
};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::{collections::HashMap, fmt, io, net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::{
    rustls::{pki_types::ServerName, ClientConfig, RootCertStore},
    TlsConnector,
};

/// Configuration shared, read-only, by every pooled [`Http2Transport`].
#[derive(Clone)]
pub struct Http2Config {
    /// TLS settings for `https` connections. The default trusts the
    /// `webpki-roots` anchors and offers ALPN `h2`; custom configurations
    /// should offer `h2` as well.
    pub tls: Arc<ClientConfig>,
    /// Hook used to open TCP connections. Connections are made straight to
    /// the pooled peer address when unset.
    pub dial: Option<Arc<dyn Dial>>,
    /// Ask servers for uncompressed responses (`accept-encoding: identity`)
    /// unless the request already states an encoding.
    pub disable_compression: bool,
    /// Send `http` requests as HTTP/2 over cleartext (prior knowledge)
    /// instead of handing them to the plain transport.
    pub allow_http: bool,
    /// Largest header list the peer may send, advertised in SETTINGS.
    pub max_header_list_size: Option<u32>,
    /// Never exceed the peer's concurrent stream limit. Hyper connections
    /// always queue streams beyond the limit, so the bundled transport honors
    /// the limit regardless; the flag is kept for custom transports.
    pub strict_max_concurrent_streams: bool,
}

impl Http2Config {
    /// Builds the default TLS settings: `webpki-roots` anchors and ALPN `h2`.
    pub fn default_tls() -> Arc<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let mut tls = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        tls.alpn_protocols = vec![b"h2".to_vec()];
        Arc::new(tls)
    }
}

impl Default for Http2Config {
    fn default() -> Self {
        Self {
            tls: Self::default_tls(),
            dial: None,
            disable_compression: false,
            allow_http: false,
            max_header_list_size: None,
            strict_max_concurrent_streams: false,
        }
    }
}

impl fmt::Debug for Http2Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Http2Config")
            .field("dial", &self.dial.is_some())
            .field("disable_compression", &self.disable_compression)
            .field("allow_http", &self.allow_http)
            .field("max_header_list_size", &self.max_header_list_size)
            .field(
                "strict_max_concurrent_streams",
                &self.strict_max_concurrent_streams,
            )
            .finish_non_exhaustive()
    }
}

/// Identifies a connection on a peer: requests for different hosts sharing an
/// address need their own TLS session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConnKey {
    tls: bool,
    host: String,
}

/// Connection slot of one [`ConnKey`]. Locked across a connect so concurrent
/// first requests for the same host share one connection.
type Slot = Arc<tokio::sync::Mutex<Option<SendRequest<Body>>>>;

/// HTTP/2 transport whose connections all go to one peer address.
///
/// One connection is kept per request host and reused for every request to
/// it until the connection closes. Connecting for one host never holds up
/// requests for another.
pub struct Http2Transport {
    config: Arc<Http2Config>,
    peer: SocketAddr,
    conns: parking_lot::Mutex<HashMap<ConnKey, Slot>>,
}

impl Http2Transport {
    /// Creates a transport sending requests to `peer`.
    pub fn new(config: Arc<Http2Config>, peer: SocketAddr) -> Self {
        Self {
            config,
            peer,
            conns: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Address this transport connects to.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Configuration this transport was created with.
    pub fn config(&self) -> &Arc<Http2Config> {
        &self.config
    }

    async fn connection(&self, uri: &Uri) -> Result<SendRequest<Body>, Error> {
        let tls = match uri.scheme_str() {
            Some("https") => true,
            Some("http") if self.config.allow_http => false,
            _ => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported scheme in {uri}"),
                )))
            }
        };
        let host = uri.host().ok_or(Error::MissingHost)?;
        let key = ConnKey {
            tls,
            host: host.trim_start_matches('[').trim_end_matches(']').to_owned(),
        };

        let cell = self.conns.lock().entry(key.clone()).or_default().clone();
        let mut slot = cell.lock().await;
        if let Some(sender) = slot.as_ref() {
            if !sender.is_closed() {
                return Ok(sender.clone());
            }
        }
        let sender = self.connect(&key).await?;
        *slot = Some(sender.clone());
        Ok(sender)
    }

    async fn connect(&self, key: &ConnKey) -> Result<SendRequest<Body>, Error> {
        let tcp = match &self.config.dial {
            Some(dial) => dial.dial_tcp("tcp", &self.peer.to_string()).await?,
            None => TcpStream::connect(self.peer).await?,
        };
        #[cfg(feature = "log")]
        tracing::debug!(peer = %self.peer, host = %key.host, tls = key.tls, "connected");

        if !key.tls {
            return self.handshake(tcp).await;
        }
        let server_name = ServerName::try_from(key.host.clone())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        let stream = TlsConnector::from(self.config.tls.clone())
            .connect(server_name, tcp)
            .await?;
        self.handshake(stream).await
    }

    async fn handshake<T>(&self, io: T) -> Result<SendRequest<Body>, Error>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut builder = http2::Builder::new(TokioExecutor::new());
        if let Some(max) = self.config.max_header_list_size {
            builder.max_header_list_size(max);
        }
        let (sender, conn) = builder.handshake(TokioIo::new(io)).await?;
        #[cfg(feature = "log")]
        let peer = self.peer;
        tokio::spawn(async move {
            if let Err(_err) = conn.await {
                #[cfg(feature = "log")]
                tracing::debug!(peer = %peer, error = %_err, "connection closed with error");
            }
        });
        Ok(sender)
    }
}

#[async_trait]
impl RoundTrip for Http2Transport {
    async fn round_trip(&self, mut req: Request<Body>) -> Result<Response<Incoming>, Error> {
        let mut sender = self.connection(req.uri()).await?;
        *req.version_mut() = Version::HTTP_2;
        if self.config.disable_compression && !req.headers().contains_key(ACCEPT_ENCODING) {
            req.headers_mut()
                .insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        }
        sender.ready().await?;
        Ok(sender.send_request(req).await?)
    }
}

impl fmt::Debug for Http2Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Http2Transport")
            .field("peer", &self.peer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
