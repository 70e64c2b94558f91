// Shared test infrastructure — not every test binary uses every item.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use h2lb::resolver::HostLookup;
use http::{Request, Response};
use http_body_util::Full;
use hyper::{body::Incoming, service::service_fn};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::{
    collections::HashMap,
    convert::Infallible,
    io,
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::net::TcpListener;

/// Resolver answering from a fixed table of hosts.
#[derive(Debug, Clone, Default)]
pub struct FixedLookup {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl FixedLookup {
    /// Adds `host` resolving to `ips`.
    pub fn host(mut self, host: &str, ips: &[&str]) -> Self {
        let ips = ips.iter().map(|ip| ip.parse().unwrap()).collect();
        self.hosts.insert(host.to_owned(), ips);
        self
    }
}

#[async_trait]
impl HostLookup for FixedLookup {
    type Error = io::Error;

    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, Self::Error> {
        self.hosts
            .get(host)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, host.to_owned()))
    }
}

/// Protocol spoken by an [`EchoServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// HTTP/2 with prior knowledge over cleartext.
    H2c,
    /// HTTP/1.1.
    Http1,
}

/// Loopback server answering every request with
/// `"<host> <path> <accept-encoding>"`.
pub struct EchoServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

impl EchoServer {
    /// Starts a server on an ephemeral port of `127.0.0.1`.
    pub async fn spawn(protocol: Protocol) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind loopback listener");
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        tokio::spawn(Self::accept_loop(listener, protocol, connections.clone()));
        Self { addr, connections }
    }

    /// Address the server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    async fn accept_loop(listener: TcpListener, protocol: Protocol, connections: Arc<AtomicUsize>) {
        while let Ok((stream, _)) = listener.accept().await {
            connections.fetch_add(1, Ordering::SeqCst);
            let io = TokioIo::new(stream);
            let service = service_fn(echo);
            tokio::spawn(async move {
                let _ = match protocol {
                    Protocol::H2c => {
                        hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                            .serve_connection(io, service)
                            .await
                    }
                    Protocol::Http1 => {
                        hyper::server::conn::http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                    }
                };
            });
        }
    }
}

async fn echo(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let host = match req.uri().host() {
        Some(host) => host.to_owned(),
        None => req
            .headers()
            .get(http::header::HOST)
            .and_then(|host| host.to_str().ok())
            .unwrap_or_default()
            .to_owned(),
    };
    let encoding = req
        .headers()
        .get(http::header::ACCEPT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    let body = format!("{host} {} {encoding}", req.uri().path());
    Ok(Response::new(Full::new(Bytes::from(body))))
}
