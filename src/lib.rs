#![deny(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

/*!
HTTP/2 client transport that balances requests across every address a host
resolves to.

# Introduction

A hostname often resolves to several addresses, each fronting the same
service. A typical HTTP client picks one of them when it first connects and
keeps sending every request over that single connection. `h2lb` instead keeps a
separate HTTP/2 transport for *each* address and spreads requests across them:

```text
                       ┌─> Http2Transport (10.0.0.1:443)
request ─> Transport ──┼─> Http2Transport (10.0.0.2:443)
                       └─> Http2Transport (10.0.0.3:443)
```

Addresses come from a [`Resolver`], which caches the addresses of every host
it has been asked about and refreshes them in the background, so request
dispatch normally never waits on DNS. A host that fails to resolve (or
resolves to nothing) keeps its last known addresses.

```no_run
# use h2lb::{body, resolver::{Resolver, SystemLookup}, RoundTrip, Transport};
# use std::{sync::Arc, time::Duration};
# #[tokio::main]
# async fn main() -> Result<(), h2lb::Error> {
let resolver = Arc::new(Resolver::<SystemLookup>::new(Duration::from_secs(60)));
let transport = Transport::builder().resolver(resolver).build();

let req = http::Request::get("https://example.com/")
    .body(body::empty())
    .expect("valid request");
let res = transport.round_trip(req).await?;
println!("{}", res.status());
# Ok(())
# }
```

# Collaborators

The wire protocols are provided by [`hyper`] and TLS by `tokio-rustls`. Each
piece `h2lb` relies on can be replaced by implementing a trait:

- name resolution via [`HostLookup`] (a `hickory-resolver` backend is
  available with the `hickory` feature),
- raw connection establishment via [`Connect`] and the [`Dial`] hook used by
  HTTP/2 transports,
- the transport for non-HTTP/2 traffic via [`RoundTrip`].

[`Resolver`]: resolver::Resolver
[`HostLookup`]: resolver::HostLookup
[`Connect`]: dial::Connect
[`Dial`]: dial::Dial
*/

mod error;
pub use error::Error;

pub mod body;
pub mod dial;
pub mod resolver;

mod transport;
pub use transport::{
    get_port, Builder, Http1Transport, Http2Config, Http2Transport, RoundTrip, Transport,
};

/// Type-erased error carried by bodies and resolver failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Request body accepted by every transport.
pub type Body = http_body_util::combinators::BoxBody<bytes::Bytes, BoxError>;
