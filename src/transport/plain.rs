//! Transport for cleartext HTTP/1 requests.

use super::RoundTrip;
use crate::{Body, Error};
use async_trait::async_trait;
use http::{Request, Response};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

/// Pooled HTTP/1 client used for requests the HTTP/2 pool does not serve.
#[derive(Debug, Clone)]
pub struct Http1Transport {
    client: Client<HttpConnector, Body>,
}

impl Http1Transport {
    /// Creates a transport that connects with `connector`.
    pub fn with_connector(connector: HttpConnector) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
        }
    }
}

impl Default for Http1Transport {
    fn default() -> Self {
        Self::with_connector(HttpConnector::new())
    }
}

#[async_trait]
impl RoundTrip for Http1Transport {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Incoming>, Error> {
        Ok(self.client.request(req).await?)
    }
}
