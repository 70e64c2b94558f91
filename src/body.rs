//! Request bodies accepted by the transports.

use crate::{Body, BoxError};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};

/// Creates a body with no data, for GET, HEAD and similar requests.
pub fn empty() -> Body {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Creates a body holding `data` in a single frame.
pub fn full(data: impl Into<Bytes>) -> Body {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Boxes any compatible body into a [`Body`].
pub fn boxed<B>(body: B) -> Body
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed()
}
