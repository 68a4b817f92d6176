//! Response body interceptor
//!
//! The interceptor sits between the handler and the wire. The first data
//! chunk settles, once, whether the response is compressible at all. Bodies
//! that are not are forwarded untouched, frame by frame; the rest are
//! captured in full so the decision engine can see their final size.

use crate::mime::MimeFilter;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::HeaderMap;
use http_body::Frame;
use http_body_util::{BodyExt, BodyStream, StreamBody};
use shrinkwire_core::{Body, Result};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyState {
    Pristine,
    Decided { compress: bool },
}

/// What happened to a written chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Captured for compression
    Buffered,
    /// Must be forwarded unchanged
    Passthrough(Bytes),
}

/// Write-side state machine of the interceptor
#[derive(Debug)]
pub struct AdaptiveCompressionBody {
    filter: Arc<MimeFilter>,
    state: BodyState,
    buffer: BytesMut,
}

impl AdaptiveCompressionBody {
    /// Create a pristine interceptor
    pub fn new(filter: Arc<MimeFilter>) -> Self {
        Self {
            filter,
            state: BodyState::Pristine,
            buffer: BytesMut::new(),
        }
    }

    /// Accept a chunk written by the handler.
    ///
    /// `headers` are the response headers; they are only consulted on the
    /// first write.
    pub fn write(&mut self, headers: &HeaderMap, chunk: Bytes) -> WriteOutcome {
        if self.state == BodyState::Pristine {
            let compress = self.filter.should_compress_response(headers);
            trace!(compress, "Response compressibility decided");
            self.state = BodyState::Decided { compress };
        }

        match self.state {
            BodyState::Decided { compress: true } => {
                self.buffer.extend_from_slice(&chunk);
                WriteOutcome::Buffered
            }
            _ => WriteOutcome::Passthrough(chunk),
        }
    }

    /// `None` until the first write
    pub fn should_be_compressed(&self) -> Option<bool> {
        match self.state {
            BodyState::Pristine => None,
            BodyState::Decided { compress } => Some(compress),
        }
    }

    /// Bytes captured so far
    pub fn captured_len(&self) -> usize {
        self.buffer.len()
    }

    /// Hand over the captured bytes
    pub fn into_captured(self) -> Bytes {
        self.buffer.freeze()
    }
}

/// Outcome of [`intercept`]
#[derive(Debug)]
pub enum Intercepted {
    /// Not compressible; stream the remaining body as is
    Passthrough(Body),
    /// Whole body captured
    Captured(Bytes),
    /// The handler wrote no data
    Empty,
}

/// Drive `body` through an [`AdaptiveCompressionBody`].
///
/// Trailers of a captured body are dropped.
pub async fn intercept(filter: Arc<MimeFilter>, headers: &HeaderMap, mut body: Body) -> Result<Intercepted> {
    let mut interceptor = AdaptiveCompressionBody::new(filter);

    while let Some(frame) = body.frame().await {
        let frame = frame?;

        let frame = match frame.into_data() {
            Ok(chunk) => match interceptor.write(headers, chunk) {
                WriteOutcome::Buffered => continue,
                WriteOutcome::Passthrough(chunk) => Frame::data(chunk),
            },
            Err(frame) => {
                if interceptor.should_be_compressed().is_some() {
                    debug!("Dropping trailers of captured response body");
                    continue;
                }
                frame
            }
        };

        return Ok(Intercepted::Passthrough(rechain(frame, body)));
    }

    if interceptor.should_be_compressed().is_none() {
        return Ok(Intercepted::Empty);
    }

    Ok(Intercepted::Captured(interceptor.into_captured()))
}

fn rechain(first: Frame<Bytes>, rest: Body) -> Body {
    let stream = futures::stream::iter([Ok(first)]).chain(BodyStream::new(rest));
    StreamBody::new(stream).boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
    use http::HeaderValue;
    use shrinkwire_core::Error;

    fn headers(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        headers
    }

    fn chunked(chunks: &[&'static str]) -> Body {
        let frames: Vec<std::result::Result<Frame<Bytes>, Error>> = chunks
            .iter()
            .map(|c| Ok(Frame::data(Bytes::from_static(c.as_bytes()))))
            .collect();
        StreamBody::new(futures::stream::iter(frames)).boxed_unsync()
    }

    #[test]
    fn test_state_decided_once() {
        let mut body = AdaptiveCompressionBody::new(Arc::new(MimeFilter::default()));
        assert_eq!(body.should_be_compressed(), None);

        let json = headers("application/json");
        assert_eq!(body.write(&json, Bytes::from_static(b"{")), WriteOutcome::Buffered);
        assert_eq!(body.should_be_compressed(), Some(true));

        // Later header changes do not flip the verdict
        let png = headers("image/png");
        assert_eq!(body.write(&png, Bytes::from_static(b"}")), WriteOutcome::Buffered);
        assert_eq!(body.into_captured(), Bytes::from_static(b"{}"));
    }

    #[test]
    fn test_already_encoded_passes_through() {
        let mut body = AdaptiveCompressionBody::new(Arc::new(MimeFilter::default()));
        let mut encoded = headers("text/plain");
        encoded.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let chunk = Bytes::from_static(b"abc");
        assert_eq!(body.write(&encoded, chunk.clone()), WriteOutcome::Passthrough(chunk));
        assert_eq!(body.should_be_compressed(), Some(false));
        assert_eq!(body.captured_len(), 0);
    }

    #[tokio::test]
    async fn test_intercept_captures_compressible_body() {
        let filter = Arc::new(MimeFilter::default());
        let result = intercept(filter, &headers("text/plain"), chunked(&["hello ", "world"]))
            .await
            .unwrap();

        match result {
            Intercepted::Captured(data) => assert_eq!(data, Bytes::from_static(b"hello world")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_intercept_streams_incompressible_body() {
        let filter = Arc::new(MimeFilter::default());
        let result = intercept(filter, &headers("image/png"), chunked(&["ab", "cd", "ef"]))
            .await
            .unwrap();

        let Intercepted::Passthrough(body) = result else {
            panic!("expected passthrough");
        };
        let data = body.collect().await.unwrap().to_bytes();
        assert_eq!(data, Bytes::from_static(b"abcdef"));
    }

    #[tokio::test]
    async fn test_intercept_empty_body() {
        let filter = Arc::new(MimeFilter::default());
        let result = intercept(filter, &headers("text/plain"), shrinkwire_core::middleware::empty())
            .await
            .unwrap();
        assert!(matches!(result, Intercepted::Empty));
    }
}
