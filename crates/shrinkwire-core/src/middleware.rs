//! Middleware trait and utilities

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use std::fmt;
use std::sync::Arc;

/// Streaming body type shared by requests and responses.
///
/// Unlike a fully buffered body this lets a handler emit frames as they are
/// produced, which the bandwidth echo responder and the body interceptor rely on.
pub type Body = UnsyncBoxBody<Bytes, Error>;

/// Build a body from a complete buffer
pub fn full(data: impl Into<Bytes>) -> Body {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Build an empty body
pub fn empty() -> Body {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Middleware trait for request/response processing
#[async_trait]
pub trait Middleware: Send + Sync + fmt::Debug {
    /// Process a request
    ///
    /// # Arguments
    ///
    /// * `req` - The incoming HTTP request
    /// * `next` - The next middleware/handler in the chain
    ///
    /// # Returns
    ///
    /// Returns the HTTP response or an error
    async fn call(&self, req: Request<Body>, next: Next) -> Result<Response<Body>>;
}

/// Type alias for the final handler function
pub type HandlerFn = Box<
    dyn Fn(
            Request<Body>,
        )
            -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response<Body>>> + Send>>
        + Send
        + Sync,
>;

/// Represents the next middleware/handler in the chain
pub struct Next {
    middleware_stack: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    final_handler: Option<Arc<HandlerFn>>,
}

impl Next {
    /// Create a new Next from a middleware stack
    pub fn new(middleware_stack: Arc<[Arc<dyn Middleware>]>) -> Self {
        Self {
            middleware_stack,
            index: 0,
            final_handler: None,
        }
    }

    /// Create a new Next with a final handler
    pub fn with_handler(middleware_stack: Arc<[Arc<dyn Middleware>]>, handler: HandlerFn) -> Self {
        Self {
            middleware_stack,
            index: 0,
            final_handler: Some(Arc::new(handler)),
        }
    }

    /// Create a Next that only runs the given handler
    pub fn handler(handler: HandlerFn) -> Self {
        Self::with_handler(Arc::new([]), handler)
    }

    /// Run the next middleware or final handler
    pub async fn run(self, req: Request<Body>) -> Result<Response<Body>> {
        if let Some(middleware) = self.middleware_stack.get(self.index) {
            let next = Self {
                middleware_stack: Arc::clone(&self.middleware_stack),
                index: self.index + 1,
                final_handler: self.final_handler.clone(),
            };
            middleware.call(req, next).await
        } else if let Some(handler) = self.final_handler {
            handler(req).await
        } else {
            Err(Error::Internal(
                "Middleware chain completed without handler".to_string(),
            ))
        }
    }
}

impl Clone for Next {
    fn clone(&self) -> Self {
        Self {
            middleware_stack: Arc::clone(&self.middleware_stack),
            index: self.index,
            final_handler: self.final_handler.clone(),
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("remaining", &(self.middleware_stack.len() - self.index))
            .field("has_handler", &self.final_handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[derive(Debug)]
    struct TagMiddleware {
        tag: &'static str,
    }

    #[async_trait]
    impl Middleware for TagMiddleware {
        async fn call(&self, req: Request<Body>, next: Next) -> Result<Response<Body>> {
            let mut response = next.run(req).await?;
            response
                .headers_mut()
                .append("x-tag", HeaderValue::from_static(self.tag));
            Ok(response)
        }
    }

    #[tokio::test]
    async fn test_middleware_chain_without_handler() {
        let middleware = Arc::new(TagMiddleware { tag: "first" }) as Arc<dyn Middleware>;
        let stack: Arc<[Arc<dyn Middleware>]> = Arc::new([middleware]);
        let next = Next::new(stack);

        let req = Request::builder().uri("/test").body(empty()).unwrap();

        let result = next.run(req).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_middleware_chain_order() {
        let first = Arc::new(TagMiddleware { tag: "first" }) as Arc<dyn Middleware>;
        let second = Arc::new(TagMiddleware { tag: "second" }) as Arc<dyn Middleware>;
        let stack: Arc<[Arc<dyn Middleware>]> = Arc::new([first, second]);
        let next = Next::with_handler(
            stack,
            Box::new(|_req| Box::pin(async { Ok(Response::new(full("hello"))) })),
        );

        let req = Request::builder().uri("/test").body(empty()).unwrap();
        let response = next.run(req).await.unwrap();

        // innermost middleware tags first on the way out
        let tags: Vec<_> = response.headers().get_all("x-tag").iter().collect();
        assert_eq!(tags, vec!["second", "first"]);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"hello"));
    }
}
