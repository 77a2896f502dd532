//! Sample protocol: answers every chunk with a fixed payload.
//!
//! An empty configured payload is replaced by `"foo"`, so a fresh listener
//! always says something.
//!
//! ```text
//! Request:  <anything>
//! Response: foo
//! ```

use bytes::Bytes;
use tracing::debug;

use super::Protocol;
use crate::descriptor::{RequestDescriptor, ResponseDescriptor};
use crate::resolver::{ResolveFuture, Resolver};

const DEFAULT_RESPONSE: &str = "foo";

#[derive(Debug, Clone, Default)]
pub struct FooProtocol {
    response: Bytes,
}

impl FooProtocol {
    pub fn new(response: Option<String>) -> Self {
        Self {
            response: response.map(Bytes::from).unwrap_or_default(),
        }
    }
}

impl Protocol for FooProtocol {
    const NAME: &'static str = "foo";

    fn post_process(&self, response: ResponseDescriptor) -> ResponseDescriptor {
        if response.is_empty() {
            ResponseDescriptor::from(DEFAULT_RESPONSE)
        } else {
            response
        }
    }
}

impl Resolver for FooProtocol {
    fn resolve(&self, request: RequestDescriptor) -> ResolveFuture {
        debug!(from = request.request_from(), bytes = request.data().len(), "foo request");
        let response = self.post_process(ResponseDescriptor::new(self.response.clone()));
        Box::pin(async move { Ok(response) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_response() {
        let foo = FooProtocol::new(None);
        let response = foo.resolve(foo.test_request()).await.unwrap();
        assert_eq!(response.data().as_ref(), b"foo");
    }

    #[tokio::test]
    async fn test_configured_response() {
        let foo = FooProtocol::new(Some("bar".to_string()));
        let response = foo
            .resolve(RequestDescriptor::new("127.0.0.1:1", "anything"))
            .await
            .unwrap();
        assert_eq!(response.data().as_ref(), b"bar");
    }

    #[test]
    fn test_post_process_keeps_payload() {
        let foo = FooProtocol::default();
        assert_eq!(
            foo.post_process(ResponseDescriptor::from("x")),
            ResponseDescriptor::from("x")
        );
        assert_eq!(
            foo.post_process(ResponseDescriptor::empty()),
            ResponseDescriptor::from("foo")
        );
    }
}
