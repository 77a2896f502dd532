//! Echo protocol: every chunk is written back unchanged.
//!
//! Useful for checking connectivity and chunk ordering through the adapter
//! without any resolver logic.

use super::Protocol;
use crate::descriptor::{RequestDescriptor, ResponseDescriptor};
use crate::resolver::{ResolveFuture, Resolver};

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoProtocol;

impl Protocol for EchoProtocol {
    const NAME: &'static str = "echo";
}

impl Resolver for EchoProtocol {
    fn resolve(&self, request: RequestDescriptor) -> ResolveFuture {
        let response = self.post_process(ResponseDescriptor::new(request.into_data()));
        Box::pin(async move { Ok(response) })
    }
}
