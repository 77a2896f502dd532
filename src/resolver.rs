//! The resolver seam.
//!
//! The adapter knows nothing about what a request means. It hands every
//! [`RequestDescriptor`] to a [`Resolver`] and writes back whatever bytes the
//! resolver produces. Any `Fn(RequestDescriptor) -> impl Future` closure is a
//! resolver, so most callers never implement the trait by hand.

use std::future::Future;
use std::pin::Pin;

use crate::descriptor::{RequestDescriptor, ResponseDescriptor};
use crate::error::ResolverError;

/// Future returned by [`Resolver::resolve`].
pub type ResolveFuture =
    Pin<Box<dyn Future<Output = Result<ResponseDescriptor, ResolverError>> + Send + 'static>>;

/// Maps a request to a response, asynchronously.
///
/// The adapter places no timeout on the returned future. A resolver that
/// needs one applies it itself.
pub trait Resolver: Send + Sync + 'static {
    fn resolve(&self, request: RequestDescriptor) -> ResolveFuture;
}

impl<F, Fut> Resolver for F
where
    F: Fn(RequestDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResponseDescriptor, ResolverError>> + Send + 'static,
{
    fn resolve(&self, request: RequestDescriptor) -> ResolveFuture {
        Box::pin(self(request))
    }
}
