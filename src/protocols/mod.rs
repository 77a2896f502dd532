//! Protocol plugins.
//!
//! A protocol is a [`Resolver`] with a name and the defaults it applies to
//! responses. The adapter stays protocol-agnostic; everything a wire
//! protocol means lives here.
//!
//! - `foo`: sample protocol, answers with a fixed payload (`"foo"` if none)
//! - `echo`: writes every chunk back unchanged

pub mod echo;
pub mod foo;

pub use echo::EchoProtocol;
pub use foo::FooProtocol;

use crate::config::{ListenerConfig, ProtocolConfig, ProtocolType};
use crate::descriptor::{RequestDescriptor, ResponseDescriptor};
use crate::resolver::Resolver;
use crate::server::Adapter;

/// A resolver that knows its own wire conventions.
pub trait Protocol: Resolver + Sized {
    const NAME: &'static str;

    /// A request that exercises the protocol without a real client.
    fn test_request(&self) -> RequestDescriptor {
        RequestDescriptor::new("", "")
    }

    /// Fill in protocol defaults on a response before it is written.
    fn post_process(&self, response: ResponseDescriptor) -> ResponseDescriptor {
        response
    }

    /// An adapter serving this protocol, tagged with its name.
    fn into_adapter(self, config: ListenerConfig) -> Adapter<Self> {
        Adapter::new(config, self).with_metadata("protocol", Self::NAME)
    }
}

/// Name of the protocol selected by `config`.
pub fn protocol_name(config: &ProtocolConfig) -> &'static str {
    match config.name {
        ProtocolType::Foo => FooProtocol::NAME,
        ProtocolType::Echo => EchoProtocol::NAME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_name() {
        let mut config = ProtocolConfig::default();
        assert_eq!(protocol_name(&config), "foo");
        config.name = ProtocolType::Echo;
        assert_eq!(protocol_name(&config), "echo");
    }

    #[tokio::test]
    async fn test_adapter_metadata() {
        let adapter = EchoProtocol.into_adapter(ListenerConfig::default());
        let handle = adapter.start().await.unwrap();
        assert_eq!(
            handle.metadata().get("protocol").map(String::as_str),
            Some("echo")
        );
        handle.shutdown().await;
    }
}
