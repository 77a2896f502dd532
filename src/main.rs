//! byte-relay: relay raw TCP bytes through a protocol plugin
//!
//! Binds a listener, answers each data chunk with the configured protocol:
//! - foo: a fixed payload ("foo" unless configured)
//! - echo: the chunk itself
//!
//! Configuration via CLI arguments or TOML file.

use byte_relay::config::{Config, ProtocolType};
use byte_relay::logging::Logging;
use byte_relay::protocols::{EchoProtocol, FooProtocol, Protocol};
use byte_relay::Adapter;
use byte_relay::Resolver;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let logging = Logging::build(&config.logging)?;
    logging.install()?;

    info!(
        host = %config.listener.host,
        port = config.listener.port,
        protocol = byte_relay::protocols::protocol_name(&config.protocol),
        "Starting byte-relay"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let listener = config.listener.clone();
    let result = runtime.block_on(async move {
        match config.protocol.name {
            ProtocolType::Foo => {
                serve(FooProtocol::new(config.protocol.response).into_adapter(listener)).await
            }
            ProtocolType::Echo => serve(EchoProtocol.into_adapter(listener)).await,
        }
    });

    logging.flush()?;
    result
}

/// Run until Ctrl-C, then close the listener.
async fn serve<R: Resolver>(adapter: Adapter<R>) -> Result<(), Box<dyn std::error::Error>> {
    let handle = adapter.start().await?;
    info!(port = handle.port(), metadata = ?handle.metadata(), "Listening");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    handle.shutdown().await;
    info!(
        open_connections = handle.active_connections(),
        "Listener stopped"
    );
    Ok(())
}
