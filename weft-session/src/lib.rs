//! Sessions, transports and the WebSocket server for weft
//!
//! A session pairs one component [`Tree`](weft_core::Tree) with one remote
//! client. The client connects over a [`Transport`], completes a handshake,
//! and from then on receives attribute deltas and sends events. Sessions
//! survive dropped connections: a client that reconnects with its token
//! within the lifetime window gets the full current state back.
//!
//! ## Architecture
//!
//! ```text
//! /ws ──→ SessionHost::connect ─┬─ token ──→ SessionRegistry::resume ──→ reattach
//!                               └─ handshake ─→ SessionHandle::start ──→ serving loop
//!                                                                   │
//!                                  Transport ⇄ loop ⇄ Tree (weft-core)
//! ```

pub mod cli;
pub mod collaborators;
pub mod config;
pub mod demo;
pub mod error;
pub mod handshake;
pub mod host;
pub mod lifecycle;
pub mod registry;
pub mod requests;
pub mod server;
pub mod session;
pub mod transport;

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

pub use collaborators::{
    AssetRegistry, AssetService, CurrentUrl, Navigation, PageRouter, RouteTable, Services,
    UploadBroker, UploadService,
};
pub use config::ServerConfig;
pub use error::{
    CollaboratorError, ConnectError, HandshakeError, LayoutCheckError, NavigationError,
    RegistryError, TransportError,
};
pub use host::{Application, SessionHost};
pub use lifecycle::LifecycleState;
pub use registry::SessionRegistry;
pub use session::{SessionConfig, SessionHandle, SessionToken};
pub use transport::{
    CloseReason, MultiplexTransport, RecordingTransport, Transport, WebSocketTransport,
};

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

/// Run the demo server using CLI args (parsed by the caller).
pub async fn run_with_cli(cli: cli::Cli) -> Result<()> {
    init_tracing(cli.verbose)?;

    let cfg = ServerConfig::from_cli(&cli)?;
    server::serve(cfg, demo::registry(), Arc::new(demo::routes())).await
}
