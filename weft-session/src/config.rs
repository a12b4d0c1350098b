use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use weft_core::RefreshConfig;

use crate::cli::Cli;
use crate::session::SessionConfig;

/// Grace period an asset stays served after its last lease is released.
const ASSET_GRACE: Duration = Duration::from_secs(60);

/// Runtime configuration derived from CLI/env.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub handshake_timeout: Duration,
    /// Reconnection window of a disconnected session.
    pub session_lifetime: Duration,
    pub sweep_interval: Duration,
    pub asset_grace: Duration,
    pub session: SessionConfig,
}

impl ServerConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let listen_addr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address {:?}", cli.listen_addr))?;
        if cli.max_refresh_rounds == 0 {
            bail!("--max-refresh-rounds must be at least 1");
        }
        if cli.tick_interval_ms == 0 || cli.sweep_interval_secs == 0 {
            bail!("tick and sweep intervals must be non-zero");
        }

        Ok(Self {
            listen_addr,
            handshake_timeout: Duration::from_secs(cli.handshake_timeout_secs),
            session_lifetime: Duration::from_secs(cli.session_lifetime_secs),
            sweep_interval: Duration::from_secs(cli.sweep_interval_secs),
            asset_grace: ASSET_GRACE,
            session: SessionConfig {
                tick_interval: Duration::from_millis(cli.tick_interval_ms),
                request_timeout: Duration::from_secs(cli.request_timeout_secs),
                refresh: RefreshConfig {
                    max_rounds: cli.max_refresh_rounds,
                    ..RefreshConfig::default()
                },
                ..SessionConfig::default()
            },
        })
    }
}
