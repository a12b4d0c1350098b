use clap::Parser;

/// CLI for the weft session server.
#[derive(Debug, Clone, Parser)]
#[command(name = "weft", about = "Server-driven UI sessions over WebSocket")]
pub struct Cli {
    /// Listen address for HTTP/WS endpoints
    #[arg(long, env = "WEFT_ADDR", default_value = "127.0.0.1:8788")]
    pub listen_addr: String,

    /// Seconds a new connection has to send its handshake
    #[arg(long, env = "WEFT_HANDSHAKE_TIMEOUT_SECS", default_value = "60")]
    pub handshake_timeout_secs: u64,

    /// Seconds a disconnected session waits for its client to come back
    #[arg(long, env = "WEFT_SESSION_LIFETIME_SECS", default_value = "86400")]
    pub session_lifetime_secs: u64,

    /// Seconds between expiry sweeps
    #[arg(long, env = "WEFT_SWEEP_INTERVAL_SECS", default_value = "60")]
    pub sweep_interval_secs: u64,

    /// Milliseconds between component timer ticks
    #[arg(long, env = "WEFT_TICK_INTERVAL_MS", default_value = "1000")]
    pub tick_interval_ms: u64,

    /// Seconds a request to the client may stay unanswered
    #[arg(long, env = "WEFT_REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Rounds a refresh cycle may take before the session is closed
    #[arg(long, env = "WEFT_MAX_REFRESH_ROUNDS", default_value = "100")]
    pub max_refresh_rounds: usize,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,
}
