//! Command line interface for the `httpwire` demo server.

use std::{net::SocketAddr, time::Duration};

use clap::Parser;

/// Command line arguments for the `httpwire` binary.
#[derive(Debug, Parser)]
#[command(
    name = "httpwire",
    version,
    about = "Demo HTTP/1.1 and WebSocket echo server"
)]
pub struct Cli {
    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    pub addr: SocketAddr,

    /// Worker threads running handlers.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Requests that may wait for a worker before new ones get `503`.
    #[arg(long)]
    pub queue_size: Option<usize>,

    /// Seconds an idle connection is kept open.
    #[arg(long, value_parser = parse_secs)]
    pub idle_timeout: Option<Duration>,

    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

fn parse_secs(s: &str) -> Result<Duration, String> {
    s.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|err| format!("invalid number of seconds: {err}"))
}
