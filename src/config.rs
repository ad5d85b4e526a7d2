//! Tunables shared by the server and client reactors.
//!
//! All structs implement [`serde::Deserialize`] with per-field defaults, so a
//! partial configuration file only needs the fields it changes. Values are
//! clamped by `normalized()` before a reactor starts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Smallest accepted line limit; shorter limits cannot hold a request line.
pub const MIN_LINE_LENGTH: usize = 64;

/// Size limits applied while decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Longest accepted initial or header line, excluding the terminator.
    pub max_line: usize,
    /// Largest accepted HTTP body.
    pub max_body: usize,
    /// Largest accepted WebSocket message after reassembly.
    pub max_ws_message: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_line: 8192,
            max_body: 8 * 1024 * 1024,
            max_ws_message: 4 * 1024 * 1024,
        }
    }
}

impl Limits {
    /// Raise the line limit to [`MIN_LINE_LENGTH`] if set lower.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.max_line = self.max_line.max(MIN_LINE_LENGTH);
        self
    }
}

/// Whether connections open with a PROXY protocol v1 preface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    /// The first line is always a request line.
    #[default]
    Disabled,
    /// A leading `PROXY` line is used when present.
    Optional,
    /// Every connection must start with a `PROXY` line.
    Enabled,
}

/// Server reactor and worker pool settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub limits: Limits,
    /// Number of worker threads running handlers.
    pub workers: usize,
    /// Capacity of the work queue in front of the workers.
    pub queue_size: usize,
    /// Close keep-alive connections idle for longer than this.
    pub idle_timeout: Duration,
    /// How often the reactor checks for expired connections.
    pub sweep_interval: Duration,
    /// Value of the `Server` response header; empty to omit it.
    pub server_name: String,
    /// Prefix for worker thread names.
    pub worker_thread_prefix: String,
    /// PROXY protocol handling for accepted connections.
    pub proxy_protocol: ProxyProtocol,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            workers: 4,
            queue_size: 20 * 1024,
            idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(1),
            server_name: concat!("httpwire/", env!("CARGO_PKG_VERSION")).to_owned(),
            worker_thread_prefix: "worker".to_owned(),
            proxy_protocol: ProxyProtocol::Disabled,
        }
    }
}

impl ServerConfig {
    /// Clamp counts and intervals to usable values.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use httpwire::config::ServerConfig;
    ///
    /// let cfg = ServerConfig {
    ///     workers: 0,
    ///     queue_size: 0,
    ///     sweep_interval: Duration::ZERO,
    ///     ..ServerConfig::default()
    /// }
    /// .normalized();
    /// assert_eq!(cfg.workers, 1);
    /// assert_eq!(cfg.queue_size, 1);
    /// assert_eq!(cfg.sweep_interval, Duration::from_millis(10));
    /// ```
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.limits = self.limits.normalized();
        self.workers = self.workers.max(1);
        self.queue_size = self.queue_size.max(1);
        self.sweep_interval = self.sweep_interval.max(Duration::from_millis(10));
        self.idle_timeout = self.idle_timeout.max(Duration::from_millis(1));
        self
    }
}

/// Client reactor and connection pool settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub limits: Limits,
    /// Time allowed for the TCP connect to finish.
    pub connect_timeout: Duration,
    /// Time allowed between bytes once connected.
    pub idle_timeout: Duration,
    /// How long an idle connection is kept for reuse. Zero disables pooling.
    pub keep_alive: Duration,
    /// How often the reactor checks for expired requests and connections.
    pub sweep_interval: Duration,
    /// Value of the `User-Agent` request header.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            connect_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(60),
            keep_alive: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(1),
            user_agent: concat!("httpwire/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl ClientConfig {
    /// Clamp intervals to usable values.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.limits = self.limits.normalized();
        self.sweep_interval = self.sweep_interval.max(Duration::from_millis(10));
        self.connect_timeout = self.connect_timeout.max(Duration::from_millis(1));
        self.idle_timeout = self.idle_timeout.max(Duration::from_millis(1));
        self
    }
}
