//! Builder methods for [`HttpServer`].

use std::{sync::Arc, time::Duration};

use super::{Handler, HttpServer, ServerState, Unbound};
use crate::config::{ProxyProtocol, ServerConfig};

pub mod binding;

#[cfg(test)]
mod tests;

impl HttpServer<Unbound> {
    /// Create a server that passes every request to `handler`.
    ///
    /// The listener is unset; call [`bind`](Self::bind) before starting.
    #[must_use]
    pub fn new(handler: impl Handler) -> Self {
        Self {
            handler: Arc::new(handler),
            config: ServerConfig::default(),
            state: Unbound,
        }
    }
}

impl<S: ServerState> HttpServer<S> {
    /// Replace the whole configuration, for example one loaded from a file.
    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.config.workers = count.max(1);
        self
    }

    /// Set how many requests may wait for a worker before new ones get `503`.
    #[must_use]
    pub fn queue_size(mut self, size: usize) -> Self {
        self.config.queue_size = size.max(1);
        self
    }

    /// Close keep-alive connections idle for longer than `timeout`.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set how often idle connections are swept.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Longest accepted request line or header line.
    #[must_use]
    pub fn max_line(mut self, len: usize) -> Self {
        self.config.limits.max_line = len;
        self
    }

    /// Largest accepted request body.
    #[must_use]
    pub fn max_body(mut self, len: usize) -> Self {
        self.config.limits.max_body = len;
        self
    }

    /// Largest accepted WebSocket message after reassembly.
    #[must_use]
    pub fn max_ws_message(mut self, len: usize) -> Self {
        self.config.limits.max_ws_message = len;
        self
    }

    /// Value of the `Server` response header. Empty omits the header.
    #[must_use]
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Prefix for worker thread names.
    #[must_use]
    pub fn worker_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.worker_thread_prefix = prefix.into();
        self
    }

    /// Accept a PROXY protocol v1 preface at the start of each connection.
    #[must_use]
    pub fn proxy_protocol(mut self, mode: ProxyProtocol) -> Self {
        self.config.proxy_protocol = mode;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig { &self.config }

    #[inline]
    #[must_use]
    pub const fn worker_count(&self) -> usize { self.config.workers }
}
