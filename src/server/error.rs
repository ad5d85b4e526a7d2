//! Errors raised by [`HttpServer`](super::HttpServer) operations.

use std::io;

use thiserror::Error;

/// Errors that may occur while binding or starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or configuring the listening socket failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),

    /// Creating the poller or its waker failed.
    #[error("poll setup error: {0}")]
    Poll(#[source] io::Error),

    /// A reactor or worker thread could not be spawned.
    #[error("thread spawn error: {0}")]
    Spawn(#[source] io::Error),
}
