//! Incremental response callbacks.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use http::{StatusCode, Version};

use super::ClientError;
use crate::headers::Headers;

/// Returned by a listener callback to stop the exchange. The connection is
/// closed and the listener receives [`ClientError::Aborted`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("exchange aborted")]
pub struct Abort;

/// Receives a response as it is decoded.
///
/// Callbacks run on the client reactor thread and must not block. Exactly
/// one of [`on_completed`](Self::on_completed) and
/// [`on_error`](Self::on_error) is called per exchange. A panic in any
/// callback is caught and reported as [`ClientError::ListenerPanicked`].
pub trait ResponseListener: Send + 'static {
    /// Status line received.
    ///
    /// # Errors
    ///
    /// Return [`Abort`] to stop the exchange.
    fn on_initial_line(
        &mut self,
        version: Version,
        status: StatusCode,
        reason: &str,
    ) -> Result<(), Abort> {
        let _ = (version, status, reason);
        Ok(())
    }

    /// All headers received.
    ///
    /// # Errors
    ///
    /// Return [`Abort`] to stop the exchange.
    fn on_headers(&mut self, headers: &Headers) -> Result<(), Abort> {
        let _ = headers;
        Ok(())
    }

    /// Next piece of the body, in order.
    ///
    /// # Errors
    ///
    /// Return [`Abort`] to stop the exchange.
    fn on_body(&mut self, chunk: Bytes) -> Result<(), Abort> {
        let _ = chunk;
        Ok(())
    }

    fn on_completed(&mut self);

    fn on_error(&mut self, error: ClientError);
}

/// A fully buffered response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientResponse {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl ClientResponse {
    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String { String::from_utf8_lossy(&self.body).into_owned() }
}

/// Listener that buffers the whole response and hands it to a
/// [`PendingResponse`].
pub struct CollectingListener {
    version: Version,
    status: StatusCode,
    reason: String,
    headers: Headers,
    body: BytesMut,
    tx: Sender<Result<ClientResponse, ClientError>>,
}

impl CollectingListener {
    #[must_use]
    pub fn new() -> (Self, PendingResponse) {
        let (tx, rx) = bounded(1);
        let listener = Self {
            version: Version::HTTP_11,
            status: StatusCode::OK,
            reason: String::new(),
            headers: Headers::new(),
            body: BytesMut::new(),
            tx,
        };
        (listener, PendingResponse { rx })
    }
}

impl ResponseListener for CollectingListener {
    fn on_initial_line(
        &mut self,
        version: Version,
        status: StatusCode,
        reason: &str,
    ) -> Result<(), Abort> {
        self.version = version;
        self.status = status;
        reason.clone_into(&mut self.reason);
        Ok(())
    }

    fn on_headers(&mut self, headers: &Headers) -> Result<(), Abort> {
        self.headers = headers.clone();
        Ok(())
    }

    fn on_body(&mut self, chunk: Bytes) -> Result<(), Abort> {
        self.body.extend_from_slice(&chunk);
        Ok(())
    }

    fn on_completed(&mut self) {
        let response = ClientResponse {
            version: self.version,
            status: self.status,
            reason: std::mem::take(&mut self.reason),
            headers: std::mem::take(&mut self.headers),
            body: self.body.split().freeze(),
        };
        let _ = self.tx.send(Ok(response));
    }

    fn on_error(&mut self, error: ClientError) { let _ = self.tx.send(Err(error)); }
}

/// Receiving end of a [`CollectingListener`].
#[derive(Debug)]
pub struct PendingResponse {
    rx: Receiver<Result<ClientResponse, ClientError>>,
}

impl PendingResponse {
    /// Block until the exchange finishes.
    ///
    /// # Errors
    ///
    /// Returns the exchange's error, or [`ClientError::Shutdown`] if the
    /// listener was dropped without a result.
    pub fn wait(self) -> Result<ClientResponse, ClientError> {
        self.rx.recv().map_err(|_| ClientError::Shutdown)?
    }

    /// Like [`wait`](Self::wait) with an upper bound on the wait. `None`
    /// means the exchange is still running.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<ClientResponse, ClientError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(ClientError::Shutdown)),
        }
    }
}
