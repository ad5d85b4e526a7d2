//! The client facade and its reactor thread.

use std::thread::{self, JoinHandle};

use http::Method;
use tracing::{debug, warn};

use super::{
    ClientError,
    ClientRequest,
    ClientResponse,
    CollectingListener,
    ResponseListener,
    reactor::{Command, Exchange, Reactor, ReactorHandle, deliver_error},
};
use crate::{config::ClientConfig, metrics::{self, Direction}};

/// Asynchronous HTTP/1.1 client.
///
/// All sockets are driven by one background thread. Requests are submitted
/// with [`exec`](Self::exec) and answered through a [`ResponseListener`];
/// [`fetch`](Self::fetch) wraps that in a blocking call. Connections are
/// kept alive and reused per remote address for
/// [`ClientConfig::keep_alive`].
///
/// ```no_run
/// use httpwire::{client::{ClientRequest, HttpClient}, config::ClientConfig};
///
/// # fn main() -> Result<(), httpwire::client::ClientError> {
/// let client = HttpClient::new(ClientConfig::default())?;
/// let response = client.fetch(&ClientRequest::get("http://127.0.0.1:8080/")?)?;
/// println!("{} {}", response.status, response.text());
/// # Ok(())
/// # }
/// ```
pub struct HttpClient {
    config: ClientConfig,
    reactor: ReactorHandle,
    thread: Option<JoinHandle<()>>,
}

impl HttpClient {
    /// Start the client reactor.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`] if the poller or its thread cannot be
    /// created.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let config = config.normalized();
        let (reactor, handle) = Reactor::new(config.clone())?;
        let thread = thread::Builder::new()
            .name("client-loop".into())
            .spawn(move || reactor.run())?;
        Ok(Self {
            config,
            reactor: handle,
            thread: Some(thread),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig { &self.config }

    /// Submit `request`; the outcome is reported to `listener` on the
    /// reactor thread.
    ///
    /// Name resolution happens on the calling thread. Failures before the
    /// request reaches the reactor are reported to the listener as well, so
    /// it always hears exactly one terminal callback.
    pub fn exec(&self, request: &ClientRequest, listener: impl ResponseListener) {
        let listener: Box<dyn ResponseListener> = Box::new(listener);
        let addr = match request.resolve() {
            Ok(addr) => addr,
            Err(err) => {
                deliver_error(listener, err);
                return;
            }
        };
        let keep_alive = !self.config.keep_alive.is_zero() && !request.wants_close();
        let exchange = Exchange {
            addr,
            request: request.encode(&self.config.user_agent, keep_alive),
            keep_alive,
            head_request: *request.method() == Method::HEAD,
            timeout: request.timeout().unwrap_or(self.config.idle_timeout),
            retried: false,
            listener,
        };
        debug!(method = %request.method(), url = %request.url(), %addr, "submitting request");
        metrics::inc_messages(Direction::Outbound);
        if let Err(Command::Exec(exchange)) = self.reactor.send(Command::Exec(Box::new(exchange))) {
            deliver_error(exchange.listener, ClientError::Shutdown);
        }
    }

    /// Execute `request` and block until the whole response has arrived.
    ///
    /// # Errors
    ///
    /// Returns whatever error ended the exchange.
    pub fn fetch(&self, request: &ClientRequest) -> Result<ClientResponse, ClientError> {
        let (listener, pending) = CollectingListener::new();
        self.exec(request, listener);
        pending.wait()
    }

    /// Stop the reactor. In-flight exchanges fail with
    /// [`ClientError::Shutdown`].
    pub fn shutdown(mut self) { self.stop(); }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.reactor.send(Command::Shutdown).is_err() {
            debug!("client loop already stopped");
        }
        if thread.join().is_err() {
            warn!("client loop panicked");
        }
    }
}

impl Drop for HttpClient {
    fn drop(&mut self) { self.stop(); }
}
