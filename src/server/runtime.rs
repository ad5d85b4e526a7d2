//! Starting and stopping a bound [`HttpServer`].

use std::{
    net::SocketAddr,
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{info, warn};

use super::{
    Bound,
    HttpServer,
    ServerError,
    command::{Command, ReactorHandle},
    reactor::Reactor,
};
use crate::dispatch::Dispatcher;

impl HttpServer<Bound> {
    /// Spawn the worker pool and the reactor thread.
    ///
    /// ```no_run
    /// use std::time::Duration;
    ///
    /// use httpwire::server::{HttpServer, Response, respond};
    ///
    /// # fn main() -> Result<(), httpwire::server::ServerError> {
    /// let handle = HttpServer::new(respond(|_| Some(Response::ok("hello"))))
    ///     .bind(([127, 0, 0, 1], 8080).into())?
    ///     .start()?;
    /// handle.stop(Duration::from_secs(5));
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Spawn`] if a thread cannot be started and
    /// [`ServerError::Poll`] if the poller cannot be created.
    pub fn start(self) -> Result<ServerHandle, ServerError> {
        let config = self.config.normalized();
        let local_addr = self
            .state
            .listener
            .local_addr()
            .map_err(ServerError::Bind)?;
        let dispatcher = Dispatcher::new(
            config.workers,
            config.queue_size,
            &config.worker_thread_prefix,
        )
        .map_err(ServerError::Spawn)?;
        let workers = dispatcher.workers();
        let (reactor, reactor_handle) = Reactor::new(
            self.state.listener,
            self.handler,
            dispatcher.handle(),
            config,
        )
        .map_err(ServerError::Poll)?;
        let thread = thread::Builder::new()
            .name("server-loop".to_owned())
            .spawn(move || reactor.run())
            .map_err(ServerError::Spawn)?;
        info!(%local_addr, workers, "server started");
        Ok(ServerHandle {
            local_addr,
            reactor: reactor_handle,
            dispatcher: Some(dispatcher),
            thread: Some(thread),
        })
    }
}

/// Running server. Dropping the handle stops the server without waiting
/// for in-flight requests.
pub struct ServerHandle {
    local_addr: SocketAddr,
    reactor: ReactorHandle,
    dispatcher: Option<Dispatcher>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr { self.local_addr }

    /// Stop accepting, give in-flight requests up to `timeout` to finish,
    /// then close every connection and join the reactor thread.
    pub fn stop(mut self, timeout: Duration) { self.shutdown(timeout); }

    fn shutdown(&mut self, timeout: Duration) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.reactor.send(Command::StopAccepting);
        if let Some(dispatcher) = self.dispatcher.take()
            && !dispatcher.shutdown(timeout)
        {
            warn!("handlers still running at shutdown");
        }
        self.reactor.send(Command::Shutdown);
        if thread.join().is_err() {
            warn!("server loop panicked");
        }
        info!(local_addr = %self.local_addr, "server stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) { self.shutdown(Duration::ZERO); }
}
