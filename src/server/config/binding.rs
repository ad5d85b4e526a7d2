//! Listener binding for [`HttpServer`].

use std::net::{SocketAddr, TcpListener as StdTcpListener};

use crate::server::{Bound, HttpServer, ServerError, ServerState, Unbound};

impl<S: ServerState> HttpServer<S> {
    fn bind_to_listener(self, listener: StdTcpListener) -> Result<HttpServer<Bound>, ServerError> {
        listener.set_nonblocking(true).map_err(ServerError::Bind)?;
        let HttpServer { handler, config, .. } = self;
        Ok(HttpServer {
            handler,
            config,
            state: Bound { listener },
        })
    }
}

impl HttpServer<Unbound> {
    /// Return `None` as the server is not bound.
    ///
    /// ```
    /// use httpwire::server::{HttpServer, respond};
    ///
    /// assert!(HttpServer::new(respond(|_| None)).local_addr().is_none());
    /// ```
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> { None }

    /// Bind to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the socket cannot be bound or
    /// configured.
    pub fn bind(self, addr: SocketAddr) -> Result<HttpServer<Bound>, ServerError> {
        let listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_to_listener(listener)
    }

    /// Take over an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the listener cannot be made
    /// non-blocking.
    pub fn bind_existing_listener(
        self,
        listener: StdTcpListener,
    ) -> Result<HttpServer<Bound>, ServerError> {
        self.bind_to_listener(listener)
    }
}

impl HttpServer<Bound> {
    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.state.listener.local_addr().ok() }

    /// Rebind to a new address, dropping the current listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the socket cannot be bound or
    /// configured.
    pub fn bind(self, addr: SocketAddr) -> Result<Self, ServerError> {
        let listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_to_listener(listener)
    }
}
