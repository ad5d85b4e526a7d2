//! The client event loop.
//!
//! Owns every outgoing socket, the keep-alive pool and the exchange
//! deadlines. Callers reach it through [`Command`]s; listeners are called
//! on this thread.

use std::{
    collections::VecDeque,
    io::{self, Read},
    mem,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, unbounded};
use http::StatusCode;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use tracing::{debug, error, info, warn};

use super::{ClientError, ConnectionPool, ResponseListener, TimeoutPhase, listener::Abort};
use crate::{
    codec::{BodyMode, DecodeState, MessageDecoder, Role},
    config::ClientConfig,
    message::Head,
    metrics::{self, Direction},
    panic,
    timer::{DeadlineKey, DeadlineQueue},
    transport::{self, TcpTransport, Transport},
};

const WAKER: Token = Token(usize::MAX);
const READ_BUFFER_SIZE: usize = 64 * 1024;
const EVENTS_CAPACITY: usize = 256;

/// One request and the listener awaiting its response.
pub(crate) struct Exchange {
    pub(crate) addr: SocketAddr,
    pub(crate) request: Vec<Bytes>,
    pub(crate) keep_alive: bool,
    pub(crate) head_request: bool,
    pub(crate) timeout: Duration,
    pub(crate) retried: bool,
    pub(crate) listener: Box<dyn ResponseListener>,
}

pub(crate) enum Command {
    Exec(Box<Exchange>),
    Shutdown,
}

#[derive(Clone)]
pub(crate) struct ReactorHandle {
    tx: Sender<Command>,
    waker: Arc<Waker>,
}

impl ReactorHandle {
    /// Queue `command` and wake the reactor, handing the command back if
    /// the reactor has exited.
    pub(crate) fn send(&self, command: Command) -> Result<(), Command> {
        self.tx.send(command).map_err(|err| err.into_inner())?;
        if let Err(err) = self.waker.wake() {
            warn!(error = %err, "failed to wake client reactor");
        }
        Ok(())
    }
}

/// Run a listener callback, turning an abort or a panic into an error.
fn notify<F>(listener: &mut dyn ResponseListener, f: F) -> Result<(), ClientError>
where
    F: FnOnce(&mut dyn ResponseListener) -> Result<(), Abort>,
{
    match panic::catch("response listener", || f(listener)) {
        Some(Ok(())) => Ok(()),
        Some(Err(Abort)) => Err(ClientError::Aborted),
        None => Err(ClientError::ListenerPanicked),
    }
}

/// Deliver the terminal error for an exchange.
pub(crate) fn deliver_error(mut listener: Box<dyn ResponseListener>, error: ClientError) {
    debug!(error = %error, "exchange failed");
    metrics::inc_errors(error.error_type());
    panic::catch("response listener", move || listener.on_error(error));
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ConnRef {
    key: usize,
    id: u64,
}

#[derive(Default)]
struct Progress {
    head: bool,
    headers: bool,
}

struct ClientConn {
    id: u64,
    transport: Box<dyn Transport>,
    addr: SocketAddr,
    decoder: MessageDecoder,
    outbound: VecDeque<Bytes>,
    connected: bool,
    reused: bool,
    exchange: Option<Box<Exchange>>,
    deadline: Option<DeadlineKey>,
    interest: Interest,
    progress: Progress,
}

impl ClientConn {
    /// Attach `exchange` and queue its request bytes.
    fn begin(&mut self, exchange: Box<Exchange>) {
        self.decoder.reset();
        self.decoder.expect_no_body(exchange.head_request);
        self.progress = Progress::default();
        self.outbound.extend(exchange.request.iter().cloned());
        self.exchange = Some(exchange);
    }

    /// Whether a failure now may be retried on a fresh connection: the
    /// connection came from the pool and the peer sent nothing back.
    fn retryable(&self) -> bool {
        self.reused
            && self.decoder.is_initial()
            && self.exchange.as_ref().is_some_and(|ex| !ex.retried)
    }

    /// Pass newly decoded parts of the response to the listener.
    fn report(&mut self) -> Result<(), ClientError> {
        let Self {
            decoder,
            exchange,
            progress,
            ..
        } = self;
        let Some(exchange) = exchange.as_mut() else {
            return Ok(());
        };
        let listener = exchange.listener.as_mut();
        if !progress.head
            && let Some(Head::Response(head)) = decoder.head()
            && !is_interim(head.status)
        {
            progress.head = true;
            notify(listener, |l| {
                l.on_initial_line(head.version, head.status, &head.reason)
            })?;
        }
        if progress.head
            && !progress.headers
            && !matches!(
                decoder.state(),
                DecodeState::ReadInitial | DecodeState::ReadHeader
            )
        {
            progress.headers = true;
            notify(listener, |l| l.on_headers(decoder.headers()))?;
        }
        while let Some(chunk) = decoder.take_body_chunk() {
            notify(listener, |l| l.on_body(chunk))?;
        }
        Ok(())
    }

    fn update_interest(&mut self, registry: &mio::Registry, token: Token) -> io::Result<()> {
        let wanted = if self.outbound.is_empty() && self.connected {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        if wanted != self.interest {
            registry.reregister(self.transport.as_mut(), token, wanted)?;
            self.interest = wanted;
        }
        Ok(())
    }
}

/// `1xx` responses other than `101` precede the real response.
fn is_interim(status: StatusCode) -> bool {
    status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS
}

pub(crate) struct Reactor {
    poll: Poll,
    connections: Slab<ClientConn>,
    commands: Receiver<Command>,
    config: ClientConfig,
    pool: ConnectionPool<ConnRef>,
    deadlines: DeadlineQueue<(ConnRef, TimeoutPhase)>,
    buffer: Vec<u8>,
    next_id: u64,
    next_sweep: Instant,
}

impl Reactor {
    pub(crate) fn new(config: ClientConfig) -> io::Result<(Self, ReactorHandle)> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let (tx, commands) = unbounded();
        let reactor = Self {
            poll,
            connections: Slab::new(),
            commands,
            next_sweep: Instant::now() + config.sweep_interval,
            config,
            pool: ConnectionPool::new(),
            deadlines: DeadlineQueue::new(),
            buffer: vec![0; READ_BUFFER_SIZE],
            next_id: 0,
        };
        Ok((reactor, ReactorHandle { tx, waker }))
    }

    pub(crate) fn run(mut self) {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        debug!("client loop started");
        while self.apply_commands() {
            let timeout = self.next_sweep.saturating_duration_since(Instant::now());
            if let Err(err) = self.poll.poll(&mut events, Some(timeout)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %err, "poll failed; stopping client loop");
                break;
            }
            for event in &events {
                match event.token() {
                    WAKER => {}
                    Token(key) => {
                        if event.is_writable() || event.is_error() {
                            self.on_writable(key);
                        }
                        if event.is_readable() || event.is_read_closed() {
                            self.read(key);
                        }
                    }
                }
            }
            if Instant::now() >= self.next_sweep {
                self.sweep();
            }
        }
        self.shutdown_all();
        info!("client loop stopped");
    }

    fn apply_commands(&mut self) -> bool {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Exec(exchange) => self.exec(exchange),
                Command::Shutdown => return false,
            }
        }
        true
    }

    fn lookup(&mut self, conn: ConnRef) -> Option<&mut ClientConn> {
        self.connections
            .get_mut(conn.key)
            .filter(|c| c.id == conn.id)
    }

    fn exec(&mut self, exchange: Box<Exchange>) {
        while let Some(pooled) = self.pool.checkout(exchange.addr) {
            let timeout = exchange.timeout;
            let Some(conn) = self.lookup(pooled) else {
                continue;
            };
            debug!(addr = %conn.addr, "reusing pooled connection");
            conn.reused = true;
            conn.begin(exchange);
            self.arm(pooled, TimeoutPhase::Read, timeout);
            self.flush(pooled.key);
            return;
        }
        self.connect(exchange);
    }

    fn connect(&mut self, exchange: Box<Exchange>) {
        let addr = exchange.addr;
        let mut transport: Box<dyn Transport> = match TcpTransport::connect(addr) {
            Ok(transport) => Box::new(transport),
            Err(err) => {
                deliver_error(exchange.listener, ClientError::Io(err));
                return;
            }
        };
        let entry = self.connections.vacant_entry();
        let key = entry.key();
        let interest = Interest::READABLE | Interest::WRITABLE;
        if let Err(err) = self
            .poll
            .registry()
            .register(transport.as_mut(), Token(key), interest)
        {
            deliver_error(exchange.listener, ClientError::Io(err));
            return;
        }
        let id = self.next_id;
        self.next_id += 1;
        let conn_ref = ConnRef { key, id };
        let decoder = MessageDecoder::with_limits(Role::Response, &self.config.limits)
            .with_body_mode(BodyMode::Stream);
        let mut conn = ClientConn {
            id,
            transport,
            addr,
            decoder,
            outbound: VecDeque::new(),
            connected: false,
            reused: false,
            exchange: None,
            deadline: None,
            interest,
            progress: Progress::default(),
        };
        conn.begin(exchange);
        conn.deadline = Some(self.deadlines.offer(
            Instant::now() + self.config.connect_timeout,
            (conn_ref, TimeoutPhase::Connect),
        ));
        entry.insert(conn);
        debug!(%addr, "connecting");
    }

    /// Replace the connection's deadline.
    fn arm(&mut self, conn: ConnRef, phase: TimeoutPhase, timeout: Duration) {
        let Some(c) = self.connections.get_mut(conn.key).filter(|c| c.id == conn.id) else {
            return;
        };
        let deadline = self.deadlines.offer(Instant::now() + timeout, (conn, phase));
        if let Some(old) = c.deadline.replace(deadline) {
            self.deadlines.remove(old);
        }
    }

    fn on_writable(&mut self, key: usize) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        if !conn.connected {
            let pending = match conn.transport.take_error() {
                Ok(pending) => pending,
                Err(err) => Some(err),
            };
            if let Some(err) = pending {
                self.fail(key, ClientError::Io(err));
                return;
            }
            match conn.transport.peer_addr() {
                Ok(_) if conn.transport.handshake_complete() => {}
                Ok(_) => return,
                Err(err) if err.kind() == io::ErrorKind::NotConnected => return,
                Err(err) => {
                    self.fail(key, ClientError::Io(err));
                    return;
                }
            }
            conn.connected = true;
            debug!(addr = %conn.addr, "connected");
            let conn_ref = ConnRef { key, id: conn.id };
            let timeout = conn
                .exchange
                .as_ref()
                .map_or(self.config.idle_timeout, |ex| ex.timeout);
            self.arm(conn_ref, TimeoutPhase::Read, timeout);
        }
        self.flush(key);
    }

    fn flush(&mut self, key: usize) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        if !conn.connected {
            return;
        }
        if let Err(err) = transport::write_queue(conn.transport.as_mut(), &mut conn.outbound) {
            self.on_io_error(key, err);
            return;
        }
        if let Err(err) = conn.update_interest(self.poll.registry(), Token(key)) {
            self.fail(key, ClientError::Io(err));
        }
    }

    fn read(&mut self, key: usize) {
        loop {
            let Some(conn) = self.connections.get_mut(key) else {
                return;
            };
            if !conn.connected {
                return;
            }
            match conn.transport.read(&mut self.buffer) {
                Ok(0) => {
                    self.on_eof(key);
                    return;
                }
                Ok(n) => {
                    if let Some(timeout) = conn.exchange.as_ref().map(|ex| ex.timeout) {
                        let conn_ref = ConnRef { key, id: conn.id };
                        self.arm(conn_ref, TimeoutPhase::Read, timeout);
                    }
                    let buffer = mem::take(&mut self.buffer);
                    self.feed(key, &buffer[..n]);
                    self.buffer = buffer;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    self.on_io_error(key, err);
                    return;
                }
            }
        }
    }

    fn feed(&mut self, key: usize, bytes: &[u8]) {
        let mut src = bytes;
        while !src.is_empty() {
            let Some(conn) = self.connections.get_mut(key) else {
                return;
            };
            if conn.exchange.is_none() {
                debug!(addr = %conn.addr, "unexpected bytes on idle connection");
                self.close(key, "unexpected data");
                return;
            }
            let state = match conn.decoder.decode(&mut src) {
                Ok(state) => state,
                Err(err) => {
                    self.fail(key, ClientError::Decode(err));
                    return;
                }
            };
            if let Err(err) = conn.report() {
                self.fail(key, err);
                return;
            }
            if state != DecodeState::AllRead {
                return;
            }
            self.complete(key);
        }
    }

    /// The decoder reached [`DecodeState::AllRead`].
    fn complete(&mut self, key: usize) {
        let pooling = !self.config.keep_alive.is_zero();
        let keep_alive_for = self.config.keep_alive;
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        let interim = matches!(
            conn.decoder.head(),
            Some(Head::Response(head)) if is_interim(head.status)
        );
        if interim {
            let head_request = conn.exchange.as_ref().is_some_and(|ex| ex.head_request);
            conn.decoder.reset();
            conn.decoder.expect_no_body(head_request);
            return;
        }
        let until_close = conn.decoder.reads_until_close();
        let message = conn.decoder.take_message();
        conn.decoder.reset();
        conn.progress = Progress::default();
        conn.reused = false;
        let Some(exchange) = conn.exchange.take() else {
            return;
        };
        if let Some(deadline) = conn.deadline.take() {
            self.deadlines.remove(deadline);
        }
        let reusable = pooling
            && exchange.keep_alive
            && !until_close
            && message.as_ref().is_some_and(crate::message::Message::keep_alive);
        let addr = conn.addr;
        let conn_ref = ConnRef { key, id: conn.id };

        metrics::inc_messages(Direction::Inbound);
        let mut listener = exchange.listener;
        panic::catch("response listener", || listener.on_completed());

        if reusable {
            self.pool
                .checkin(addr, conn_ref, Instant::now() + keep_alive_for);
            debug!(%addr, "connection returned to pool");
        } else {
            self.close(key, "response complete");
        }
    }

    fn on_eof(&mut self, key: usize) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        if conn.exchange.is_none() {
            let conn_ref = ConnRef { key, id: conn.id };
            let addr = conn.addr;
            self.pool.remove(addr, conn_ref);
            self.close(key, "pooled connection closed by peer");
            return;
        }
        if conn.retryable() {
            self.retry(key);
            return;
        }
        match conn.decoder.decode_eof() {
            Ok(DecodeState::AllRead) => {
                if let Err(err) = conn.report() {
                    self.fail(key, err);
                    return;
                }
                self.complete(key);
            }
            Ok(_) => self.fail(
                key,
                ClientError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before response",
                )),
            ),
            Err(err) => self.fail(key, ClientError::Decode(err)),
        }
    }

    fn on_io_error(&mut self, key: usize, err: io::Error) {
        let retryable = self
            .connections
            .get(key)
            .is_some_and(ClientConn::retryable);
        if retryable {
            debug!(error = %err, "stale pooled connection");
            self.retry(key);
        } else {
            self.fail(key, ClientError::Io(err));
        }
    }

    /// Resend the exchange once on a fresh connection.
    fn retry(&mut self, key: usize) {
        let Some(mut conn) = self.remove(key) else {
            return;
        };
        let Some(mut exchange) = conn.exchange.take() else {
            return;
        };
        exchange.retried = true;
        debug!(addr = %conn.addr, "retrying request on a new connection");
        self.connect(exchange);
    }

    /// Close the connection and report `error` to its exchange, if any.
    fn fail(&mut self, key: usize, error: ClientError) {
        let Some(mut conn) = self.remove(key) else {
            return;
        };
        if let Some(exchange) = conn.exchange.take() {
            deliver_error(exchange.listener, error);
        }
    }

    fn close(&mut self, key: usize, reason: &'static str) {
        if let Some(conn) = self.remove(key) {
            debug!(addr = %conn.addr, reason, "connection closed");
        }
    }

    fn remove(&mut self, key: usize) -> Option<ClientConn> {
        let mut conn = self.connections.try_remove(key)?;
        if let Err(err) = self.poll.registry().deregister(conn.transport.as_mut()) {
            debug!(error = %err, "failed to deregister connection");
        }
        if let Some(deadline) = conn.deadline.take() {
            self.deadlines.remove(deadline);
        }
        self.pool.remove(conn.addr, ConnRef { key, id: conn.id });
        Some(conn)
    }

    fn sweep(&mut self) {
        let now = Instant::now();
        self.next_sweep = now + self.config.sweep_interval;
        while let Some((_, (conn, phase))) = self.deadlines.poll_expired(now) {
            let Some(c) = self.lookup(conn) else {
                continue;
            };
            c.deadline = None;
            warn!(addr = %c.addr, %phase, "request timed out");
            self.fail(conn.key, ClientError::Timeout { phase });
        }
        for conn in self.pool.expire(now) {
            if self.lookup(conn).is_some() {
                self.close(conn.key, "keep-alive expired");
            }
        }
    }

    fn shutdown_all(&mut self) {
        let keys: Vec<usize> = self.connections.iter().map(|(key, _)| key).collect();
        for key in keys {
            self.fail(key, ClientError::Shutdown);
        }
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Exec(exchange) = command {
                deliver_error(exchange.listener, ClientError::Shutdown);
            }
        }
    }
}
