//! The server event loop.
//!
//! Owns the listener and every connection. All socket reads, writes and
//! protocol state changes happen on this thread; workers reach it only
//! through [`Command`]s.

use std::{
    io::{self, Read},
    mem,
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
    time::Instant,
};

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, unbounded};
use http::{Method, StatusCode};
use mio::{Events, Interest, Poll, Token, Waker, net::TcpListener};
use slab::Slab;
use tracing::{debug, error, info, warn};

use super::{
    command::{Command, ConnRef, ReactorHandle},
    connection::{Connection, Protocol, WsSession},
    handler::{Handler, Request, Response},
    sink::{ResponseSink, SinkParts, WebSocketChannel, WebSocketHandler, WsMessage},
};
use crate::{
    codec::{DecodeError, DecodeState, MessageDecoder, Role, error_response},
    config::ServerConfig,
    dispatch::{DispatchError, DispatchHandle, SerialQueue, Task},
    message::Message,
    metrics::{self, Direction},
    timer::DeadlineQueue,
    transport::{TcpTransport, Transport},
    websocket::{
        CloseCode,
        Endpoint,
        Frame,
        FrameDecoder,
        FrameEncoder,
        FrameError,
        Opcode,
        upgrade_response,
        validate_upgrade,
    },
};

const LISTENER: Token = Token(usize::MAX - 1);
const WAKER: Token = Token(usize::MAX);
const READ_BUFFER_SIZE: usize = 64 * 1024;
const EVENTS_CAPACITY: usize = 1024;
const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";
const OVERLOADED: &str = "Server is overloaded, please try later";

/// `on_close` callback for a closed WebSocket connection.
struct CloseNotice {
    handler: Arc<dyn WebSocketHandler>,
    channel: WebSocketChannel,
    serial: SerialQueue,
    code: u16,
}

impl CloseNotice {
    fn submit(&self) -> Result<(), DispatchError> {
        let handler = Arc::clone(&self.handler);
        let channel = self.channel.clone();
        let code = self.code;
        self.serial.submit(move || handler.on_close(&channel, code))
    }
}

/// Runs the application handler for one request on a worker.
struct HandleTask {
    handler: Arc<dyn Handler>,
    request: Request,
    sink: ResponseSink,
}

impl Task for HandleTask {
    fn run(self: Box<Self>) {
        let HandleTask {
            handler,
            request,
            sink,
        } = *self;
        handler.handle(request, sink);
    }

    fn reject(self: Box<Self>, reason: DispatchError) {
        debug!(%reason, "request rejected");
        self.sink
            .send(Response::text(StatusCode::SERVICE_UNAVAILABLE, OVERLOADED));
    }
}

pub(crate) struct Reactor {
    poll: Poll,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    connections: Slab<Connection>,
    commands: Receiver<Command>,
    handle: ReactorHandle,
    dispatcher: DispatchHandle,
    handler: Arc<dyn Handler>,
    config: ServerConfig,
    server_name: Arc<str>,
    idle: DeadlineQueue<ConnRef>,
    /// Close callbacks the pool had no room for.
    closing: Vec<CloseNotice>,
    buffer: Vec<u8>,
    next_id: u64,
    next_sweep: Instant,
}

impl Reactor {
    pub(crate) fn new(
        listener: StdTcpListener,
        handler: Arc<dyn Handler>,
        dispatcher: DispatchHandle,
        config: ServerConfig,
    ) -> io::Result<(Self, ReactorHandle)> {
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let mut listener = TcpListener::from_std(listener);
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let (tx, commands) = unbounded();
        let handle = ReactorHandle::new(tx, waker);
        let server_name: Arc<str> = Arc::from(config.server_name.as_str());
        let reactor = Self {
            poll,
            listener: Some(listener),
            local_addr,
            connections: Slab::new(),
            commands,
            handle: handle.clone(),
            dispatcher,
            handler,
            next_sweep: Instant::now() + config.sweep_interval,
            config,
            server_name,
            idle: DeadlineQueue::new(),
            closing: Vec::new(),
            buffer: vec![0; READ_BUFFER_SIZE],
            next_id: 0,
        };
        Ok((reactor, handle))
    }

    /// Loop until a [`Command::Shutdown`] arrives or polling fails.
    pub(crate) fn run(mut self) {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        info!(addr = %self.local_addr, "server loop started");
        while self.apply_commands() {
            let timeout = self.next_sweep.saturating_duration_since(Instant::now());
            if let Err(err) = self.poll.poll(&mut events, Some(timeout)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %err, "poll failed; stopping server loop");
                break;
            }
            for event in &events {
                match event.token() {
                    WAKER => {}
                    LISTENER => self.accept(),
                    Token(key) => {
                        if event.is_writable() {
                            self.flush(key);
                        }
                        if event.is_readable() || event.is_read_closed() || event.is_error() {
                            self.read(key);
                        }
                    }
                }
            }
            if Instant::now() >= self.next_sweep {
                self.sweep();
            }
        }
        self.close_all();
        info!(addr = %self.local_addr, "server loop stopped");
    }

    fn apply_commands(&mut self) -> bool {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Respond {
                    conn,
                    seq,
                    buffers,
                    last,
                    keep_alive,
                } => {
                    let Some(c) = self.lookup(conn) else {
                        continue;
                    };
                    c.stage(seq, buffers, last, keep_alive);
                    if last {
                        metrics::inc_messages(Direction::Outbound);
                    }
                    self.flush(conn.key);
                }
                Command::Upgrade {
                    conn,
                    seq,
                    key,
                    handler,
                } => self.upgrade(conn, seq, &key, handler),
                Command::Frame { conn, frame, close } => {
                    let Some(c) = self.lookup(conn) else {
                        continue;
                    };
                    c.push_raw(frame);
                    if close {
                        c.close_after_write();
                    }
                    self.flush(conn.key);
                }
                Command::StopAccepting => self.stop_accepting(),
                Command::Shutdown => return false,
            }
        }
        true
    }

    fn lookup(&mut self, conn: ConnRef) -> Option<&mut Connection> {
        self.connections
            .get_mut(conn.key)
            .filter(|c| c.id == conn.id)
    }

    fn accept(&mut self) {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return;
            };
            match listener.accept() {
                Ok((stream, peer_addr)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%peer_addr, error = %err, "failed to set TCP_NODELAY");
                    }
                    self.register(Box::new(TcpTransport::new(stream)), peer_addr);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    metrics::inc_errors("accept");
                    return;
                }
            }
        }
    }

    fn register(&mut self, mut transport: Box<dyn Transport>, peer_addr: SocketAddr) {
        let entry = self.connections.vacant_entry();
        let key = entry.key();
        if let Err(err) =
            self.poll
                .registry()
                .register(transport.as_mut(), Token(key), Interest::READABLE)
        {
            warn!(%peer_addr, error = %err, "failed to register connection");
            return;
        }
        let id = self.next_id;
        self.next_id += 1;
        let decoder = MessageDecoder::with_limits(Role::Request, &self.config.limits)
            .with_proxy_protocol(self.config.proxy_protocol);
        entry.insert(Connection::new(id, transport, peer_addr, decoder));
        self.touch(key);
        metrics::inc_connections();
        debug!(%peer_addr, "accepted connection");
    }

    fn read(&mut self, key: usize) {
        loop {
            let Some(conn) = self.connections.get_mut(key) else {
                return;
            };
            if !conn.is_accepting() {
                return;
            }
            match conn.transport.read(&mut self.buffer) {
                Ok(0) => {
                    self.close(key, "peer closed");
                    return;
                }
                Ok(n) => {
                    self.touch(key);
                    let buffer = mem::take(&mut self.buffer);
                    self.feed(key, &buffer[..n]);
                    self.buffer = buffer;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(error = %err, "read failed");
                    self.close(key, "read error");
                    return;
                }
            }
        }
    }

    /// Restart the idle deadline of `key` from now.
    ///
    /// HTTP connections are only tracked while no request is being handled;
    /// [`flush`](Self::flush) re-arms them once every response is written.
    fn touch(&mut self, key: usize) {
        let deadline = Instant::now() + self.config.idle_timeout;
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        let tracked = match &conn.protocol {
            Protocol::Http(_) => conn.in_flight() == 0,
            Protocol::Upgrading(_) => false,
            Protocol::WebSocket(_) => true,
        };
        if !tracked {
            return;
        }
        if let Some(old) = conn.idle_key.take() {
            self.idle.remove(old);
        }
        conn.idle_key = Some(self.idle.offer(deadline, ConnRef { key, id: conn.id }));
    }

    /// Decode `bytes` and act on every complete message or frame.
    fn feed(&mut self, key: usize, bytes: &[u8]) {
        let max_pending = self.config.limits.max_ws_message;
        let mut src = bytes;
        while !src.is_empty() {
            let Some(conn) = self.connections.get_mut(key) else {
                return;
            };
            if !conn.is_accepting() {
                return;
            }
            match &mut conn.protocol {
                Protocol::Http(decoder) => match decoder.decode(&mut src) {
                    Ok(DecodeState::AllRead) => {
                        let message = decoder.take_message();
                        decoder.reset();
                        if let Some(message) = message {
                            self.dispatch(key, message);
                        }
                    }
                    Ok(_) => {
                        if decoder.expects_continue() && !conn.continue_sent {
                            conn.continue_sent = true;
                            let seq = conn.peek_seq();
                            conn.stage(seq, vec![Bytes::from_static(CONTINUE)], false, true);
                            self.flush(key);
                        }
                        return;
                    }
                    Err(err) => {
                        self.reject_malformed(key, &err);
                        return;
                    }
                },
                Protocol::Upgrading(pending) => {
                    if pending.len() + src.len() > max_pending {
                        warn!(
                            peer_addr = %conn.peer_addr,
                            limit = max_pending,
                            "too much data before websocket upgrade"
                        );
                        metrics::inc_errors("upgrade_backlog");
                        self.close(key, "upgrade backlog exceeded");
                        return;
                    }
                    pending.extend_from_slice(src);
                    return;
                }
                Protocol::WebSocket(session) => match session.decoder.decode(&mut src) {
                    Ok(Some(frame)) => self.on_frame(key, frame),
                    Ok(None) => return,
                    Err(err) => {
                        self.fail_websocket(key, &err);
                        return;
                    }
                },
            }
        }
    }

    fn dispatch(&mut self, key: usize, message: Message) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        let conn_ref = ConnRef { key, id: conn.id };
        let seq = conn.take_seq();
        conn.continue_sent = false;
        if let Some(idle) = conn.idle_key.take() {
            self.idle.remove(idle);
        }
        metrics::inc_messages(Direction::Inbound);

        let keep_alive = message.keep_alive();
        if !keep_alive {
            conn.stop_accepting();
        }
        let upgrade_key = if message.is_websocket_upgrade() {
            match validate_upgrade(&message) {
                Ok(ws_key) => Some(ws_key.to_owned()),
                Err(err) => {
                    debug!(peer_addr = %conn.peer_addr, error = %err, "invalid upgrade request");
                    None
                }
            }
        } else {
            None
        };
        if upgrade_key.is_some() {
            conn.protocol = Protocol::Upgrading(BytesMut::new());
        }

        let parts = SinkParts {
            conn: conn_ref,
            seq,
            version: message.version(),
            // Bytes after an upgrade request belong to the new protocol, so a
            // plain answer to it must close the connection.
            keep_alive: keep_alive && upgrade_key.is_none(),
            head_request: message.method() == Some(&Method::HEAD),
            upgrade_key,
        };
        let sink = ResponseSink::new(parts, self.handle.clone(), Arc::clone(&self.server_name));
        let request = Request::new(message, conn.peer_addr);
        let task = HandleTask {
            handler: Arc::clone(&self.handler),
            request,
            sink,
        };
        // Rejection answers through the sink, so the error needs no handling.
        let _ = self.dispatcher.submit(task);
    }

    fn reject_malformed(&mut self, key: usize, err: &DecodeError) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        warn!(peer_addr = %conn.peer_addr, error = %err, "rejecting malformed request");
        metrics::inc_errors(err.error_type());
        let seq = conn.take_seq();
        conn.stop_accepting();
        let status = err.status();
        let text = status.canonical_reason().unwrap_or("Bad Request");
        conn.stage(seq, error_response(status, text, &self.server_name), true, false);
        self.flush(key);
    }

    fn upgrade(&mut self, conn: ConnRef, seq: u64, key: &str, handler: Arc<dyn WebSocketHandler>) {
        let max_message = self.config.limits.max_ws_message;
        let channel_handle = self.handle.clone();
        let serial = SerialQueue::new(self.dispatcher.clone());
        let Some(c) = self.lookup(conn) else {
            return;
        };
        let pending = match &mut c.protocol {
            Protocol::Upgrading(pending) => mem::take(pending),
            _ => {
                warn!("upgrade for a connection that is not upgrading");
                return;
            }
        };
        let channel = WebSocketChannel::new(conn, channel_handle, c.peer_addr);
        c.stage(seq, vec![upgrade_response(key)], true, true);
        c.protocol = Protocol::WebSocket(Box::new(WsSession {
            decoder: FrameDecoder::new(Endpoint::Server, max_message),
            handler: Arc::clone(&handler),
            channel: channel.clone(),
            serial: serial.clone(),
            close_code: None,
        }));
        debug!(peer_addr = %c.peer_addr, "connection upgraded to websocket");
        self.touch(conn.key);
        if let Err(err) = serial.submit(move || handler.on_open(&channel)) {
            warn!(error = %err, "failed to schedule websocket open");
        }
        self.flush(conn.key);
        if !pending.is_empty() {
            self.feed(conn.key, &pending);
        }
    }

    fn on_frame(&mut self, key: usize, frame: Frame) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        let Protocol::WebSocket(session) = &mut conn.protocol else {
            return;
        };
        match frame.opcode {
            Opcode::Text => {
                let Ok(text) = String::from_utf8(frame.payload.to_vec()) else {
                    self.send_close(key, CloseCode::INVALID_PAYLOAD);
                    return;
                };
                self.deliver(key, WsMessage::Text(text));
            }
            Opcode::Binary => self.deliver(key, WsMessage::Binary(frame.payload)),
            Opcode::Ping => {
                let mut pong = BytesMut::new();
                FrameEncoder::new(Endpoint::Server)
                    .encode_into(&Frame::new(Opcode::Pong, frame.payload), &mut pong);
                conn.push_raw(pong.freeze());
                self.flush(key);
            }
            Opcode::Close => {
                let code = frame.close_code().unwrap_or(CloseCode::NORMAL);
                session.close_code = Some(code);
                self.send_close(key, code);
            }
            Opcode::Pong | Opcode::Continuation => {}
        }
    }

    fn deliver(&mut self, key: usize, message: WsMessage) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        let Protocol::WebSocket(session) = &mut conn.protocol else {
            return;
        };
        let handler = Arc::clone(&session.handler);
        let channel = session.channel.clone();
        if session
            .serial
            .submit(move || handler.on_message(&channel, message))
            .is_err()
        {
            warn!(peer_addr = %conn.peer_addr, "dropping websocket message; workers overloaded");
            self.send_close(key, CloseCode::TRY_AGAIN_LATER);
        }
    }

    fn fail_websocket(&mut self, key: usize, err: &FrameError) {
        if let Some(conn) = self.connections.get(key) {
            warn!(peer_addr = %conn.peer_addr, error = %err, "websocket protocol violation");
        }
        metrics::inc_errors("websocket");
        self.send_close(key, err.close_code());
    }

    fn send_close(&mut self, key: usize, code: u16) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        let mut buf = BytesMut::new();
        FrameEncoder::new(Endpoint::Server).encode_into(&Frame::close(code, ""), &mut buf);
        conn.push_raw(buf.freeze());
        conn.close_after_write();
        self.flush(key);
    }

    fn flush(&mut self, key: usize) {
        let idle_timeout = self.config.idle_timeout;
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        match conn.flush() {
            Ok(true) => {
                if conn.is_finished() {
                    self.close(key, "response complete");
                    return;
                }
                if conn.is_http() && conn.in_flight() == 0 && conn.idle_key.is_none() {
                    let id = conn.id;
                    conn.idle_key =
                        Some(self.idle.offer(Instant::now() + idle_timeout, ConnRef { key, id }));
                }
            }
            Ok(false) => {}
            Err(err) => {
                debug!(peer_addr = %conn.peer_addr, error = %err, "write failed");
                self.close(key, "write error");
                return;
            }
        }
        if let Err(err) = conn.update_interest(self.poll.registry(), Token(key)) {
            warn!(error = %err, "failed to update interest");
            self.close(key, "reregister failed");
        }
    }

    fn close(&mut self, key: usize, reason: &'static str) {
        let Some(mut conn) = self.connections.try_remove(key) else {
            return;
        };
        if let Err(err) = self.poll.registry().deregister(conn.transport.as_mut()) {
            debug!(error = %err, "failed to deregister connection");
        }
        if let Some(idle) = conn.idle_key.take() {
            self.idle.remove(idle);
        }
        if let Protocol::WebSocket(session) = conn.protocol {
            let WsSession {
                handler,
                channel,
                serial,
                close_code,
                ..
            } = *session;
            self.report_close(CloseNotice {
                handler,
                channel,
                serial,
                code: close_code.unwrap_or(CloseCode::ABNORMAL),
            });
        }
        metrics::dec_connections();
        debug!(peer_addr = %conn.peer_addr, reason, "connection closed");
    }

    fn report_close(&mut self, notice: CloseNotice) {
        match notice.submit() {
            Ok(()) => {}
            Err(DispatchError::Overloaded) => {
                warn!(
                    peer_addr = %notice.channel.peer_addr(),
                    "workers overloaded; websocket close will be retried"
                );
                self.closing.push(notice);
            }
            Err(DispatchError::ShutDown) => {
                warn!(
                    peer_addr = %notice.channel.peer_addr(),
                    "workers shut down; websocket close dropped"
                );
            }
        }
    }

    fn sweep(&mut self) {
        let now = Instant::now();
        self.next_sweep = now + self.config.sweep_interval;
        for notice in mem::take(&mut self.closing) {
            self.report_close(notice);
        }
        while let Some((_, conn)) = self.idle.poll_expired(now) {
            let Some(c) = self.lookup(conn) else {
                continue;
            };
            c.idle_key = None;
            debug!(peer_addr = %c.peer_addr, "closing idle connection");
            self.close(conn.key, "idle timeout");
        }
    }

    fn stop_accepting(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            if let Err(err) = self.poll.registry().deregister(&mut listener) {
                debug!(error = %err, "failed to deregister listener");
            }
            info!(addr = %self.local_addr, "stopped accepting connections");
        }
    }

    fn close_all(&mut self) {
        self.stop_accepting();
        let keys: Vec<usize> = self.connections.iter().map(|(key, _)| key).collect();
        for key in keys {
            self.close(key, "server shutdown");
        }
        for notice in self.closing.drain(..) {
            if notice.submit().is_err() {
                warn!(
                    peer_addr = %notice.channel.peer_addr(),
                    "websocket close dropped at shutdown"
                );
            }
        }
    }
}
