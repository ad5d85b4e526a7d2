//! Byte transports driven by the reactors.
//!
//! The reactors only ever see a [`Transport`]: a non-blocking stream that
//! can be registered with a [`mio::Poll`]. Plain TCP is provided by
//! [`TcpTransport`]; an encrypting wrapper can implement the same trait and
//! report handshake progress through [`Transport::handshake_complete`].

use std::{
    collections::VecDeque,
    io::{self, IoSlice, Read, Write},
    net::{Shutdown, SocketAddr},
};

use bytes::{Buf, Bytes};
use mio::{Interest, Registry, Token, event::Source, net::TcpStream};

/// Most buffers handed to one vectored write.
const MAX_IOV: usize = 64;

/// Non-blocking, pollable byte stream.
pub trait Transport: Read + Write + Source + Send {
    /// Whether any transport-level handshake has finished and application
    /// bytes can flow. Plain TCP is ready as soon as it connects.
    fn handshake_complete(&self) -> bool { true }

    /// Address of the remote peer. Fails with `NotConnected` while a
    /// non-blocking connect is still in progress.
    ///
    /// # Errors
    ///
    /// Propagates the socket error.
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Pending socket error, used to detect a failed connect.
    ///
    /// # Errors
    ///
    /// Propagates the socket error.
    fn take_error(&self) -> io::Result<Option<io::Error>>;

    /// Shut down one or both halves of the stream.
    ///
    /// # Errors
    ///
    /// Propagates the socket error.
    fn shutdown(&self, how: Shutdown) -> io::Result<()>;
}

/// Plain TCP transport.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Start a non-blocking connect to `addr`.
    ///
    /// The connection is established once the stream reports writable and
    /// [`Transport::peer_addr`] succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created.
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { self.stream.read(buf) }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> { self.stream.write(buf) }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        self.stream.write_vectored(bufs)
    }

    fn flush(&mut self) -> io::Result<()> { self.stream.flush() }
}

impl Source for TcpTransport {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.stream.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.stream.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.stream.deregister(registry)
    }
}

impl Transport for TcpTransport {
    fn peer_addr(&self) -> io::Result<SocketAddr> { self.stream.peer_addr() }

    fn take_error(&self) -> io::Result<Option<io::Error>> { self.stream.take_error() }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> { self.stream.shutdown(how) }
}

/// Write queued buffers with vectored writes until the queue is empty or the
/// socket would block. Returns `true` once everything is written.
///
/// # Errors
///
/// Propagates socket errors; a zero-length write is reported as
/// [`io::ErrorKind::WriteZero`].
pub fn write_queue<W: Write + ?Sized>(
    dst: &mut W,
    queue: &mut VecDeque<Bytes>,
) -> io::Result<bool> {
    while !queue.is_empty() {
        let written = {
            let slices: Vec<IoSlice<'_>> = queue
                .iter()
                .take(MAX_IOV)
                .map(|b| IoSlice::new(b))
                .collect();
            match dst.write_vectored(&slices) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        };
        consume(queue, written);
    }
    Ok(true)
}

fn consume(queue: &mut VecDeque<Bytes>, mut n: usize) {
    while n > 0 {
        let Some(front) = queue.front_mut() else {
            return;
        };
        if front.len() <= n {
            n -= front.len();
            queue.pop_front();
        } else {
            front.advance(n);
            n = 0;
        }
    }
}
