//! Messages posted from worker threads to the reactor.
//!
//! Workers never touch sockets. Everything they want written travels through
//! an unbounded channel, and the reactor is woken to apply it on its own
//! thread, so per-connection output needs no lock.

use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::Sender;
use mio::Waker;

use super::sink::WebSocketHandler;

/// Identifies a connection across slab slot reuse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ConnRef {
    pub(crate) key: usize,
    pub(crate) id: u64,
}

pub(crate) enum Command {
    /// Bytes belonging to the response with sequence number `seq`.
    Respond {
        conn: ConnRef,
        seq: u64,
        buffers: Vec<Bytes>,
        last: bool,
        keep_alive: bool,
    },
    /// Complete a WebSocket handshake and switch protocols.
    Upgrade {
        conn: ConnRef,
        seq: u64,
        key: String,
        handler: Arc<dyn WebSocketHandler>,
    },
    /// An encoded WebSocket frame.
    Frame {
        conn: ConnRef,
        frame: Bytes,
        close: bool,
    },
    /// Deregister the listener; existing connections continue.
    StopAccepting,
    /// Close every connection and leave the loop.
    Shutdown,
}

#[derive(Clone)]
pub(crate) struct ReactorHandle {
    tx: Sender<Command>,
    waker: Arc<Waker>,
}

impl ReactorHandle {
    pub(crate) fn new(tx: Sender<Command>, waker: Arc<Waker>) -> Self { Self { tx, waker } }

    /// Queue `command` and wake the reactor. Returns `false` once the reactor
    /// has exited.
    pub(crate) fn send(&self, command: Command) -> bool {
        if self.tx.send(command).is_err() {
            return false;
        }
        if let Err(err) = self.waker.wake() {
            tracing::warn!(error = %err, "failed to wake reactor");
        }
        true
    }
}
