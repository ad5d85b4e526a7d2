//! Per-connection state owned by the server reactor.

use std::{
    collections::{BTreeMap, VecDeque},
    io,
    net::{Shutdown, SocketAddr},
    sync::Arc,
};

use bytes::{Bytes, BytesMut};
use mio::{Interest, Registry, Token};
use tracing::debug;

use super::sink::{WebSocketChannel, WebSocketHandler};
use crate::{
    codec::MessageDecoder,
    dispatch::SerialQueue,
    timer::DeadlineKey,
    transport::{self, Transport},
    websocket::FrameDecoder,
};

pub(crate) struct WsSession {
    pub(crate) decoder: FrameDecoder,
    pub(crate) handler: Arc<dyn WebSocketHandler>,
    pub(crate) channel: WebSocketChannel,
    pub(crate) serial: SerialQueue,
    /// Code from the peer's close frame, once one arrived.
    pub(crate) close_code: Option<u16>,
}

pub(crate) enum Protocol {
    Http(MessageDecoder),
    /// Handshake accepted by the application but not yet applied; bytes
    /// arriving meanwhile are held back.
    Upgrading(BytesMut),
    WebSocket(Box<WsSession>),
}

#[derive(Default)]
struct Staged {
    buffers: Vec<Bytes>,
    finished: bool,
    keep_alive: bool,
}

/// Socket plus protocol state for one accepted connection.
///
/// Responses are numbered in request order. Output for a later response is
/// parked until every earlier one has finished, so pipelined requests are
/// answered in order no matter which worker completes first.
pub(crate) struct Connection {
    pub(crate) id: u64,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) peer_addr: SocketAddr,
    pub(crate) protocol: Protocol,
    pub(crate) idle_key: Option<DeadlineKey>,
    pub(crate) continue_sent: bool,
    accepting: bool,
    close_after_write: bool,
    outbound: VecDeque<Bytes>,
    staged: BTreeMap<u64, Staged>,
    next_seq: u64,
    write_seq: u64,
    interest: Interest,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        transport: Box<dyn Transport>,
        peer_addr: SocketAddr,
        decoder: MessageDecoder,
    ) -> Self {
        Self {
            id,
            transport,
            peer_addr,
            protocol: Protocol::Http(decoder),
            idle_key: None,
            continue_sent: false,
            accepting: true,
            close_after_write: false,
            outbound: VecDeque::new(),
            staged: BTreeMap::new(),
            next_seq: 0,
            write_seq: 0,
            interest: Interest::READABLE,
        }
    }

    /// Reserve the sequence number for the next response.
    pub(crate) fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Sequence number the next request will receive.
    pub(crate) fn peek_seq(&self) -> u64 { self.next_seq }

    /// Requests dispatched but not yet fully answered.
    pub(crate) fn in_flight(&self) -> u64 { self.next_seq - self.write_seq }

    /// Whether further input should be decoded.
    pub(crate) fn is_accepting(&self) -> bool { self.accepting && !self.close_after_write }

    pub(crate) fn stop_accepting(&mut self) { self.accepting = false; }

    pub(crate) fn is_http(&self) -> bool { matches!(self.protocol, Protocol::Http(_)) }

    pub(crate) fn close_after_write(&mut self) {
        self.accepting = false;
        self.close_after_write = true;
    }

    /// Add output for response `seq` and move whatever is now in order to
    /// the write queue.
    pub(crate) fn stage(&mut self, seq: u64, buffers: Vec<Bytes>, last: bool, keep_alive: bool) {
        if seq < self.write_seq || self.close_after_write {
            return;
        }
        let entry = self.staged.entry(seq).or_default();
        entry.buffers.extend(buffers);
        if last {
            entry.finished = true;
            entry.keep_alive = keep_alive;
        }
        self.promote();
    }

    fn promote(&mut self) {
        while let Some(entry) = self.staged.get_mut(&self.write_seq) {
            self.outbound
                .extend(entry.buffers.drain(..).filter(|b| !b.is_empty()));
            if !entry.finished {
                break;
            }
            let keep_alive = entry.keep_alive;
            self.staged.remove(&self.write_seq);
            self.write_seq += 1;
            if !keep_alive {
                self.close_after_write();
                self.staged.clear();
                break;
            }
        }
    }

    /// Queue bytes outside the response sequence, used once the connection
    /// speaks WebSocket.
    pub(crate) fn push_raw(&mut self, bytes: Bytes) {
        if !self.close_after_write && !bytes.is_empty() {
            self.outbound.push_back(bytes);
        }
    }

    /// Whether the connection should be closed now.
    pub(crate) fn is_finished(&self) -> bool { self.close_after_write && self.outbound.is_empty() }

    /// Write as much queued output as the socket accepts. Returns `true` once
    /// the queue is empty.
    ///
    /// When the connection is closing, the write half is shut down after the
    /// last byte so the peer reads EOF right behind the final response.
    pub(crate) fn flush(&mut self) -> io::Result<bool> {
        let drained = transport::write_queue(self.transport.as_mut(), &mut self.outbound)?;
        if drained
            && self.close_after_write
            && let Err(err) = self.transport.shutdown(Shutdown::Write)
        {
            debug!(peer_addr = %self.peer_addr, error = %err, "half-close failed");
        }
        Ok(drained)
    }

    /// Keep write interest registered only while output is queued.
    pub(crate) fn update_interest(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let wanted = if self.outbound.is_empty() {
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
