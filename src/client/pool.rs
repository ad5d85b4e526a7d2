//! Keep-alive connection cache.

use std::{
    collections::HashMap,
    hash::Hash,
    net::SocketAddr,
    time::Instant,
};

use crate::timer::{DeadlineKey, DeadlineQueue};

/// Idle connections keyed by remote address, each with an expiry deadline.
///
/// `C` is whatever identifies a connection to its owner; the reactor uses a
/// slab reference. The most recently returned connection is handed out
/// first, since it is the least likely to have been closed by the peer.
///
/// ```
/// use std::time::{Duration, Instant};
///
/// use httpwire::client::ConnectionPool;
///
/// let addr = "127.0.0.1:80".parse().unwrap();
/// let now = Instant::now();
/// let mut pool = ConnectionPool::new();
/// pool.checkin(addr, 1_u32, now + Duration::from_secs(30));
/// pool.checkin(addr, 2_u32, now + Duration::from_secs(30));
///
/// assert_eq!(pool.checkout(addr), Some(2));
/// assert_eq!(pool.expire(now + Duration::from_secs(60)), vec![1]);
/// assert!(pool.is_empty());
/// ```
#[derive(Debug)]
pub struct ConnectionPool<C> {
    idle: HashMap<SocketAddr, Vec<(C, DeadlineKey)>>,
    expiry: DeadlineQueue<(SocketAddr, C)>,
}

impl<C> Default for ConnectionPool<C> {
    fn default() -> Self {
        Self {
            idle: HashMap::new(),
            expiry: DeadlineQueue::new(),
        }
    }
}

impl<C: Copy + Eq + Hash> ConnectionPool<C> {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Number of idle connections across all addresses.
    #[must_use]
    pub fn len(&self) -> usize { self.expiry.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.expiry.is_empty() }

    /// Idle connections held for `addr`.
    #[must_use]
    pub fn idle_for(&self, addr: SocketAddr) -> usize { self.idle.get(&addr).map_or(0, Vec::len) }

    /// Park `conn` until `expires_at`.
    pub fn checkin(&mut self, addr: SocketAddr, conn: C, expires_at: Instant) {
        let key = self.expiry.offer(expires_at, (addr, conn));
        self.idle.entry(addr).or_default().push((conn, key));
    }

    /// Take the most recently parked connection for `addr`.
    pub fn checkout(&mut self, addr: SocketAddr) -> Option<C> {
        let conns = self.idle.get_mut(&addr)?;
        let (conn, key) = conns.pop()?;
        if conns.is_empty() {
            self.idle.remove(&addr);
        }
        self.expiry.remove(key);
        Some(conn)
    }

    /// Forget `conn`, for example after the peer closed it. Returns `false`
    /// if it was not pooled.
    pub fn remove(&mut self, addr: SocketAddr, conn: C) -> bool {
        let Some(conns) = self.idle.get_mut(&addr) else {
            return false;
        };
        let Some(pos) = conns.iter().position(|(c, _)| *c == conn) else {
            return false;
        };
        let (_, key) = conns.remove(pos);
        if conns.is_empty() {
            self.idle.remove(&addr);
        }
        self.expiry.remove(key);
        true
    }

    /// Remove and return every connection whose deadline is at or before
    /// `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<C> {
        let mut expired = Vec::new();
        while let Some((_, (addr, conn))) = self.expiry.poll_expired(now) {
            if let Some(conns) = self.idle.get_mut(&addr) {
                conns.retain(|(c, _)| *c != conn);
                if conns.is_empty() {
                    self.idle.remove(&addr);
                }
            }
            expired.push(conn);
        }
        expired
    }

    /// Remove everything, returning the connections.
    pub fn drain(&mut self) -> Vec<C> {
        let mut all = Vec::with_capacity(self.len());
        for (_, conns) in self.idle.drain() {
            for (conn, key) in conns {
                self.expiry.remove(key);
                all.push(conn);
            }
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::{fixture, rstest};

    use super::*;

    fn addr(port: u16) -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], port)) }

    #[fixture]
    fn pool() -> ConnectionPool<u32> { ConnectionPool::new() }

    #[rstest]
    fn checkout_is_per_address(mut pool: ConnectionPool<u32>) {
        let later = Instant::now() + Duration::from_secs(30);
        pool.checkin(addr(1), 10, later);
        pool.checkin(addr(2), 20, later);
        assert_eq!(pool.checkout(addr(2)), Some(20));
        assert_eq!(pool.checkout(addr(2)), None);
        assert_eq!(pool.idle_for(addr(1)), 1);
        assert_eq!(pool.len(), 1);
    }

    #[rstest]
    fn checkout_prefers_most_recent(mut pool: ConnectionPool<u32>) {
        let later = Instant::now() + Duration::from_secs(30);
        for conn in 1..=3 {
            pool.checkin(addr(1), conn, later);
        }
        assert_eq!(pool.checkout(addr(1)), Some(3));
        assert_eq!(pool.checkout(addr(1)), Some(2));
    }

    #[rstest]
    fn remove_evicts_single_connection(mut pool: ConnectionPool<u32>) {
        let later = Instant::now() + Duration::from_secs(30);
        pool.checkin(addr(1), 1, later);
        pool.checkin(addr(1), 2, later);
        assert!(pool.remove(addr(1), 1));
        assert!(!pool.remove(addr(1), 1));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.checkout(addr(1)), Some(2));
        assert!(pool.is_empty());
    }

    #[rstest]
    fn expire_only_returns_due_connections(mut pool: ConnectionPool<u32>) {
        let now = Instant::now();
        pool.checkin(addr(1), 1, now + Duration::from_secs(1));
        pool.checkin(addr(1), 2, now + Duration::from_secs(10));
        pool.checkin(addr(2), 3, now + Duration::from_secs(2));

        let mut expired = pool.expire(now + Duration::from_secs(5));
        expired.sort_unstable();
        assert_eq!(expired, vec![1, 3]);
        assert_eq!(pool.idle_for(addr(1)), 1);
        assert_eq!(pool.idle_for(addr(2)), 0);
    }

    #[rstest]
    fn checked_out_connection_never_expires(mut pool: ConnectionPool<u32>) {
        let now = Instant::now();
        pool.checkin(addr(1), 1, now + Duration::from_millis(1));
        assert_eq!(pool.checkout(addr(1)), Some(1));
        assert!(pool.expire(now + Duration::from_secs(1)).is_empty());
    }

    #[rstest]
    fn drain_empties_pool(mut pool: ConnectionPool<u32>) {
        let later = Instant::now() + Duration::from_secs(30);
        pool.checkin(addr(1), 1, later);
        pool.checkin(addr(2), 2, later);
        let mut all = pool.drain();
        all.sort_unstable();
        assert_eq!(all, vec![1, 2]);
        assert!(pool.is_empty());
    }
}
