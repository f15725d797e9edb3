//! The set of open connections.
//!
//! An entry exists exactly while its connection is open. Everything that
//! outlives a single inbound message (pusher ticks, pending responses, sweeps)
//! reaches a connection through its [`ConnectionId`] and must tolerate the
//! entry being gone.
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::Message;

use super::liveness::LivenessState;
use super::sweep::{SweepAction, decide};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Work handed to the task that owns the socket.
#[derive(Debug)]
pub enum Outbound {
    Message(Message),
    /// Send a close frame and wait briefly for the peer to answer.
    Close,
    /// Drop the socket without a close handshake.
    Terminate,
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

#[derive(Debug)]
struct Entry {
    peer: SocketAddr,
    liveness: LivenessState,
    outbound: OutboundSender,
    pusher: Option<AbortHandle>,
}

#[derive(Debug, Default)]
pub struct Registry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<ConnectionId, Entry>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a connection and returns its id with the new member count.
    ///
    /// `publish` sees the count before the lock is released, so concurrent
    /// admissions and removals publish counts in registry order.
    pub fn insert(
        &self,
        peer: SocketAddr,
        outbound: OutboundSender,
        now: Instant,
        publish: impl FnOnce(usize),
    ) -> (ConnectionId, usize) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries();
        entries.insert(
            id,
            Entry {
                peer,
                liveness: LivenessState::new(now),
                outbound,
                pusher: None,
            },
        );
        let count = entries.len();
        publish(count);
        (id, count)
    }

    /// Ties the pusher task to the entry. If the connection already left, the
    /// task is aborted right away and `false` is returned.
    pub fn attach_pusher(&self, id: ConnectionId, handle: AbortHandle) -> bool {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(&id) {
            entry.pusher = Some(handle);
            return true;
        }
        drop(entries);
        handle.abort();
        false
    }

    /// Removes the entry and cancels its pusher in the same step.
    ///
    /// Returns the remaining member count, or `None` when the id was not a
    /// member. `publish` runs under the lock and only for an actual removal.
    pub fn remove(&self, id: ConnectionId, publish: impl FnOnce(usize)) -> Option<usize> {
        let mut entries = self.entries();
        let entry = entries.remove(&id)?;
        if let Some(pusher) = entry.pusher {
            pusher.abort();
        }
        let count = entries.len();
        publish(count);
        Some(count)
    }

    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries().contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.entries().keys().copied().collect()
    }

    #[must_use]
    pub fn peer(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.entries().get(&id).map(|entry| entry.peer)
    }

    #[must_use]
    pub fn liveness(&self, id: ConnectionId) -> Option<LivenessState> {
        self.entries().get(&id).map(|entry| entry.liveness)
    }

    /// Queues work for the connection. `false` when it is no longer open.
    pub fn send(&self, id: ConnectionId, outbound: Outbound) -> bool {
        self.entries()
            .get(&id)
            .is_some_and(|entry| entry.outbound.send(outbound).is_ok())
    }

    pub fn record_activity(&self, id: ConnectionId, now: Instant) {
        if let Some(entry) = self.entries().get_mut(&id) {
            entry.liveness.on_activity(now);
        }
    }

    pub fn acknowledge(&self, id: ConnectionId, now: Instant) {
        if let Some(entry) = self.entries().get_mut(&id) {
            entry.liveness.on_acknowledge(now);
        }
    }

    /// Decides the sweep outcome of every member under one lock. Pinged
    /// entries are reset here; removal is left to the caller.
    pub fn sweep(&self, now: Instant, idle_timeout: Duration) -> Vec<(ConnectionId, SweepAction)> {
        let mut entries = self.entries();
        entries
            .iter_mut()
            .map(|(id, entry)| (*id, decide(&mut entry.liveness, now, idle_timeout)))
            .collect()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ConnectionId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40_000)
    }

    const fn ignore(_count: usize) {}

    #[test]
    fn insert_and_remove_track_membership() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let (first, after_first) = registry.insert(peer(), tx.clone(), now, ignore);
        assert_eq!(after_first, 1);
        let (second, after_second) = registry.insert(peer(), tx, now, ignore);
        assert_eq!(after_second, 2);
        assert_ne!(first, second);

        assert_eq!(registry.remove(first, ignore), Some(1));
        assert!(!registry.contains(first));
        assert!(registry.contains(second));
    }

    #[test]
    fn removing_twice_is_a_no_op() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (id, _) = registry.insert(peer(), tx, Instant::now(), ignore);
        let mut published = Vec::new();
        assert_eq!(registry.remove(id, |count| published.push(count)), Some(0));
        assert_eq!(registry.remove(id, |count| published.push(count)), None);
        assert!(registry.is_empty());
        assert_eq!(published, vec![0]);
    }

    #[test]
    fn send_reaches_only_open_connections() {
        let registry = Registry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (id, _) = registry.insert(peer(), tx, Instant::now(), ignore);

        assert!(registry.send(id, Outbound::Close));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));

        registry.remove(id, ignore);
        assert!(!registry.send(id, Outbound::Terminate));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn activity_and_acknowledgment_update_liveness() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let (id, _) = registry.insert(peer(), tx, now, ignore);

        let later = crate::server::liveness::offset(now, Duration::from_secs(3));
        registry.record_activity(id, later);
        let state = registry.liveness(id);
        assert_eq!(state.map(|s| s.last_activity()), Some(later));

        registry.sweep(later, Duration::from_secs(60));
        assert_eq!(registry.liveness(id).map(|s| s.is_alive()), Some(false));
        registry.acknowledge(id, later);
        assert_eq!(registry.liveness(id).map(|s| s.is_alive()), Some(true));
    }

    #[tokio::test]
    async fn removal_aborts_the_pusher() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (id, _) = registry.insert(peer(), tx, Instant::now(), ignore);
        let task = tokio::spawn(std::future::pending::<()>());
        assert!(registry.attach_pusher(id, task.abort_handle()));

        registry.remove(id, ignore);
        let result = task.await;
        assert!(result.is_err_and(|err| err.is_cancelled()));
    }

    #[tokio::test]
    async fn late_pusher_is_aborted_immediately() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (id, _) = registry.insert(peer(), tx, Instant::now(), ignore);
        registry.remove(id, ignore);

        let task = tokio::spawn(std::future::pending::<()>());
        assert!(!registry.attach_pusher(id, task.abort_handle()));
        assert!(task.await.is_err_and(|err| err.is_cancelled()));
    }
}
