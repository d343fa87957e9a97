//! Commit handles for applied log entries.
//!
//! Every applied log entry hands the state machine a [`Commit`]: the entry
//! index, the submitting session, the leader timestamp, and the operation
//! payload. Closing the commit signals that the entry is eligible for
//! compaction under its declared mode. A state machine may retain a commit
//! past `apply` (a topic subscription, a value's owning write) but must
//! close it exactly once.
//!
//! Close-once is enforced by move: [`Commit::close`] consumes the handle,
//! so a second close or a read-after-close does not compile. Dropping a
//! commit without closing it is a bug; the [`CommitLedger`] counts it as a
//! leak so tests can assert conservation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::CompactionMode;
use crate::types::{LogIndex, SessionId};

/// Counts of commit lifecycle events, shared by every commit the host
/// creates.
///
/// Conservation holds when `opened == closed` and `leaked == 0` after the
/// log quiesces.
#[derive(Debug, Default)]
pub struct CommitLedger {
    opened: AtomicU64,
    closed: AtomicU64,
    leaked: AtomicU64,
}

impl CommitLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Commits created so far.
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    /// Commits closed so far.
    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }

    /// Commits dropped without being closed.
    pub fn leaked(&self) -> u64 {
        self.leaked.load(Ordering::SeqCst)
    }

    /// Commits currently retained by some state machine.
    pub fn open_commits(&self) -> u64 {
        self.opened() - self.closed() - self.leaked()
    }
}

/// Tracks whether one commit was closed before it went out of scope.
#[derive(Debug)]
struct CommitGuard {
    ledger: Arc<CommitLedger>,
    closed: bool,
}

impl CommitGuard {
    fn open(ledger: Arc<CommitLedger>) -> Self {
        ledger.opened.fetch_add(1, Ordering::SeqCst);
        Self {
            ledger,
            closed: false,
        }
    }

    fn mark_closed(&mut self) {
        self.closed = true;
        self.ledger.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for CommitGuard {
    fn drop(&mut self) {
        if !self.closed {
            self.ledger.leaked.fetch_add(1, Ordering::SeqCst);
            tracing::warn!("commit dropped without close");
        }
    }
}

/// A handle to one applied log entry.
#[derive(Debug)]
pub struct Commit<T> {
    index: LogIndex,
    session: SessionId,
    timestamp: u64,
    compaction: CompactionMode,
    guard: CommitGuard,
    operation: T,
}

impl<T> Commit<T> {
    pub fn new(
        index: LogIndex,
        session: SessionId,
        timestamp: u64,
        compaction: CompactionMode,
        operation: T,
        ledger: &Arc<CommitLedger>,
    ) -> Self {
        Self {
            index,
            session,
            timestamp,
            compaction,
            guard: CommitGuard::open(Arc::clone(ledger)),
            operation,
        }
    }

    /// The log index of the entry.
    pub fn index(&self) -> LogIndex {
        self.index
    }

    /// The session that submitted the operation.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// The leader timestamp at which the entry was logged, in ms.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// The compaction mode declared for the entry.
    pub fn compaction(&self) -> CompactionMode {
        self.compaction
    }

    /// The operation carried by the entry.
    pub fn operation(&self) -> &T {
        &self.operation
    }

    /// Close the commit, releasing the entry to the compactor.
    pub fn close(self) {
        let Commit { mut guard, .. } = self;
        guard.mark_closed();
    }

    /// Re-wrap the payload while keeping the entry identity and guard.
    ///
    /// Used by the manager to hand a machine the inner operation without
    /// counting a second commit.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Commit<U> {
        let Commit {
            index,
            session,
            timestamp,
            compaction,
            guard,
            operation,
        } = self;
        Commit {
            index,
            session,
            timestamp,
            compaction,
            guard,
            operation: f(operation),
        }
    }
}
