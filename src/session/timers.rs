use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::session::Input;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    /// One second of the capture budget elapsed.
    CaptureTick,
    /// No fragment arrived for the silence timeout.
    Silence,
    /// Grace period after a terminal marker.
    TerminalGrace,
    ConfigureSession,
    SeedConversation,
    Reconnect,
}

/// One-shot timers that post back into the session queue.
///
/// Each kind has at most one pending timer; arming again replaces it. A firing
/// that was already queued when its timer got replaced carries an outdated id
/// and is rejected by [`Timers::fired`].
pub(crate) struct Timers {
    tx: mpsc::Sender<Input>,
    next_id: u64,
    pending: HashMap<TimerKind, (u64, JoinHandle<()>)>,
}

impl Timers {
    pub(crate) fn new(tx: mpsc::Sender<Input>) -> Self {
        Self {
            tx,
            next_id: 0,
            pending: HashMap::new(),
        }
    }

    pub(crate) fn arm(&mut self, epoch: u64, kind: TimerKind, delay: Duration) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Input::Timer { epoch, kind, id }).await;
        });
        if let Some((_, previous)) = self.pending.insert(kind, (id, handle)) {
            previous.abort();
        }
        id
    }

    /// Arms only when no timer of this kind is pending.
    pub(crate) fn arm_once(&mut self, epoch: u64, kind: TimerKind, delay: Duration) {
        if !self.is_armed(kind) {
            self.arm(epoch, kind, delay);
        }
    }

    pub(crate) fn cancel(&mut self, kind: TimerKind) {
        if let Some((_, handle)) = self.pending.remove(&kind) {
            handle.abort();
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.pending.drain() {
            handle.abort();
        }
    }

    /// Claims a firing. Returns false when the timer that sent it was
    /// cancelled or re-armed in the meantime; the pending timer is left alone.
    pub(crate) fn fired(&mut self, kind: TimerKind, id: u64) -> bool {
        match self.pending.get(&kind) {
            Some((pending_id, _)) if *pending_id == id => {
                self.pending.remove(&kind);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_armed(&self, kind: TimerKind) -> bool {
        self.pending.contains_key(&kind)
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
