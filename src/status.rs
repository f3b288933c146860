//! Status publication channel: latest-snapshot fan-out to polling clients.
//!
//! The session worker is the single writer; HTTP handlers and other readers
//! clone the most recently published snapshot without ever touching the
//! worker's lock. Snapshots are replaced whole and never mutated after
//! publication.

use tokio::sync::watch;

/// Externally visible phase of the booth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Idle,
    Countdown,
    Capturing,
    WaitingBetweenShots,
    Processing,
    Success,
    Error,
}

impl SessionMode {
    /// Wire name used by the JSON status payload.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionMode::Idle => "ready",
            SessionMode::Countdown => "countdown",
            SessionMode::Capturing => "capturing",
            SessionMode::WaitingBetweenShots => "waiting",
            SessionMode::Processing => "processing",
            SessionMode::Success => "success",
            SessionMode::Error => "error",
        }
    }

    /// A session is live from Countdown through Processing. Terminal states
    /// still block new triggers until the booth returns to Idle.
    pub fn is_live(self) -> bool {
        self != SessionMode::Idle
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionMode::Success | SessionMode::Error)
    }
}

/// Immutable copy of the session state published to pollers.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub mode: SessionMode,
    /// Increments once per started session; lets a poller tell a stale
    /// "processing" apart from a newly started session.
    pub generation: u64,
    pub message: String,
    pub shots_planned: u32,
    pub shots_taken: u32,
    /// Absolute end of the current countdown/gap phase, epoch milliseconds.
    /// The server clock is authoritative; clients derive remaining seconds.
    pub target_timestamp: Option<i64>,
    /// Filename of the composed result, set on Success and kept on a
    /// print-failure Error so the photo stays reachable via the gallery.
    pub photo_filename: Option<String>,
}

impl StatusSnapshot {
    pub fn idle() -> Self {
        Self {
            mode: SessionMode::Idle,
            generation: 0,
            message: "Ready to take photos!".to_string(),
            shots_planned: 0,
            shots_taken: 0,
            target_timestamp: None,
            photo_filename: None,
        }
    }
}

/// Single-writer handle held by the session worker.
#[derive(Debug)]
pub struct StatusPublisher {
    tx: watch::Sender<StatusSnapshot>,
}

/// Cheap many-reader handle; `current()` never blocks.
#[derive(Debug, Clone)]
pub struct StatusReader {
    rx: watch::Receiver<StatusSnapshot>,
}

pub fn channel() -> (StatusPublisher, StatusReader) {
    let (tx, rx) = watch::channel(StatusSnapshot::idle());
    (StatusPublisher { tx }, StatusReader { rx })
}

impl StatusPublisher {
    pub fn publish(&self, snapshot: StatusSnapshot) {
        // send_replace never fails even with no subscribed readers.
        self.tx.send_replace(snapshot);
    }

    pub fn current(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }
}

impl StatusReader {
    pub fn current(&self) -> StatusSnapshot {
        self.rx.borrow().clone()
    }

    /// Wait until a snapshot satisfying `pred` is published. Test helper for
    /// observing transitions without polling loops.
    pub async fn wait_for(&mut self, mut pred: impl FnMut(&StatusSnapshot) -> bool) -> StatusSnapshot {
        loop {
            if pred(&self.rx.borrow()) {
                return self.rx.borrow().clone();
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone();
            }
        }
    }
}
