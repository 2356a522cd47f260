//! Fakes for the streamer's collaborators

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use procstream_sinks::{LogStore, Notification, Notifier, NotifyError, StoreError};
use procstream_types::LogRecord;

use crate::source::{Attachment, LogSource, SourceError, SourceEvent};

enum Outcome {
    Fail,
    Attach(mpsc::Receiver<SourceEvent>),
}

/// Source that replays queued outcomes, failing once the queue is empty
pub struct ScriptedSource {
    script: Mutex<VecDeque<Outcome>>,
    calls: Mutex<Vec<Instant>>,
    attach_delay: Mutex<Duration>,
}

impl ScriptedSource {
    pub fn always_failing() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            attach_delay: Mutex::new(Duration::ZERO),
        })
    }

    /// Make every attach call take `delay` before resolving
    pub fn set_attach_delay(&self, delay: Duration) {
        *self.attach_delay.lock() = delay;
    }

    pub fn push_failure(&self) {
        self.script.lock().push_back(Outcome::Fail);
    }

    /// Queue a successful attach and return the sender feeding it
    pub fn push_attachment(&self) -> mpsc::Sender<SourceEvent> {
        let (tx, rx) = mpsc::channel(64);
        self.script.lock().push_back(Outcome::Attach(rx));
        tx
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Time between consecutive attach calls
    pub fn call_gaps(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .windows(2)
            .map(|w| w[1].duration_since(w[0]))
            .collect()
    }
}

#[async_trait]
impl LogSource for ScriptedSource {
    async fn attach(&self) -> Result<Attachment, SourceError> {
        self.calls.lock().push(Instant::now());
        let delay = *self.attach_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.script.lock().pop_front() {
            Some(Outcome::Attach(rx)) => Ok(Attachment::new(rx)),
            Some(Outcome::Fail) | None => Err(SourceError::Other("scripted failure".into())),
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Store whose every call fails
pub struct FailingStore;

#[async_trait]
impl LogStore for FailingStore {
    async fn append(&self, _record: &LogRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("simulated outage".into()))
    }

    async fn recent(&self, _source: &str, _limit: usize) -> Result<Vec<LogRecord>, StoreError> {
        Err(StoreError::Unavailable("simulated outage".into()))
    }
}

/// Notifier that records deliveries
pub struct RecordingNotifier {
    configured: bool,
    fail: bool,
    attempts: AtomicUsize,
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new(configured: bool) -> Arc<Self> {
        Arc::new(Self {
            configured,
            fail: false,
            attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            configured: true,
            fail: true,
            attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(NotifyError::Rejected(500));
        }
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}
