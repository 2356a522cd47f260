use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use procstream_types::{LogRecord, StreamerPhase, StreamerStatus};

use crate::backoff::ReconnectPolicy;
use crate::broadcast::LogBroadcaster;
use crate::parser::LogParser;
use crate::pipeline::LogPipeline;
use crate::source::{Attachment, LogSource, SourceEvent};

/// Static settings for a log streamer
#[derive(Clone, Debug)]
pub struct StreamerSettings {
    /// Identifier of the monitored process, used as the record source
    pub process_name: String,

    /// Tag stamped on every record from this ingestion path
    pub category: String,

    /// Initial value of the operator toggle
    pub enabled: bool,

    pub reconnect: ReconnectPolicy,
}

impl StreamerSettings {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            category: "process-stream".to_string(),
            enabled: true,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

struct State {
    enabled: bool,
    phase: StreamerPhase,
    reconnect_attempts: u32,
}

/// What the supervisor does next
enum Next {
    Consume(Attachment),
    Retry(Duration),
}

/// Everything the supervisor task needs
struct Shared {
    settings: StreamerSettings,
    source: Arc<dyn LogSource>,
    pipeline: LogPipeline,
    state: Mutex<State>,
}

impl Shared {
    /// Record a successful attachment unless the run was cancelled meanwhile
    fn mark_attached(&self, cancel: &CancellationToken) -> bool {
        let mut state = self.state.lock();
        if cancel.is_cancelled() {
            return false;
        }
        if state.reconnect_attempts > 0 {
            tracing::info!(
                attempts = state.reconnect_attempts,
                process = %self.settings.process_name,
                "log stream reattached"
            );
        }
        state.phase = StreamerPhase::Attached;
        state.reconnect_attempts = 0;
        true
    }

    /// Count a failed or dropped attachment and pick the retry delay
    ///
    /// Returns `None` when the run should end, either because it was
    /// cancelled or because the retry budget is spent.
    fn record_failure(&self, cancel: &CancellationToken) -> Option<Duration> {
        let mut state = self.state.lock();
        if cancel.is_cancelled() {
            return None;
        }

        state.reconnect_attempts += 1;
        let policy = &self.settings.reconnect;
        if policy.is_exhausted(state.reconnect_attempts) {
            state.phase = StreamerPhase::Stopped;
            tracing::error!(
                attempts = state.reconnect_attempts,
                process = %self.settings.process_name,
                "giving up on log stream; start it again to resume"
            );
            return None;
        }

        let delay = policy.delay_for(state.reconnect_attempts);
        state.phase = StreamerPhase::Reconnecting;
        tracing::warn!(
            attempt = state.reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            process = %self.settings.process_name,
            "log stream lost; scheduling reconnect"
        );
        Some(delay)
    }

    /// Feed attachment events through the pipeline until it closes or the run is cancelled
    async fn consume(&self, mut attachment: Attachment, cancel: &CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                event = attachment.next() => {
                    match event {
                        Some(SourceEvent::Line { stream, text }) => {
                            let record = LogParser::parse(
                                &text,
                                stream,
                                &self.settings.process_name,
                                &self.settings.category,
                            );
                            if let Some(record) = record {
                                self.pipeline.process(record).await;
                            }
                        }
                        Some(SourceEvent::Failed(e)) => {
                            tracing::warn!(error = %e, "log attachment failed");
                            break;
                        }
                        None => {
                            tracing::info!(process = %self.settings.process_name, "log attachment closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Drive one start-to-stop run: consume, back off, reattach
    async fn supervise(self: Arc<Self>, cancel: CancellationToken, mut next: Next) {
        loop {
            next = match next {
                Next::Consume(attachment) => {
                    self.consume(attachment, &cancel).await;
                    match self.record_failure(&cancel) {
                        Some(delay) => Next::Retry(delay),
                        None => return,
                    }
                }
                Next::Retry(delay) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }

                    let attached = tokio::select! {
                        _ = cancel.cancelled() => return,
                        result = self.source.attach() => result,
                    };

                    match attached {
                        Ok(attachment) if self.mark_attached(&cancel) => Next::Consume(attachment),
                        Ok(_) => return,
                        Err(e) => {
                            tracing::warn!(error = %e, source = %self.source.describe(), "reattach failed");
                            match self.record_failure(&cancel) {
                                Some(delay) => Next::Retry(delay),
                                None => return,
                            }
                        }
                    }
                }
            };
        }
    }
}

/// Handle on a running supervisor task
struct Supervisor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Supervisor {
    fn shutdown(self) {
        self.cancel.cancel();
        // Aborting drops the attachment, which kills the process
        self.task.abort();
    }
}

struct Inner {
    shared: Arc<Shared>,
    /// Serializes start/stop so only one supervisor ever runs
    control: tokio::sync::Mutex<Option<Supervisor>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(supervisor) = self.control.get_mut().take() {
            supervisor.shutdown();
        }
    }
}

/// Tails a process's log output with reconnect-and-backoff
///
/// Construct one per monitored process and share it by cloning; clones
/// refer to the same state. No operation returns an error: failures are
/// logged and surface only through [`LogStreamer::status`].
#[derive(Clone)]
pub struct LogStreamer {
    inner: Arc<Inner>,
}

impl LogStreamer {
    pub fn new(settings: StreamerSettings, source: Arc<dyn LogSource>, pipeline: LogPipeline) -> Self {
        let phase = if settings.enabled {
            StreamerPhase::Idle
        } else {
            StreamerPhase::Disabled
        };
        let state = State {
            enabled: settings.enabled,
            phase,
            reconnect_attempts: 0,
        };

        Self {
            inner: Arc::new(Inner {
                shared: Arc::new(Shared {
                    settings,
                    source,
                    pipeline,
                    state: Mutex::new(state),
                }),
                control: tokio::sync::Mutex::new(None),
            }),
        }
    }

    fn shared(&self) -> &Arc<Shared> {
        &self.inner.shared
    }

    /// Attach to the process if enabled and not already streaming
    ///
    /// The first attach is awaited before this returns, so the status right
    /// after `start` reflects its outcome. The control lock is held for that
    /// attempt: a concurrent `stop` or `disable` waits for it to resolve and
    /// then tears down whatever it produced.
    pub async fn start(&self) {
        let shared = self.shared();
        let mut control = self.inner.control.lock().await;

        {
            let mut state = shared.state.lock();
            if !state.enabled {
                tracing::info!(process = %shared.settings.process_name, "log streaming is disabled; not starting");
                return;
            }
            if state.phase.is_streaming() {
                tracing::debug!("log stream already running");
                return;
            }
            if state.phase == StreamerPhase::Stopped {
                // Fresh retry budget after giving up
                state.reconnect_attempts = 0;
            }
        }

        if let Some(finished) = control.take() {
            finished.shutdown();
        }

        let cancel = CancellationToken::new();
        let next = match shared.source.attach().await {
            Ok(attachment) => {
                shared.mark_attached(&cancel);
                tracing::info!(
                    source = %shared.source.describe(),
                    pid = ?attachment.pid(),
                    "log stream attached"
                );
                Next::Consume(attachment)
            }
            Err(e) => {
                tracing::warn!(error = %e, source = %shared.source.describe(), "failed to attach log stream");
                match shared.record_failure(&cancel) {
                    Some(delay) => Next::Retry(delay),
                    None => return,
                }
            }
        };

        let task = tokio::spawn(Arc::clone(shared).supervise(cancel.clone(), next));
        *control = Some(Supervisor { cancel, task });
    }

    /// Tear down the attachment and any pending reconnect
    pub async fn stop(&self) {
        let mut control = self.inner.control.lock().await;
        if let Some(supervisor) = control.take() {
            supervisor.shutdown();
        }

        let mut state = self.shared().state.lock();
        state.phase = if state.enabled {
            StreamerPhase::Idle
        } else {
            StreamerPhase::Disabled
        };
        tracing::info!(process = %self.shared().settings.process_name, "log stream stopped");
    }

    pub fn enable(&self) {
        let mut state = self.shared().state.lock();
        state.enabled = true;
        if state.phase == StreamerPhase::Disabled {
            state.phase = StreamerPhase::Idle;
        }
        tracing::info!("log streaming enabled");
    }

    pub async fn disable(&self) {
        self.shared().state.lock().enabled = false;
        self.stop().await;
        tracing::info!("log streaming disabled");
    }

    pub fn status(&self) -> StreamerStatus {
        let state = self.shared().state.lock();
        StreamerStatus {
            enabled: state.enabled,
            streaming: state.phase.is_streaming(),
            reconnect_attempts: state.reconnect_attempts,
            phase: state.phase,
        }
    }

    /// Most recent persisted records for this process, newest first
    ///
    /// Store failures yield an empty list.
    pub async fn recent_logs(&self, limit: usize) -> Vec<LogRecord> {
        let shared = self.shared();
        match shared
            .pipeline
            .store()
            .recent(&shared.settings.process_name, limit)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load recent logs");
                Vec::new()
            }
        }
    }

    /// Run a caller-supplied record through the same pipeline as live lines
    pub async fn test_log_entry(&self, record: LogRecord) {
        self.shared().pipeline.process(record).await;
    }

    /// Register a real-time subscriber for live records
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<LogRecord> {
        self.broadcaster().subscribe()
    }

    pub fn broadcaster(&self) -> &LogBroadcaster {
        self.shared().pipeline.broadcaster()
    }

    pub fn settings(&self) -> &StreamerSettings {
        &self.shared().settings
    }

    /// Stop streaming and wait for in-flight notifications
    pub async fn shutdown(&self) {
        self.stop().await;
        self.shared().pipeline.drain().await;
    }
}
