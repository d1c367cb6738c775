//! BuildProcessor - admission-controlled build dispatcher
//!
//! A single actor task owns the pending queue, the in-flight count and the
//! sinks. Session tasks never touch that state: each one drives its build's
//! stream, finalizes, closes the stream and returns a report. The actor
//! joins finished sessions on its next turn, which is where the slot is
//! released and the next build admitted. A session that panics is joined
//! the same way, so its slot is released too.
//!
//! ```text
//! start ──> listener task ──discovered──┐
//! enqueue / submit_direct ──Enqueue─────┤
//!                                       v
//!                              ProcessorActor (pending, in_flight, sinks)
//!                                 │ admit            ^
//!                                 v                  │ join_next_with_id
//!                              session task ── SessionReport
//! ```

use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aggregation::{BuildSession, ExtractorRegistry, SessionStats, SignalOutcome};
use contracts::{
    AggregateRecord, BuildDescriptor, EventSource, EventStream, ListenerBlueprint,
    StreamRequest, DEFAULT_MAX_CONCURRENT_BUILDS,
};
use ingestion::{build_events_url, builds_since_url, BuildFeed};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::{ProcessorSnapshot, ProcessorStats};
use crate::submission::extract_scan_urls;

/// Admission settings
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Builds processed at one time
    pub max_concurrent_builds: usize,
    /// Finalize a session whose stream has not ended by then
    pub build_timeout: Option<Duration>,
    /// Passed through to every stream request
    pub with_credentials: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_builds: DEFAULT_MAX_CONCURRENT_BUILDS,
            build_timeout: None,
            with_credentials: true,
        }
    }
}

impl ProcessorConfig {
    pub fn new(max_concurrent_builds: usize) -> Self {
        Self {
            max_concurrent_builds,
            ..Default::default()
        }
    }

    pub fn from_blueprint(blueprint: &ListenerBlueprint) -> Self {
        Self {
            max_concurrent_builds: blueprint.processing.max_concurrent_builds,
            build_timeout: blueprint
                .processing
                .build_timeout_secs
                .map(Duration::from_secs),
            with_credentials: blueprint.server.with_credentials,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = Some(timeout);
        self
    }

    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.with_credentials = with_credentials;
        self
    }
}

/// Where a build descriptor came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOrigin {
    /// Announced on the live build stream
    Stream,
    /// Submitted by the user
    Direct,
}

impl BuildOrigin {
    fn as_str(self) -> &'static str {
        match self {
            BuildOrigin::Stream => "stream",
            BuildOrigin::Direct => "direct",
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The stream reported an error, taken as end of stream
    StreamEnded { reason: String },
    /// `build_timeout` elapsed first
    TimedOut,
    /// The stream closed without an error signal
    Closed,
}

impl SessionEnd {
    fn label(&self) -> &'static str {
        match self {
            SessionEnd::StreamEnded { .. } => "stream_ended",
            SessionEnd::TimedOut => "timed_out",
            SessionEnd::Closed => "closed",
        }
    }
}

/// What a session task returns to the actor
#[derive(Debug)]
struct SessionReport {
    build: BuildDescriptor,
    end: SessionEnd,
    records: Vec<AggregateRecord>,
    stats: SessionStats,
    elapsed: Duration,
}

/// Public operations
enum Command {
    Listen {
        server_url: String,
        start_time: String,
    },
    Enqueue {
        build: BuildDescriptor,
        origin: BuildOrigin,
    },
    WhenIdle(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Builder for a running `BuildProcessor`
pub struct ProcessorBuilder<S> {
    config: ProcessorConfig,
    source: Arc<S>,
    registry: Arc<ExtractorRegistry>,
    sinks: Vec<SinkHandle>,
}

impl<S: EventSource + 'static> ProcessorBuilder<S> {
    pub fn new(config: ProcessorConfig, source: Arc<S>) -> Self {
        Self {
            config,
            source,
            registry: Arc::new(ExtractorRegistry::default()),
            sinks: Vec::new(),
        }
    }

    pub fn registry(mut self, registry: Arc<ExtractorRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn sink(mut self, handle: SinkHandle) -> Self {
        self.sinks.push(handle);
        self
    }

    pub fn sinks(mut self, handles: impl IntoIterator<Item = SinkHandle>) -> Self {
        self.sinks.extend(handles);
        self
    }

    /// Spawn the actor task
    #[instrument(
        name = "processor_builder_spawn",
        skip(self),
        fields(
            max_concurrent = self.config.max_concurrent_builds,
            sinks = self.sinks.len()
        )
    )]
    pub fn spawn(self) -> BuildProcessor {
        let max = self.config.max_concurrent_builds.max(1);
        if max != self.config.max_concurrent_builds {
            warn!("max_concurrent_builds must be positive, using 1");
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (discovered_tx, discovered_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(ProcessorStats::new());

        info!(
            interest = ?self.registry.interest_set(),
            extractors = self.registry.len(),
            "Build processor starting"
        );

        let actor = ProcessorActor {
            max_concurrent: max,
            config: self.config,
            source: self.source,
            registry: self.registry,
            sinks: self.sinks,
            commands: command_rx,
            commands_open: true,
            discovered_tx,
            discovered_rx,
            pending: VecDeque::new(),
            in_flight: 0,
            sessions: JoinSet::new(),
            running: HashMap::new(),
            listener: None,
            idle_waiters: Vec::new(),
            stats: Arc::clone(&stats),
        };
        tokio::spawn(actor.run());

        BuildProcessor {
            tx: command_tx,
            started: Arc::new(AtomicBool::new(false)),
            stats,
        }
    }
}

/// Handle to the processor actor.
///
/// Clones share the same actor.
#[derive(Clone)]
pub struct BuildProcessor {
    tx: mpsc::UnboundedSender<Command>,
    started: Arc<AtomicBool>,
    stats: Arc<ProcessorStats>,
}

impl BuildProcessor {
    /// Processor with default registry and the given sinks
    pub fn spawn<S: EventSource + 'static>(
        config: ProcessorConfig,
        source: Arc<S>,
        sinks: Vec<SinkHandle>,
    ) -> Self {
        ProcessorBuilder::new(config, source).sinks(sinks).spawn()
    }

    fn send(&self, command: Command) -> Result<(), DispatcherError> {
        self.tx.send(command).map_err(|_| DispatcherError::Stopped)
    }

    /// Listen to the server's build stream from `start_time` (`now` or
    /// epoch millis), enqueueing every announced build.
    ///
    /// Only the first successful call opens a stream.
    pub fn start(
        &self,
        server_url: impl Into<String>,
        start_time: impl Into<String>,
    ) -> Result<(), DispatcherError> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("build processor already listening, ignoring start");
            return Err(DispatcherError::AlreadyStarted);
        }
        let result = self.send(Command::Listen {
            server_url: server_url.into(),
            start_time: start_time.into(),
        });
        if result.is_err() {
            // nothing is listening
            self.started.store(false, Ordering::SeqCst);
        }
        result
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Append a build to the pending queue and run admission
    pub fn enqueue(&self, build: BuildDescriptor) -> Result<(), DispatcherError> {
        self.send(Command::Enqueue {
            build,
            origin: BuildOrigin::Stream,
        })
    }

    /// Same queue and admission path as `enqueue`, for user-supplied builds
    pub fn submit_direct(&self, build: BuildDescriptor) -> Result<(), DispatcherError> {
        self.send(Command::Enqueue {
            build,
            origin: BuildOrigin::Direct,
        })
    }

    /// Submit every build scan link found in `text`
    pub fn submit_scan_urls(&self, text: &str) -> Result<Vec<BuildDescriptor>, DispatcherError> {
        let builds = extract_scan_urls(text);
        for build in &builds {
            self.submit_direct(build.clone())?;
        }
        Ok(builds)
    }

    /// Resolves once nothing is pending or in flight
    pub async fn wait_idle(&self) -> Result<(), DispatcherError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::WhenIdle(tx))?;
        rx.await.map_err(|_| DispatcherError::Stopped)
    }

    /// Stop listening, abandon running and pending builds, then drain and
    /// close the sinks. Records of sessions that already finished are
    /// still delivered.
    pub async fn shutdown(&self) -> Result<(), DispatcherError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx))?;
        rx.await.map_err(|_| DispatcherError::Stopped)
    }

    pub fn stats(&self) -> ProcessorSnapshot {
        self.stats.snapshot()
    }
}

struct ProcessorActor<S> {
    max_concurrent: usize,
    config: ProcessorConfig,
    source: Arc<S>,
    registry: Arc<ExtractorRegistry>,
    sinks: Vec<SinkHandle>,

    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    discovered_tx: mpsc::UnboundedSender<BuildDescriptor>,
    discovered_rx: mpsc::UnboundedReceiver<BuildDescriptor>,

    /// FIFO
    pending: VecDeque<BuildDescriptor>,
    in_flight: usize,
    sessions: JoinSet<SessionReport>,
    /// Build of every session task not yet joined
    running: HashMap<task::Id, BuildDescriptor>,
    listener: Option<JoinHandle<()>>,
    idle_waiters: Vec<oneshot::Sender<()>>,
    stats: Arc<ProcessorStats>,
}

impl<S: EventSource + 'static> ProcessorActor<S> {
    #[instrument(name = "processor_run", skip(self))]
    async fn run(mut self) {
        let mut shutdown_reply = None;

        loop {
            tokio::select! {
                Some(joined) = self.sessions.join_next_with_id(), if !self.sessions.is_empty() => {
                    self.on_session_joined(joined);
                }
                // discovered_tx is held by self, this never yields None
                Some(build) = self.discovered_rx.recv() => self.enqueue(build, BuildOrigin::Stream),
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => {
                        if let ControlFlow::Break(reply) = self.on_command(command) {
                            shutdown_reply = Some(reply);
                            break;
                        }
                    }
                    None => {
                        debug!("all processor handles dropped");
                        self.commands_open = false;
                    }
                },
            }

            let listening = self
                .listener
                .as_ref()
                .is_some_and(|listener| !listener.is_finished());
            if !self.commands_open && !listening && self.is_idle() {
                break;
            }
        }

        self.stop().await;
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    /// `Break` carries the shutdown reply
    fn on_command(&mut self, command: Command) -> ControlFlow<oneshot::Sender<()>> {
        match command {
            Command::Listen {
                server_url,
                start_time,
            } => self.listen(server_url, start_time),
            Command::Enqueue { build, origin } => self.enqueue(build, origin),
            Command::WhenIdle(reply) => {
                if self.is_idle() {
                    let _ = reply.send(());
                } else {
                    self.idle_waiters.push(reply);
                }
            }
            Command::Shutdown(reply) => return ControlFlow::Break(reply),
        }
        ControlFlow::Continue(())
    }

    fn listen(&mut self, server_url: String, start_time: String) {
        let url = builds_since_url(&server_url, &start_time);
        info!(url = %url, "Opening build stream");

        let stream = self
            .source
            .open(StreamRequest::new(url, self.config.with_credentials));
        let feed = BuildFeed::new(stream, server_url);
        let tx = self.discovered_tx.clone();

        self.listener = Some(tokio::spawn(async move {
            listen_builds(feed, tx).await;
        }));
    }

    fn enqueue(&mut self, build: BuildDescriptor, origin: BuildOrigin) {
        debug!(
            build_id = %build.build_id,
            origin = origin.as_str(),
            pending = self.pending.len() + 1,
            "Build enqueued"
        );
        self.stats.inc_enqueued();
        observability::record_build_enqueued(origin.as_str());

        self.pending.push_back(build);
        self.admit();
    }

    /// Start sessions while there is room
    fn admit(&mut self) {
        while self.in_flight < self.max_concurrent {
            let Some(build) = self.pending.pop_front() else {
                break;
            };
            self.in_flight += 1;
            self.stats.inc_admitted();
            observability::record_build_admitted();
            self.start_session(build);
        }
        self.publish_depth();
    }

    fn start_session(&mut self, build: BuildDescriptor) {
        let url = build_events_url(
            &build.server_url,
            &build.build_id,
            self.registry.interest_set(),
        );
        info!(
            build_id = %build.build_id,
            in_flight = self.in_flight,
            pending = self.pending.len(),
            "Processing build"
        );

        let stream = self
            .source
            .open(StreamRequest::new(url, self.config.with_credentials));
        let session = BuildSession::new(build.clone(), Arc::clone(&self.registry));
        let timeout = self.config.build_timeout;

        let task = self.sessions.spawn(run_session(session, stream, timeout));
        self.running.insert(task.id(), build);
    }

    fn on_session_joined(&mut self, joined: Result<(task::Id, SessionReport), JoinError>) {
        match joined {
            Ok((id, report)) => {
                self.running.remove(&id);
                self.on_session_finished(report);
            }
            Err(e) => {
                let build = self.running.remove(&e.id());
                if e.is_panic() {
                    error!(
                        build_id = ?build.as_ref().map(|b| &b.build_id),
                        "Session task panicked, build produced no records"
                    );
                    observability::record_build_completed("panicked", 0.0);
                    self.stats.inc_completed(false);
                } else {
                    debug!("Session task cancelled");
                }
            }
        }

        self.release_slot();
    }

    fn on_session_finished(&mut self, report: SessionReport) {
        let SessionReport {
            build,
            end,
            records,
            stats,
            elapsed,
        } = report;

        match &end {
            SessionEnd::TimedOut => warn!(
                build_id = %build.build_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Build stream timed out, finalized early"
            ),
            _ => debug!(
                build_id = %build.build_id,
                end = end.label(),
                records = records.len(),
                "Build processed"
            ),
        }

        observability::record_build_completed(end.label(), elapsed.as_secs_f64() * 1000.0);
        observability::record_session_events(
            stats.events_dispatched,
            stats.events_ignored,
            stats.decode_errors,
        );
        self.stats.add_records(records.len() as u64);
        self.stats
            .inc_completed(matches!(end, SessionEnd::TimedOut));

        for record in records {
            observability::record_aggregate(&record);
            for sink in &self.sinks {
                sink.deliver(record.clone());
            }
        }
    }

    fn release_slot(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.admit();
        self.notify_if_idle();
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0
    }

    fn notify_if_idle(&mut self) {
        if self.is_idle() {
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    fn publish_depth(&self) {
        self.stats.set_depth(self.in_flight, self.pending.len());
        observability::record_queue_depth(self.in_flight, self.pending.len());
    }

    #[instrument(name = "processor_stop", skip(self))]
    async fn stop(mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if !self.pending.is_empty() {
            warn!(pending = self.pending.len(), "Abandoning pending builds");
        }
        // cleared first so that joining below admits nothing new
        self.pending.clear();

        // sessions that finished before the shutdown still deliver
        while let Some(joined) = self.sessions.try_join_next_with_id() {
            self.on_session_joined(joined);
        }
        if self.in_flight > 0 {
            warn!(in_flight = self.in_flight, "Abandoning running builds");
        }
        self.sessions.shutdown().await;
        self.running.clear();
        self.in_flight = 0;
        self.publish_depth();

        for sink in self.sinks {
            sink.shutdown().await;
        }
        info!("Build processor stopped");
    }
}

async fn listen_builds<St: EventStream>(
    mut feed: BuildFeed<St>,
    tx: mpsc::UnboundedSender<BuildDescriptor>,
) {
    while let Some(build) = feed.next_build().await {
        if tx.send(build).is_err() {
            break;
        }
    }
    feed.close();
}

/// Drive one build's stream to its end, finalize and release the stream
async fn run_session<St: EventStream + 'static>(
    mut session: BuildSession,
    mut stream: St,
    timeout: Option<Duration>,
) -> SessionReport {
    let started = Instant::now();
    let end = drive_session(&mut session, &mut stream, timeout).await;

    let mut records = Vec::new();
    session.finish(&mut |record| records.push(record));
    stream.close();
    session.close();

    SessionReport {
        build: session.build().clone(),
        end,
        records,
        stats: session.stats(),
        elapsed: started.elapsed(),
    }
}

async fn drive_session<St: EventStream>(
    session: &mut BuildSession,
    stream: &mut St,
    timeout: Option<Duration>,
) -> SessionEnd {
    // a timeout too large to represent is no timeout
    let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

    loop {
        let next = match deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, stream.next_signal()).await {
                    Ok(next) => next,
                    Err(_) => return SessionEnd::TimedOut,
                }
            }
            None => stream.next_signal().await,
        };

        let Some(signal) = next else {
            return SessionEnd::Closed;
        };
        if let SignalOutcome::Finished { reason } = session.on_signal(signal) {
            return SessionEnd::StreamEnded { reason };
        }
    }
}
