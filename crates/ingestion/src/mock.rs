//! Mock 事件源
//!
//! 用于无服务器环境的测试：按 URL 回放预先编排好的信号序列。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_channel::{bounded, Receiver};
use contracts::{
    EventSource, EventStream, StreamRequest, StreamSignal, BUILD_EVENT_NAME,
    BUILD_TIMELINE_EVENT_NAME,
};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// One step of a scripted stream
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Signal(StreamSignal),
    Delay(Duration),
}

/// Scripted signal sequence.
///
/// After the last step the stream stays open and silent, like a real
/// connection that never ends. End a script with `error` to terminate it.
#[derive(Debug, Clone, Default)]
pub struct StreamScript {
    steps: Vec<ScriptStep>,
}

impl StreamScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(mut self) -> Self {
        self.steps.push(ScriptStep::Signal(StreamSignal::Open));
        self
    }

    pub fn event(mut self, name: &str, data: impl Into<String>) -> Self {
        self.steps
            .push(ScriptStep::Signal(StreamSignal::event(name, data)));
        self
    }

    /// `Build` summary for the top-level stream
    pub fn build(self, build_id: &str) -> Self {
        let payload = json!({ "buildId": build_id, "buildToolType": "gradle" });
        self.event(BUILD_EVENT_NAME, payload.to_string())
    }

    /// `BuildEvent` timeline event for a per-build stream
    pub fn build_event(self, event_type: &str, timestamp: i64, data: serde_json::Value) -> Self {
        let payload = json!({
            "timestamp": timestamp,
            "type": { "eventType": event_type, "majorVersion": 1, "minorVersion": 0 },
            "data": data,
        });
        self.event(BUILD_TIMELINE_EVENT_NAME, payload.to_string())
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.steps.push(ScriptStep::Delay(delay));
        self
    }

    pub fn error(mut self, message: &str) -> Self {
        self.steps
            .push(ScriptStep::Signal(StreamSignal::error(message)));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct OpenCounter {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl OpenCounter {
    fn opened(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock 事件源
///
/// Scripts are matched by substring against the requested URL, first
/// registration wins. Unmatched URLs replay the fallback script, which by
/// default ends the stream immediately.
pub struct MockEventSource {
    scripts: Mutex<Vec<(String, StreamScript)>>,
    fallback: Mutex<StreamScript>,
    requests: Mutex<Vec<StreamRequest>>,
    counter: Arc<OpenCounter>,
}

impl Default for MockEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEventSource {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            fallback: Mutex::new(StreamScript::new().open().error("end of stream")),
            requests: Mutex::new(Vec::new()),
            counter: Arc::new(OpenCounter::default()),
        }
    }

    /// Register a script for URLs containing `url_fragment`
    pub fn script(&self, url_fragment: impl Into<String>, script: StreamScript) {
        locked(&self.scripts).push((url_fragment.into(), script));
    }

    pub fn set_fallback(&self, script: StreamScript) {
        *locked(&self.fallback) = script;
    }

    /// Every request opened so far, in order
    pub fn requests(&self) -> Vec<StreamRequest> {
        locked(&self.requests).clone()
    }

    pub fn open_count(&self) -> usize {
        locked(&self.requests).len()
    }

    /// Streams currently open
    pub fn active(&self) -> usize {
        self.counter.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open streams observed
    pub fn peak_active(&self) -> usize {
        self.counter.peak.load(Ordering::SeqCst)
    }

    fn script_for(&self, url: &str) -> StreamScript {
        locked(&self.scripts)
            .iter()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
            .map(|(_, script)| script.clone())
            .unwrap_or_else(|| locked(&self.fallback).clone())
    }
}

impl EventSource for MockEventSource {
    type Stream = MockStream;

    fn open(&self, request: StreamRequest) -> MockStream {
        let script = self.script_for(&request.url);
        debug!(url = %request.url, steps = script.len(), "mock stream opened");
        locked(&self.requests).push(request.clone());
        self.counter.opened();

        let (tx, rx) = bounded(script.len().max(1));
        let task = tokio::spawn(async move {
            for step in script.steps {
                match step {
                    ScriptStep::Signal(signal) => {
                        trace!(?signal, "mock stream signal");
                        if tx.send(signal).await.is_err() {
                            return;
                        }
                    }
                    ScriptStep::Delay(delay) => tokio::time::sleep(delay).await,
                }
            }
            // keep the sender alive: an idle stream never yields None
            std::future::pending::<()>().await;
        });

        MockStream {
            url: request.url,
            rx,
            task: Some(task),
            counter: self.counter.clone(),
        }
    }
}

/// Stream handle returned by `MockEventSource`
pub struct MockStream {
    url: String,
    rx: Receiver<StreamSignal>,
    task: Option<JoinHandle<()>>,
    counter: Arc<OpenCounter>,
}

impl EventStream for MockStream {
    async fn next_signal(&mut self) -> Option<StreamSignal> {
        if self.task.is_none() {
            return None;
        }
        self.rx.recv().await.ok()
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.rx.close();
            self.counter.closed();
            trace!(url = %self.url, "mock stream closed");
        }
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.close();
    }
}
