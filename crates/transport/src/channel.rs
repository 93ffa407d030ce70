use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use murmur_core::ChatEvent;

use crate::error::TransportResult;
use crate::request::{ChatRequest, FeedbackSubmission};
use crate::stream::{StreamEvent, StreamHandle, StreamSender, stream_parts};
use crate::{BoxFuture, ChatTransport};

/// In-process transport for tests and the QA runner.
///
/// Every `open_stream` call records the request and exposes a
/// [`ScriptedStream`] the harness drives: push events, fail, or close, and
/// observe whether the orchestrator cancelled.
#[derive(Clone, Default)]
pub struct ChannelTransport {
    opened: Arc<Mutex<Vec<ScriptedStream>>>,
    feedback: Arc<Mutex<Vec<FeedbackSubmission>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// All streams opened so far, in open order.
    pub fn streams(&self) -> Vec<ScriptedStream> {
        lock_unpoisoned(&self.opened).clone()
    }

    pub fn last_stream(&self) -> Option<ScriptedStream> {
        lock_unpoisoned(&self.opened).last().cloned()
    }

    pub fn open_count(&self) -> usize {
        lock_unpoisoned(&self.opened).len()
    }

    /// Feedback submissions received so far.
    pub fn feedback_submissions(&self) -> Vec<FeedbackSubmission> {
        lock_unpoisoned(&self.feedback).clone()
    }
}

impl ChatTransport for ChannelTransport {
    fn open_stream(&self, request: ChatRequest) -> TransportResult<StreamHandle> {
        let (event_tx, events, cancel, cancel_rx) = stream_parts();

        let scripted = ScriptedStream {
            inner: Arc::new(ScriptedStreamInner {
                request,
                sender: Mutex::new(Some(event_tx)),
                cancelled: AtomicBool::new(false),
            }),
        };
        lock_unpoisoned(&self.opened).push(scripted.clone());

        // A fired cancel marks the stream; a dropped handle just ends the
        // worker, as it does after a normal close.
        let flag = scripted.inner.clone();
        let worker = Box::pin(async move {
            if cancel_rx.await.is_ok() {
                flag.cancelled.store(true, Ordering::SeqCst);
            }
        });

        Ok(StreamHandle {
            events,
            cancel,
            worker,
        })
    }

    fn submit_feedback<'a>(
        &'a self,
        submission: FeedbackSubmission,
    ) -> BoxFuture<'a, TransportResult<()>> {
        Box::pin(async move {
            lock_unpoisoned(&self.feedback).push(submission);
            Ok(())
        })
    }
}

/// Harness-side handle to one opened stream.
#[derive(Clone)]
pub struct ScriptedStream {
    inner: Arc<ScriptedStreamInner>,
}

struct ScriptedStreamInner {
    request: ChatRequest,
    sender: Mutex<Option<StreamSender>>,
    cancelled: AtomicBool,
}

impl ScriptedStream {
    /// The request the orchestrator sent for this stream.
    pub fn request(&self) -> &ChatRequest {
        &self.inner.request
    }

    /// Delivers one event; silently dropped once the stream is closed.
    pub fn send(&self, event: ChatEvent) {
        if let Some(sender) = lock_unpoisoned(&self.inner.sender).as_ref() {
            let _ = sender.send(StreamEvent::Event(event));
        }
    }

    /// Delivers a transport failure and closes the stream.
    pub fn fail(&self, message: impl Into<String>) {
        let mut sender = lock_unpoisoned(&self.inner.sender);
        if let Some(sender) = sender.take() {
            let _ = sender.send(StreamEvent::Failed(message.into()));
        }
    }

    /// Closes the stream without a terminal event.
    pub fn close(&self) {
        lock_unpoisoned(&self.inner.sender).take();
    }

    /// True once the orchestrator fired (or dropped) the cancel handle.
    pub fn cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_events_reach_the_stream_in_order() {
        let transport = ChannelTransport::new();
        let handle = transport.open_stream(ChatRequest::new("hi")).unwrap();
        tokio::spawn(handle.worker);

        let scripted = transport.last_stream().unwrap();
        assert_eq!(scripted.request().message, "hi");

        scripted.send(ChatEvent::Text("one".to_string()));
        scripted.send(ChatEvent::Text("two".to_string()));
        scripted.close();

        let mut events = handle.events;
        assert_eq!(
            events.recv().await,
            Some(StreamEvent::Event(ChatEvent::Text("one".to_string())))
        );
        assert_eq!(
            events.recv().await,
            Some(StreamEvent::Event(ChatEvent::Text("two".to_string())))
        );
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn cancelling_the_handle_is_visible_to_the_harness() {
        let transport = ChannelTransport::new();
        let mut handle = transport.open_stream(ChatRequest::new("hi")).unwrap();
        let worker = tokio::spawn(handle.worker);

        let scripted = transport.last_stream().unwrap();
        assert!(!scripted.cancelled());

        assert!(handle.cancel.cancel());
        worker.await.unwrap();
        assert!(scripted.cancelled());
    }

    #[tokio::test]
    async fn failure_is_terminal() {
        let transport = ChannelTransport::new();
        let handle = transport.open_stream(ChatRequest::new("hi")).unwrap();
        tokio::spawn(handle.worker);

        let scripted = transport.last_stream().unwrap();
        scripted.fail("connection reset");
        scripted.send(ChatEvent::Text("after".to_string()));

        let mut events = handle.events;
        assert_eq!(
            events.recv().await,
            Some(StreamEvent::Failed("connection reset".to_string()))
        );
        assert_eq!(events.recv().await, None, "nothing is delivered after a failure");
    }
}
