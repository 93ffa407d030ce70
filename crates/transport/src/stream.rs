use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};

use murmur_core::ChatEvent;

/// What a transport worker can deliver before the stream closes.
///
/// A `Failed` is terminal from the transport's point of view; the
/// orchestrator turns it into a synthetic `error` event so failures reach the
/// user through the same path as every other mutation. Stream close is the
/// channel closing, not a variant.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Event(ChatEvent),
    Failed(String),
}

pub type StreamSender = mpsc::UnboundedSender<StreamEvent>;
pub type TransportWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Receiving half of one stream; events arrive in delivery order.
///
/// Dropping the stream stops the worker at its next send.
pub struct ChatEventStream {
    events: mpsc::UnboundedReceiver<StreamEvent>,
}

impl ChatEventStream {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.events.try_recv().ok()
    }
}

/// Cooperative cancellation token for one stream.
///
/// Firing it (or dropping it) asks the worker to stop delivering further
/// events; anything already in flight may still arrive and must be handled
/// gracefully downstream.
#[derive(Debug)]
pub struct CancelHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl CancelHandle {
    /// Requests cancellation. Returns false when the worker is already gone
    /// or the handle was already fired.
    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|cancel_tx| cancel_tx.send(()).is_ok())
            .unwrap_or(false)
    }

    pub fn is_armed(&self) -> bool {
        self.cancel_tx.is_some()
    }
}

/// Everything `open_stream` hands back: the event stream, the cancel token,
/// and the worker future the caller must spawn.
pub struct StreamHandle {
    pub events: ChatEventStream,
    pub cancel: CancelHandle,
    pub worker: TransportWorker,
}

/// Wires up the channel trio every transport implementation shares.
pub(crate) fn stream_parts() -> (
    StreamSender,
    ChatEventStream,
    CancelHandle,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        ChatEventStream { events: event_rx },
        CancelHandle {
            cancel_tx: Some(cancel_tx),
        },
        cancel_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_send_order_and_close_on_sender_drop() {
        let (event_tx, mut stream, _cancel, _cancel_rx) = stream_parts();
        event_tx
            .send(StreamEvent::Event(ChatEvent::Text("a".to_string())))
            .unwrap();
        event_tx
            .send(StreamEvent::Event(ChatEvent::Text("b".to_string())))
            .unwrap();
        drop(event_tx);

        assert_eq!(
            stream.recv().await,
            Some(StreamEvent::Event(ChatEvent::Text("a".to_string())))
        );
        assert_eq!(
            stream.recv().await,
            Some(StreamEvent::Event(ChatEvent::Text("b".to_string())))
        );
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn cancel_fires_once() {
        let (_event_tx, _stream, mut cancel, mut cancel_rx) = stream_parts();
        assert!(cancel.is_armed());
        assert!(cancel.cancel());
        assert!(!cancel.cancel(), "second fire is a no-op");
        assert!(cancel_rx.try_recv().is_ok());
    }
}
