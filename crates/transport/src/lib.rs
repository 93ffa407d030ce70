use std::future::Future;
use std::pin::Pin;

/// In-process scripted transport for tests and QA scenarios.
pub mod channel;
pub mod error;
/// Outgoing request and feedback wire shapes.
pub mod request;
/// Production SSE transport.
pub mod sse;
/// Cancellable event-stream plumbing shared by every transport.
pub mod stream;

pub use channel::{ChannelTransport, ScriptedStream};
pub use error::{TransportError, TransportResult};
pub use request::{ChatRequest, FeedbackKind, FeedbackSubmission, HistoryEntry, RequestContext};
pub use sse::{SseTransport, SseTransportConfig};
pub use stream::{CancelHandle, ChatEventStream, StreamEvent, StreamHandle, TransportWorker};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Boundary the orchestrator talks through to reach the chat server.
///
/// `open_stream` returns synchronously with the stream, its cancel token, and
/// a worker future the caller spawns; events then arrive strictly in delivery
/// order until the stream closes.
pub trait ChatTransport: Send + Sync {
    fn open_stream(&self, request: ChatRequest) -> TransportResult<StreamHandle>;

    fn submit_feedback<'a>(
        &'a self,
        submission: FeedbackSubmission,
    ) -> BoxFuture<'a, TransportResult<()>>;
}
