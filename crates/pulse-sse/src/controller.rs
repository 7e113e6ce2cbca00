//! Owns one logical stream end to end.
//!
//! [`StreamController::open`] spawns the transport on its own task and hands
//! back a [`DeltaStream`]. The transport pushes raw chunks into a bounded
//! channel; the delta stream pulls them on the consumer's task, reassembles
//! event blocks, parses and routes them, and yields content deltas until
//! exactly one [`StreamOutcome`] is reached or the stream is cancelled.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use pulse_core::config::StreamConfig;
use pulse_core::stream::{StreamOutcome, error_delta};

use crate::accumulator::ByteAccumulator;
use crate::parser::parse_event;
use crate::routing::route_event;
use crate::transport::{self, StreamRequest, Transport, TransportSignal};

/// Opens delta streams over an injected transport.
#[derive(Clone)]
pub struct StreamController {
    transport: Arc<dyn Transport>,
    config: StreamConfig,
}

impl StreamController {
    pub fn new(transport: Arc<dyn Transport>, config: StreamConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Start `request` and return its delta sequence.
    ///
    /// The SSE headers are always applied on top of the caller's headers.
    /// Must be called from within a tokio runtime.
    pub fn open(&self, request: StreamRequest) -> DeltaStream {
        let request = request.with_sse_headers();
        let id = Uuid::new_v4();
        let (sink, rx) = transport::channel(self.config.channel_capacity);
        let cancel = CancellationToken::new();
        let teardown = cancel.child_token();

        info!(stream_id = %id, url = %request.url, "Opening stream");

        let transport = Arc::clone(&self.transport);
        let token = teardown.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(stream_id = %id, "Transport torn down");
                }
                _ = transport.run(request, sink) => {}
            }
        });

        DeltaStream {
            id,
            rx,
            accumulator: ByteAccumulator::new(),
            pending: VecDeque::new(),
            outcome: None,
            interrupted: false,
            cancel,
            teardown,
            task,
        }
    }
}

/// Cancels a [`DeltaStream`] from another task.
#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// A finite sequence of deltas that can tell whether it was cut short.
pub trait DeltaSource: Stream<Item = String> + Unpin + Send {
    /// True when the sequence ended because the caller cancelled it.
    fn ended_by_cancel(&self) -> bool;
}

/// Ordered, lazily produced, non-restartable sequence of content deltas.
///
/// Failures arrive as a single `"Error: "` delta followed by the end of the
/// sequence. Cancellation ends the sequence silently; deltas not yet taken
/// are discarded, even when the terminal event has already been read.
/// Dropping the stream tears the transport down.
pub struct DeltaStream {
    id: Uuid,
    rx: mpsc::Receiver<TransportSignal>,
    accumulator: ByteAccumulator,
    pending: VecDeque<String>,
    outcome: Option<StreamOutcome>,
    interrupted: bool,
    /// Caller cancellation, shared with every [`CancelHandle`].
    cancel: CancellationToken,
    /// Stops the transport task; fired by `cancel` or by reaching an outcome.
    teardown: CancellationToken,
    task: JoinHandle<()>,
}

impl DeltaStream {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Terminal outcome, once reached. `None` for a stream cancelled before
    /// its last delta was taken.
    pub fn outcome(&self) -> Option<&StreamOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcome.is_none() && self.cancel.is_cancelled()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    /// Tear down the transport. No delta is produced after this returns.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.cut_short();
    }

    /// Take the next delta.
    pub async fn next_delta(&mut self) -> Option<String> {
        futures::StreamExt::next(self).await
    }

    /// Apply a caller cancel. A stream whose deltas were all taken keeps
    /// its outcome.
    fn cut_short(&mut self) {
        if self.interrupted || (self.outcome.is_some() && self.pending.is_empty()) {
            return;
        }
        debug!(stream_id = %self.id, undelivered = self.pending.len(), "Stream cancelled");
        self.interrupted = true;
        self.outcome = None;
        self.pending.clear();
        self.accumulator.clear();
        self.teardown.cancel();
        self.rx.close();
        self.task.abort();
    }

    fn handle_signal(&mut self, signal: TransportSignal) {
        match signal {
            TransportSignal::Bytes(bytes) => {
                for block in self.accumulator.append(&bytes) {
                    if self.outcome.is_some() {
                        break;
                    }
                    let Some(event) = parse_event(&block) else {
                        continue;
                    };
                    let routing = route_event(&event);
                    if let Some(delta) = routing.delta {
                        self.pending.push_back(delta);
                    }
                    if let Some(outcome) = routing.outcome {
                        self.terminate(outcome);
                    }
                }
            }
            TransportSignal::End => self.terminate(StreamOutcome::Finished),
            TransportSignal::Failed(error) => {
                self.pending.push_back(error_delta(&error));
                self.terminate(StreamOutcome::Failed(error.to_string()));
            }
        }
    }

    fn terminate(&mut self, outcome: StreamOutcome) {
        if self.outcome.is_some() {
            return;
        }
        let residual = self.accumulator.clear();
        if residual > 0 {
            debug!(stream_id = %self.id, bytes = residual, "Dropping unterminated trailing block");
        }
        info!(stream_id = %self.id, %outcome, "Stream ended");
        self.outcome = Some(outcome);
        self.teardown.cancel();
        self.rx.close();
    }
}

impl Stream for DeltaStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        let this = self.get_mut();
        loop {
            if this.cancel.is_cancelled() {
                this.cut_short();
                return Poll::Ready(None);
            }
            if let Some(delta) = this.pending.pop_front() {
                return Poll::Ready(Some(delta));
            }
            if this.outcome.is_some() {
                return Poll::Ready(None);
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(signal)) => this.handle_signal(signal),
                // Transport returned without reporting an end.
                Poll::Ready(None) => this.handle_signal(TransportSignal::End),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl DeltaSource for DeltaStream {
    fn ended_by_cancel(&self) -> bool {
        self.is_cancelled()
    }
}

impl Drop for DeltaStream {
    fn drop(&mut self) {
        self.teardown.cancel();
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;

    use crate::mock::{MockStep, MockTransport};

    fn controller(transport: MockTransport) -> StreamController {
        StreamController::new(Arc::new(transport), StreamConfig::default())
    }

    async fn collect(mut stream: DeltaStream) -> (Vec<String>, Option<StreamOutcome>) {
        let mut deltas = Vec::new();
        while let Some(delta) = stream.next().await {
            deltas.push(delta);
        }
        (deltas, stream.outcome().cloned())
    }

    #[tokio::test]
    async fn content_then_done() {
        let stream = controller(MockTransport::chunks([
            "data: {\"content\":\"Hel\",\"done\":false}\n\n",
            "data: {\"content\":\"lo\",\"done\":true}\n\n",
        ]))
        .open(StreamRequest::post("http://mock/chat"));

        let (deltas, outcome) = collect(stream).await;
        assert_eq!(deltas, vec!["Hel", "lo"]);
        assert_eq!(outcome, Some(StreamOutcome::Finished));
    }

    #[tokio::test]
    async fn nothing_after_terminal_event() {
        let stream = controller(MockTransport::chunks([
            "event: done\ndata: x\n\ndata: {\"content\":\"late\",\"done\":false}\n\n",
            "data: {\"content\":\"later\",\"done\":false}\n\n",
        ]))
        .open(StreamRequest::post("http://mock/chat"));

        let (deltas, outcome) = collect(stream).await;
        assert!(deltas.is_empty());
        assert_eq!(outcome, Some(StreamOutcome::Finished));
    }

    #[tokio::test]
    async fn transport_failure_becomes_error_delta() {
        let stream = controller(MockTransport::new(vec![
            MockStep::chunk("data: {\"content\":\"partial\",\"done\":false}\n\n"),
            MockStep::Fail(pulse_core::error::TransportError::Timeout("read".into())),
        ]))
        .open(StreamRequest::post("http://mock/chat"));

        let (deltas, outcome) = collect(stream).await;
        assert_eq!(deltas, vec!["partial", "Error: Timed out: read"]);
        assert_eq!(
            outcome,
            Some(StreamOutcome::Failed("Timed out: read".into()))
        );
    }

    #[tokio::test]
    async fn end_without_separator_drops_residual() {
        let stream = controller(MockTransport::chunks([
            "data: {\"content\":\"kept\",\"done\":false}\n\n",
            "data: {\"content\":\"lost\",\"done\":false}",
        ]))
        .open(StreamRequest::post("http://mock/chat"));

        let (deltas, outcome) = collect(stream).await;
        assert_eq!(deltas, vec!["kept"]);
        assert_eq!(outcome, Some(StreamOutcome::Finished));
    }

    #[tokio::test]
    async fn sse_headers_are_applied() {
        let transport = Arc::new(MockTransport::chunks(["event: done\ndata: x\n\n"]));
        let controller = StreamController::new(transport.clone(), StreamConfig::default());
        let request = StreamRequest::post("http://mock/chat").bearer("tok");
        let (_, outcome) = collect(controller.open(request)).await;
        assert_eq!(outcome, Some(StreamOutcome::Finished));

        let recorded = transport.requests();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].header_value("Accept"), Some("text/event-stream"));
        assert_eq!(recorded[0].header_value("Cache-Control"), Some("no-cache"));
        assert_eq!(recorded[0].header_value("Connection"), Some("keep-alive"));
        assert_eq!(recorded[0].header_value("Authorization"), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn cancel_discards_queued_deltas() {
        let mut stream = controller(MockTransport::new(vec![
            MockStep::chunk(
                "data: {\"content\":\"a\",\"done\":false}\n\ndata: {\"content\":\"b\",\"done\":false}\n\n",
            ),
            MockStep::Hang,
        ]))
        .open(StreamRequest::post("http://mock/chat"));

        assert_eq!(stream.next().await.as_deref(), Some("a"));
        stream.cancel();
        assert!(stream.next().await.is_none());
        assert!(stream.is_cancelled());
        assert!(stream.ended_by_cancel());
        assert!(stream.outcome().is_none());
    }

    #[tokio::test]
    async fn cancel_handle_unblocks_pending_consumer() {
        let mut stream = controller(MockTransport::new(vec![MockStep::Hang]))
            .open(StreamRequest::post("http://mock/chat"));
        let handle = stream.cancel_handle();

        let consumer = tokio::spawn(async move {
            let next = stream.next().await;
            (next, stream.is_cancelled())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let (next, cancelled) = tokio::time::timeout(Duration::from_secs(2), consumer)
            .await
            .expect("consumer should resolve after cancel")
            .unwrap();
        assert!(next.is_none());
        assert!(cancelled);
    }

    #[tokio::test]
    async fn cancel_after_finish_keeps_outcome() {
        let mut stream = controller(MockTransport::chunks(["event: done\ndata: x\n\n"]))
            .open(StreamRequest::post("http://mock/chat"));
        assert!(stream.next().await.is_none());
        stream.cancel();
        assert_eq!(stream.outcome(), Some(&StreamOutcome::Finished));
        assert!(!stream.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_handle_drops_deltas_read_with_the_outcome() {
        let mut stream = controller(MockTransport::chunks([concat!(
            "data: {\"content\":\"a\",\"done\":false}\n\n",
            "data: {\"content\":\"b\",\"done\":false}\n\n",
            "data: {\"content\":\"c\",\"done\":true}\n\n",
        )]))
        .open(StreamRequest::post("http://mock/chat"));
        let handle = stream.cancel_handle();

        assert_eq!(stream.next().await.as_deref(), Some("a"));
        handle.cancel();
        assert!(stream.next().await.is_none());
        assert!(stream.is_cancelled());
        assert!(stream.ended_by_cancel());
        assert!(stream.outcome().is_none());
    }

    #[tokio::test]
    async fn finished_stream_does_not_cancel_its_handle() {
        let mut stream = controller(MockTransport::chunks(["event: done\ndata: x\n\n"]))
            .open(StreamRequest::post("http://mock/chat"));
        let handle = stream.cancel_handle();
        assert!(stream.next().await.is_none());
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn next_delta_matches_stream_next() {
        let mut stream = controller(MockTransport::chunks([
            "data: {\"content\":\"x\",\"done\":true}\n\n",
        ]))
        .open(StreamRequest::post("http://mock/chat"));
        assert_eq!(stream.next_delta().await.as_deref(), Some("x"));
        assert!(stream.next_delta().await.is_none());
    }

    #[tokio::test]
    async fn stream_ids_are_unique() {
        let controller = controller(MockTransport::chunks(Vec::<&str>::new()));
        let a = controller.open(StreamRequest::post("http://mock/a"));
        let b = controller.open(StreamRequest::post("http://mock/b"));
        assert_ne!(a.id(), b.id());
    }
}
