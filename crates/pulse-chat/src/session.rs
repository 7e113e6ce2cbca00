//! Observable owner of one chat session.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use pulse_core::message::ChatMessage;
use pulse_core::session::ChatSession;
use pulse_sse::controller::CancelHandle;

/// Publishes every change to a [`ChatSession`] to its subscribers.
///
/// Also carries the session's busy flag: at most one assistant turn streams
/// into a session at a time.
#[derive(Debug)]
pub struct SessionHandle {
    tx: watch::Sender<ChatSession>,
    busy: AtomicBool,
    turn: Mutex<TurnControl>,
}

/// Cancellation state of the running turn.
#[derive(Debug, Default)]
struct TurnControl {
    stream: Option<CancelHandle>,
    cancel_requested: bool,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new(ChatSession::default())
    }
}

impl SessionHandle {
    pub fn new(session: ChatSession) -> Self {
        let (tx, _rx) = watch::channel(session);
        Self {
            tx,
            busy: AtomicBool::new(false),
            turn: Mutex::new(TurnControl::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.tx.borrow().id
    }

    /// A receiver that sees every published update.
    pub fn subscribe(&self) -> watch::Receiver<ChatSession> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ChatSession {
        self.tx.borrow().clone()
    }

    /// Read the current session without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&ChatSession) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Append a message and return its id.
    pub fn push_message(&self, message: ChatMessage) -> Uuid {
        let id = message.id;
        self.tx.send_modify(|session| session.messages.push(message));
        id
    }

    /// Mutate a streaming message in place.
    ///
    /// Returns `false` without publishing when the message is missing or has
    /// already left the `Streaming` state.
    pub fn update_message(&self, id: Uuid, f: impl FnOnce(&mut ChatMessage)) -> bool {
        self.tx.send_if_modified(|session| match session.message_mut(id) {
            Some(message) if message.is_streaming() => {
                f(message);
                true
            }
            Some(_) => {
                debug!(message_id = %id, "Ignoring update to a frozen message");
                false
            }
            None => false,
        })
    }

    pub fn message(&self, id: Uuid) -> Option<ChatMessage> {
        self.tx.borrow().message(id).cloned()
    }

    pub fn conversation_id(&self) -> String {
        self.tx.borrow().conversation_id.clone()
    }

    pub fn set_conversation_id(&self, conversation_id: impl Into<String>) {
        let conversation_id = conversation_id.into();
        self.tx.send_if_modified(|session| {
            if session.conversation_id == conversation_id {
                return false;
            }
            session.conversation_id = conversation_id;
            true
        });
    }

    pub fn set_title(&self, title: impl Into<String>) {
        let title = title.into();
        self.tx.send_modify(|session| session.title = title);
    }

    /// Swap in a whole session, keeping this handle's id.
    pub fn replace(&self, mut session: ChatSession) {
        self.tx.send_modify(|current| {
            session.id = current.id;
            *current = session;
        });
    }

    /// Claim the session for one turn. `None` while another turn is running.
    pub fn try_begin_turn(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard { session: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Stop the turn currently running in this session, if any.
    ///
    /// A turn that has not opened its stream yet is marked, and its stream
    /// is cancelled as soon as it is attached.
    pub fn cancel_turn(&self) -> bool {
        let mut turn = self.lock_turn();
        if !self.is_busy() || turn.cancel_requested {
            return false;
        }
        debug!(session_id = %self.id(), attached = turn.stream.is_some(), "Cancelling active turn");
        turn.cancel_requested = true;
        if let Some(handle) = turn.stream.take() {
            handle.cancel();
        }
        true
    }

    fn lock_turn(&self) -> MutexGuard<'_, TurnControl> {
        self.turn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held for the duration of one turn. Dropping it frees the session.
#[derive(Debug)]
pub struct BusyGuard<'a> {
    session: &'a SessionHandle,
}

impl BusyGuard<'_> {
    /// Register the stream that [`SessionHandle::cancel_turn`] should stop.
    /// Cancels it right away when the turn was already cancelled.
    pub fn attach(&self, handle: CancelHandle) {
        let mut turn = self.session.lock_turn();
        if turn.cancel_requested {
            handle.cancel();
        } else {
            turn.stream = Some(handle);
        }
    }

    /// True once [`SessionHandle::cancel_turn`] was called for this turn.
    pub fn is_cancelled(&self) -> bool {
        self.session.lock_turn().cancel_requested
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut turn = self.session.lock_turn();
        *turn = TurnControl::default();
        self.session.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::message::MessageState;

    #[test]
    fn push_and_update_message() {
        let handle = SessionHandle::default();
        let id = handle.push_message(ChatMessage::assistant_placeholder());
        assert!(handle.update_message(id, |m| m.content.push_str("Hi")));
        assert_eq!(handle.message(id).unwrap().content, "Hi");
    }

    #[test]
    fn frozen_message_is_not_updated() {
        let handle = SessionHandle::default();
        let id = handle.push_message(ChatMessage::user("hello"));
        assert!(!handle.update_message(id, |m| m.content.clear()));
        assert_eq!(handle.message(id).unwrap().content, "hello");
    }

    #[test]
    fn missing_message_is_not_updated() {
        let handle = SessionHandle::default();
        assert!(!handle.update_message(Uuid::new_v4(), |m| m.content.clear()));
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let handle = SessionHandle::default();
        let mut rx = handle.subscribe();
        let id = handle.push_message(ChatMessage::assistant_placeholder());

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().messages.len(), 1);

        handle.update_message(id, |m| m.state = MessageState::Complete);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().messages[0].state, MessageState::Complete);
    }

    #[test]
    fn unchanged_conversation_id_does_not_publish() {
        let handle = SessionHandle::new(ChatSession::new().with_conversation_id("conv-1"));
        let rx = handle.subscribe();
        handle.set_conversation_id("conv-1");
        assert!(!rx.has_changed().unwrap());
        handle.set_conversation_id("conv-2");
        assert!(rx.has_changed().unwrap());
        assert_eq!(handle.conversation_id(), "conv-2");
    }

    #[test]
    fn replace_keeps_id() {
        let handle = SessionHandle::default();
        let id = handle.id();
        handle.replace(ChatSession::new().with_title("Sleep"));
        assert_eq!(handle.id(), id);
        assert_eq!(handle.read(|s| s.title.clone()), "Sleep");
    }

    #[test]
    fn busy_guard_is_exclusive() {
        let handle = SessionHandle::default();
        let guard = handle.try_begin_turn().unwrap();
        assert!(handle.is_busy());
        assert!(handle.try_begin_turn().is_none());
        drop(guard);
        assert!(!handle.is_busy());
        assert!(handle.try_begin_turn().is_some());
    }

    #[tokio::test]
    async fn cancel_turn_reaches_attached_stream() {
        use std::sync::Arc;

        use pulse_core::config::StreamConfig;
        use pulse_sse::controller::StreamController;
        use pulse_sse::mock::{MockStep, MockTransport};
        use pulse_sse::transport::StreamRequest;

        let handle = SessionHandle::default();
        assert!(!handle.cancel_turn());

        let stream = StreamController::new(
            Arc::new(MockTransport::new(vec![MockStep::Hang])),
            StreamConfig::default(),
        )
        .open(StreamRequest::post("http://mock/"));
        let cancel = stream.cancel_handle();

        let guard = handle.try_begin_turn().unwrap();
        guard.attach(stream.cancel_handle());
        assert!(handle.cancel_turn());
        assert!(cancel.is_cancelled());
        assert!(!handle.cancel_turn());
        drop(guard);
    }

    #[tokio::test]
    async fn cancel_before_attach_is_applied_on_attach() {
        use std::sync::Arc;

        use pulse_core::config::StreamConfig;
        use pulse_sse::controller::StreamController;
        use pulse_sse::mock::{MockStep, MockTransport};
        use pulse_sse::transport::StreamRequest;

        let handle = SessionHandle::default();
        let guard = handle.try_begin_turn().unwrap();
        assert!(!guard.is_cancelled());
        assert!(handle.cancel_turn());
        assert!(guard.is_cancelled());

        let stream = StreamController::new(
            Arc::new(MockTransport::new(vec![MockStep::Hang])),
            StreamConfig::default(),
        )
        .open(StreamRequest::post("http://mock/"));
        let cancel = stream.cancel_handle();
        guard.attach(stream.cancel_handle());
        assert!(cancel.is_cancelled());

        drop(guard);
        let next = handle.try_begin_turn().unwrap();
        assert!(!next.is_cancelled());
    }
}
