use crate::result::{
    CancellationErrorCode, CancellationReason, ConversationTranscriptionResult,
    SpeechRecognitionResult,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

/// A named event stream with any number of connected handlers.
///
/// Handlers are cloned out of the lock before being invoked, so a handler may
/// connect or disconnect handlers on the same signal.
pub struct EventSignal<T> {
    name: &'static str,
    next_id: AtomicU64,
    handlers: Mutex<Vec<(ConnectionId, Handler<T>)>>,
}

impl<T> EventSignal<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(0),
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ConnectionId, Handler<T>)>> {
        // A panicking handler never runs under this lock.
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn connect<F>(&self, f: F) -> ConnectionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(f)));
        trace!(signal = self.name, ?id, "handler connected");
        id
    }

    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        before != handlers.len()
    }

    pub fn disconnect_all(&self) {
        let mut handlers = self.lock();
        if !handlers.is_empty() {
            trace!(signal = self.name, count = handlers.len(), "disconnecting all handlers");
        }
        handlers.clear();
    }

    pub fn is_connected(&self) -> bool {
        !self.lock().is_empty()
    }

    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    pub fn fire(&self, args: &T) {
        let handlers: Vec<Handler<T>> = self.lock().iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(args);
        }
    }
}

impl<T> std::fmt::Debug for EventSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSignal")
            .field("name", &self.name)
            .field("connections", &self.connection_count())
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionEventArgs {
    pub session_id: String,
}

#[derive(Clone, Debug)]
pub struct RecognitionEventArgs<R> {
    pub session_id: String,
    pub result: Arc<R>,
}

impl<R> RecognitionEventArgs<R> {
    pub fn new(session_id: impl Into<String>, result: R) -> Self {
        Self {
            session_id: session_id.into(),
            result: Arc::new(result),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanceledEventArgs {
    pub session_id: String,
    pub reason: CancellationReason,
    pub error_code: CancellationErrorCode,
    pub error_details: String,
}

impl CanceledEventArgs {
    pub fn end_of_stream(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            reason: CancellationReason::EndOfStream,
            error_code: CancellationErrorCode::NoError,
            error_details: String::new(),
        }
    }

    pub fn error(
        session_id: impl Into<String>,
        error_code: CancellationErrorCode,
        error_details: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            reason: CancellationReason::Error,
            error_code,
            error_details: error_details.into(),
        }
    }

    pub fn with_reason(session_id: impl Into<String>, reason: CancellationReason) -> Self {
        Self {
            session_id: session_id.into(),
            reason,
            error_code: CancellationErrorCode::NoError,
            error_details: String::new(),
        }
    }
}

/// Speech start/end detection; `offset` is in 100ns ticks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeechDetectionEventArgs {
    pub session_id: String,
    pub offset: u64,
}

/// Event surface of a recognizer producing results of type `R`.
#[derive(Debug)]
pub struct Recognizer<R> {
    pub recognizing: EventSignal<RecognitionEventArgs<R>>,
    pub recognized: EventSignal<RecognitionEventArgs<R>>,
    pub canceled: EventSignal<CanceledEventArgs>,
    pub session_started: EventSignal<SessionEventArgs>,
    pub session_stopped: EventSignal<SessionEventArgs>,
    pub speech_start_detected: EventSignal<SpeechDetectionEventArgs>,
    pub speech_end_detected: EventSignal<SpeechDetectionEventArgs>,
}

pub type SpeechRecognizer = Recognizer<SpeechRecognitionResult>;
pub type ConversationTranscriber = Recognizer<ConversationTranscriptionResult>;

impl<R> Recognizer<R> {
    pub fn new() -> Self {
        Self {
            recognizing: EventSignal::new("recognizing"),
            recognized: EventSignal::new("recognized"),
            canceled: EventSignal::new("canceled"),
            session_started: EventSignal::new("session_started"),
            session_stopped: EventSignal::new("session_stopped"),
            speech_start_detected: EventSignal::new("speech_start_detected"),
            speech_end_detected: EventSignal::new("speech_end_detected"),
        }
    }

    pub fn disconnect_all(&self) {
        self.recognizing.disconnect_all();
        self.recognized.disconnect_all();
        self.canceled.disconnect_all();
        self.session_started.disconnect_all();
        self.session_stopped.disconnect_all();
        self.speech_start_detected.disconnect_all();
        self.speech_end_detected.disconnect_all();
    }
}

impl<R> Default for Recognizer<R> {
    fn default() -> Self {
        Self::new()
    }
}
