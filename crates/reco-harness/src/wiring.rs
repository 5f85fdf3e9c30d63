use crate::aggregator::{parse_canceled_events, parse_recognized_events, RecoPhrasesPtr};
use crate::events::{Recognizer, SessionEventArgs};
use crate::result::{ParticipantIdentity, RecognitionResult, ResultReason};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Attaches the canceled, session-started and session-stopped handlers.
///
/// Existing handlers on those three streams are dropped first, so calling
/// this repeatedly on the same recognizer never stacks subscriptions. A
/// missing recognizer or sink makes the call a no-op.
pub fn connect_non_reco_events<R>(
    recognizer: Option<&Recognizer<R>>,
    result: Option<&RecoPhrasesPtr>,
) {
    let (Some(recognizer), Some(result)) = (recognizer, result) else {
        return;
    };

    recognizer.canceled.disconnect_all();
    recognizer
        .canceled
        .connect(parse_canceled_events(result.clone()));

    let stopped = result.clone();
    recognizer.session_stopped.disconnect_all();
    recognizer
        .session_stopped
        .connect(move |e: &SessionEventArgs| {
            debug!(session_id = %e.session_id, "SessionStopped");
            stopped.fulfil();
        });

    recognizer.session_started.disconnect_all();
    recognizer
        .session_started
        .connect(|e: &SessionEventArgs| {
            debug!(session_id = %e.session_id, "SessionStarted");
        });
}

/// Wires every stream the aggregator listens to, including `recognizing`
/// and `recognized`.
pub fn connect_callbacks<R>(recognizer: Option<&Recognizer<R>>, result: Option<&RecoPhrasesPtr>)
where
    R: RecognitionResult + ParticipantIdentity,
{
    let (Some(rec), Some(sink)) = (recognizer, result) else {
        return;
    };

    rec.recognizing.disconnect_all();
    rec.recognizing
        .connect(parse_recognized_events::<R>(sink.clone()));

    rec.recognized.disconnect_all();
    rec.recognized
        .connect(parse_recognized_events::<R>(sink.clone()));

    connect_non_reco_events(recognizer, result);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Callbacks {
    FinalResult,
    IntermediateResult,
    NoMatch,
    SessionStarted,
    SessionStopped,
    SpeechStartDetected,
    SpeechEndDetected,
}

impl Callbacks {
    pub const ALL: [Callbacks; 7] = [
        Callbacks::FinalResult,
        Callbacks::IntermediateResult,
        Callbacks::NoMatch,
        Callbacks::SessionStarted,
        Callbacks::SessionStopped,
        Callbacks::SpeechStartDetected,
        Callbacks::SpeechEndDetected,
    ];
}

/// Per-test event counters, one slot for every [`Callbacks`] category.
#[derive(Debug)]
pub struct CallbackCounters {
    counts: HashMap<Callbacks, AtomicUsize>,
}

impl CallbackCounters {
    pub fn new() -> Self {
        Self {
            counts: Callbacks::ALL
                .iter()
                .map(|c| (*c, AtomicUsize::new(0)))
                .collect(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn increment(&self, which: Callbacks) {
        if let Some(c) = self.counts.get(&which) {
            c.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn get(&self, which: Callbacks) -> usize {
        self.counts
            .get(&which)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<Callbacks, usize> {
        Callbacks::ALL.iter().map(|c| (*c, self.get(*c))).collect()
    }
}

impl Default for CallbackCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts events without touching the aggregator's handlers.
///
/// [`connect_callbacks`] and [`connect_non_reco_events`] clear the streams
/// they wire, so call this after them or the counters go silent.
pub fn connect_counting_callbacks<R>(recognizer: &Recognizer<R>, counters: &Arc<CallbackCounters>)
where
    R: RecognitionResult,
{
    let c = counters.clone();
    recognizer.recognized.connect(move |e| {
        if e.result.reason() == ResultReason::NoMatch {
            c.increment(Callbacks::NoMatch);
        } else {
            c.increment(Callbacks::FinalResult);
        }
    });

    let c = counters.clone();
    recognizer
        .recognizing
        .connect(move |_| c.increment(Callbacks::IntermediateResult));

    let c = counters.clone();
    recognizer
        .session_started
        .connect(move |_| c.increment(Callbacks::SessionStarted));

    let c = counters.clone();
    recognizer
        .session_stopped
        .connect(move |_| c.increment(Callbacks::SessionStopped));

    let c = counters.clone();
    recognizer
        .speech_start_detected
        .connect(move |_| c.increment(Callbacks::SpeechStartDetected));

    let c = counters.clone();
    recognizer
        .speech_end_detected
        .connect(move |_| c.increment(Callbacks::SpeechEndDetected));
}
