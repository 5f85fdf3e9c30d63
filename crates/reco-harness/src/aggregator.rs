//! Collects the phrases produced by one recognition session.
//!
//! Recognizer callbacks append to a shared [`RecoPhrases`] sink from the
//! recognizer's dispatch thread while the test awaits the sink's single
//! completion signal. Completion arrives through session-stopped, an error
//! cancellation, or a cancellation with an unrecognised reason; whichever
//! comes first wins and later attempts are ignored.

use crate::error::{HarnessError, Result};
use crate::events::{CanceledEventArgs, RecognitionEventArgs};
use crate::properties::PropertyId;
use crate::result::{
    CancellationErrorCode, CancellationReason, NoMatchDetails, NoMatchReason, ParticipantIdentity,
    RecognitionResult, ResultReason,
};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

pub const INITIAL_SILENCE_TIMEOUT_STRING: &str = "InitialSilenceTimeout";
pub const INITIAL_BABBLE_TIMEOUT_STRING: &str = "InitialBabbleTimeout";
pub const NOT_RECOGNIZED_STRING: &str = "NotRecognized";
pub const UNKNOWN_REASON: &str = "unknown reason";
pub const CANCELLATION_ERROR_STRING: &str = "Errors!";
pub const UNKNOWN_CANCELLATION_STRING: &str = "unknown Reason!";

pub const WAIT_FOR_RECO_RESULT_TIME: Duration = Duration::from_secs(30);

/// What produced a phrase. The phrase text of non-`Recognized` kinds is a
/// fixed display string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum PhraseKind {
    #[default]
    Recognized,
    NoMatch(NoMatchReason),
    CancellationError(CancellationErrorCode),
    UnknownCancellation,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecoPhrase {
    pub text: String,
    pub user_id: String,
    pub json: String,
    /// Start of the utterance in 100ns ticks, 0 when unknown.
    pub offset: u64,
    pub kind: PhraseKind,
}

pub type RecoResultVector = Vec<RecoPhrase>;

impl RecoPhrase {
    pub fn new(
        text: impl Into<String>,
        user_id: impl Into<String>,
        json: impl Into<String>,
        offset: u64,
    ) -> Self {
        Self {
            text: text.into(),
            user_id: user_id.into(),
            json: json.into(),
            offset,
            kind: PhraseKind::Recognized,
        }
    }

    pub fn sentinel(text: impl Into<String>, kind: PhraseKind) -> Self {
        Self {
            text: text.into(),
            kind,
            ..Self::default()
        }
    }

    pub fn no_match(reason: NoMatchReason) -> Self {
        Self::sentinel(no_match_text(reason), PhraseKind::NoMatch(reason))
    }

    pub fn json_value(&self) -> Option<serde_json::Value> {
        if self.json.is_empty() {
            return None;
        }
        serde_json::from_str(&self.json).ok()
    }
}

impl From<&str> for RecoPhrase {
    fn from(text: &str) -> Self {
        Self::sentinel(text, PhraseKind::Recognized)
    }
}

pub fn no_match_text(reason: NoMatchReason) -> &'static str {
    match reason {
        NoMatchReason::InitialSilenceTimeout => INITIAL_SILENCE_TIMEOUT_STRING,
        NoMatchReason::InitialBabbleTimeout => INITIAL_BABBLE_TIMEOUT_STRING,
        NoMatchReason::NotRecognized => NOT_RECOGNIZED_STRING,
        _ => UNKNOWN_REASON,
    }
}

pub type RecoPhrasesPtr = Arc<RecoPhrases>;

#[derive(Debug)]
pub struct RecoPhrases {
    phrases: Mutex<RecoResultVector>,
    ready_tx: Mutex<Option<oneshot::Sender<()>>>,
    ready_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl RecoPhrases {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            phrases: Mutex::new(Vec::new()),
            ready_tx: Mutex::new(Some(tx)),
            ready_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn shared() -> RecoPhrasesPtr {
        Arc::new(Self::new())
    }

    pub fn push(&self, phrase: RecoPhrase) {
        lock(&self.phrases).push(phrase);
    }

    /// Snapshot of the phrases collected so far, in arrival order.
    pub fn phrases(&self) -> RecoResultVector {
        lock(&self.phrases).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.phrases).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.phrases).is_empty()
    }

    /// Completes the session. Returns `true` only for the call that did so.
    pub fn fulfil(&self) -> bool {
        match lock(&self.ready_tx).take() {
            Some(tx) => {
                // The receiver lives in `self`, a failed send only means a
                // waiter timed out and gave up on it.
                let _ = tx.send(());
                true
            }
            None => {
                trace!("session already completed, ignoring");
                false
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.ready_tx).is_none()
    }

    /// Waits for the completion signal. Expiry is reported as
    /// [`HarnessError::Timeout`] and leaves the signal waitable again.
    pub async fn wait_for_result(&self, duration: Duration) -> Result<()> {
        let mut rx = lock(&self.ready_rx)
            .take()
            .ok_or(HarnessError::CompletionTaken)?;

        match timeout(duration, &mut rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(HarnessError::CompletionDropped),
            Err(_) => {
                *lock(&self.ready_rx) = Some(rx);
                Err(HarnessError::Timeout(duration))
            }
        }
    }
}

impl Default for RecoPhrases {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler for `recognizing` and `recognized` events.
///
/// Interim hypotheses are only logged. Final results and no-match outcomes
/// append one phrase each.
pub fn parse_recognized_events<R>(
    result: RecoPhrasesPtr,
) -> impl Fn(&RecognitionEventArgs<R>) + Send + Sync + 'static
where
    R: RecognitionResult + ParticipantIdentity,
{
    move |e: &RecognitionEventArgs<R>| {
        let res = e.result.as_ref();
        let user_id = res.user_id();
        let utterance_id = res.utterance_id();

        match res.reason() {
            ResultReason::RecognizingSpeech => {
                debug!(
                    session_id = %e.session_id,
                    text = res.text(),
                    offset = res.offset(),
                    duration = res.duration(),
                    %user_id,
                    %utterance_id,
                    "RECOGNIZING"
                );
            }
            ResultReason::RecognizedSpeech => {
                let props = res.properties();
                let json = props.get_or_empty(PropertyId::SpeechServiceResponseJsonResult);
                let latency =
                    props.get_or_empty(PropertyId::SpeechServiceResponseRecognitionLatencyMs);
                debug!(
                    session_id = %e.session_id,
                    text = res.text(),
                    offset = res.offset(),
                    duration = res.duration(),
                    %user_id,
                    %utterance_id,
                    latency_ms = latency,
                    "RECOGNIZED"
                );

                result.push(RecoPhrase::new(res.text(), user_id, json, res.offset()));
            }
            ResultReason::NoMatch => {
                let details = NoMatchDetails::from_result(res);
                debug!(
                    session_id = %e.session_id,
                    reason = ?details.reason,
                    "NOMATCH: speech could not be recognized"
                );
                result.push(RecoPhrase::no_match(details.reason));
            }
            ResultReason::Canceled => {
                trace!(session_id = %e.session_id, "canceled result, handled by the canceled stream");
            }
        }
    }
}

/// Handler for the `canceled` stream.
///
/// End-of-stream is the normal end of a file-based session and leaves
/// completion to session-stopped. Any other reason is terminal.
pub fn parse_canceled_events(
    result: RecoPhrasesPtr,
) -> impl Fn(&CanceledEventArgs) + Send + Sync + 'static {
    move |e: &CanceledEventArgs| match e.reason {
        CancellationReason::EndOfStream => {
            debug!(session_id = %e.session_id, "CANCELED: reached the end of the file");
        }
        CancellationReason::Error => {
            let error = if e.error_details.is_empty() {
                CANCELLATION_ERROR_STRING
            } else {
                e.error_details.as_str()
            };
            warn!(
                session_id = %e.session_id,
                error_code = ?e.error_code,
                error_details = %e.error_details,
                "CANCELED with error"
            );
            result.push(RecoPhrase::sentinel(
                error,
                PhraseKind::CancellationError(e.error_code),
            ));
            result.fulfil();
        }
        other => {
            warn!(session_id = %e.session_id, reason = ?other, "CANCELED for an unknown reason");
            result.push(RecoPhrase::sentinel(
                UNKNOWN_CANCELLATION_STRING,
                PhraseKind::UnknownCancellation,
            ));
            result.fulfil();
        }
    }
}
