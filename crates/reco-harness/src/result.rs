//! Result objects delivered by recognizers.
//!
//! Two result shapes exist: plain speech results and conversation-transcription
//! results. Both expose the common [`RecognitionResult`] surface; speaker and
//! utterance attribution goes through the [`ParticipantIdentity`] capability,
//! which each shape answers differently.

use crate::properties::{PropertyCollection, PropertyId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_RESULT_ID: AtomicU64 = AtomicU64::new(1);

fn next_result_id() -> String {
    format!("{:032x}", NEXT_RESULT_ID.fetch_add(1, Ordering::Relaxed))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultReason {
    RecognizingSpeech,
    RecognizedSpeech,
    NoMatch,
    Canceled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoMatchReason {
    NotRecognized,
    InitialSilenceTimeout,
    InitialBabbleTimeout,
    KeywordNotRecognized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoMatchDetails {
    pub reason: NoMatchReason,
}

impl NoMatchDetails {
    pub fn from_result<R: RecognitionResult + ?Sized>(result: &R) -> Self {
        Self {
            reason: result
                .no_match_reason()
                .unwrap_or(NoMatchReason::NotRecognized),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CancellationReason {
    Error,
    EndOfStream,
    CancelledByUser,
}

impl CancellationReason {
    /// Maps the native reason code, which starts at 1.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(CancellationReason::Error),
            2 => Some(CancellationReason::EndOfStream),
            3 => Some(CancellationReason::CancelledByUser),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CancellationErrorCode {
    #[default]
    NoError,
    AuthenticationFailure,
    BadRequest,
    TooManyRequests,
    Forbidden,
    ConnectionFailure,
    ServiceTimeout,
    ServiceError,
    ServiceUnavailable,
    RuntimeError,
}

pub trait RecognitionResult: Send + Sync + 'static {
    fn result_id(&self) -> &str;
    fn reason(&self) -> ResultReason;
    fn text(&self) -> &str;
    /// Start of the utterance in 100ns ticks.
    fn offset(&self) -> u64;
    /// Length of the utterance in 100ns ticks.
    fn duration(&self) -> u64;
    fn properties(&self) -> &PropertyCollection;
    fn no_match_reason(&self) -> Option<NoMatchReason>;
}

/// Speaker and utterance attribution of a result.
pub trait ParticipantIdentity {
    fn user_id(&self) -> String;
    fn utterance_id(&self) -> String;
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpeechRecognitionResult {
    result_id: String,
    reason: ResultReason,
    text: String,
    offset: u64,
    duration: u64,
    no_match_reason: Option<NoMatchReason>,
    properties: PropertyCollection,
}

impl SpeechRecognitionResult {
    pub fn new(reason: ResultReason, text: impl Into<String>) -> Self {
        Self {
            result_id: next_result_id(),
            reason,
            text: text.into(),
            offset: 0,
            duration: 0,
            no_match_reason: None,
            properties: PropertyCollection::new(),
        }
    }

    pub fn recognizing(text: impl Into<String>) -> Self {
        Self::new(ResultReason::RecognizingSpeech, text)
    }

    pub fn recognized(text: impl Into<String>) -> Self {
        Self::new(ResultReason::RecognizedSpeech, text)
    }

    pub fn no_match(reason: NoMatchReason) -> Self {
        let mut result = Self::new(ResultReason::NoMatch, "");
        result.no_match_reason = Some(reason);
        result
    }

    pub fn with_result_id(mut self, id: impl Into<String>) -> Self {
        self.result_id = id.into();
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_duration(mut self, duration: u64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_json(self, json: impl Into<String>) -> Self {
        self.with_property(PropertyId::SpeechServiceResponseJsonResult, json)
    }

    pub fn with_latency_ms(self, latency_ms: u64) -> Self {
        self.with_property(
            PropertyId::SpeechServiceResponseRecognitionLatencyMs,
            latency_ms.to_string(),
        )
    }

    pub fn with_property(mut self, id: PropertyId, value: impl Into<String>) -> Self {
        self.properties.set(id, value);
        self
    }
}

impl RecognitionResult for SpeechRecognitionResult {
    fn result_id(&self) -> &str {
        &self.result_id
    }

    fn reason(&self) -> ResultReason {
        self.reason
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn duration(&self) -> u64 {
        self.duration
    }

    fn properties(&self) -> &PropertyCollection {
        &self.properties
    }

    fn no_match_reason(&self) -> Option<NoMatchReason> {
        self.no_match_reason
    }
}

impl ParticipantIdentity for SpeechRecognitionResult {
    fn user_id(&self) -> String {
        String::new()
    }

    fn utterance_id(&self) -> String {
        self.result_id.clone()
    }
}

/// Result of a multi-party conversation transcription.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversationTranscriptionResult {
    inner: SpeechRecognitionResult,
    user_id: String,
    utterance_id: String,
}

impl ConversationTranscriptionResult {
    pub fn new(inner: SpeechRecognitionResult, user_id: impl Into<String>) -> Self {
        Self {
            inner,
            user_id: user_id.into(),
            utterance_id: String::new(),
        }
    }

    pub fn recognizing(text: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::new(SpeechRecognitionResult::recognizing(text), user_id)
    }

    pub fn recognized(text: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::new(SpeechRecognitionResult::recognized(text), user_id)
    }

    pub fn no_match(reason: NoMatchReason) -> Self {
        Self::new(SpeechRecognitionResult::no_match(reason), "")
    }

    pub fn with_utterance_id(mut self, id: impl Into<String>) -> Self {
        self.utterance_id = id.into();
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.inner = self.inner.with_offset(offset);
        self
    }

    pub fn with_duration(mut self, duration: u64) -> Self {
        self.inner = self.inner.with_duration(duration);
        self
    }

    pub fn with_json(mut self, json: impl Into<String>) -> Self {
        self.inner = self.inner.with_json(json);
        self
    }
}

impl RecognitionResult for ConversationTranscriptionResult {
    fn result_id(&self) -> &str {
        self.inner.result_id()
    }

    fn reason(&self) -> ResultReason {
        self.inner.reason()
    }

    fn text(&self) -> &str {
        self.inner.text()
    }

    fn offset(&self) -> u64 {
        self.inner.offset()
    }

    fn duration(&self) -> u64 {
        self.inner.duration()
    }

    fn properties(&self) -> &PropertyCollection {
        self.inner.properties()
    }

    fn no_match_reason(&self) -> Option<NoMatchReason> {
        self.inner.no_match_reason()
    }
}

impl ParticipantIdentity for ConversationTranscriptionResult {
    fn user_id(&self) -> String {
        self.user_id.clone()
    }

    fn utterance_id(&self) -> String {
        self.utterance_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_differs_between_result_shapes() {
        let speech = SpeechRecognitionResult::recognized("hello").with_result_id("r-1");
        assert_eq!(speech.user_id(), "");
        assert_eq!(speech.utterance_id(), "r-1");

        let ct = ConversationTranscriptionResult::recognized("hello", "katie@example.com")
            .with_utterance_id("u-7");
        assert_eq!(ct.user_id(), "katie@example.com");
        assert_eq!(ct.utterance_id(), "u-7");
        assert_eq!(ct.text(), "hello");
    }

    #[test]
    fn no_match_details_default_to_not_recognized() {
        let recognized = SpeechRecognitionResult::recognized("x");
        assert_eq!(
            NoMatchDetails::from_result(&recognized).reason,
            NoMatchReason::NotRecognized
        );

        let silence = SpeechRecognitionResult::no_match(NoMatchReason::InitialSilenceTimeout);
        assert_eq!(
            NoMatchDetails::from_result(&silence).reason,
            NoMatchReason::InitialSilenceTimeout
        );
    }

    #[test]
    fn cancellation_codes_are_one_based() {
        assert_eq!(CancellationReason::from_code(0), None);
        assert_eq!(CancellationReason::from_code(1), Some(CancellationReason::Error));
        assert_eq!(
            CancellationReason::from_code(2),
            Some(CancellationReason::EndOfStream)
        );
    }
}
