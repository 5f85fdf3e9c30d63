use reco_harness::aggregator::{
    CANCELLATION_ERROR_STRING, INITIAL_SILENCE_TIMEOUT_STRING, PhraseKind,
    UNKNOWN_CANCELLATION_STRING,
};
use reco_harness::events::CanceledEventArgs;
use reco_harness::fixtures::{find_the_ref, get_text, verify_speaker, verify_text_and_speaker};
use reco_harness::logging::init_test_logging;
use reco_harness::mock::{do_continuous_reco, pump_audio_and_wait_for_result};
use reco_harness::result::{
    CancellationErrorCode, CancellationReason, ConversationTranscriptionResult, NoMatchReason,
    SpeechRecognitionResult,
};
use reco_harness::{
    connect_callbacks, ConversationTranscriber, HarnessError, MockController, MockSession,
    RecoPhrases, SpeechRecognizer,
};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn mocks() -> MockController {
    init_test_logging();
    let mocks = MockController::new();
    mocks.use_mocks(true);
    mocks.set_mock_real_time_speed(0);
    mocks
}

#[tokio::test]
async fn two_recognized_phrases_are_joined() {
    let mocks = mocks();
    let recognizer = Arc::new(SpeechRecognizer::new());
    let session = MockSession::new(&mocks)
        .recognizing(SpeechRecognitionResult::recognizing("hello"))
        .recognized(SpeechRecognitionResult::recognized("hello world").with_offset(1_000))
        .recognizing(SpeechRecognitionResult::recognizing("how"))
        .recognized(SpeechRecognitionResult::recognized("how are you").with_offset(9_000))
        .end_of_stream();

    let (text, result) = do_continuous_reco(&recognizer, session, WAIT).await.unwrap();

    assert_eq!(text, "hello world how are you");
    let phrases = result.phrases();
    assert_eq!(phrases.len(), 2);
    assert_eq!(phrases[0].offset, 1_000);
    assert_eq!(phrases[1].offset, 9_000);
}

#[tokio::test]
async fn silence_yields_a_single_timeout_entry() {
    let mocks = mocks();
    let recognizer = Arc::new(SpeechRecognizer::new());
    let session = MockSession::new(&mocks)
        .recognized(SpeechRecognitionResult::no_match(
            NoMatchReason::InitialSilenceTimeout,
        ))
        .end_of_stream();

    let (text, result) = do_continuous_reco(&recognizer, session, WAIT).await.unwrap();

    assert_eq!(text, INITIAL_SILENCE_TIMEOUT_STRING);
    let phrases = result.phrases();
    assert_eq!(phrases.len(), 1);
    assert_eq!(
        phrases[0].kind,
        PhraseKind::NoMatch(NoMatchReason::InitialSilenceTimeout)
    );
}

#[tokio::test]
async fn error_cancellation_completes_without_session_stop() {
    let mocks = mocks();
    let recognizer = Arc::new(SpeechRecognizer::new());
    let result = RecoPhrases::shared();
    connect_callbacks(Some(recognizer.as_ref()), Some(&result));

    let session = MockSession::new(&mocks)
        .recognized(SpeechRecognitionResult::recognized("partial"))
        .canceled(CanceledEventArgs::error(
            "",
            CancellationErrorCode::AuthenticationFailure,
            "",
        ));

    let text = pump_audio_and_wait_for_result(&recognizer, session, &result, WAIT)
        .await
        .unwrap();

    assert_eq!(text, format!("partial {CANCELLATION_ERROR_STRING}"));
    assert_eq!(
        result.phrases()[1].kind,
        PhraseKind::CancellationError(CancellationErrorCode::AuthenticationFailure)
    );
}

#[tokio::test]
async fn unexpected_cancellation_reason_is_terminal() {
    let mocks = mocks();
    let recognizer = Arc::new(SpeechRecognizer::new());
    let session = MockSession::new(&mocks).canceled(CanceledEventArgs::with_reason(
        "",
        CancellationReason::CancelledByUser,
    ));

    let (text, _) = do_continuous_reco(&recognizer, session, WAIT).await.unwrap();
    assert_eq!(text, UNKNOWN_CANCELLATION_STRING);
}

#[tokio::test]
async fn missing_session_stop_times_out() {
    let mocks = mocks();
    let recognizer = Arc::new(SpeechRecognizer::new());
    let session = MockSession::new(&mocks)
        .recognized(SpeechRecognitionResult::recognized("never finishes"))
        .canceled(CanceledEventArgs::end_of_stream(""));

    let err = do_continuous_reco(&recognizer, session, Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Timeout(_)));
}

#[tokio::test]
async fn rewired_recognizer_feeds_only_the_new_sink() {
    let mocks = mocks();
    let recognizer = Arc::new(SpeechRecognizer::new());

    let first = MockSession::new(&mocks)
        .recognized(SpeechRecognitionResult::recognized("first run"))
        .end_of_stream();
    let (_, first_result) = do_continuous_reco(&recognizer, first, WAIT).await.unwrap();

    let second = MockSession::new(&mocks)
        .recognized(SpeechRecognitionResult::recognized("second run"))
        .end_of_stream();
    let (text, second_result) = do_continuous_reco(&recognizer, second, WAIT).await.unwrap();

    assert_eq!(text, "second run");
    assert_eq!(first_result.len(), 1);
    assert_eq!(second_result.len(), 1);
    assert_eq!(recognizer.recognized.connection_count(), 1);
}

#[tokio::test]
async fn transcription_keeps_speaker_attribution() {
    let mocks = mocks();
    let transcriber = Arc::new(ConversationTranscriber::new());
    let session = MockSession::new(&mocks)
        .recognized(
            ConversationTranscriptionResult::recognized("Good morning Steve.", "katie@example.com")
                .with_offset(2_000_000),
        )
        .recognized(
            ConversationTranscriptionResult::recognized("Morning Katie.", "steve@example.com")
                .with_offset(30_000_000),
        )
        .end_of_stream();

    let (_, result) = do_continuous_reco(&transcriber, session, WAIT).await.unwrap();
    let phrases = result.phrases();

    assert_eq!(get_text(&phrases), "Good morning Steve. Morning Katie.");
    assert_eq!(verify_speaker(&phrases, "steve@example.com"), Some(30_000_000));
    assert!(verify_text_and_speaker(&phrases, "good morning steve", "katie@example.com"));
    assert!(find_the_ref(&phrases, "morning katie"));
}
