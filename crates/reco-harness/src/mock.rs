//! Scripted stand-in for the recognizer's transport.
//!
//! A [`MockSession`] plays the part of the dispatch thread: it opens the
//! attached audio source, drains it at a configurable fraction of real time
//! and then raises a fixed sequence of events on a [`Recognizer`].

use crate::aggregator::{RecoPhrases, RecoPhrasesPtr};
use crate::audio::{read_buffer, AudioConfig, WaveFormat, PUSH_CHUNK_BYTES};
use crate::config::MockConfig;
use crate::error::{HarnessError, Result};
use crate::events::{
    CanceledEventArgs, RecognitionEventArgs, Recognizer, SessionEventArgs,
    SpeechDetectionEventArgs,
};
use crate::fixtures::get_text;
use crate::result::{CancellationErrorCode, ParticipantIdentity, RecognitionResult};
use crate::wiring::connect_callbacks;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct MockState {
    use_mocks: AtomicBool,
    use_mock_usp: AtomicBool,
    real_time_speed: AtomicU32,
}

/// Test-scoped switch board for the mocked transport. Clones share state.
#[derive(Clone, Debug)]
pub struct MockController {
    state: Arc<MockState>,
}

impl MockController {
    pub fn new() -> Self {
        Self::from_config(&MockConfig::default())
    }

    pub fn from_config(config: &MockConfig) -> Self {
        Self {
            state: Arc::new(MockState {
                use_mocks: AtomicBool::new(config.use_mocks),
                use_mock_usp: AtomicBool::new(config.use_mock_usp),
                real_time_speed: AtomicU32::new(config.real_time_speed),
            }),
        }
    }

    /// Toggles every mock, including the USP layer.
    pub fn use_mocks(&self, value: bool) {
        self.state.use_mocks.store(value, Ordering::SeqCst);
        self.state.use_mock_usp.store(value, Ordering::SeqCst);
    }

    pub fn use_mock_usp(&self, value: bool) {
        self.state.use_mock_usp.store(value, Ordering::SeqCst);
    }

    pub fn is_using_mocks(&self, usp_required: bool) -> bool {
        self.state.use_mocks.load(Ordering::SeqCst)
            && (!usp_required || self.state.use_mock_usp.load(Ordering::SeqCst))
    }

    /// Percent of real time; `0` disables pacing entirely.
    pub fn set_mock_real_time_speed(&self, percent: u32) {
        self.state.real_time_speed.store(percent, Ordering::SeqCst);
    }

    pub fn real_time_speed(&self) -> u32 {
        self.state.real_time_speed.load(Ordering::SeqCst)
    }

    /// Time a chunk of `bytes` 16 kHz mono PCM should take to consume.
    pub fn pace(&self, bytes: usize) -> Option<Duration> {
        let speed = self.real_time_speed();
        if speed == 0 {
            return None;
        }
        let bps = u64::from(WaveFormat::PCM_16K_MONO.bytes_per_second());
        let micros = bytes as u64 * 1_000_000 * 100 / (bps * u64::from(speed));
        Some(Duration::from_micros(micros))
    }
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub enum ScriptedEvent<R> {
    Recognizing(R),
    Recognized(R),
    Canceled(CanceledEventArgs),
    SessionStopped,
    SpeechStartDetected(u64),
    SpeechEndDetected(u64),
}

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

pub struct MockSession<R> {
    session_id: String,
    controller: MockController,
    audio: Option<AudioConfig>,
    script: Vec<ScriptedEvent<R>>,
}

impl<R> std::fmt::Debug for MockSession<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession")
            .field("session_id", &self.session_id)
            .field("events", &self.script.len())
            .finish_non_exhaustive()
    }
}

impl<R: RecognitionResult> MockSession<R> {
    pub fn new(controller: &MockController) -> Self {
        let n = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        Self {
            session_id: format!("mock-session-{n:04}"),
            controller: controller.clone(),
            audio: None,
            script: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_audio(mut self, audio: AudioConfig) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn event(mut self, event: ScriptedEvent<R>) -> Self {
        self.script.push(event);
        self
    }

    pub fn recognizing(self, result: R) -> Self {
        self.event(ScriptedEvent::Recognizing(result))
    }

    pub fn recognized(self, result: R) -> Self {
        self.event(ScriptedEvent::Recognized(result))
    }

    pub fn canceled(self, args: CanceledEventArgs) -> Self {
        self.event(ScriptedEvent::Canceled(args))
    }

    pub fn speech_start(self, offset: u64) -> Self {
        self.event(ScriptedEvent::SpeechStartDetected(offset))
    }

    pub fn speech_end(self, offset: u64) -> Self {
        self.event(ScriptedEvent::SpeechEndDetected(offset))
    }

    pub fn session_stopped(self) -> Self {
        self.event(ScriptedEvent::SessionStopped)
    }

    /// How a file-backed session ends: EndOfStream cancel, then stop.
    pub fn end_of_stream(self) -> Self {
        let canceled = CanceledEventArgs::end_of_stream(self.session_id.clone());
        self.canceled(canceled).session_stopped()
    }

    /// Runs the session on a blocking worker. Resolves to the number of
    /// audio bytes consumed.
    pub fn start(self, recognizer: Arc<Recognizer<R>>) -> JoinHandle<Result<u64>> {
        tokio::task::spawn_blocking(move || self.run(&recognizer))
    }

    /// Runs the session on the calling thread.
    pub fn run(self, recognizer: &Recognizer<R>) -> Result<u64> {
        let session = SessionEventArgs {
            session_id: self.session_id.clone(),
        };
        info!(session_id = %self.session_id, "mock session started");
        recognizer.session_started.fire(&session);

        let consumed = match self.drain_audio() {
            Ok(n) => n,
            Err(err) => {
                warn!(session_id = %self.session_id, ?err, "audio source failed");
                recognizer.canceled.fire(&CanceledEventArgs::error(
                    self.session_id.clone(),
                    CancellationErrorCode::RuntimeError,
                    err.to_string(),
                ));
                recognizer.session_stopped.fire(&session);
                return Err(err);
            }
        };

        for event in self.script {
            match event {
                ScriptedEvent::Recognizing(r) => recognizer
                    .recognizing
                    .fire(&RecognitionEventArgs::new(self.session_id.clone(), r)),
                ScriptedEvent::Recognized(r) => recognizer
                    .recognized
                    .fire(&RecognitionEventArgs::new(self.session_id.clone(), r)),
                ScriptedEvent::Canceled(mut args) => {
                    args.session_id = self.session_id.clone();
                    recognizer.canceled.fire(&args);
                }
                ScriptedEvent::SessionStopped => recognizer.session_stopped.fire(&session),
                ScriptedEvent::SpeechStartDetected(offset) => {
                    recognizer.speech_start_detected.fire(&SpeechDetectionEventArgs {
                        session_id: self.session_id.clone(),
                        offset,
                    })
                }
                ScriptedEvent::SpeechEndDetected(offset) => {
                    recognizer.speech_end_detected.fire(&SpeechDetectionEventArgs {
                        session_id: self.session_id.clone(),
                        offset,
                    })
                }
            }
        }
        debug!(session_id = %self.session_id, consumed, "mock session finished");
        Ok(consumed)
    }

    fn drain_audio(&self) -> Result<u64> {
        let Some(audio) = &self.audio else {
            return Ok(0);
        };
        let Some(mut reader) = audio.open_reader()? else {
            return Ok(0);
        };

        let mut buf = vec![0u8; PUSH_CHUNK_BYTES];
        let mut total = 0u64;
        loop {
            let n = read_buffer(reader.as_mut(), &mut buf)?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if let Some(d) = self.controller.pace(n) {
                std::thread::sleep(d);
            }
        }
        Ok(total)
    }
}

/// Starts `session` against a recognizer already wired to `result`, waits for
/// completion and returns the concatenated text.
pub async fn pump_audio_and_wait_for_result<R>(
    recognizer: &Arc<Recognizer<R>>,
    session: MockSession<R>,
    result: &RecoPhrasesPtr,
    wait: Duration,
) -> Result<String>
where
    R: RecognitionResult,
{
    let handle = session.start(recognizer.clone());
    result.wait_for_result(wait).await?;
    handle
        .await
        .map_err(|e| HarnessError::Message(format!("mock session panicked: {e}")))??;
    Ok(get_text(&result.phrases()))
}

/// Wires a fresh sink onto `recognizer`, runs `session` and returns the text
/// together with the collected phrases.
pub async fn do_continuous_reco<R>(
    recognizer: &Arc<Recognizer<R>>,
    session: MockSession<R>,
    wait: Duration,
) -> Result<(String, RecoPhrasesPtr)>
where
    R: RecognitionResult + ParticipantIdentity,
{
    let result = RecoPhrases::shared();
    connect_callbacks(Some(recognizer.as_ref()), Some(&result));
    let text = pump_audio_and_wait_for_result(recognizer, session, &result, wait).await?;
    Ok((text, result))
}
