use reco_harness::audio::{create_audio_pull_from_recorded_file, write_wave_file, WaveFormat};
use reco_harness::events::SpeechRecognizer;
use reco_harness::logging::init_test_logging;
use reco_harness::mock::do_continuous_reco;
use reco_harness::properties::PropertyId;
use reco_harness::result::SpeechRecognitionResult;
use reco_harness::{HarnessError, MockController, MockSession, RecordedDataReader, RecordedDataWriter};
use std::sync::Arc;
use std::time::Duration;

fn pcm(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[test]
fn written_file_reads_back_identically() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("speech.rec");
    let data = pcm(10_000);

    let mut writer = RecordedDataWriter::new("audio/pcm")
        .timestamp("1234567890")
        .user_id("katie@example.com");
    writer.push_chunked(&data, 3200);
    writer.write_file(&path).unwrap();

    let mut reader = RecordedDataReader::open(&path).unwrap();
    assert_eq!(reader.total_bytes(), 10_000);
    assert_eq!(reader.num_of_buffers(), 4);
    assert_eq!(
        reader.get_property(PropertyId::DataBufferUserId),
        Some("katie@example.com")
    );
    assert_eq!(
        reader.get_property(PropertyId::DataBufferTimeStamp),
        Some("1234567890")
    );

    let mut out = vec![0u8; 4096];
    let mut collected = Vec::new();
    loop {
        let n = reader.read(&mut out).unwrap();
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&out[..n]);
    }
    assert_eq!(collected, data);
}

#[test]
fn truncated_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.rec");

    let mut writer = RecordedDataWriter::new("audio/pcm");
    writer.push_chunked(&pcm(6400), 3200);
    let bytes = writer.to_bytes().unwrap();
    let text = String::from_utf8(bytes).unwrap();
    // Drop the last buffer line.
    let kept: Vec<&str> = text.lines().collect();
    std::fs::write(&path, kept[..kept.len() - 1].join("\n")).unwrap();

    let mut reader = RecordedDataReader::open(&path).unwrap();
    let err = reader.read_all().unwrap_err();
    assert!(matches!(err, HarnessError::LengthMismatch { .. }));
}

#[tokio::test]
async fn recorded_file_drives_a_mock_session() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.rec");
    let mut writer = RecordedDataWriter::new("audio/pcm");
    writer.push_chunked(&pcm(16_000), 3200);
    writer.write_file(&path).unwrap();

    let (audio, _stream) = create_audio_pull_from_recorded_file(&path).unwrap();
    let mocks = MockController::new();
    mocks.set_mock_real_time_speed(0);

    let recognizer = Arc::new(SpeechRecognizer::new());
    let session = MockSession::new(&mocks)
        .with_audio(audio)
        .recognized(SpeechRecognitionResult::recognized("from the recording"))
        .end_of_stream();

    let (text, result) = do_continuous_reco(&recognizer, session, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(text, "from the recording");
    assert_eq!(result.len(), 1);
}

#[tokio::test]
async fn corrupt_recording_cancels_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.rec");
    std::fs::write(
        &path,
        "FrameType: audio\nTimestamp: 1\nTotalBytes: 4\nNumOfBuffers: 1\nType: audio/pcm\n\n!!not base64!!\n",
    )
    .unwrap();

    let (audio, _stream) = create_audio_pull_from_recorded_file(&path).unwrap();
    let mocks = MockController::new();
    let recognizer = Arc::new(SpeechRecognizer::new());
    let session = MockSession::new(&mocks).with_audio(audio).end_of_stream();

    let err = do_continuous_reco(&recognizer, session, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Io(_)));
}

#[test]
fn wave_files_convert_to_recordings() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("input.wav");
    write_wave_file(&wav, WaveFormat::PCM_16K_MONO, &pcm(4_000)).unwrap();

    let mut wave = reco_harness::audio::open_wave_file(&wav).unwrap();
    let mut data = Vec::new();
    std::io::Read::read_to_end(&mut wave, &mut data).unwrap();

    let mut writer = RecordedDataWriter::new("audio/pcm");
    writer.push_chunked(&data, 1_000);
    let mut reader = RecordedDataReader::from_reader(std::io::Cursor::new(writer.to_bytes().unwrap())).unwrap();
    assert_eq!(reader.read_all().unwrap(), pcm(4_000));
}
