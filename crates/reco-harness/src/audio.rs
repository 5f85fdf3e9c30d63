use crate::config::{HarnessConfig, SpeechConfig};
use crate::error::{HarnessError, Result};
use crate::properties::{PropertyCollection, PropertyId};
use crate::recorded::RecordedDataReader;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Take};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// 100ms of 16 kHz, 16-bit mono PCM.
pub const PUSH_CHUNK_BYTES: usize = 3200;

pub const SILK_CODEC_MODULE: &str = "Microsoft.CognitiveServices.Speech.extension.silk_codec.dll";
pub const DEFAULT_PROXY_HOST: &str = "localhost";
pub const DEFAULT_PROXY_PORT: &str = "8888";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaveFormat {
    pub channels: u16,
    pub sample_rate_hz: u32,
    pub bits_per_sample: u16,
    pub sample_format: hound::SampleFormat,
}

impl WaveFormat {
    pub const PCM_16K_MONO: WaveFormat = WaveFormat {
        channels: 1,
        sample_rate_hz: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    pub fn bytes_per_sample(&self) -> u16 {
        (self.bits_per_sample + 7) / 8
    }

    pub fn block_align(&self) -> u16 {
        self.channels * self.bytes_per_sample()
    }

    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate_hz * u32::from(self.block_align())
    }
}

impl From<hound::WavSpec> for WaveFormat {
    fn from(spec: hound::WavSpec) -> Self {
        Self {
            channels: spec.channels,
            sample_rate_hz: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            sample_format: spec.sample_format,
        }
    }
}

impl From<WaveFormat> for hound::WavSpec {
    fn from(format: WaveFormat) -> Self {
        hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate_hz,
            bits_per_sample: format.bits_per_sample,
            sample_format: format.sample_format,
        }
    }
}

fn wave_error(path: &Path, err: hound::Error) -> HarnessError {
    match err {
        hound::Error::IoError(e) => HarnessError::Io(e),
        other => HarnessError::InvalidWave(format!("{}: {other}", path.display())),
    }
}

/// Raw little-endian sample bytes of the `data` chunk of a wave file.
pub struct WaveReader {
    pub format: WaveFormat,
    pub data_len: u64,
    inner: Take<BufReader<File>>,
}

impl Read for WaveReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

pub fn open_wave_file(path: impl AsRef<Path>) -> Result<WaveReader> {
    let path = path.as_ref();
    let reader = hound::WavReader::open(path).map_err(|e| wave_error(path, e))?;
    let format = WaveFormat::from(reader.spec());
    let data_len = u64::from(reader.len()) * u64::from(format.bytes_per_sample());
    debug!(path = %path.display(), ?format, data_len, "opened wave file");

    // The header parse leaves the file positioned on the first sample.
    Ok(WaveReader {
        format,
        data_len,
        inner: reader.into_inner().take(data_len),
    })
}

/// Writes little-endian PCM bytes as a wave file. Only 16-bit integer
/// samples are supported.
pub fn write_wave_file(path: impl AsRef<Path>, format: WaveFormat, pcm: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if format.sample_format != hound::SampleFormat::Int || format.bits_per_sample != 16 {
        return Err(HarnessError::InvalidWave(format!(
            "cannot write {}-bit {:?} samples",
            format.bits_per_sample, format.sample_format
        )));
    }
    if pcm.len() % usize::from(format.block_align()) != 0 {
        return Err(HarnessError::InvalidWave(format!(
            "{} bytes is not a whole number of frames",
            pcm.len()
        )));
    }

    let mut writer =
        hound::WavWriter::create(path, format.into()).map_err(|e| wave_error(path, e))?;
    for sample in pcm.chunks_exact(2) {
        writer
            .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
            .map_err(|e| wave_error(path, e))?;
    }
    writer.finalize().map_err(|e| wave_error(path, e))
}

pub fn open_file(path: impl AsRef<Path>) -> Result<BufReader<File>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        warn!(path = %path.display(), error = %e, "failed to open input file");
        e
    })?;
    Ok(BufReader::new(file))
}

/// Fills `buf` as far as the source allows and returns the byte count.
pub fn read_buffer<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Caller-fed audio stream; the recognizer side drains it through
/// [`PushAudioInputStream::take_reader`].
#[derive(Clone)]
pub struct PushAudioInputStream {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>>,
}

impl PushAudioInputStream {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
            rx: Arc::new(Mutex::new(Some(rx))),
        }
    }

    pub fn write(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let tx = tx.as_ref().ok_or(HarnessError::StreamClosed)?;
        tx.send(data.to_vec()).map_err(|_| HarnessError::StreamClosed)
    }

    /// Signals end of stream to the consumer.
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }

    /// Hands out the consuming side. Only the first caller gets it.
    pub fn take_reader(&self) -> Option<PushStreamReader> {
        self.rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .map(|rx| PushStreamReader {
                rx,
                pending: Vec::new(),
                pos: 0,
            })
    }
}

impl Default for PushAudioInputStream {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PushAudioInputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushAudioInputStream")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Blocking reader over a push stream. Must not be used from inside an
/// async task; recognizer workers run on blocking threads.
pub struct PushStreamReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl Read for PushStreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.pending.len() {
            match self.rx.blocking_recv() {
                Some(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Recognizer-pulled audio stream backed by any reader.
#[derive(Clone)]
pub struct PullAudioInputStream {
    source: Arc<Mutex<Box<dyn Read + Send>>>,
}

impl PullAudioInputStream {
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            source: Arc::new(Mutex::new(Box::new(reader))),
        }
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut source = self.source.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            match source.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Read for PullAudioInputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        PullAudioInputStream::read(self, buf).map_err(io::Error::from)
    }
}

impl fmt::Debug for PullAudioInputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullAudioInputStream").finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub enum AudioSource {
    DefaultMicrophone,
    WavFile(PathBuf),
    Push(PushAudioInputStream),
    Pull(PullAudioInputStream),
}

#[derive(Clone, Debug)]
pub struct AudioConfig {
    source: AudioSource,
    properties: PropertyCollection,
}

impl AudioConfig {
    pub fn from_default_microphone_input() -> Self {
        Self::with_source(AudioSource::DefaultMicrophone)
    }

    pub fn from_wav_file_input(path: impl Into<PathBuf>) -> Self {
        Self::with_source(AudioSource::WavFile(path.into()))
    }

    pub fn from_push_stream_input(stream: PushAudioInputStream) -> Self {
        Self::with_source(AudioSource::Push(stream))
    }

    pub fn from_pull_stream_input(stream: PullAudioInputStream) -> Self {
        Self::with_source(AudioSource::Pull(stream))
    }

    fn with_source(source: AudioSource) -> Self {
        Self {
            source,
            properties: PropertyCollection::new(),
        }
    }

    pub fn source(&self) -> &AudioSource {
        &self.source
    }

    pub fn properties(&self) -> &PropertyCollection {
        &self.properties
    }

    pub fn set_property(&mut self, id: PropertyId, value: impl Into<String>) {
        self.properties.set(id, value);
    }

    pub fn set_property_by_name(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.set_by_name(name, value);
    }

    pub fn get_property_by_name(&self, name: &str) -> Option<&str> {
        self.properties.get_by_name(name)
    }

    /// Opens the configured source for a recognizer worker. Returns `None`
    /// for the microphone, which has no test-side data.
    pub fn open_reader(&self) -> Result<Option<Box<dyn Read + Send>>> {
        match &self.source {
            AudioSource::DefaultMicrophone => Ok(None),
            AudioSource::WavFile(path) => Ok(Some(Box::new(open_wave_file(path)?))),
            AudioSource::Push(stream) => {
                let reader = stream.take_reader().ok_or_else(|| {
                    HarnessError::Message("push stream is already attached to a session".to_string())
                })?;
                Ok(Some(Box::new(reader)))
            }
            AudioSource::Pull(stream) => Ok(Some(Box::new(stream.clone()))),
        }
    }
}

pub fn enable_silk_audio_compression(config: &mut AudioConfig) {
    config.set_property_by_name("SPEECH-Compression-Codec-Module", SILK_CODEC_MODULE);
    config.set_property_by_name("SPEECH-Compression-EncodingFormat", "Silk");
}

pub fn set_default_fiddler_proxy(config: &mut AudioConfig) {
    config.set_property(
        PropertyId::SpeechServiceConnectionProxyHostName,
        DEFAULT_PROXY_HOST,
    );
    config.set_property(
        PropertyId::SpeechServiceConnectionProxyPort,
        DEFAULT_PROXY_PORT,
    );
}

/// Streams a file into `stream` and closes it. Wave files are stripped of
/// their header; `compressed` files are pushed verbatim.
pub fn push_data(stream: &PushAudioInputStream, filename: impl AsRef<Path>, compressed: bool) -> Result<u64> {
    let filename = filename.as_ref();
    let mut reader: Box<dyn Read> = if compressed {
        Box::new(open_file(filename)?)
    } else {
        Box::new(open_wave_file(filename)?)
    };

    let mut buf = vec![0u8; PUSH_CHUNK_BYTES];
    let mut total = 0u64;
    loop {
        let n = read_buffer(reader.as_mut(), &mut buf)?;
        if n == 0 {
            break;
        }
        stream.write(&buf[..n])?;
        total += n as u64;
    }
    stream.close();
    debug!(path = %filename.display(), bytes = total, compressed, "pushed audio file");
    Ok(total)
}

/// Speech and audio configs for a wav-file recognizer, optionally with SILK
/// compression and the default debugging proxy.
pub fn create_recognizer_audio(
    config: &HarnessConfig,
    traffic_type: &str,
    path: impl Into<PathBuf>,
    request_compression: bool,
    enable_fiddler_proxy: bool,
) -> (SpeechConfig, AudioConfig) {
    let mut audio = AudioConfig::from_wav_file_input(path);
    if request_compression {
        enable_silk_audio_compression(&mut audio);
    }
    if enable_fiddler_proxy {
        set_default_fiddler_proxy(&mut audio);
    }
    (config.current_speech_config(traffic_type), audio)
}

pub fn create_audio_pull_single_channel(
    path: impl AsRef<Path>,
) -> Result<(AudioConfig, PullAudioInputStream)> {
    let wave = open_wave_file(path)?;
    if wave.format.channels != 1 {
        return Err(HarnessError::InvalidWave(format!(
            "expected a single channel file, found {} channels",
            wave.format.channels
        )));
    }
    let stream = PullAudioInputStream::from_reader(wave);
    Ok((AudioConfig::from_pull_stream_input(stream.clone()), stream))
}

pub fn create_audio_pull_from_file(
    path: impl AsRef<Path>,
) -> Result<(AudioConfig, PullAudioInputStream)> {
    let stream = PullAudioInputStream::from_reader(open_wave_file(path)?);
    Ok((AudioConfig::from_pull_stream_input(stream.clone()), stream))
}

/// Pushes the whole file up front; the returned stream is already closed.
pub fn create_audio_push_from_file(
    path: impl AsRef<Path>,
) -> Result<(AudioConfig, PushAudioInputStream)> {
    let stream = PushAudioInputStream::new();
    push_data(&stream, path, false)?;
    Ok((AudioConfig::from_push_stream_input(stream.clone()), stream))
}

pub fn create_audio_pull_from_recorded_file(
    path: impl AsRef<Path>,
) -> Result<(AudioConfig, PullAudioInputStream)> {
    let reader = RecordedDataReader::open(path)?;
    let stream = PullAudioInputStream::from_reader(reader);
    Ok((AudioConfig::from_pull_stream_input(stream.clone()), stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 256) as u8).collect()
    }

    #[test]
    fn wave_header_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        let data = pcm(1000);
        write_wave_file(&path, WaveFormat::PCM_16K_MONO, &data).unwrap();

        let mut wave = open_wave_file(&path).unwrap();
        assert_eq!(wave.format, WaveFormat::PCM_16K_MONO);
        assert_eq!(wave.data_len, 1000);

        let mut out = Vec::new();
        wave.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn partial_frames_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.wav");
        let stereo = WaveFormat {
            channels: 2,
            ..WaveFormat::PCM_16K_MONO
        };

        assert!(matches!(
            write_wave_file(&path, stereo, &pcm(6)),
            Err(HarnessError::InvalidWave(_))
        ));
        write_wave_file(&path, stereo, &pcm(8)).unwrap();
        let wave = open_wave_file(&path).unwrap();
        assert_eq!(wave.format.block_align(), 4);
        assert_eq!(wave.data_len, 8);
    }

    #[test]
    fn non_wave_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.wav");
        std::fs::write(&path, b"not a wave file at all").unwrap();

        assert!(matches!(
            open_wave_file(&path),
            Err(HarnessError::InvalidWave(_))
        ));
    }

    #[test]
    fn read_buffer_fills_across_short_reads() {
        let data = pcm(10);
        let mut r = io::Cursor::new(data.clone()).chain(io::Cursor::new(data.clone()));
        let mut buf = [0u8; 15];
        assert_eq!(read_buffer(&mut r, &mut buf).unwrap(), 15);
        assert_eq!(read_buffer(&mut r, &mut buf).unwrap(), 5);
        assert_eq!(read_buffer(&mut r, &mut buf).unwrap(), 0);
    }

    #[test]
    fn push_data_delivers_all_bytes_then_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.wav");
        let data = pcm(PUSH_CHUNK_BYTES * 2 + 18);
        write_wave_file(&path, WaveFormat::PCM_16K_MONO, &data).unwrap();

        let stream = PushAudioInputStream::new();
        let pushed = push_data(&stream, &path, false).unwrap();
        assert_eq!(pushed, data.len() as u64);
        assert!(stream.is_closed());
        assert!(matches!(stream.write(&[1]), Err(HarnessError::StreamClosed)));

        let mut reader = stream.take_reader().unwrap();
        assert!(stream.take_reader().is_none());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn compression_and_proxy_properties() {
        let mut config = AudioConfig::from_wav_file_input("x.wav");
        enable_silk_audio_compression(&mut config);
        set_default_fiddler_proxy(&mut config);

        assert_eq!(
            config.get_property_by_name("SPEECH-Compression-EncodingFormat"),
            Some("Silk")
        );
        assert_eq!(
            config.get_property_by_name("SPEECH-Compression-Codec-Module"),
            Some(SILK_CODEC_MODULE)
        );
        assert_eq!(
            config
                .properties()
                .get(PropertyId::SpeechServiceConnectionProxyHostName),
            Some("localhost")
        );
        assert_eq!(
            config
                .properties()
                .get(PropertyId::SpeechServiceConnectionProxyPort),
            Some("8888")
        );
    }

    #[test]
    fn recognizer_audio_applies_only_requested_options() {
        let config = HarnessConfig {
            region: "westus".to_string(),
            ..HarnessConfig::default()
        };

        let (speech, plain) = create_recognizer_audio(&config, "functional", "a.wav", false, false);
        assert_eq!(speech.service_property("traffictype"), Some("functional"));
        assert!(matches!(plain.source(), AudioSource::WavFile(p) if p.as_path() == Path::new("a.wav")));
        assert_eq!(plain.get_property_by_name("SPEECH-Compression-EncodingFormat"), None);
        assert_eq!(
            plain
                .properties()
                .get(PropertyId::SpeechServiceConnectionProxyHostName),
            None
        );

        let (_, compressed) = create_recognizer_audio(&config, "functional", "a.wav", true, false);
        assert_eq!(
            compressed.get_property_by_name("SPEECH-Compression-EncodingFormat"),
            Some("Silk")
        );
        assert_eq!(
            compressed
                .properties()
                .get(PropertyId::SpeechServiceConnectionProxyPort),
            None
        );

        let (_, proxied) = create_recognizer_audio(&config, "functional", "a.wav", false, true);
        assert_eq!(proxied.get_property_by_name("SPEECH-Compression-Codec-Module"), None);
        assert_eq!(
            proxied
                .properties()
                .get(PropertyId::SpeechServiceConnectionProxyPort),
            Some(DEFAULT_PROXY_PORT)
        );
    }

    #[test]
    fn stereo_file_is_not_a_single_channel_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let format = WaveFormat {
            channels: 2,
            ..WaveFormat::PCM_16K_MONO
        };
        write_wave_file(&path, format, &pcm(64)).unwrap();

        assert!(create_audio_pull_single_channel(&path).is_err());
        assert!(create_audio_pull_from_file(&path).is_ok());
    }
}
