//! Recorded audio container.
//!
//! A file starts with `key: value` header lines terminated by an empty line,
//! followed by one standard base64 line per audio buffer:
//!
//! ```text
//! FrameType: audio
//! Timestamp: 153742310438400
//! TotalBytes: 6400
//! NumOfBuffers: 2
//! Type: audio/pcm
//!
//! AAABAAIAAwAEAAUABgAHAAgACQ...
//! CgALAAwADQAOAA8AEAARABIAEw...
//! ```
//!
//! `UserId` is an optional header field. Decoded buffers are concatenated in
//! file order. The header's byte and buffer counts are enforced: corrupt or
//! truncated recordings fail loudly instead of feeding partial PCM downstream.

use crate::error::{HarnessError, Result};
use crate::properties::PropertyId;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, trace};

pub const FIELD_FRAME_TYPE: &str = "FrameType";
pub const FIELD_TIMESTAMP: &str = "Timestamp";
pub const FIELD_TOTAL_BYTES: &str = "TotalBytes";
pub const FIELD_NUM_OF_BUFFERS: &str = "NumOfBuffers";
pub const FIELD_TYPE: &str = "Type";
pub const FIELD_USER_ID: &str = "UserId";

/// 90 kHz clock used for data-buffer timestamps.
const TIMESTAMP_TICKS_PER_SECOND: u128 = 90_000;

const MAX_PREALLOCATION: u64 = 1 << 20;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecordedHeader {
    pub frame_type: String,
    pub timestamp: String,
    pub total_bytes: u64,
    pub num_of_buffers: u32,
    pub content_type: String,
    pub user_id: Option<String>,
}

impl RecordedHeader {
    fn parse<R: BufRead>(reader: &mut R, line_no: &mut usize) -> Result<Self> {
        let mut frame_type = None;
        let mut timestamp = None;
        let mut total_bytes = None;
        let mut num_of_buffers = None;
        let mut content_type = None;
        let mut user_id = None;

        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            *line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            let Some((key, value)) = trimmed.split_once(':') else {
                return Err(HarnessError::MalformedHeader {
                    line: *line_no,
                    content: trimmed.to_string(),
                });
            };
            let value = value.trim().to_string();

            match key.trim() {
                FIELD_FRAME_TYPE => frame_type = Some(value),
                FIELD_TIMESTAMP => timestamp = Some(value),
                FIELD_TOTAL_BYTES => total_bytes = Some(value),
                FIELD_NUM_OF_BUFFERS => num_of_buffers = Some(value),
                FIELD_TYPE => content_type = Some(value),
                FIELD_USER_ID => user_id = Some(value),
                other => trace!(key = other, "ignoring unknown header field"),
            }
        }

        let total_bytes = required(total_bytes, FIELD_TOTAL_BYTES)?;
        let num_of_buffers = required(num_of_buffers, FIELD_NUM_OF_BUFFERS)?;

        Ok(Self {
            frame_type: required(frame_type, FIELD_FRAME_TYPE)?,
            timestamp: required(timestamp, FIELD_TIMESTAMP)?,
            total_bytes: parse_number(&total_bytes, FIELD_TOTAL_BYTES)?,
            num_of_buffers: parse_number(&num_of_buffers, FIELD_NUM_OF_BUFFERS)?,
            content_type: required(content_type, FIELD_TYPE)?,
            user_id,
        })
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "{FIELD_FRAME_TYPE}: {}", self.frame_type)?;
        writeln!(w, "{FIELD_TIMESTAMP}: {}", self.timestamp)?;
        writeln!(w, "{FIELD_TOTAL_BYTES}: {}", self.total_bytes)?;
        writeln!(w, "{FIELD_NUM_OF_BUFFERS}: {}", self.num_of_buffers)?;
        writeln!(w, "{FIELD_TYPE}: {}", self.content_type)?;
        if let Some(user_id) = &self.user_id {
            writeln!(w, "{FIELD_USER_ID}: {user_id}")?;
        }
        writeln!(w)
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(HarnessError::MissingField(field)),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &'static str) -> Result<T> {
    value.parse().map_err(|_| HarnessError::InvalidField {
        field,
        value: value.to_string(),
    })
}

/// Pull-style reader over a recorded audio file.
///
/// Buffers are decoded lazily, one base64 line at a time, as reads drain the
/// previous one. Not meant to be shared across threads.
pub struct RecordedDataReader<R = BufReader<File>> {
    reader: R,
    header: RecordedHeader,
    buffer: Vec<u8>,
    pos: usize,
    line_no: usize,
    chunks_read: u32,
    bytes_decoded: u64,
    finished: bool,
}

impl RecordedDataReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reader = Self::from_reader(BufReader::new(file))?;
        debug!(
            path = %path.display(),
            total_bytes = reader.header.total_bytes,
            buffers = reader.header.num_of_buffers,
            "opened recorded data"
        );
        Ok(reader)
    }
}

impl<R: BufRead> RecordedDataReader<R> {
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let mut line_no = 0;
        let header = RecordedHeader::parse(&mut reader, &mut line_no)?;

        Ok(Self {
            reader,
            header,
            buffer: Vec::new(),
            pos: 0,
            line_no,
            chunks_read: 0,
            bytes_decoded: 0,
            finished: false,
        })
    }

    pub fn header(&self) -> &RecordedHeader {
        &self.header
    }

    pub fn frame_type(&self) -> &str {
        &self.header.frame_type
    }

    pub fn timestamp(&self) -> &str {
        &self.header.timestamp
    }

    pub fn total_bytes(&self) -> u64 {
        self.header.total_bytes
    }

    pub fn num_of_buffers(&self) -> u32 {
        self.header.num_of_buffers
    }

    pub fn content_type(&self) -> &str {
        &self.header.content_type
    }

    pub fn get_property(&self, id: PropertyId) -> Option<&str> {
        match id {
            PropertyId::DataBufferTimeStamp => Some(self.header.timestamp.as_str()),
            PropertyId::DataBufferUserId => self.header.user_id.as_deref(),
            _ => None,
        }
    }

    /// Copies up to `buf.len()` bytes of decoded audio into `buf`.
    ///
    /// Returns 0 once every buffer has been consumed.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            if self.pos >= self.buffer.len() {
                if !self.decode_next_buffer()? {
                    break;
                }
                continue;
            }

            let n = (buf.len() - written).min(self.buffer.len() - self.pos);
            buf[written..written + n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
            written += n;
            self.pos += n;
        }
        Ok(written)
    }

    /// Decodes the remaining audio.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        // TotalBytes is untrusted until the body has been decoded.
        let remaining = self
            .header
            .total_bytes
            .saturating_sub(self.bytes_decoded)
            .min(MAX_PREALLOCATION);
        let mut out = Vec::with_capacity(remaining as usize + self.buffer.len() - self.pos);
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out)
    }

    fn next_base64_encoded_data(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }

    fn decode_next_buffer(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }

        loop {
            let Some(encoded) = self.next_base64_encoded_data()? else {
                self.finish()?;
                return Ok(false);
            };

            let index = self.chunks_read as usize;
            let decoded = STANDARD
                .decode(encoded.as_bytes())
                .map_err(|source| HarnessError::InvalidChunk { index, source })?;

            self.chunks_read += 1;
            self.bytes_decoded += decoded.len() as u64;
            trace!(
                index,
                line = self.line_no,
                len = decoded.len(),
                "decoded recorded buffer"
            );

            if self.chunks_read > self.header.num_of_buffers {
                return Err(HarnessError::LengthMismatch {
                    unit: "buffers",
                    declared: self.header.num_of_buffers.into(),
                    actual: self.chunks_read.into(),
                });
            }
            if self.bytes_decoded > self.header.total_bytes {
                return Err(HarnessError::LengthMismatch {
                    unit: "bytes",
                    declared: self.header.total_bytes,
                    actual: self.bytes_decoded,
                });
            }

            if decoded.is_empty() {
                continue;
            }

            self.buffer = decoded;
            self.pos = 0;
            return Ok(true);
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        self.buffer.clear();
        self.pos = 0;

        if self.chunks_read != self.header.num_of_buffers {
            return Err(HarnessError::LengthMismatch {
                unit: "buffers",
                declared: self.header.num_of_buffers.into(),
                actual: self.chunks_read.into(),
            });
        }
        if self.bytes_decoded != self.header.total_bytes {
            return Err(HarnessError::LengthMismatch {
                unit: "bytes",
                declared: self.header.total_bytes,
                actual: self.bytes_decoded,
            });
        }
        Ok(())
    }
}

impl<R: BufRead> io::Read for RecordedDataReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        RecordedDataReader::read(self, buf).map_err(io::Error::from)
    }
}

/// Builds recorded audio files in the format read by [`RecordedDataReader`].
#[derive(Clone, Debug)]
pub struct RecordedDataWriter {
    frame_type: String,
    timestamp: String,
    content_type: String,
    user_id: Option<String>,
    chunks: Vec<Vec<u8>>,
}

impl RecordedDataWriter {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            frame_type: "audio".to_string(),
            timestamp: create_timestamp(),
            content_type: content_type.into(),
            user_id: None,
            chunks: Vec::new(),
        }
    }

    pub fn frame_type(mut self, frame_type: impl Into<String>) -> Self {
        self.frame_type = frame_type.into();
        self
    }

    pub fn timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Appends one buffer. Empty buffers are skipped since they would encode
    /// to a blank line.
    pub fn push_chunk(&mut self, bytes: &[u8]) {
        if !bytes.is_empty() {
            self.chunks.push(bytes.to_vec());
        }
    }

    pub fn push_chunked(&mut self, data: &[u8], chunk_size: usize) {
        for chunk in data.chunks(chunk_size.max(1)) {
            self.push_chunk(chunk);
        }
    }

    pub fn header(&self) -> RecordedHeader {
        RecordedHeader {
            frame_type: self.frame_type.clone(),
            timestamp: self.timestamp.clone(),
            total_bytes: self.chunks.iter().map(|c| c.len() as u64).sum(),
            num_of_buffers: self.chunks.len() as u32,
            content_type: self.content_type.clone(),
            user_id: self.user_id.clone(),
        }
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<()> {
        self.header().write_to(&mut w)?;
        for chunk in &self.chunks {
            writeln!(w, "{}", STANDARD.encode(chunk))?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        self.write_to(BufWriter::new(file))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }
}

/// Current time as 90 kHz ticks since the Unix epoch.
pub fn create_timestamp() -> String {
    let now = chrono::Utc::now();
    let secs = now.timestamp().max(0) as u128;
    let nanos = now.timestamp_subsec_nanos() as u128;
    let ticks = secs * TIMESTAMP_TICKS_PER_SECOND + nanos * TIMESTAMP_TICKS_PER_SECOND / 1_000_000_000;
    ticks.to_string()
}
