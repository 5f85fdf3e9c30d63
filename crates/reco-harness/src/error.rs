use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed recorded data header at line {line}: {content:?}")]
    MalformedHeader { line: usize, content: String },

    #[error("recorded data header is missing `{0}`")]
    MissingField(&'static str),

    #[error("recorded data header field `{field}` has invalid value {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("recorded data chunk {index} is not valid base64: {source}")]
    InvalidChunk {
        index: usize,
        #[source]
        source: base64::DecodeError,
    },

    #[error("recorded data length mismatch: header declares {declared} {unit}, file holds {actual}")]
    LengthMismatch {
        unit: &'static str,
        declared: u64,
        actual: u64,
    },

    #[error("invalid wave file: {0}")]
    InvalidWave(String),

    #[error("timed out after {0:?} waiting for the recognition session to finish")]
    Timeout(Duration),

    #[error("completion signal was dropped before the session finished")]
    CompletionDropped,

    #[error("completion signal was already taken by another waiter")]
    CompletionTaken,

    #[error("config error: {0}")]
    Config(String),

    #[error("audio stream closed")]
    StreamClosed,
}

impl From<HarnessError> for std::io::Error {
    fn from(err: HarnessError) -> Self {
        match err {
            HarnessError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
