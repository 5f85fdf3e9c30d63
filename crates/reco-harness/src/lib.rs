mod error;

pub mod aggregator;
pub mod audio;
pub mod config;
pub mod events;
pub mod fixtures;
pub mod logging;
pub mod mock;
pub mod properties;
pub mod recorded;
pub mod result;
pub mod wiring;

pub use aggregator::{RecoPhrase, RecoPhrases, RecoPhrasesPtr, RecoResultVector};
pub use config::{HarnessConfig, SpeechConfig};
pub use error::{HarnessError, Result};
pub use events::{ConversationTranscriber, Recognizer, SpeechRecognizer};
pub use mock::{MockController, MockSession};
pub use recorded::{RecordedDataReader, RecordedDataWriter, RecordedHeader};
pub use wiring::{connect_callbacks, connect_non_reco_events};
