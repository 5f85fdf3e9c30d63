use crate::aggregator::RecoPhrase;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use std::path::Path;
use tracing::debug;

pub const KATIE_SIGNATURE_FILE: &str = "katie_voice_signature.json";
pub const STEVE_SIGNATURE_FILE: &str = "steve_voice_signature.json";

/// Phrase texts in arrival order, separated by a single space.
pub fn get_text(phrases: &[RecoPhrase]) -> String {
    phrases
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercases, drops punctuation and collapses runs of whitespace.
pub fn normalize_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_ascii_punctuation() && !matches!(c, '¿' | '¡' | '。' | '、' | '，'))
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn match_text(text: &str, reference: &str) -> bool {
    normalize_text(text) == normalize_text(reference)
}

/// Whether any phrase contains `reference` once both are normalized.
pub fn find_the_ref(phrases: &[RecoPhrase], reference: &str) -> bool {
    let reference = normalize_text(reference);
    phrases
        .iter()
        .any(|p| normalize_text(&p.text).contains(&reference))
}

/// Offset of the first phrase attributed to `speaker`.
pub fn verify_speaker(phrases: &[RecoPhrase], speaker: &str) -> Option<u64> {
    phrases.iter().find(|p| p.user_id == speaker).map(|p| p.offset)
}

pub fn verify_text_and_speaker(phrases: &[RecoPhrase], text: &str, speaker: &str) -> bool {
    let found = phrases
        .iter()
        .any(|p| p.user_id == speaker && match_text(&p.text, text));
    if !found {
        debug!(speaker, text, "no phrase matched the expected text and speaker");
    }
    found
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceSignatures {
    pub katie: String,
    pub steve: String,
}

fn load_signature(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)?;
    // Signatures are passed to the service verbatim but must be JSON.
    serde_json::from_str::<serde_json::Value>(&text).map_err(|e| {
        HarnessError::Message(format!("voice signature {} is not JSON: {e}", path.display()))
    })?;
    Ok(text.trim().to_string())
}

/// Loads the two enrollment signatures used by transcription tests.
pub fn create_voice_signatures(config: &HarnessConfig) -> Result<VoiceSignatures> {
    Ok(VoiceSignatures {
        katie: load_signature(&config.input_file(KATIE_SIGNATURE_FILE))?,
        steve: load_signature(&config.input_file(STEVE_SIGNATURE_FILE))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phrase(text: &str, user: &str, offset: u64) -> RecoPhrase {
        RecoPhrase::new(text, user, "", offset)
    }

    #[test]
    fn text_is_joined_with_spaces() {
        let phrases = vec![phrase("hello world", "", 0), phrase("how are you", "", 10)];
        assert_eq!(get_text(&phrases), "hello world how are you");
        assert_eq!(get_text(&[]), "");
    }

    #[test]
    fn normalization_ignores_case_and_punctuation() {
        assert_eq!(normalize_text("  What's the   Weather like?"), "whats the weather like");
        assert!(match_text("Hello, world.", "hello world"));
        assert!(!match_text("hello", "hello world"));
    }

    #[test]
    fn reference_is_found_inside_a_phrase() {
        let phrases = vec![
            phrase("Good morning.", "", 0),
            phrase("What's the weather like today?", "", 0),
        ];
        assert!(find_the_ref(&phrases, "the weather like"));
        assert!(!find_the_ref(&phrases, "good evening"));
    }

    #[test]
    fn speakers_are_matched_by_user_id() {
        let phrases = vec![
            phrase("Hi Steve.", "katie@example.com", 100),
            phrase("Hi Katie.", "steve@example.com", 300),
            phrase("How are you?", "katie@example.com", 500),
        ];
        assert_eq!(verify_speaker(&phrases, "katie@example.com"), Some(100));
        assert_eq!(verify_speaker(&phrases, "guest"), None);
        assert!(verify_text_and_speaker(&phrases, "how are you", "katie@example.com"));
        assert!(!verify_text_and_speaker(&phrases, "how are you", "steve@example.com"));
    }

    #[test]
    fn signatures_load_from_the_input_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(KATIE_SIGNATURE_FILE), "{\"Version\":0}\n").unwrap();
        std::fs::write(dir.path().join(STEVE_SIGNATURE_FILE), "not json").unwrap();

        let config = HarnessConfig {
            input_dir: dir.path().to_path_buf(),
            ..HarnessConfig::default()
        };
        assert!(create_voice_signatures(&config).is_err());

        std::fs::write(dir.path().join(STEVE_SIGNATURE_FILE), "{\"Version\":1}").unwrap();
        let signatures = create_voice_signatures(&config).unwrap();
        assert_eq!(signatures.katie, "{\"Version\":0}");
        assert_eq!(signatures.steve, "{\"Version\":1}");
    }
}
