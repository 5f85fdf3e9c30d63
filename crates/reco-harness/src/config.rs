use crate::error::{HarnessError, Result};
use crate::properties::{PropertyCollection, PropertyId};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

fn default_language() -> String {
    "en-US".to_string()
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("tests/input")
}

fn default_wait_timeout_secs() -> u64 {
    30
}

fn default_real_time_speed() -> u32 {
    100
}

fn default_proxy_host() -> String {
    crate::audio::DEFAULT_PROXY_HOST.to_string()
}

fn default_proxy_port() -> u16 {
    8888
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MockConfig {
    #[serde(default)]
    pub use_mocks: bool,
    #[serde(default)]
    pub use_mock_usp: bool,
    /// Percent of real time at which mocked audio is consumed.
    #[serde(default = "default_real_time_speed")]
    pub real_time_speed: u32,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            use_mocks: false,
            use_mock_usp: false,
            real_time_speed: default_real_time_speed(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct OfflineConfig {
    pub unidec_model_path: Option<PathBuf>,
    pub rnnt_model_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_host")]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_proxy_host(),
            port: default_proxy_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HarnessConfig {
    #[serde(default)]
    pub subscription_key: String,
    #[serde(default)]
    pub region: String,
    pub endpoint: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    #[serde(default)]
    pub mocks: MockConfig,
    #[serde(default)]
    pub offline: OfflineConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            subscription_key: String::new(),
            region: String::new(),
            endpoint: None,
            language: default_language(),
            input_dir: default_input_dir(),
            wait_timeout_secs: default_wait_timeout_secs(),
            mocks: MockConfig::default(),
            offline: OfflineConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

pub fn replace_env_vars(input: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)") else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

impl HarnessConfig {
    pub fn load<P: AsRef<Path>>(p: P) -> Result<Self> {
        let text = std::fs::read_to_string(p.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        debug!(path = %p.as_ref().display(), "loaded harness config");
        Ok(config)
    }

    /// Parses TOML, substituting `$VAR` references in string values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut table: toml::Table =
            toml::from_str(text).map_err(|e| HarnessError::Config(e.to_string()))?;
        table.iter_mut().for_each(|(_, v)| substitute_env(v));
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| HarnessError::Config(e.to_string()))
    }

    /// Defaults overlaid with `.env` and process environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("SPEECH_SUBSCRIPTION_KEY") {
            self.subscription_key = v;
        }
        if let Ok(v) = std::env::var("SPEECH_REGION") {
            self.region = v;
        }
        if let Ok(v) = std::env::var("SPEECH_ENDPOINT") {
            self.endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("RECO_HARNESS_INPUT_DIR") {
            self.input_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("RECO_HARNESS_USE_MOCKS") {
            self.mocks.use_mocks = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn input_file(&self, name: impl AsRef<Path>) -> PathBuf {
        self.input_dir.join(name)
    }

    /// Speech config for the given traffic type.
    pub fn current_speech_config(&self, traffic_type: &str) -> SpeechConfig {
        let mut config = match &self.endpoint {
            Some(endpoint) => SpeechConfig::from_endpoint(endpoint, &self.subscription_key),
            None => SpeechConfig::from_subscription(&self.subscription_key, &self.region),
        };
        config.set_speech_recognition_language(&self.language);
        config.set_service_property("traffictype", traffic_type);
        config
    }

    pub fn current_translation_config(&self, traffic_type: &str) -> SpeechTranslationConfig {
        SpeechTranslationConfig {
            speech: self.current_speech_config(traffic_type),
            target_languages: Vec::new(),
        }
    }

    pub fn current_speech_config_for_pronunciation_assessment(
        &self,
        traffic_type: &str,
    ) -> SpeechConfig {
        let mut config = self.current_speech_config(traffic_type);
        config.set_speech_recognition_language("en-US");
        config.set_property(
            PropertyId::PronunciationAssessmentParams,
            r#"{"enableProsodyAssessment":true}"#,
        );
        config
    }

    pub fn use_offline_unidec(&self, config: &mut SpeechConfig) -> Result<()> {
        let path = self
            .offline
            .unidec_model_path
            .as_ref()
            .ok_or_else(|| HarnessError::Config("offline.unidec_model_path is not set".to_string()))?;
        config.set_property(PropertyId::OfflineUnidecModelPath, path.display().to_string());
        Ok(())
    }

    pub fn use_offline_rnnt(&self, config: &mut SpeechConfig) -> Result<()> {
        let path = self
            .offline
            .rnnt_model_path
            .as_ref()
            .ok_or_else(|| HarnessError::Config("offline.rnnt_model_path is not set".to_string()))?;
        config.set_property(PropertyId::OfflineRnntModelPath, path.display().to_string());
        Ok(())
    }
}

fn substitute_env(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => *s = replace_env_vars(s),
        toml::Value::Table(t) => t.iter_mut().for_each(|(_, v)| substitute_env(v)),
        toml::Value::Array(a) => a.iter_mut().for_each(substitute_env),
        toml::Value::Integer(_)
        | toml::Value::Float(_)
        | toml::Value::Boolean(_)
        | toml::Value::Datetime(_) => {}
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeechConfig {
    properties: PropertyCollection,
    service_properties: Vec<(String, String)>,
}

impl SpeechConfig {
    pub fn from_subscription(key: &str, region: &str) -> Self {
        let mut config = Self::default();
        config.set_property(PropertyId::SpeechServiceConnectionKey, key);
        config.set_property(PropertyId::SpeechServiceConnectionRegion, region);
        config
    }

    pub fn from_authorization_token(token: &str, region: &str) -> Self {
        let mut config = Self::default();
        config.set_property(PropertyId::SpeechServiceConnectionAuthToken, token);
        config.set_property(PropertyId::SpeechServiceConnectionRegion, region);
        config
    }

    pub fn from_endpoint(endpoint: &str, key: &str) -> Self {
        let mut config = Self::default();
        config.set_property(PropertyId::SpeechServiceConnectionEndpoint, endpoint);
        config.set_property(PropertyId::SpeechServiceConnectionKey, key);
        config
    }

    pub fn set_property(&mut self, id: PropertyId, value: impl Into<String>) {
        self.properties.set(id, value);
    }

    pub fn get_property(&self, id: PropertyId) -> Option<&str> {
        self.properties.get(id)
    }

    pub fn set_speech_recognition_language(&mut self, language: &str) {
        self.set_property(PropertyId::SpeechServiceConnectionRecoLanguage, language);
    }

    /// Query parameter sent with every service request. Setting a name
    /// twice keeps the last value.
    pub fn set_service_property(&mut self, name: &str, value: &str) {
        self.service_properties.retain(|(n, _)| n != name);
        self.service_properties
            .push((name.to_string(), value.to_string()));
    }

    pub fn service_property(&self, name: &str) -> Option<&str> {
        self.service_properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_proxy(&mut self, host: &str, port: u16) {
        self.set_property(PropertyId::SpeechServiceConnectionProxyHostName, host);
        self.set_property(PropertyId::SpeechServiceConnectionProxyPort, port.to_string());
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeechTranslationConfig {
    pub speech: SpeechConfig,
    pub target_languages: Vec<String>,
}

impl SpeechTranslationConfig {
    pub fn add_target_language(&mut self, language: impl Into<String>) {
        self.target_languages.push(language.into());
    }
}
