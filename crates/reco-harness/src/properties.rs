use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Well-known property identifiers shared by configs, audio configs and results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyId {
    SpeechServiceConnectionKey,
    SpeechServiceConnectionRegion,
    SpeechServiceConnectionEndpoint,
    SpeechServiceConnectionAuthToken,
    SpeechServiceConnectionRecoLanguage,
    SpeechServiceConnectionProxyHostName,
    SpeechServiceConnectionProxyPort,
    SpeechServiceResponseJsonResult,
    SpeechServiceResponseRecognitionLatencyMs,
    DataBufferTimeStamp,
    DataBufferUserId,
    PronunciationAssessmentParams,
    OfflineUnidecModelPath,
    OfflineRnntModelPath,
}

impl PropertyId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyId::SpeechServiceConnectionKey => "SpeechServiceConnection_Key",
            PropertyId::SpeechServiceConnectionRegion => "SpeechServiceConnection_Region",
            PropertyId::SpeechServiceConnectionEndpoint => "SpeechServiceConnection_Endpoint",
            PropertyId::SpeechServiceConnectionAuthToken => "SpeechServiceAuthorization_Token",
            PropertyId::SpeechServiceConnectionRecoLanguage => {
                "SpeechServiceConnection_RecoLanguage"
            }
            PropertyId::SpeechServiceConnectionProxyHostName => {
                "SpeechServiceConnection_ProxyHostName"
            }
            PropertyId::SpeechServiceConnectionProxyPort => "SpeechServiceConnection_ProxyPort",
            PropertyId::SpeechServiceResponseJsonResult => "SpeechServiceResponse_JsonResult",
            PropertyId::SpeechServiceResponseRecognitionLatencyMs => {
                "SpeechServiceResponse_RecognitionLatencyMs"
            }
            PropertyId::DataBufferTimeStamp => "DataBuffer_TimeStamp",
            PropertyId::DataBufferUserId => "DataBuffer_UserId",
            PropertyId::PronunciationAssessmentParams => "PronunciationAssessment_Params",
            PropertyId::OfflineUnidecModelPath => "SPEECH-Offline-Unidec-ModelPath",
            PropertyId::OfflineRnntModelPath => "SPEECH-Offline-Rnnt-ModelPath",
        }
    }
}

impl std::fmt::Display for PropertyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Property bag keyed either by [`PropertyId`] or by a free-form name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyCollection {
    by_id: HashMap<PropertyId, String>,
    by_name: HashMap<String, String>,
}

impl PropertyCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: PropertyId, value: impl Into<String>) {
        self.by_id.insert(id, value.into());
    }

    pub fn get(&self, id: PropertyId) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Same as [`get`](Self::get) but yields an empty string for unset properties.
    pub fn get_or_empty(&self, id: PropertyId) -> &str {
        self.get(id).unwrap_or_default()
    }

    pub fn set_by_name(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.by_name.insert(name.into(), value.into());
    }

    /// Named lookups also resolve canonical [`PropertyId`] names.
    pub fn get_by_name(&self, name: &str) -> Option<&str> {
        if let Some(v) = self.by_name.get(name) {
            return Some(v.as_str());
        }

        self.by_id
            .iter()
            .find(|(id, _)| id.as_str() == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty() && self.by_name.is_empty()
    }
}
