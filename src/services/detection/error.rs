// Detection Errors
// Only failures that must reach the caller live here; malformed judge output
// never becomes an error and degrades to a fallback verdict instead.

use crate::services::providers::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("AI service credentials are missing or invalid: {0}. Configure an API key (GEMINI_API_KEY / GROQ_API_KEY or the config file)")]
    Config(String),
    #[error("Could not reach the AI service: {0}. Check your internet connection")]
    Network(String),
    #[error("Detection cancelled")]
    Cancelled,
}

impl DetectionError {
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// How a provider failure should be treated by the judge.
#[derive(Debug)]
pub enum ProviderFailure {
    /// Surface to the caller.
    Fatal(DetectionError),
    /// Degrade to the low-confidence fallback verdict.
    Degraded(String),
}

pub fn classify_provider_error(err: ProviderError) -> ProviderFailure {
    if err.is_credential_failure() {
        let detail = match &err {
            ProviderError::ApiError { status, message } => format!("HTTP {}: {}", status, message),
            _ => "no API key configured".to_string(),
        };
        return ProviderFailure::Fatal(DetectionError::Config(detail));
    }
    if err.is_transport_failure() {
        return ProviderFailure::Fatal(DetectionError::Network(err.to_string()));
    }
    ProviderFailure::Degraded(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_config() {
        match classify_provider_error(ProviderError::MissingApiKey) {
            ProviderFailure::Fatal(e) => assert!(e.is_config()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_auth_statuses_are_config() {
        for (status, body) in [(401, "unauthorized"), (403, "forbidden"), (400, "API key not valid")] {
            let err = ProviderError::ApiError { status, message: body.to_string() };
            match classify_provider_error(err) {
                ProviderFailure::Fatal(e) => assert!(e.is_config(), "status {}", status),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_server_errors_degrade() {
        let err = ProviderError::ApiError { status: 503, message: "overloaded".to_string() };
        assert!(matches!(classify_provider_error(err), ProviderFailure::Degraded(_)));
        assert!(matches!(
            classify_provider_error(ProviderError::MissingContent),
            ProviderFailure::Degraded(_)
        ));
    }

    #[test]
    fn test_config_message_mentions_configuration() {
        let msg = DetectionError::Config("no API key configured".to_string()).to_string();
        assert!(msg.contains("Configure an API key"));
    }
}
