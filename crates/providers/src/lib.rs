//! Live HTTP clients for chatrelay.
//!
//! - [`OpenAiAssistantClient`] implements `chatrelay_core::AssistantApi`
//! - [`AvitoMessenger`] implements `chatrelay_core::Messenger`
//!
//! Both share the retry budget from configuration but keep their own
//! per-request timeouts.

pub mod avito;
pub mod openai_assistants;

pub use avito::AvitoMessenger;
pub use openai_assistants::OpenAiAssistantClient;

use chatrelay_config::{AppConfig, RetryConfig};
use chatrelay_core::error::TransportError;
use chatrelay_transport::{RetryBudget, http_transport};

fn budget(retry: &RetryConfig) -> RetryBudget {
    RetryBudget::new(retry.max_attempts, retry.base_delay(), retry.max_delay())
}

/// Build the assistant client from configuration.
///
/// A missing API key yields a client that sends an empty bearer token;
/// serving paths validate credentials before getting here.
pub fn assistant_client(config: &AppConfig) -> Result<OpenAiAssistantClient, TransportError> {
    let transport = http_transport(config.assistant.timeout(), budget(&config.retry))?;
    Ok(OpenAiAssistantClient::new(
        config.assistant.base_url.clone(),
        config.assistant.api_key.clone().unwrap_or_default(),
        transport,
    ))
}

/// Build the messenger client from configuration.
pub fn messenger_client(config: &AppConfig) -> Result<AvitoMessenger, TransportError> {
    let transport = http_transport(config.messenger.timeout(), budget(&config.retry))?;
    Ok(AvitoMessenger::new(
        config.messenger.base_url.clone(),
        config.messenger.token.clone().unwrap_or_default(),
        transport,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn budget_follows_retry_config() {
        let retry = RetryConfig {
            max_attempts: 4,
            base_delay_ms: 200,
            max_delay_ms: 900,
        };
        let b = budget(&retry);
        assert_eq!(b.max_attempts, 4);
        assert_eq!(b.delay_after(3), Duration::from_millis(800));
        assert_eq!(b.delay_after(4), Duration::from_millis(900));
    }

    #[test]
    fn clients_build_from_defaults() {
        let config = AppConfig::default();
        assert!(assistant_client(&config).is_ok());
        assert!(messenger_client(&config).is_ok());
    }
}
