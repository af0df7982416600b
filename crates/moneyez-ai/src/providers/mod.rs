//! LLM Provider implementations

pub mod google;

use crate::{Context, Error, MessageEventStream, Model, Result};
use async_trait::async_trait;

pub use google::GoogleProvider;

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a response from the LLM
    async fn stream(&self, model: &Model, context: &Context) -> Result<MessageEventStream>;
}

/// Get an API key from the provided value or the first set environment variable
pub fn get_api_key(provided: Option<&str>, env_vars: &[&str]) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    env_vars
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .ok_or(Error::InvalidApiKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provided_key_wins() {
        let key = get_api_key(Some("abc"), &["MONEYEZ_TEST_UNSET_KEY"]).unwrap();
        assert_eq!(key, "abc");
    }

    #[test]
    fn test_missing_key_is_error() {
        let err = get_api_key(Some(""), &["MONEYEZ_TEST_UNSET_KEY"]).unwrap_err();
        assert!(matches!(err, Error::InvalidApiKey));
    }
}
