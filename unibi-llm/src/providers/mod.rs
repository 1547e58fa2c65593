//! Provider implementations
//!
//! Concrete implementations of the capability traits for hosted inference
//! services.

pub mod openai;

pub use openai::{OpenAIClient, OpenAIGenerator, RequestBudget};

use unibi_core::ProviderError;

pub(crate) fn request_failed(
    provider: &str,
    status: u16,
    message: impl Into<String>,
) -> ProviderError {
    ProviderError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    }
}

pub(crate) fn rate_limited(provider: &str, retry_after_ms: i64) -> ProviderError {
    ProviderError::RateLimited {
        provider: provider.to_string(),
        retry_after_ms,
    }
}

pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> ProviderError {
    ProviderError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    }
}
