//! Chat-completions SQL generator

use super::client::OpenAIClient;
use super::types::{CompletionRequest, CompletionResponse, Message};
use crate::providers::invalid_response;
use crate::{ensure_sql, Generator, UsageTracker};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use unibi_core::{ProviderError, SchemaContext};

const SYSTEM_PROMPT: &str = "You are a SQL expert. Given the database schema below, answer the \
user's question with a single SQL query. Respond with the SQL only, without explanation.";

/// SQL generator backed by an OpenAI-compatible chat model.
#[derive(Debug)]
pub struct OpenAIGenerator {
    client: OpenAIClient,
    model: String,
    usage: Arc<UsageTracker>,
}

impl OpenAIGenerator {
    /// Create a new generator.
    ///
    /// # Arguments
    /// * `client` - Configured API client
    /// * `model` - Model name (e.g., "gpt-4o-mini", "qwen-max")
    pub fn new(client: OpenAIClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            usage: Arc::new(UsageTracker::new()),
        }
    }

    /// Token usage accumulated by this generator.
    pub fn usage(&self) -> Arc<UsageTracker> {
        Arc::clone(&self.usage)
    }

    fn build_messages(question: &str, schema: &SchemaContext) -> Vec<Message> {
        vec![
            Message::system(format!("{}\n\n{}", SYSTEM_PROMPT, schema.description)),
            Message::user(question),
        ]
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    async fn generate_sql(
        &self,
        question: &str,
        schema: &SchemaContext,
    ) -> Result<String, ProviderError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: Self::build_messages(question, schema),
            max_tokens: Some(1024),
            temperature: Some(0.0),
        };

        let response: CompletionResponse =
            self.client.request("chat/completions", request).await?;

        if let Some(usage) = &response.usage {
            self.usage
                .record_generation(usage.prompt_tokens, usage.completion_tokens.unwrap_or(0));
        }

        let content = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| invalid_response("openai", "No completion choices returned"))?;

        debug!(model = %self.model, chars = content.len(), "generated SQL");
        ensure_sql(&content)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
