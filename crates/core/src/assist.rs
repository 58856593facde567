//! Agent-assist summarization.
//!
//! The assistant buffers finalized transcript fragments and periodically asks
//! an LLM for a summary plus a private agent suggestion. One assistant exists
//! per session and is driven exclusively from the session's recognition
//! bridge, so it needs no internal locking.

use anyhow::{Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;

const SYSTEM_PROMPT: &str = "You are an Agent Assist who receives transcription from both Agent and Customer.
Your task:
- Identify issues, resolutions, and strong customer sentiments from the conversation.
- Generate a concise summary.
- Then provide a private suggestion to the Agent only.

Do NOT simulate customer responses or continue the dialogue.
Do NOT suggest what the customer might say next.

Respond in the following format:

Issue and Customer Sentiment:
[summary here]

Suggestion:
[suggestion here]";

/// A chat-completion client. The assistant only needs a single-turn
/// completion over a running history.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[String],
        user_input: &str,
    ) -> Result<String>;
}

/// `LlmClient` backed by any OpenAI-compatible chat completion API.
pub struct OpenAiAssistClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiAssistClient {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiAssistClient {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[String],
        user_input: &str,
    ) -> Result<String> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(history.len() + 2);
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()?
                .into(),
        );
        for earlier in history {
            messages.push(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(earlier.as_str())
                    .build()?
                    .into(),
            );
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_input)
                .build()?
                .into(),
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()?;

        let response = self.client.chat().create(request).await?;
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("assist completion had no text content"))
    }
}

/// Per-session incremental summarizer.
pub struct AgentAssistant {
    llm: std::sync::Arc<dyn LlmClient>,
    /// Number of buffered fragments that triggers a summarization turn.
    summary_interval: usize,
    /// Cap on prior summaries carried as context.
    history_target: usize,
    buffer: Vec<String>,
    history: Vec<String>,
}

impl AgentAssistant {
    pub fn new(
        llm: std::sync::Arc<dyn LlmClient>,
        summary_interval: usize,
        history_target: usize,
    ) -> Self {
        Self {
            llm,
            summary_interval: summary_interval.max(1),
            history_target,
            buffer: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Feed one finalized transcript fragment. Returns a summary once enough
    /// fragments have accumulated, `None` otherwise.
    pub async fn on_transcription(&mut self, fragment: &str) -> Result<Option<String>> {
        self.buffer.push(fragment.to_string());
        if self.buffer.len() < self.summary_interval {
            return Ok(None);
        }
        self.invoke_llm().await.map(Some)
    }

    /// Summarize whatever is still buffered, typically at end of call.
    pub async fn flush_summary(&mut self) -> Result<Option<String>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        self.invoke_llm().await.map(Some)
    }

    async fn invoke_llm(&mut self) -> Result<String> {
        let user_input = format!("Transcriptions:\n{}", self.buffer.join(" "));
        self.buffer.clear();

        let summary = self
            .llm
            .complete(SYSTEM_PROMPT, &self.history, &user_input)
            .await?;

        self.history.push(summary.clone());
        if self.history.len() > self.history_target {
            let overflow = self.history.len() - self.history_target;
            self.history.drain(..overflow);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::{always, eq};
    use std::sync::Arc;

    #[tokio::test]
    async fn buffers_until_the_summary_interval() {
        let mut llm = MockLlmClient::new();
        llm.expect_complete()
            .times(1)
            .with(
                always(),
                always(),
                eq("Transcriptions:\nHello. How can I help?".to_string()),
            )
            .returning(|_, _, _| Ok("Summary one".to_string()));

        let mut assist = AgentAssistant::new(Arc::new(llm), 2, 5);
        assert!(assist.on_transcription("Hello.").await.unwrap().is_none());
        let summary = assist.on_transcription("How can I help?").await.unwrap();
        assert_eq!(summary.as_deref(), Some("Summary one"));
    }

    #[tokio::test]
    async fn flush_summarizes_the_remainder_only_when_buffered() {
        let mut llm = MockLlmClient::new();
        llm.expect_complete()
            .times(1)
            .returning(|_, _, _| Ok("Tail summary".to_string()));

        let mut assist = AgentAssistant::new(Arc::new(llm), 10, 5);
        assert!(assist.flush_summary().await.unwrap().is_none());
        assist.on_transcription("Goodbye.").await.unwrap();
        let summary = assist.flush_summary().await.unwrap();
        assert_eq!(summary.as_deref(), Some("Tail summary"));
        // The buffer was consumed; a second flush has nothing to do.
        assert!(assist.flush_summary().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prior_summaries_are_carried_as_history_up_to_the_target() {
        let mut llm = MockLlmClient::new();
        let mut call = 0u32;
        llm.expect_complete().returning(move |_, history, _| {
            call += 1;
            match call {
                1 => assert!(history.is_empty()),
                2 => assert_eq!(history, ["S1"]),
                // History is capped at one entry, so S1 was dropped.
                _ => assert_eq!(history, ["S2"]),
            }
            Ok(format!("S{call}"))
        });

        let mut assist = AgentAssistant::new(Arc::new(llm), 1, 1);
        for fragment in ["one", "two", "three"] {
            assist.on_transcription(fragment).await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn llm_failure_propagates_to_the_caller() {
        let mut llm = MockLlmClient::new();
        llm.expect_complete()
            .returning(|_, _, _| Err(anyhow!("rate limited")));

        let mut assist = AgentAssistant::new(Arc::new(llm), 1, 5);
        assert!(assist.on_transcription("Hi.").await.is_err());
    }
}
