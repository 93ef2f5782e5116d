//! 4.I Generator Adapter: a uniform capability over one of several text-completion
//! backends. Non-streaming only — streaming token output is an explicit non-goal.

use crate::config::settings::GeneratorConfig;
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::utils::limiters::Limiters;
use crate::utils::tokens::estimate_tokens;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// `messages` is chronological, interleaved user/assistant, optionally preceded
    /// by a single system message. Implementations enforce a maximum context window
    /// by truncating the oldest non-system messages first before calling the backend.
    async fn generate(&self, messages: &[Message]) -> CoreResult<String>;
}

/// Truncates `messages` so their estimated token count (plus the system message) fits
/// `max_context_tokens`, dropping the oldest non-system messages first. The system
/// message, if present, is always preserved.
pub fn truncate_to_context_window(messages: &[Message], max_context_tokens: usize) -> Vec<Message> {
    let (system, rest): (Vec<&Message>, Vec<&Message>) =
        messages.iter().partition(|m| m.role == Role::System);

    let system_tokens: usize = system.iter().map(|m| estimate_tokens(&m.content)).sum();
    let mut budget = max_context_tokens.saturating_sub(system_tokens);

    let mut kept_rev: Vec<&Message> = Vec::new();
    for m in rest.iter().rev() {
        let cost = estimate_tokens(&m.content);
        if cost > budget && !kept_rev.is_empty() {
            break;
        }
        budget = budget.saturating_sub(cost);
        kept_rev.push(m);
    }
    kept_rev.reverse();

    system.into_iter().cloned().chain(kept_rev.into_iter().cloned()).collect()
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    max_tokens: usize,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

impl From<&Message> for WireMessage {
    fn from(m: &Message) -> Self {
        WireMessage {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: m.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// OpenAI-compatible `/v1/chat/completions` backend: covers both a hosted API and a
/// local inference server speaking the same wire format. Health-checked at
/// construction so local-server misconfiguration fails fast at startup rather than on
/// the first query.
pub struct OpenAiCompatibleGenerator {
    client: Client,
    base_url: String,
    model: String,
    max_tokens: usize,
    max_context_tokens: usize,
    limiters: Arc<Limiters>,
    timeout: Duration,
}

impl OpenAiCompatibleGenerator {
    pub fn new(config: &GeneratorConfig, limiters: Arc<Limiters>) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            max_context_tokens: config.max_context_tokens,
            limiters,
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    /// Fails fast at startup if the backend is unreachable, per 4.I's "health checking"
    /// responsibility for local inference servers.
    pub async fn health_check(&self) -> CoreResult<()> {
        let url = format!("{}/health", self.base_url);
        self.client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| CoreError::fatal(format!("generator backend unreachable at startup: {e}")))?;
        Ok(())
    }

    async fn call_once(&self, messages: &[Message]) -> CoreResult<String> {
        let wire: Vec<WireMessage> = messages.iter().map(WireMessage::from).collect();
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: &wire,
            max_tokens: self.max_tokens,
            stream: false,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::new(ErrorKind::ModelTransient, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::new(ErrorKind::ModelTransient, format!("generator backend returned {status}: {body}")));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CoreError::backend_unavailable(format!("malformed completion response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CoreError::backend_unavailable("generator backend returned no choices"))
    }
}

#[async_trait]
impl Generator for OpenAiCompatibleGenerator {
    async fn generate(&self, messages: &[Message]) -> CoreResult<String> {
        let truncated = truncate_to_context_window(messages, self.max_context_tokens);

        let (_permit, wait) =
            Limiters::acquire_timed(self.limiters.generator.clone(), self.limiters.acquire_timeout, "generator")
                .await?;
        debug!(wait_ms = wait.as_millis() as u64, op = "generator", "wait_queue");

        let start = Instant::now();
        const MAX_ATTEMPTS: u32 = 3;
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match tokio::time::timeout(self.timeout, self.call_once(&truncated)).await {
                Ok(Ok(text)) => {
                    debug!(exec_ms = start.elapsed().as_millis() as u64, op = "generator", attempt, "exec");
                    return Ok(text);
                }
                Ok(Err(e)) => last_err = Some(e),
                Err(_) => last_err = Some(CoreError::new(ErrorKind::ModelTransient, "generation call timed out")),
            }
            if attempt < MAX_ATTEMPTS {
                warn!(attempt, "generation call failed, retrying");
                tokio::time::sleep(Duration::from_millis(300 * attempt as u64)).await;
            }
        }
        Err(CoreError::backend_unavailable(
            last_err.map(|e| e.message).unwrap_or_else(|| "generator backend unavailable".into()),
        ))
    }
}

/// Gemini via its OpenAI-compatible endpoint. A second backend selected purely by a
/// constructor choice (design notes §9) — same wire shape, different base URL and
/// model naming convention, so it reuses `OpenAiCompatibleGenerator` wholesale.
pub fn gemini_generator(config: &GeneratorConfig, limiters: Arc<Limiters>) -> OpenAiCompatibleGenerator {
    OpenAiCompatibleGenerator::new(config, limiters)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str) -> Message {
        Message { role, content: content.to_string() }
    }

    #[test]
    fn truncation_keeps_system_message() {
        let messages = vec![
            msg(Role::System, "system prompt"),
            msg(Role::User, "word ".repeat(1000).as_str()),
        ];
        let truncated = truncate_to_context_window(&messages, 5);
        assert_eq!(truncated[0].role, Role::System);
    }

    #[test]
    fn truncation_drops_oldest_first() {
        let messages = vec![
            msg(Role::User, "oldest message here"),
            msg(Role::Assistant, "middle reply here"),
            msg(Role::User, "newest message here"),
        ];
        let truncated = truncate_to_context_window(&messages, 6);
        assert_eq!(truncated.last().unwrap().content, "newest message here");
        assert!(truncated.len() < messages.len());
    }

    #[test]
    fn truncation_keeps_at_least_the_newest_message() {
        let messages = vec![msg(Role::User, "a message that is somewhat long by itself")];
        let truncated = truncate_to_context_window(&messages, 1);
        assert_eq!(truncated.len(), 1);
    }
}
