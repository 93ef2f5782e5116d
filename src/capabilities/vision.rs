//! Vision-LLM adapter backing the image extractor in the ingestion frontend (4.K).
//! Used both to extract printed text from an image and to generate a semantic
//! description of pictorial content, chosen by `VisionMode`.

use crate::error::{CoreError, CoreResult, ErrorKind};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionMode {
    ExtractText,
    Describe,
    /// The adapter runs a quick pre-classification call to decide between the two.
    Auto,
}

#[async_trait]
pub trait VisionLlm: Send + Sync {
    async fn process_image(&self, image_bytes: &[u8], mode: VisionMode) -> CoreResult<String>;
}

#[derive(Serialize)]
struct VisionRequest<'a> {
    model: &'a str,
    messages: Vec<VisionMessage>,
    max_tokens: usize,
}

#[derive(Serialize)]
struct VisionMessage {
    role: &'static str,
    content: Vec<VisionContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum VisionContentPart {
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct VisionResponse {
    choices: Vec<VisionChoice>,
}

#[derive(Deserialize)]
struct VisionChoice {
    message: VisionChoiceMessage,
}

#[derive(Deserialize)]
struct VisionChoiceMessage {
    content: String,
}

const CLASSIFY_PROMPT: &str =
    "Does this image contain primarily printed/readable text, or is it primarily a picture/diagram? Answer with exactly one word: TEXT or PICTURE.";
const EXTRACT_PROMPT: &str = "Extract all readable text from this image verbatim, preserving line breaks.";
const DESCRIBE_PROMPT: &str = "Describe the visual content of this image in two or three sentences.";

pub struct HttpVisionLlm {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl HttpVisionLlm {
    pub fn new(base_url: String, model: String, timeout: Duration) -> Self {
        Self { client: Client::new(), base_url, model, timeout }
    }

    fn data_url(image_bytes: &[u8]) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        format!("data:image/png;base64,{encoded}")
    }

    async fn call(&self, image_bytes: &[u8], prompt: &str) -> CoreResult<String> {
        let request = VisionRequest {
            model: &self.model,
            messages: vec![VisionMessage {
                role: "user",
                content: vec![
                    VisionContentPart::Text { text: prompt.to_string() },
                    VisionContentPart::ImageUrl { image_url: ImageUrl { url: Self::data_url(image_bytes) } },
                ],
            }],
            max_tokens: 1024,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(&url).json(&request).send(),
        )
        .await
        .map_err(|_| CoreError::new(ErrorKind::ModelTransient, "vision-LLM call timed out"))?
        .map_err(|e| CoreError::new(ErrorKind::ModelTransient, e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::new(ErrorKind::ModelFallback, format!("vision-LLM backend returned {}", response.status())));
        }

        let parsed: VisionResponse = response
            .json()
            .await
            .map_err(|e| CoreError::new(ErrorKind::ModelFallback, format!("malformed vision response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CoreError::new(ErrorKind::ModelFallback, "vision-LLM backend returned no choices"))
    }
}

#[async_trait]
impl VisionLlm for HttpVisionLlm {
    async fn process_image(&self, image_bytes: &[u8], mode: VisionMode) -> CoreResult<String> {
        match mode {
            VisionMode::ExtractText => self.call(image_bytes, EXTRACT_PROMPT).await,
            VisionMode::Describe => self.call(image_bytes, DESCRIBE_PROMPT).await,
            VisionMode::Auto => {
                let classification = self.call(image_bytes, CLASSIFY_PROMPT).await.unwrap_or_default();
                if classification.to_uppercase().contains("TEXT") {
                    self.call(image_bytes, EXTRACT_PROMPT).await
                } else {
                    self.call(image_bytes, DESCRIBE_PROMPT).await
                }
            }
        }
    }
}
