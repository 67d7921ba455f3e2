//! Chat-style multimodal backend (Ollama).
//!
//! Pages are sent base64-encoded to `/api/chat` with a fixed recognition
//! prompt and near-zero temperature. This works with any Ollama-hosted
//! multimodal model; we default to an OCR-tuned one.

use base64::{Engine as _, prelude::BASE64_STANDARD};
use serde_json::json;

use crate::{config::AppConfig, prelude::*};

use super::{RecognitionBackend, RecognitionError};

/// The user prompt sent with each page image.
const RECOGNITION_PROMPT: &str = "Text Recognition:";

/// Sampling temperature. Kept just above zero; some models reject 0.0.
const TEMPERATURE: f64 = 0.01;

/// One message from an Ollama chat response.
#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// The subset of an Ollama `/api/chat` response we care about.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

/// One model from an Ollama `/api/tags` response.
#[derive(Debug, Deserialize)]
struct TaggedModel {
    name: Option<String>,
    model: Option<String>,
}

/// The subset of an Ollama `/api/tags` response we care about.
#[derive(Debug, Default, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TaggedModel>,
}

/// A recognition backend speaking the Ollama chat protocol.
pub struct OllamaBackend {
    client: reqwest::Client,
    host: String,
    model: String,
    num_ctx: u32,
    timeout: std::time::Duration,
}

impl OllamaBackend {
    /// Create a new Ollama backend from our configuration.
    pub fn new(client: reqwest::Client, config: &AppConfig) -> Self {
        Self {
            client,
            host: config.normalized_backend_host().to_owned(),
            model: config.model.clone(),
            num_ctx: config.num_ctx,
            timeout: config.ocr_timeout(),
        }
    }

    /// Does `/api/tags` report our model, either as `<model>` or
    /// `<model>:<tag>`?
    fn model_in_tags(&self, tags: &TagsResponse) -> bool {
        tags.models.iter().any(|m| {
            let candidate = m.name.as_deref().or(m.model.as_deref()).unwrap_or("");
            candidate == self.model || candidate.starts_with(&format!("{}:", self.model))
        })
    }
}

#[async_trait::async_trait]
impl RecognitionBackend for OllamaBackend {
    #[instrument(level = "debug", skip_all, fields(path = %image_path.display()))]
    async fn recognize(&self, image_path: &Path) -> Result<String> {
        let image = tokio::fs::read(image_path)
            .await
            .with_context(|| format!("failed to read page image {:?}", image_path.display()))?;
        let image_base64 = BASE64_STANDARD.encode(&image);
        drop(image);

        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": RECOGNITION_PROMPT,
                "images": [image_base64],
            }],
            "options": {
                "num_ctx": self.num_ctx,
                "temperature": TEMPERATURE,
            },
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|err| RecognitionError::from_transport(err, &self.host, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecognitionError::RequestFailed {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let payload = response
            .json::<ChatResponse>()
            .await
            .map_err(|err| RecognitionError::from_transport(err, &self.host, self.timeout))?;
        let content = payload
            .message
            .and_then(|m| m.content)
            .map(|c| c.trim().to_owned())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(RecognitionError::EmptyResult.into());
        }
        Ok(content)
    }

    async fn probe(&self) -> (bool, bool) {
        let response = self
            .client
            .get(format!("{}/api/tags", self.host))
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => {
                let tags = response.json::<TagsResponse>().await.unwrap_or_default();
                (true, self.model_in_tags(&tags))
            }
            _ => (false, false),
        }
    }
}
