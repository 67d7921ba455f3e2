//! Document-parsing sidecar backend (GLM-OCR SDK).
//!
//! Unlike the chat backend, the sidecar reads page images from a shared
//! filesystem, so we send it the path rather than the bytes. It returns
//! either an assembled Markdown document or structured layout blocks; we
//! prefer the Markdown and fall back to joining the block contents.

use serde_json::json;

use crate::{config::AppConfig, prelude::*};

use super::{RecognitionBackend, RecognitionError};

/// One layout block from a parse response.
#[derive(Debug, Deserialize)]
struct ParseBlock {
    content: String,
}

/// The subset of a `/glmocr/parse` response we care about.
///
/// `json_result` is nested three deep: documents, then pages, then blocks.
#[derive(Debug, Deserialize)]
struct ParseResponse {
    #[serde(default)]
    json_result: Vec<Vec<Vec<ParseBlock>>>,
    markdown_result: Option<String>,
}

/// A recognition backend speaking the GLM-OCR sidecar protocol.
pub struct GlmOcrBackend {
    client: reqwest::Client,
    host: String,
    timeout: std::time::Duration,
}

impl GlmOcrBackend {
    /// Create a new GLM-OCR backend from our configuration.
    pub fn new(client: reqwest::Client, config: &AppConfig) -> Self {
        Self {
            client,
            host: config.normalized_backend_host().to_owned(),
            timeout: config.ocr_timeout(),
        }
    }
}

/// Extract the recognized text from a parse response, if any.
fn text_from_response(payload: ParseResponse) -> Option<String> {
    if let Some(markdown) = payload.markdown_result {
        let markdown = markdown.trim();
        if !markdown.is_empty() {
            return Some(markdown.to_owned());
        }
    }
    if payload.json_result.is_empty() {
        return None;
    }
    let joined = payload
        .json_result
        .into_iter()
        .flatten()
        .flatten()
        .map(|block| block.content)
        .collect::<Vec<_>>()
        .join("\n\n");
    Some(joined)
}

#[async_trait::async_trait]
impl RecognitionBackend for GlmOcrBackend {
    #[instrument(level = "debug", skip_all, fields(path = %image_path.display()))]
    async fn recognize(&self, image_path: &Path) -> Result<String> {
        let body = json!({ "images": [image_path] });
        let response = self
            .client
            .post(format!("{}/glmocr/parse", self.host))
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
            .json::<ParseResponse>()
            .await
            .map_err(|err| RecognitionError::from_transport(err, &self.host, self.timeout))?;
        text_from_response(payload)
            .ok_or_else(|| RecognitionError::EmptyResult.into())
    }

    async fn probe(&self) -> (bool, bool) {
        // The sidecar has no model-listing endpoint; reachability implies
        // the bundled model is loaded.
        let response = self
            .client
            .get(format!("{}/health", self.host))
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => (true, true),
            _ => (false, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(contents: &[&str]) -> Vec<Vec<Vec<ParseBlock>>> {
        vec![vec![contents
            .iter()
            .map(|content| ParseBlock {
                content: content.to_string(),
            })
            .collect()]]
    }

    #[test]
    fn test_prefers_markdown_result() {
        let payload = ParseResponse {
            json_result: blocks(&["ignored"]),
            markdown_result: Some("# Heading\n".to_string()),
        };
        assert_eq!(text_from_response(payload).as_deref(), Some("# Heading"));
    }

    #[test]
    fn test_falls_back_to_json_blocks() {
        let payload = ParseResponse {
            json_result: blocks(&["first", "second"]),
            markdown_result: Some("   ".to_string()),
        };
        assert_eq!(
            text_from_response(payload).as_deref(),
            Some("first\n\nsecond")
        );
    }

    #[test]
    fn test_empty_response() {
        let payload = ParseResponse {
            json_result: vec![],
            markdown_result: None,
        };
        assert_eq!(text_from_response(payload), None);
    }
}
