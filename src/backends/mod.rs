//! Recognition backends.
//!
//! Each backend turns one page image into Markdown text. The pipeline only
//! ever sees `dyn RecognitionBackend`, so backends are interchangeable and
//! selected once at startup from the configuration.

use std::{error, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    config::{AppConfig, BackendKind},
    prelude::*,
};

pub mod glmocr;
pub mod ollama;

/// An error which occurred while recognizing a page.
///
/// These are deliberately typed: the pipeline reports them per page, and the
/// distinction matters to operators (a `Timeout` on every page points at the
/// model; `Unreachable` points at the network).
#[derive(Debug)]
pub enum RecognitionError {
    /// The backend answered with a non-success status.
    RequestFailed {
        /// The HTTP status code returned by the backend.
        status: u16,
        /// The response body, for diagnostics.
        body: String,
    },

    /// The request exceeded the configured per-page timeout.
    Timeout(Duration),

    /// The backend answered successfully, but with no recognized text.
    EmptyResult,

    /// The backend could not be reached at all.
    Unreachable {
        /// The backend host we tried to reach.
        host: String,
        /// The underlying transport error.
        source: reqwest::Error,
    },
}

impl RecognitionError {
    /// Classify a [`reqwest::Error`] from an in-flight request.
    fn from_transport(err: reqwest::Error, host: &str, timeout: Duration) -> Self {
        if err.is_timeout() {
            RecognitionError::Timeout(timeout)
        } else {
            RecognitionError::Unreachable {
                host: host.to_owned(),
                source: err,
            }
        }
    }
}

impl fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionError::RequestFailed { status, body } => {
                write!(f, "OCR request failed ({status}): {body}")
            }
            RecognitionError::Timeout(timeout) => {
                write!(f, "OCR request timed out after {}ms", timeout.as_millis())
            }
            RecognitionError::EmptyResult => {
                write!(f, "Empty OCR result returned by backend")
            }
            RecognitionError::Unreachable { host, .. } => {
                write!(f, "Failed to reach OCR backend at {host}")
            }
        }
    }
}

impl error::Error for RecognitionError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            RecognitionError::Unreachable { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Interface to a recognition backend.
#[async_trait]
pub trait RecognitionBackend: Send + Sync + 'static {
    /// Recognize the text on a single page image, returning Markdown.
    ///
    /// Backend failures are reported as [`RecognitionError`] values inside
    /// the [`anyhow::Error`], and can be recovered with
    /// [`anyhow::Error::downcast_ref`] where the distinction matters.
    async fn recognize(&self, image_path: &Path) -> Result<String>;

    /// Is the backend reachable, and is our configured model available on it?
    ///
    /// Used by the health probe. The second value is meaningless if the
    /// first is `false`.
    async fn probe(&self) -> (bool, bool);
}

/// Instantiate the backend selected by our configuration.
pub fn backend_for_config(config: &AppConfig) -> Result<Arc<dyn RecognitionBackend>> {
    // One shared client per process. reqwest pools connections internally.
    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    match config.backend {
        BackendKind::Ollama => Ok(Arc::new(ollama::OllamaBackend::new(client, config))),
        BackendKind::GlmOcr => Ok(Arc::new(glmocr::GlmOcrBackend::new(client, config))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RecognitionError::RequestFailed {
            status: 500,
            body: "model not loaded".to_string(),
        };
        assert_eq!(err.to_string(), "OCR request failed (500): model not loaded");

        let err = RecognitionError::Timeout(Duration::from_secs(120));
        assert_eq!(err.to_string(), "OCR request timed out after 120000ms");

        assert_eq!(
            RecognitionError::EmptyResult.to_string(),
            "Empty OCR result returned by backend"
        );
    }
}
