//! Server configuration.
//!
//! All options can be set either on the command line or through the
//! environment (including a `.env` file). The parsed [`AppConfig`] is
//! immutable and passed by reference into every component that needs it;
//! nothing in the pipeline reads the environment at runtime.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::prelude::*;

/// Stream OCR results for batches of uploaded images and PDFs.
#[derive(Clone, Debug, Parser)]
#[clap(version, after_help = r#"
Environment Variables:
  All options above may also be set via their environment variables,
  including from a standard `.env` file.
"#)]
pub struct AppConfig {
    /// The port to listen on.
    #[clap(long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Base URL of the recognition backend.
    #[clap(long, env = "OCR_BACKEND_HOST", default_value = "http://localhost:11434")]
    pub backend_host: String,

    /// Which recognition backend to talk to.
    #[clap(long, value_enum, env = "OCR_BACKEND", default_value_t = BackendKind::default())]
    pub backend: BackendKind,

    /// The model identifier to request from the backend.
    #[clap(long, env = "OCR_MODEL", default_value = "glm-ocr")]
    pub model: String,

    /// The DPI to use when rasterizing PDF pages.
    #[clap(long, env = "PDF_DPI", default_value = "300")]
    pub pdf_dpi: u32,

    /// Per-page recognition timeout, in seconds.
    #[clap(long, env = "OCR_TIMEOUT", default_value = "120")]
    pub ocr_timeout_secs: u64,

    /// Maximum size of a single uploaded file, in MiB.
    #[clap(long = "max-file-size", env = "MAX_FILE_SIZE", default_value = "50")]
    pub max_file_size_mib: u64,

    /// The context window to request from chat-style backends.
    #[clap(long, env = "NUM_CTX", default_value = "16384")]
    pub num_ctx: u32,
}

/// The recognition backends we support.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum BackendKind {
    /// A chat-style multimodal model endpoint (Ollama `/api/chat`).
    #[default]
    Ollama,

    /// A dedicated document-parsing sidecar (`/glmocr/parse`).
    #[clap(name = "glmocr")]
    GlmOcr,
}

impl AppConfig {
    /// The per-page recognition timeout as a [`Duration`].
    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout_secs)
    }

    /// The maximum upload size, in bytes.
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mib * 1024 * 1024
    }

    /// The backend host with any trailing slash removed.
    pub fn normalized_backend_host(&self) -> &str {
        self.backend_host.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parse a config from command-line arguments only, ignoring the
    /// environment of the test runner.
    fn parse(args: &[&str]) -> AppConfig {
        AppConfig::try_parse_from(std::iter::once("ocrstream").chain(args.iter().copied()))
            .expect("failed to parse test arguments")
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.backend, BackendKind::Ollama);
        assert_eq!(config.model, "glm-ocr");
        assert_eq!(config.pdf_dpi, 300);
        assert_eq!(config.ocr_timeout(), Duration::from_secs(120));
        assert_eq!(config.max_file_size_bytes(), 50 * 1024 * 1024);
        assert_eq!(config.num_ctx, 16384);
    }

    #[test]
    fn test_host_normalization() {
        let config = parse(&["--backend-host", "http://ocr.internal:11434/"]);
        assert_eq!(config.normalized_backend_host(), "http://ocr.internal:11434");
    }

    #[test]
    fn test_backend_selection() {
        let config = parse(&["--backend", "glmocr"]);
        assert_eq!(config.backend, BackendKind::GlmOcr);
    }
}
