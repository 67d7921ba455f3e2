//! The health probe.

use tokio::process::Command;

use crate::{backends::RecognitionBackend, config::AppConfig, prelude::*};

/// What `/api/health` reports.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// The server itself is up. Always true if we got far enough to answer.
    pub app: bool,

    /// Poppler's `pdftoppm` is installed and runnable.
    pub poppler: bool,

    /// The recognition backend answered our probe.
    pub backend: bool,

    /// The configured model identifier.
    pub model: String,

    /// The configured model is currently available on the backend.
    pub model_ready: bool,

    /// The configured backend host, for operator convenience.
    pub backend_host: String,
}

/// Probe the rasterizer and the recognition backend concurrently.
pub async fn build_health_status(
    config: &AppConfig,
    backend: &dyn RecognitionBackend,
) -> HealthStatus {
    let (poppler, (reachable, model_ready)) =
        tokio::join!(check_poppler(), backend.probe());
    HealthStatus {
        app: true,
        poppler,
        backend: reachable,
        model: config.model.clone(),
        model_ready,
        backend_host: config.backend_host.clone(),
    }
}

/// Can we run `pdftoppm` at all?
async fn check_poppler() -> bool {
    Command::new("pdftoppm")
        .arg("-v")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
