//! Inbound HTTP boundary.
//!
//! Exposes `POST /analyze`: a synchronous parse-and-classify over a
//! `text/plain` body that short-circuits persistence and the LLM. The
//! wider CRUD surface (repositories, runs, dashboards) lives in a separate
//! service; this endpoint exists so operators can analyze a pasted log
//! without queueing a job.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use serde::Serialize;

use crate::analyze::analyze_text;
use crate::config::PipelineConfig;
use crate::core::{DetectedError, LogStep};

/// Response body for `POST /analyze`.
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    /// Errors extracted by the pattern catalogue.
    #[serde(rename = "detectedErrors")]
    pub detected_errors: Vec<DetectedError>,
    /// Detected step layout.
    pub steps: Vec<LogStep>,
    /// What went wrong.
    #[serde(rename = "rootCause")]
    pub root_cause: String,
    /// Which stage failed.
    #[serde(rename = "failureStage")]
    pub failure_stage: String,
    /// Suggested remediation.
    #[serde(rename = "suggestedFix")]
    pub suggested_fix: String,
}

/// Handles `POST /analyze`.
async fn analyze_handler(
    State(config): State<Arc<PipelineConfig>>,
    body: String,
) -> Result<Json<AnalyzeResponse>, (StatusCode, String)> {
    match analyze_text(&body, &config) {
        Ok(result) => Ok(Json(AnalyzeResponse {
            detected_errors: result.detected_errors,
            steps: result.steps,
            root_cause: result.root_cause,
            failure_stage: result.failure_stage,
            suggested_fix: result.suggested_fix,
        })),
        Err(e) => Err((StatusCode::BAD_REQUEST, e.to_string())),
    }
}

/// Builds the router for the boundary endpoint.
#[must_use]
pub fn router(config: PipelineConfig) -> axum::Router {
    axum::Router::new()
        .route("/analyze", post(analyze_handler))
        .with_state(Arc::new(config))
}

/// Serves the boundary endpoint until `ctrl_c`.
///
/// # Errors
///
/// Returns an error if the listener fails to bind or the server errors.
pub async fn serve(host: &str, port: u16, config: PipelineConfig) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "analyze endpoint listening");

    axum::serve(listener, router(config))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
