// src/analysis_client.rs
//
// Remote person-detection collaborator. The scheduler hands it a frame and
// gets back a detection verdict or a classified failure; retry and cadence
// decisions stay on the scheduler side so this client remains substitutable
// for a deterministic fake in tests.

use crate::types::Frame;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Successful remote analysis of one frame.
#[derive(Debug, Clone)]
pub struct Detection {
    pub person_detected: bool,
    /// Model confidence, 0-100.
    pub confidence: f32,
    pub description: String,
}

/// Classified remote-call failure. Anything the transport or server does
/// that is not an explicit rate limit collapses into `Other`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisFailure {
    #[error("analysis quota exceeded")]
    QuotaExceeded,
    #[error("analysis failed: {0}")]
    Other(String),
}

#[async_trait::async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Detection, AnalysisFailure>;
}

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct DetectionRequest {
    /// Unique request ID for correlation
    event_id: String,
    captured_at_ms: u64,
    width: usize,
    height: usize,
    /// Base64-encoded JPEG
    image_base64: String,
}

#[derive(Debug, Deserialize)]
struct DetectionResponse {
    person_detected: bool,
    confidence: f32,
    #[serde(default)]
    description: String,
}

// ============================================================================
// HTTP CLIENT
// ============================================================================

pub struct HttpAnalysisClient {
    http_client: reqwest::Client,
    server_url: String,
}

impl HttpAnalysisClient {
    pub fn new(server_url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            server_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    fn build_request(frame: &Frame) -> Result<DetectionRequest, AnalysisFailure> {
        let jpeg = encode_rgb_to_jpeg(&frame.data, frame.width, frame.height)
            .ok_or_else(|| AnalysisFailure::Other("JPEG encoding failed".to_string()))?;

        Ok(DetectionRequest {
            event_id: uuid::Uuid::new_v4().to_string(),
            captured_at_ms: frame.timestamp_ms,
            width: frame.width,
            height: frame.height,
            image_base64: base64::engine::general_purpose::STANDARD.encode(&jpeg),
        })
    }
}

#[async_trait::async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn detect(&self, frame: &Frame) -> Result<Detection, AnalysisFailure> {
        let request = Self::build_request(frame)?;
        let url = format!("{}/api/detect", self.server_url);

        debug!(
            "Sending detection request {} ({}x{}) to {}",
            request.event_id, request.width, request.height, url
        );

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisFailure::Other(format!("connection error: {}", e)))?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("Detection server rate-limited request {}", request.event_id);
            return Err(AnalysisFailure::QuotaExceeded);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Detection server error {}: {}", status, body);
            return Err(AnalysisFailure::Other(format!("HTTP {}: {}", status, body)));
        }

        let parsed = response
            .json::<DetectionResponse>()
            .await
            .map_err(|e| AnalysisFailure::Other(format!("parse error: {}", e)))?;

        info!(
            "Detection response: person={}, confidence={:.0}",
            parsed.person_detected, parsed.confidence
        );

        Ok(Detection {
            person_detected: parsed.person_detected,
            confidence: parsed.confidence,
            description: parsed.description,
        })
    }
}

// ============================================================================
// JPEG ENCODING HELPER
// ============================================================================

/// Encode raw RGB bytes into a JPEG. Returns None on failure.
fn encode_rgb_to_jpeg(rgb_data: &[u8], width: usize, height: usize) -> Option<Vec<u8>> {
    use image::{ImageBuffer, RgbImage};

    let img: RgbImage = ImageBuffer::from_raw(width as u32, height as u32, rgb_data.to_vec())?;

    let mut buf = std::io::Cursor::new(Vec::new());
    // Quality 80 is a good balance of size/quality for network transfer
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 80);
    img.write_with_encoder(encoder).ok()?;

    Some(buf.into_inner())
}
