// src/ocr.rs

use crate::config::OcrConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use urlencoding::encode;

#[derive(Debug, Error)]
pub enum OcrError {
    /// The OCR service refused or failed the request.
    #[error("{message}")]
    Service {
        status: Option<u16>,
        message: String,
    },
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl OcrError {
    fn service(status: Option<StatusCode>, message: impl Into<String>) -> Self {
        OcrError::Service {
            status: status.map(|s| s.as_u16()),
            message: message.into(),
        }
    }
}

/// Turns a PDF into plain text.
#[async_trait]
pub trait OcrService {
    /// `pages` are 1-based; `None` means every page.
    async fn extract(&self, path: &Path, pages: Option<&[u32]>) -> Result<String, OcrError>;
}

/// Extra seconds on top of the processing timeout before the HTTP client gives up.
const CLIENT_TIMEOUT_MARGIN_SECS: u64 = 30;

/// Client for the LLMWhisperer `/whisper` endpoint.
pub struct WhispererClient {
    client: Client,
    api_key: String,
    settings: WhisperSettings,
}

#[derive(Debug, Clone)]
struct WhisperSettings {
    base_url: String,
    processing_mode: String,
    output_mode: String,
    page_separator: String,
    force_text_processing: bool,
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    message: Option<String>,
}

impl WhispererClient {
    pub fn new(cfg: &OcrConfig, api_key: impl Into<String>) -> Result<Self, OcrError> {
        let client = Client::builder()
            .timeout(client_timeout(cfg.timeout_secs))
            .build()
            .map_err(|e| OcrError::service(None, format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            settings: WhisperSettings::from_config(cfg),
        })
    }
}

impl WhisperSettings {
    fn from_config(cfg: &OcrConfig) -> Self {
        Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            processing_mode: cfg.processing_mode.clone(),
            output_mode: cfg.output_mode.clone(),
            page_separator: cfg.page_separator.clone(),
            force_text_processing: cfg.force_text_processing,
            timeout_secs: cfg.timeout_secs,
        }
    }

    fn whisper_url(&self, pages: Option<&[u32]>) -> String {
        // The service spells this parameter "page_seperator".
        let mut params = vec![
            ("processing_mode", self.processing_mode.clone()),
            ("output_mode", self.output_mode.clone()),
            ("page_seperator", self.page_separator.clone()),
            (
                "force_text_processing",
                self.force_text_processing.to_string(),
            ),
            ("timeout", self.timeout_secs.to_string()),
        ];
        if let Some(pages) = pages.filter(|p| !p.is_empty()) {
            params.push(("pages_to_extract", join_pages(pages)));
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={}", encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}/whisper?{query}", self.base_url)
    }
}

fn client_timeout(processing_secs: u64) -> Duration {
    Duration::from_secs(processing_secs.saturating_add(CLIENT_TIMEOUT_MARGIN_SECS))
}

fn join_pages(pages: &[u32]) -> String {
    pages
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Best human-readable message from a failed response body.
fn service_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<ServiceErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.trim().to_string());
    if detail.is_empty() {
        format!("OCR service returned {status}")
    } else {
        detail
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[async_trait]
impl OcrService for WhispererClient {
    async fn extract(&self, path: &Path, pages: Option<&[u32]>) -> Result<String, OcrError> {
        let pdf_bytes = tokio::fs::read(path).await.map_err(|source| OcrError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let url = self.settings.whisper_url(pages);
        info!(
            path = %path.display(),
            bytes = pdf_bytes.len(),
            sha256 = %sha256_hex(&pdf_bytes),
            pages = ?pages,
            mode = %self.settings.processing_mode,
            "Submitting document to OCR service"
        );

        let response = self
            .client
            .post(&url)
            .header("unstract-key", &self.api_key)
            .header("Content-Type", "application/octet-stream")
            .body(pdf_bytes)
            .send()
            .await
            .map_err(|e| OcrError::service(e.status(), format!("OCR request failed: {e}")))?;

        let status = response.status();
        let whisper_hash = response
            .headers()
            .get("whisper-hash")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match status {
            StatusCode::OK => {
                let text = response.text().await.map_err(|e| {
                    OcrError::service(Some(status), format!("failed to read OCR response: {e}"))
                })?;
                info!(
                    chars = text.len(),
                    whisper_hash = whisper_hash.as_deref().unwrap_or("-"),
                    "Text extracted"
                );
                Ok(text)
            }
            StatusCode::ACCEPTED => {
                warn!(whisper_hash = ?whisper_hash, "OCR job went async");
                Err(OcrError::service(
                    Some(status),
                    format!(
                        "OCR service is still processing the document (whisper hash {}); \
                         no text was returned within {}s",
                        whisper_hash.as_deref().unwrap_or("unknown"),
                        self.settings.timeout_secs
                    ),
                ))
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(OcrError::service(Some(status), service_message(status, &body)))
            }
        }
    }
}
