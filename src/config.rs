use serde::Deserialize;
use std::{fs, path::Path};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = ".config/loan_extract.toml";
pub const DEFAULT_DOCUMENT_PATH: &str = "assets/docs/Scanned Loan Application.pdf";

pub const WHISPERER_API_KEY_ENV: &str = "LLMWHISPERER_API_KEY";
pub const WHISPERER_BASE_URL_ENV: &str = "LLMWHISPERER_BASE_URL";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("{0} env var is required")]
    MissingEnv(&'static str),
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub document: DocumentConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            document: DocumentConfig::default(),
            ocr: OcrConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DocumentConfig {
    #[serde(default = "default_document_path")]
    pub path: String,
    /// 1-based page numbers; absent means every page.
    #[serde(default)]
    pub pages: Option<Vec<u32>>,
}

fn default_document_path() -> String {
    DEFAULT_DOCUMENT_PATH.to_string()
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            path: default_document_path(),
            pages: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_base_url")]
    pub base_url: String,
    #[serde(default = "default_processing_mode")]
    pub processing_mode: String,
    #[serde(default = "default_output_mode")]
    pub output_mode: String,
    #[serde(default = "default_page_separator")]
    pub page_separator: String,
    #[serde(default)]
    pub force_text_processing: bool,
    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,
}

fn default_ocr_base_url() -> String {
    "https://llmwhisperer-api.unstract.com/v1".to_string()
}

fn default_processing_mode() -> String {
    "ocr".to_string()
}

fn default_output_mode() -> String {
    "line-printer".to_string()
}

fn default_page_separator() -> String {
    "<<<".to_string()
}

fn default_ocr_timeout() -> u64 {
    200
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            base_url: default_ocr_base_url(),
            processing_mode: default_processing_mode(),
            output_mode: default_output_mode(),
            page_separator: default_page_separator(),
            force_text_processing: false,
            timeout_secs: default_ocr_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Base URLs set in the environment win over the file.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(WHISPERER_BASE_URL_ENV) {
            self.ocr.base_url = url;
        }
        if let Some(url) = lookup(OPENAI_BASE_URL_ENV) {
            self.llm.base_url = url;
        }
    }
}

/// API keys for the two remote services. Never logged.
pub struct Credentials {
    pub whisperer_api_key: String,
    pub openai_api_key: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let whisperer_api_key = lookup(WHISPERER_API_KEY_ENV)
            .ok_or(ConfigError::MissingEnv(WHISPERER_API_KEY_ENV))?;
        let openai_api_key =
            lookup(OPENAI_API_KEY_ENV).ok_or(ConfigError::MissingEnv(OPENAI_API_KEY_ENV))?;
        Ok(Self {
            whisperer_api_key,
            openai_api_key,
        })
    }
}

pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn parses_sample_config() {
        let raw = include_str!("../.config/loan_extract.toml");
        let cfg: Config = toml::from_str(raw).expect("parse TOML");
        assert_eq!(cfg.document.path, DEFAULT_DOCUMENT_PATH);
        assert!(cfg.document.pages.is_none());
        assert_eq!(cfg.ocr.processing_mode, "ocr");
        assert_eq!(cfg.ocr.timeout_secs, 200);
        assert_eq!(cfg.llm.model, "gpt-3.5-turbo");
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let cfg: Config = toml::from_str("[document]\npages = [1, 3]\n").unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.document.path, DEFAULT_DOCUMENT_PATH);
        assert_eq!(cfg.document.pages, Some(vec![1, 3]));
        assert_eq!(cfg.ocr.output_mode, "line-printer");
        assert_eq!(cfg.ocr.page_separator, "<<<");
        assert_eq!(cfg.llm.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.ocr.base_url, "https://llmwhisperer-api.unstract.com/v1");
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[ocr\nbase_url = 1").unwrap();
        let err = Config::load_or_default(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_base_urls_override_file() {
        let mut cfg: Config = toml::from_str("[llm]\nbase_url = \"http://file\"\n").unwrap();
        cfg.apply_env_overrides(lookup_from(&[
            (OPENAI_BASE_URL_ENV, "http://env-llm"),
            (WHISPERER_BASE_URL_ENV, "http://env-ocr"),
        ]));
        assert_eq!(cfg.llm.base_url, "http://env-llm");
        assert_eq!(cfg.ocr.base_url, "http://env-ocr");
    }

    #[test]
    fn credentials_require_both_keys() {
        let err = Credentials::from_lookup(lookup_from(&[(WHISPERER_API_KEY_ENV, "w")]))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::MissingEnv(OPENAI_API_KEY_ENV)));

        let creds = Credentials::from_lookup(lookup_from(&[
            (WHISPERER_API_KEY_ENV, "w"),
            (OPENAI_API_KEY_ENV, "o"),
        ]))
        .unwrap();
        assert_eq!(creds.whisperer_api_key, "w");
        assert_eq!(creds.openai_api_key, "o");
    }
}
