use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::apis::{self, PaperSource, Source};
use crate::embed::TextEncoder;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub semantic_scholar_api_key: Option<String>,
    pub ncbi_api_key: Option<String>,
    pub fetch_timeout: Duration,
    pub per_source_limit: u32,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub embed_cache_cap: usize,
    /// Encoder model identity; configuration, not logic.
    pub encoder_model: String,
    pub model_dir: PathBuf,
    pub enabled_source_names: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let semantic_scholar_api_key = std::env::var("SEMANTIC_SCHOLAR_API_KEY").ok();
        let ncbi_api_key = std::env::var("NCBI_API_KEY").ok();

        let fetch_timeout = std::env::var("PAPER_MATCH_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(10));

        let per_source_limit = std::env::var("PAPER_MATCH_LIMIT")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(20);

        let year_from = std::env::var("PAPER_MATCH_YEAR_FROM")
            .ok()
            .and_then(|v| v.parse::<i32>().ok());
        let year_to = std::env::var("PAPER_MATCH_YEAR_TO")
            .ok()
            .and_then(|v| v.parse::<i32>().ok());

        let embed_cache_cap = std::env::var("PAPER_MATCH_CACHE_CAP")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(4096);

        let encoder_model = std::env::var("PAPER_MATCH_MODEL")
            .unwrap_or_else(|_| "sentence-transformers/all-MiniLM-L6-v2".to_string());

        let model_dir = std::env::var("PAPER_MATCH_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| dirs_or_default().join(".paper-match"));

        let enabled_source_names = std::env::var("PAPER_MATCH_SOURCES")
            .map(|s| s.split(',').map(|s| s.trim().to_lowercase()).collect())
            .unwrap_or_default();

        Self {
            semantic_scholar_api_key,
            ncbi_api_key,
            fetch_timeout,
            per_source_limit,
            year_from,
            year_to,
            embed_cache_cap,
            encoder_model,
            model_dir,
            enabled_source_names,
        }
    }

    /// Build one adapter per enabled source.
    pub fn build_sources(&self) -> Vec<Arc<dyn PaperSource>> {
        let filter = &self.enabled_source_names;
        let filter_active = !filter.is_empty();
        let should_enable =
            |source: Source| -> bool { !filter_active || filter.contains(&source.name().to_string()) };

        let mut sources: Vec<Arc<dyn PaperSource>> = Vec::new();
        if should_enable(Source::SemanticScholar) {
            sources.push(Arc::new(apis::semantic_scholar::SemanticScholarClient::new(
                self.semantic_scholar_api_key.clone(),
            )));
        }
        if should_enable(Source::ArXiv) {
            sources.push(Arc::new(apis::arxiv::ArxivClient::new()));
        }
        if should_enable(Source::PubMed) {
            sources.push(Arc::new(apis::pubmed::PubMedClient::new(
                self.ncbi_api_key.clone(),
            )));
        }
        sources
    }

    /// The source set a request built from this config may query.
    pub fn enabled_sources(&self) -> BTreeSet<Source> {
        if self.enabled_source_names.is_empty() {
            return Source::ALL.into_iter().collect();
        }
        self.enabled_source_names
            .iter()
            .filter_map(|name| match name.parse::<Source>() {
                Ok(source) => Some(source),
                Err(e) => {
                    tracing::warn!("ignoring PAPER_MATCH_SOURCES entry: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Build the text encoder. With the `onnx` feature this loads the
    /// configured model; otherwise the deterministic hash encoder is used.
    #[cfg(feature = "onnx")]
    pub fn build_encoder(&self) -> anyhow::Result<Arc<dyn TextEncoder>> {
        use crate::embed::minilm::MiniLmEncoder;
        let encoder = MiniLmEncoder::new(&self.model_dir, &self.encoder_model)?;
        tracing::info!(model = %self.encoder_model, dir = %self.model_dir.display(), "loaded ONNX encoder");
        Ok(Arc::new(encoder))
    }

    #[cfg(not(feature = "onnx"))]
    pub fn build_encoder(&self) -> anyhow::Result<Arc<dyn TextEncoder>> {
        use crate::embed::HashEncoder;
        tracing::info!(
            model = %self.encoder_model,
            dir = %self.model_dir.display(),
            "onnx feature disabled, using deterministic hash encoder"
        );
        Ok(Arc::new(HashEncoder::new()))
    }

    /// Return a list of source status descriptions.
    pub fn source_status(&self) -> Vec<SourceStatus> {
        let mut statuses = vec![
            SourceStatus {
                name: Source::SemanticScholar.name().into(),
                enabled: true,
                note: if self.semantic_scholar_api_key.is_some() {
                    "API key set".into()
                } else {
                    "No API key (rate limited)".into()
                },
            },
            SourceStatus {
                name: Source::ArXiv.name().into(),
                enabled: true,
                note: "No API key required".into(),
            },
            SourceStatus {
                name: Source::PubMed.name().into(),
                enabled: true,
                note: if self.ncbi_api_key.is_some() {
                    "API key set".into()
                } else {
                    "No API key (limited rate)".into()
                },
            },
        ];

        if !self.enabled_source_names.is_empty() {
            for s in &mut statuses {
                if !self.enabled_source_names.contains(&s.name) {
                    s.enabled = false;
                    s.note = "Disabled by PAPER_MATCH_SOURCES filter".into();
                }
            }
        }

        statuses
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub enabled: bool,
    pub note: String,
}

fn dirs_or_default() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
