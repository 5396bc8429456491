pub mod arxiv;
pub mod pubmed;
pub mod semantic_scholar;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of bibliographic sources the engine queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Source {
    SemanticScholar,
    ArXiv,
    PubMed,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::SemanticScholar, Source::ArXiv, Source::PubMed];

    pub fn name(&self) -> &'static str {
        match self {
            Source::SemanticScholar => "semantic_scholar",
            Source::ArXiv => "arxiv",
            Source::PubMed => "pubmed",
        }
    }

    /// Preference rank used when picking a cluster representative.
    /// Lower wins: Semantic Scholar, then arXiv, then PubMed.
    pub fn preference(&self) -> u8 {
        match self {
            Source::SemanticScholar => 0,
            Source::ArXiv => 1,
            Source::PubMed => 2,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "semantic_scholar" | "semanticscholar" | "s2" => Ok(Source::SemanticScholar),
            "arxiv" => Ok(Source::ArXiv),
            "pubmed" => Ok(Source::PubMed),
            other => Err(format!("unknown source: {}", other)),
        }
    }
}

/// Canonical candidate shape every adapter normalizes into.
///
/// `external_id` is unique within its source only. Fields the upstream
/// does not provide stay `None`; adapters never invent values for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub source: Source,
    pub external_id: String,
    pub title: String,
    pub abstract_text: Option<String>,
    pub year: Option<i32>,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("API error: {0}")]
    Api(String),
}

#[async_trait]
pub trait PaperSource: Send + Sync {
    fn source(&self) -> Source;

    /// Fetch up to `limit` candidates matching `query`, restricted to the
    /// inclusive `[year_from, year_to]` window when bounds are given. The
    /// upstream may return fewer than `limit`.
    async fn search(
        &self,
        query: &str,
        limit: u32,
        year_from: Option<i32>,
        year_to: Option<i32>,
    ) -> Result<Vec<CandidateRecord>, SourceError>;
}

/// Inclusive year-window check. A record with no year is kept only when
/// no bound is set: with a window active its membership cannot be shown.
pub(crate) fn within_years(year: Option<i32>, from: Option<i32>, to: Option<i32>) -> bool {
    if from.is_none() && to.is_none() {
        return true;
    }
    match year {
        Some(y) => from.map_or(true, |f| y >= f) && to.map_or(true, |t| y <= t),
        None => false,
    }
}
