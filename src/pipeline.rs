use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;

use crate::apis::{CandidateRecord, PaperSource, Source};
use crate::dedup::{self, MergedResult};
use crate::embed::{candidate_text, EncodeError, EncoderGateway};
use crate::rank::{self, ScoredCandidate};

/// One retrieval request as handed over by the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub text: String,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub per_source_limit: u32,
    pub sources_enabled: BTreeSet<Source>,
}

impl SearchRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            year_from: None,
            year_to: None,
            per_source_limit: 20,
            sources_enabled: Source::ALL.into_iter().collect(),
        }
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.text.trim().is_empty() {
            return Err(PipelineError::InvalidQuery("query text is empty".into()));
        }
        if self.per_source_limit == 0 {
            return Err(PipelineError::InvalidQuery(
                "per_source_limit must be positive".into(),
            ));
        }
        if let (Some(from), Some(to)) = (self.year_from, self.year_to) {
            if from > to {
                return Err(PipelineError::InvalidQuery(format!(
                    "year_from {} exceeds year_to {}",
                    from, to
                )));
            }
        }
        Ok(())
    }
}

/// A source that could not contribute to an otherwise successful request.
#[derive(Debug, Clone, Serialize)]
pub struct SourceWarning {
    pub source: Source,
    pub cause: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub merged_results: Vec<MergedResult>,
    /// Ordered results per healthy source; failed sources are absent here
    /// and listed in `warnings` instead.
    pub per_source_results: BTreeMap<Source, Vec<ScoredCandidate>>,
    pub warnings: Vec<SourceWarning>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("encoding unavailable: {0}")]
    EncodingUnavailable(#[from] EncodeError),
}

/// Stages a request passes through, surfaced in the logs. Source failures
/// during `Fetching` degrade the response; only `Encoding` can abort it.
#[derive(Debug, Clone, Copy)]
enum Stage {
    Fetching,
    Encoding,
    Ranking,
    Deduplicating,
    Done,
}

pub struct Pipeline {
    sources: Vec<Arc<dyn PaperSource>>,
    encoder: Arc<EncoderGateway>,
    fetch_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        sources: Vec<Arc<dyn PaperSource>>,
        encoder: Arc<EncoderGateway>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            sources,
            encoder,
            fetch_timeout,
        }
    }

    pub async fn run(&self, request: &SearchRequest) -> Result<SearchResponse, PipelineError> {
        request.validate()?;

        tracing::debug!(stage = ?Stage::Fetching, query = %request.text);
        let active: Vec<Arc<dyn PaperSource>> = self
            .sources
            .iter()
            .filter(|s| request.sources_enabled.contains(&s.source()))
            .map(Arc::clone)
            .collect();

        let handles: Vec<_> = active
            .iter()
            .map(|source| {
                let source = Arc::clone(source);
                let query = request.text.clone();
                let limit = request.per_source_limit;
                let (from, to) = (request.year_from, request.year_to);
                let fetch_timeout = self.fetch_timeout;
                tokio::spawn(async move {
                    timeout(fetch_timeout, source.search(&query, limit, from, to)).await
                })
            })
            .collect();

        // Barrier join: every source either delivers or degrades to a
        // warning; one slow or broken source never blocks the rest.
        let mut fetched: Vec<(Source, Vec<CandidateRecord>)> = Vec::new();
        let mut warnings: Vec<SourceWarning> = Vec::new();
        let outcomes = join_all(handles).await;
        for (source, outcome) in active.iter().map(|s| s.source()).zip(outcomes) {
            match outcome {
                Ok(Ok(Ok(records))) => {
                    tracing::debug!(%source, count = records.len(), "source returned");
                    fetched.push((source, records));
                }
                Ok(Ok(Err(e))) => {
                    tracing::warn!(%source, error = %e, "source unavailable");
                    warnings.push(SourceWarning {
                        source,
                        cause: e.to_string(),
                    });
                }
                Ok(Err(_elapsed)) => {
                    tracing::warn!(%source, timeout = ?self.fetch_timeout, "source timed out");
                    warnings.push(SourceWarning {
                        source,
                        cause: "timeout".to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(%source, error = %e, "source task failed");
                    warnings.push(SourceWarning {
                        source,
                        cause: format!("task failed: {}", e),
                    });
                }
            }
        }

        tracing::debug!(stage = ?Stage::Encoding);
        let query_vector = self.encoder.embed(&request.text).map_err(|e| {
            tracing::error!(stage = ?Stage::Encoding, error = %e, "request failed");
            e
        })?;
        let texts: Vec<String> = fetched
            .iter()
            .flat_map(|(_, records)| {
                records
                    .iter()
                    .map(|r| candidate_text(&r.title, r.abstract_text.as_deref()))
            })
            .collect();
        let vectors = self.encoder.embed_batch(&texts).map_err(|e| {
            tracing::error!(stage = ?Stage::Encoding, error = %e, "request failed");
            e
        })?;

        tracing::debug!(stage = ?Stage::Ranking);
        let mut vectors = vectors.into_iter();
        let mut per_source_results: BTreeMap<Source, Vec<ScoredCandidate>> = BTreeMap::new();
        for (source, records) in fetched {
            // The batch was built source by source in this same order, so
            // zipping restores each record's vector.
            let paired: Vec<(CandidateRecord, Arc<Vec<f32>>)> =
                records.into_iter().zip(vectors.by_ref()).collect();
            let ranked = rank::rank_candidates(
                &query_vector,
                paired,
                request.per_source_limit as usize,
            );
            per_source_results.insert(source, ranked);
        }

        tracing::debug!(stage = ?Stage::Deduplicating);
        let merged_results = dedup::merge(&per_source_results);

        tracing::debug!(
            stage = ?Stage::Done,
            merged = merged_results.len(),
            degraded_sources = warnings.len()
        );
        Ok(SearchResponse {
            merged_results,
            per_source_results,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::{within_years, SourceError};
    use crate::embed::{HashEncoder, TextEncoder};
    use async_trait::async_trait;

    struct StubSource {
        source: Source,
        records: Vec<CandidateRecord>,
        fail: bool,
        delay: Option<Duration>,
    }

    impl StubSource {
        fn healthy(source: Source, records: Vec<CandidateRecord>) -> Arc<Self> {
            Arc::new(Self {
                source,
                records,
                fail: false,
                delay: None,
            })
        }

        fn failing(source: Source) -> Arc<Self> {
            Arc::new(Self {
                source,
                records: Vec::new(),
                fail: true,
                delay: None,
            })
        }

        fn slow(source: Source, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                source,
                records: Vec::new(),
                fail: false,
                delay: Some(delay),
            })
        }
    }

    #[async_trait]
    impl PaperSource for StubSource {
        fn source(&self) -> Source {
            self.source
        }

        async fn search(
            &self,
            _query: &str,
            _limit: u32,
            year_from: Option<i32>,
            year_to: Option<i32>,
        ) -> Result<Vec<CandidateRecord>, SourceError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(SourceError::Api("upstream exploded".to_string()));
            }
            Ok(self
                .records
                .iter()
                .filter(|r| within_years(r.year, year_from, year_to))
                .cloned()
                .collect())
        }
    }

    struct FailingEncoder;

    impl TextEncoder for FailingEncoder {
        fn encode(&self, _text: &str) -> Result<Vec<f32>, EncodeError> {
            Err(EncodeError("model not loaded".to_string()))
        }
    }

    fn record(source: Source, id: &str, title: &str, year: Option<i32>) -> CandidateRecord {
        CandidateRecord {
            source,
            external_id: id.to_string(),
            title: title.to_string(),
            abstract_text: Some(format!("Abstract of {}.", title)),
            year,
            url: format!("https://example.org/{}", id),
        }
    }

    fn pipeline(sources: Vec<Arc<dyn PaperSource>>, fetch_timeout: Duration) -> Pipeline {
        Pipeline::new(
            sources,
            Arc::new(EncoderGateway::new(Arc::new(HashEncoder::new()), 1024)),
            fetch_timeout,
        )
    }

    fn second() -> Duration {
        Duration::from_secs(1)
    }

    #[tokio::test]
    async fn test_rejects_invalid_queries() {
        let p = pipeline(vec![], second());

        let empty = SearchRequest::new("   ");
        assert!(matches!(
            p.run(&empty).await,
            Err(PipelineError::InvalidQuery(_))
        ));

        let mut zero_limit = SearchRequest::new("quantum dots");
        zero_limit.per_source_limit = 0;
        assert!(matches!(
            p.run(&zero_limit).await,
            Err(PipelineError::InvalidQuery(_))
        ));

        let mut inverted = SearchRequest::new("quantum dots");
        inverted.year_from = Some(2022);
        inverted.year_to = Some(2020);
        assert!(matches!(
            p.run(&inverted).await,
            Err(PipelineError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_degrades_on_source_failure_and_timeout() {
        let p = pipeline(
            vec![
                StubSource::healthy(
                    Source::SemanticScholar,
                    vec![record(Source::SemanticScholar, "s1", "Graph Neural Networks", Some(2021))],
                ),
                StubSource::healthy(
                    Source::ArXiv,
                    vec![record(Source::ArXiv, "a1", "Molecules And Models", Some(2020))],
                ),
                StubSource::slow(Source::PubMed, Duration::from_millis(500)),
            ],
            Duration::from_millis(50),
        );

        let resp = p
            .run(&SearchRequest::new("graph neural networks for drug discovery"))
            .await
            .unwrap();

        assert_eq!(resp.warnings.len(), 1);
        assert_eq!(resp.warnings[0].source, Source::PubMed);
        assert_eq!(resp.warnings[0].cause, "timeout");
        assert_eq!(resp.per_source_results.len(), 2);
        assert!(resp.per_source_results.contains_key(&Source::SemanticScholar));
        assert!(resp.per_source_results.contains_key(&Source::ArXiv));
        assert_eq!(resp.merged_results.len(), 2);
        // Merged output is ordered by cluster score descending.
        assert!(resp.merged_results[0].score >= resp.merged_results[1].score);
    }

    #[tokio::test]
    async fn test_failed_source_reports_cause() {
        let p = pipeline(
            vec![
                StubSource::healthy(
                    Source::ArXiv,
                    vec![record(Source::ArXiv, "a1", "Healthy Paper", Some(2020))],
                ),
                StubSource::failing(Source::SemanticScholar),
            ],
            second(),
        );
        let resp = p.run(&SearchRequest::new("anything")).await.unwrap();
        assert_eq!(resp.warnings.len(), 1);
        assert_eq!(resp.warnings[0].source, Source::SemanticScholar);
        assert!(resp.warnings[0].cause.contains("upstream exploded"));
        assert!(!resp.per_source_results.contains_key(&Source::SemanticScholar));
    }

    #[tokio::test]
    async fn test_per_source_limit_is_enforced() {
        let records: Vec<CandidateRecord> = (0..10)
            .map(|i| record(Source::ArXiv, &format!("a{}", i), &format!("Paper {}", i), Some(2020)))
            .collect();
        let p = pipeline(vec![StubSource::healthy(Source::ArXiv, records)], second());

        let mut request = SearchRequest::new("some idea");
        request.per_source_limit = 3;
        let resp = p.run(&request).await.unwrap();
        assert_eq!(resp.per_source_results[&Source::ArXiv].len(), 3);
    }

    #[tokio::test]
    async fn test_exact_year_window() {
        let p = pipeline(
            vec![StubSource::healthy(
                Source::PubMed,
                vec![
                    record(Source::PubMed, "p1", "From The Target Year", Some(2020)),
                    record(Source::PubMed, "p2", "Too Early", Some(2019)),
                    record(Source::PubMed, "p3", "Undated", None),
                ],
            )],
            second(),
        );
        let mut request = SearchRequest::new("anything");
        request.year_from = Some(2020);
        request.year_to = Some(2020);
        let resp = p.run(&request).await.unwrap();
        let hits = &resp.per_source_results[&Source::PubMed];
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.external_id, "p1");
    }

    #[tokio::test]
    async fn test_disabled_sources_are_not_queried() {
        let p = pipeline(
            vec![
                StubSource::healthy(
                    Source::ArXiv,
                    vec![record(Source::ArXiv, "a1", "Kept", Some(2020))],
                ),
                StubSource::failing(Source::PubMed),
            ],
            second(),
        );
        let mut request = SearchRequest::new("anything");
        request.sources_enabled = [Source::ArXiv].into_iter().collect();
        let resp = p.run(&request).await.unwrap();
        // The disabled failing source produces neither results nor warnings.
        assert!(resp.warnings.is_empty());
        assert_eq!(resp.per_source_results.len(), 1);
    }

    #[tokio::test]
    async fn test_encoding_failure_is_fatal() {
        let p = Pipeline::new(
            vec![StubSource::healthy(
                Source::ArXiv,
                vec![record(Source::ArXiv, "a1", "Doomed", Some(2020))],
            )],
            Arc::new(EncoderGateway::new(Arc::new(FailingEncoder), 16)),
            second(),
        );
        let err = p.run(&SearchRequest::new("anything")).await.unwrap_err();
        assert!(matches!(err, PipelineError::EncodingUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cross_source_duplicates_merge() {
        let p = pipeline(
            vec![
                StubSource::healthy(
                    Source::SemanticScholar,
                    vec![record(Source::SemanticScholar, "s1", "Attention Is All You Need", Some(2017))],
                ),
                StubSource::healthy(
                    Source::ArXiv,
                    vec![record(Source::ArXiv, "a1", "Attention is All you Need.", Some(2017))],
                ),
            ],
            second(),
        );
        let resp = p.run(&SearchRequest::new("transformers")).await.unwrap();
        assert_eq!(resp.merged_results.len(), 1);
        assert_eq!(
            resp.merged_results[0].sources,
            [Source::SemanticScholar, Source::ArXiv].into_iter().collect()
        );
    }

    #[tokio::test]
    async fn test_empty_abstract_scores_finite() {
        let mut r = record(Source::ArXiv, "a1", "Title Only Entry", Some(2020));
        r.abstract_text = None;
        let p = pipeline(vec![StubSource::healthy(Source::ArXiv, vec![r])], second());
        let resp = p.run(&SearchRequest::new("title only entry")).await.unwrap();
        let hit = &resp.per_source_results[&Source::ArXiv][0];
        assert!(hit.similarity.is_finite());
    }

    #[tokio::test]
    async fn test_same_request_is_deterministic() {
        let sources: Vec<Arc<dyn PaperSource>> = vec![
            StubSource::healthy(
                Source::SemanticScholar,
                vec![
                    record(Source::SemanticScholar, "s1", "Protein Folding Review", Some(2021)),
                    record(Source::SemanticScholar, "s2", "Molecular Dynamics Primer", Some(2019)),
                ],
            ),
            StubSource::healthy(
                Source::ArXiv,
                vec![
                    record(Source::ArXiv, "a1", "Protein Folding Review", Some(2021)),
                    record(Source::ArXiv, "a2", "Lattice Models Of Folding", Some(2018)),
                ],
            ),
        ];
        let p = pipeline(sources, second());
        let request = SearchRequest::new("protein folding with deep learning");

        let first = p.run(&request).await.unwrap();
        let second_run = p.run(&request).await.unwrap();

        let order = |resp: &SearchResponse| {
            resp.merged_results
                .iter()
                .map(|m| {
                    (
                        m.representative.external_id.clone(),
                        m.members.len(),
                        m.score,
                    )
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(order(&first), order(&second_run));
    }
}
