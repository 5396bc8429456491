use super::{within_years, CandidateRecord, PaperSource, Source, SourceError};
use async_trait::async_trait;
use serde::Deserialize;

const BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";
const FIELDS: &str = "title,abstract,year,url";

pub struct SemanticScholarClient {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl SemanticScholarClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("paper-match/0.1")
                .build()
                .unwrap(),
            api_key,
        }
    }

    fn add_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("x-api-key", key),
            None => req,
        }
    }
}

#[derive(Deserialize)]
struct S2SearchResponse {
    data: Option<Vec<S2Paper>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    paper_id: Option<String>,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    year: Option<i32>,
    url: Option<String>,
}

fn s2_to_candidate(p: S2Paper) -> Option<CandidateRecord> {
    let external_id = p.paper_id?;
    let title = p.title.unwrap_or_default();
    if title.trim().is_empty() {
        return None;
    }
    let url = p
        .url
        .unwrap_or_else(|| format!("https://www.semanticscholar.org/paper/{}", external_id));
    Some(CandidateRecord {
        source: Source::SemanticScholar,
        external_id,
        title,
        abstract_text: p.abstract_text.filter(|a| !a.trim().is_empty()),
        year: p.year,
        url,
    })
}

/// Graph API `year` parameter: a single year or an open/closed range.
fn year_param(from: Option<i32>, to: Option<i32>) -> Option<String> {
    match (from, to) {
        (None, None) => None,
        (Some(f), Some(t)) if f == t => Some(f.to_string()),
        (Some(f), Some(t)) => Some(format!("{}-{}", f, t)),
        (Some(f), None) => Some(format!("{}-", f)),
        (None, Some(t)) => Some(format!("-{}", t)),
    }
}

#[async_trait]
impl PaperSource for SemanticScholarClient {
    fn source(&self) -> Source {
        Source::SemanticScholar
    }

    async fn search(
        &self,
        query: &str,
        limit: u32,
        year_from: Option<i32>,
        year_to: Option<i32>,
    ) -> Result<Vec<CandidateRecord>, SourceError> {
        let url = format!("{}/paper/search", BASE_URL);
        let limit = limit.min(100).to_string();
        let mut params = vec![
            ("query", query.to_string()),
            ("limit", limit),
            ("fields", FIELDS.to_string()),
        ];
        if let Some(year) = year_param(year_from, year_to) {
            params.push(("year", year));
        }
        let resp: S2SearchResponse = self
            .add_auth(self.client.get(&url).query(&params))
            .send()
            .await?
            .json()
            .await?;
        // The upstream range filter is applied again locally.
        Ok(resp
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(s2_to_candidate)
            .filter(|c| within_years(c.year, year_from, year_to))
            .collect())
    }
}
