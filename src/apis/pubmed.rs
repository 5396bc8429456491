use super::{within_years, CandidateRecord, PaperSource, Source, SourceError};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;

const BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// NCBI E-utilities client. Search is a two-step protocol: `esearch`
/// returns matching PMIDs, `efetch` returns article XML for those PMIDs.
pub struct PubMedClient {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl PubMedClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("paper-match/0.1")
                .build()
                .unwrap(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct ESearchResponse {
    esearchresult: Option<ESearchResult>,
}

#[derive(Deserialize)]
struct ESearchResult {
    idlist: Option<Vec<String>>,
}

#[async_trait]
impl PaperSource for PubMedClient {
    fn source(&self) -> Source {
        Source::PubMed
    }

    async fn search(
        &self,
        query: &str,
        limit: u32,
        year_from: Option<i32>,
        year_to: Option<i32>,
    ) -> Result<Vec<CandidateRecord>, SourceError> {
        let retmax = limit.min(100).to_string();
        let mut params = vec![
            ("db", "pubmed".to_string()),
            ("term", query.to_string()),
            ("retmax", retmax),
            ("retmode", "json".to_string()),
            ("sort", "relevance".to_string()),
        ];
        if year_from.is_some() || year_to.is_some() {
            // esearch wants both ends of a publication-date window.
            params.push(("datetype", "pdat".to_string()));
            params.push(("mindate", year_from.unwrap_or(1800).to_string()));
            params.push(("maxdate", year_to.unwrap_or(3000).to_string()));
        }
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }

        let resp: ESearchResponse = self
            .client
            .get(format!("{}/esearch.fcgi", BASE_URL))
            .query(&params)
            .send()
            .await?
            .json()
            .await?;

        let ids = resp
            .esearchresult
            .and_then(|r| r.idlist)
            .unwrap_or_default();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut fetch_params = vec![
            ("db", "pubmed".to_string()),
            ("id", ids.join(",")),
            ("retmode", "xml".to_string()),
        ];
        if let Some(key) = &self.api_key {
            fetch_params.push(("api_key", key.clone()));
        }

        let xml = self
            .client
            .get(format!("{}/efetch.fcgi", BASE_URL))
            .query(&fetch_params)
            .send()
            .await?
            .text()
            .await?;

        Ok(parse_efetch(&xml)?
            .into_iter()
            .filter(|c| within_years(c.year, year_from, year_to))
            .collect())
    }
}

/// Parse `efetch` article XML into candidate records.
///
/// Titles and abstracts may carry inline markup (italics, sub/superscript),
/// so capture runs on open/close flags rather than a single current tag.
/// Only the first PMID per article counts; later ones belong to references
/// and correction notices.
fn parse_efetch(xml: &str) -> Result<Vec<CandidateRecord>, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut candidates = Vec::new();
    let mut in_article = false;
    let mut in_title = false;
    let mut in_abstract = false;
    let mut in_pubdate = false;
    let mut in_pmid = false;
    let mut in_year = false;
    let mut in_medline_date = false;
    let mut pmid = String::new();
    let mut title = String::new();
    let mut abstract_text = String::new();
    let mut year: Option<i32> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                match e.name().as_ref() {
                    b"PubmedArticle" => {
                        in_article = true;
                        pmid.clear();
                        title.clear();
                        abstract_text.clear();
                        year = None;
                    }
                    b"ArticleTitle" if in_article => in_title = true,
                    b"AbstractText" if in_article => {
                        // Labeled sections run together with a space.
                        if !abstract_text.is_empty() {
                            abstract_text.push(' ');
                        }
                        in_abstract = true;
                    }
                    b"PubDate" if in_article => in_pubdate = true,
                    b"Year" if in_pubdate => in_year = true,
                    b"MedlineDate" if in_pubdate => in_medline_date = true,
                    b"PMID" if in_article && pmid.is_empty() => in_pmid = true,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) if in_article => {
                let text = e.unescape().unwrap_or_default().to_string();
                if in_title {
                    title.push_str(&text);
                } else if in_abstract {
                    abstract_text.push_str(&text);
                } else if in_pmid {
                    pmid.push_str(text.trim());
                } else if in_year {
                    year = year.or_else(|| text.trim().parse::<i32>().ok());
                } else if in_medline_date {
                    // e.g. "2019 Nov-Dec": the leading token is the year.
                    year = year.or_else(|| text.trim().get(..4).and_then(|y| y.parse::<i32>().ok()));
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"PubmedArticle" => {
                    in_article = false;
                    if !pmid.is_empty() && !title.trim().is_empty() {
                        let abstract_text = abstract_text.trim();
                        candidates.push(CandidateRecord {
                            source: Source::PubMed,
                            external_id: pmid.clone(),
                            title: title.trim().replace('\n', " "),
                            abstract_text: if abstract_text.is_empty() {
                                None
                            } else {
                                Some(abstract_text.replace('\n', " "))
                            },
                            year,
                            url: format!("https://pubmed.ncbi.nlm.nih.gov/{}/", pmid),
                        });
                    }
                }
                b"ArticleTitle" => in_title = false,
                b"AbstractText" => in_abstract = false,
                b"PubDate" => in_pubdate = false,
                b"Year" => in_year = false,
                b"MedlineDate" => in_medline_date = false,
                b"PMID" => in_pmid = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_EFETCH: &str = r#"<?xml version="1.0" ?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation Status="MEDLINE">
      <PMID Version="1">33577987</PMID>
      <Article PubModel="Print">
        <Journal>
          <JournalIssue>
            <PubDate><Year>2021</Year><Month>Feb</Month></PubDate>
          </JournalIssue>
        </Journal>
        <ArticleTitle>Graph neural networks for automated <i>de novo</i> drug design.</ArticleTitle>
        <Abstract>
          <AbstractText Label="BACKGROUND">Drug discovery is costly.</AbstractText>
          <AbstractText Label="RESULTS">Graph models help.</AbstractText>
        </Abstract>
      </Article>
      <CommentsCorrectionsList>
        <CommentsCorrections RefType="Cites">
          <PMID Version="1">99999999</PMID>
        </CommentsCorrections>
      </CommentsCorrectionsList>
    </MedlineCitation>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation Status="MEDLINE">
      <PMID Version="1">31835000</PMID>
      <Article PubModel="Print">
        <Journal>
          <JournalIssue>
            <PubDate><MedlineDate>2019 Nov-Dec</MedlineDate></PubDate>
          </JournalIssue>
        </Journal>
        <ArticleTitle>An abstract-free case report.</ArticleTitle>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn test_parse_efetch() {
        let candidates = parse_efetch(SAMPLE_EFETCH).unwrap();
        assert_eq!(candidates.len(), 2);

        let first = &candidates[0];
        assert_eq!(first.source, Source::PubMed);
        assert_eq!(first.external_id, "33577987");
        assert_eq!(
            first.title,
            "Graph neural networks for automated de novo drug design."
        );
        assert_eq!(
            first.abstract_text.as_deref(),
            Some("Drug discovery is costly. Graph models help.")
        );
        assert_eq!(first.year, Some(2021));
        assert_eq!(first.url, "https://pubmed.ncbi.nlm.nih.gov/33577987/");
    }

    #[test]
    fn test_medline_date_fallback_and_absent_abstract() {
        let candidates = parse_efetch(SAMPLE_EFETCH).unwrap();
        let second = &candidates[1];
        assert_eq!(second.external_id, "31835000");
        assert_eq!(second.year, Some(2019));
        assert!(second.abstract_text.is_none());
    }

    #[test]
    fn test_reference_pmids_do_not_leak() {
        let candidates = parse_efetch(SAMPLE_EFETCH).unwrap();
        assert!(candidates.iter().all(|c| c.external_id != "99999999"));
    }

    #[test]
    fn test_parse_esearch_idlist() {
        let resp: ESearchResponse = serde_json::from_str(
            r#"{"esearchresult": {"count": "2", "idlist": ["33577987", "31835000"]}}"#,
        )
        .unwrap();
        let ids = resp.esearchresult.and_then(|r| r.idlist).unwrap();
        assert_eq!(ids, vec!["33577987", "31835000"]);
    }
}
