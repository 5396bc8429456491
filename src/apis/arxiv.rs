use super::{within_years, CandidateRecord, PaperSource, Source, SourceError};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;

const BASE_URL: &str = "https://export.arxiv.org/api/query";

pub struct ArxivClient {
    client: reqwest::Client,
}

impl ArxivClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("paper-match/0.1")
                .build()
                .unwrap(),
        }
    }
}

#[async_trait]
impl PaperSource for ArxivClient {
    fn source(&self) -> Source {
        Source::ArXiv
    }

    async fn search(
        &self,
        query: &str,
        limit: u32,
        year_from: Option<i32>,
        year_to: Option<i32>,
    ) -> Result<Vec<CandidateRecord>, SourceError> {
        let url = format!(
            "{}?search_query=all:{}&start=0&max_results={}&sortBy=relevance&sortOrder=descending",
            BASE_URL,
            urlencoded(query),
            limit
        );
        let resp = self.client.get(&url).send().await?.text().await?;
        // The Atom API has no year filter; restrict after parsing.
        Ok(parse_atom_feed(&resp)?
            .into_iter()
            .filter(|c| within_years(c.year, year_from, year_to))
            .collect())
    }
}

fn urlencoded(s: &str) -> String {
    s.replace(' ', "+").replace(':', "%3A").replace('/', "%2F")
}

fn parse_atom_feed(xml: &str) -> Result<Vec<CandidateRecord>, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut candidates = Vec::new();
    let mut in_entry = false;
    let mut current_tag = String::new();
    let mut title = String::new();
    let mut summary = String::new();
    let mut entry_id = String::new();
    let mut published = String::new();
    let mut link_abs = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" {
                    in_entry = true;
                    title.clear();
                    summary.clear();
                    entry_id.clear();
                    published.clear();
                    link_abs.clear();
                } else if in_entry {
                    current_tag = tag.clone();
                    if tag == "link" {
                        capture_abs_link(&e, &mut link_abs);
                    }
                }
            }
            Ok(Event::Empty(e)) if in_entry => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "link" {
                    capture_abs_link(&e, &mut link_abs);
                }
            }
            Ok(Event::Text(e)) if in_entry => {
                let text = e.unescape().unwrap_or_default().to_string();
                match current_tag.as_str() {
                    "title" => title.push_str(&text),
                    "summary" => summary.push_str(&text),
                    "id" if entry_id.is_empty() => entry_id = text,
                    "published" => published.push_str(&text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" && in_entry {
                    in_entry = false;
                    // Entry id is a URL; the trailing segment is the arXiv id.
                    let id = entry_id.rsplit('/').next().unwrap_or(&entry_id).to_string();
                    if !id.is_empty() && !title.trim().is_empty() {
                        let year = published.get(..4).and_then(|y| y.parse::<i32>().ok());
                        // Feed text is hard-wrapped; collapse the line breaks.
                        let summary = collapse_whitespace(&summary);
                        candidates.push(CandidateRecord {
                            source: Source::ArXiv,
                            external_id: id,
                            title: collapse_whitespace(&title),
                            abstract_text: if summary.is_empty() {
                                None
                            } else {
                                Some(summary)
                            },
                            year,
                            url: if link_abs.is_empty() {
                                entry_id.clone()
                            } else {
                                link_abs.clone()
                            },
                        });
                    }
                }
                if tag == current_tag {
                    current_tag.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(candidates)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn capture_abs_link(e: &quick_xml::events::BytesStart<'_>, link_abs: &mut String) {
    let mut href = String::new();
    let mut rel = String::new();
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let val = String::from_utf8_lossy(&attr.value).to_string();
        if key == "href" {
            href = val;
        } else if key == "rel" {
            rel = val;
        }
    }
    if link_abs.is_empty() && (rel == "alternate" || href.contains("/abs/")) {
        *link_abs = href;
    }
}
