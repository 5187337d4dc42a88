//! Feed retrieval (spec.md §4.2). Conditional GET and retry-with-backoff
//! are grounded on the teacher's `ingestion::fetch_and_parse_feed`; the
//! scraping fallback that function used to reach for on thin articles is
//! dropped — full-text extraction from linked pages is an explicit
//! Non-goal.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};

use crate::store::NewArticle;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    NotModified,
    Fetched,
}

#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub outcome: Option<FetchOutcome>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub items: Vec<NewArticle>,
    pub feed_title: Option<String>,
    pub feed_description: Option<String>,
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("herald/0.1 (+feed reader)")
            .build()
            .context("failed to build fetcher http client")?;
        Ok(Fetcher { client })
    }

    /// Fetch one feed, honoring existing ETag/Last-Modified validators
    /// (spec.md §4.2). Retries transient 5xx/429 responses with exponential
    /// backoff before giving up; other status codes are surfaced
    /// immediately as an error for the caller to record against the feed.
    pub async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchResult> {
        let mut attempt = 0u32;
        loop {
            let mut req = self.client.get(url);
            if let Some(tag) = etag {
                req = req.header(reqwest::header::IF_NONE_MATCH, tag);
            }
            if let Some(lm) = last_modified {
                req = req.header(reqwest::header::IF_MODIFIED_SINCE, lm);
            }

            let response = req.send().await;

            let response = match response {
                Ok(r) => r,
                Err(e) if attempt < MAX_RETRIES && e.is_timeout() => {
                    attempt += 1;
                    tokio::time::sleep(backoff(attempt)).await;
                    continue;
                }
                Err(e) => return Err(e).context("feed request failed"),
            };

            let status = response.status();

            if status == StatusCode::NOT_MODIFIED {
                return Ok(FetchResult {
                    outcome: Some(FetchOutcome::NotModified),
                    ..Default::default()
                });
            }

            if (status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS)
                && attempt < MAX_RETRIES
            {
                attempt += 1;
                tokio::time::sleep(backoff(attempt)).await;
                continue;
            }

            if !status.is_success() {
                anyhow::bail!("feed request returned status {}", status);
            }

            let new_etag = response
                .headers()
                .get(reqwest::header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let new_last_modified = response
                .headers()
                .get(reqwest::header::LAST_MODIFIED)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let body = response.bytes().await.context("failed to read feed body")?;
            let parsed = feed_rs::parser::parse(&body[..]).context("failed to parse feed")?;

            let feed_title = parsed.title.map(|t| t.content);
            let feed_description = parsed.description.map(|d| d.content);
            let items = parsed.entries.into_iter().map(entry_to_new_article).collect();

            return Ok(FetchResult {
                outcome: Some(FetchOutcome::Fetched),
                etag: new_etag,
                last_modified: new_last_modified,
                items,
                feed_title,
                feed_description,
            });
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt.saturating_sub(1)))
}

fn entry_to_new_article(entry: feed_rs::model::Entry) -> NewArticle {
    let title = entry.title.map(|t| t.content).unwrap_or_default();
    let url = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .unwrap_or_default();
    let content = entry
        .content
        .and_then(|c| c.body)
        .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()))
        .unwrap_or_default();
    let summary = entry.summary.map(|s| s.content).unwrap_or_default();
    let author = entry.authors.first().map(|a| a.name.clone());
    let published_at: Option<DateTime<Utc>> = entry.published.or(entry.updated);
    let authors = entry.authors.into_iter().map(|a| a.name).collect();
    let categories = entry.categories.into_iter().map(|c| c.term).collect();

    NewArticle {
        guid: entry.id,
        title,
        url,
        content,
        summary,
        author,
        published_at,
        authors,
        categories,
    }
}
