//! Hacker News search via the Algolia API (no auth).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use super::{RequestTally, Signal, SignalQuery, SignalSource};
use crate::adapters::{encode_operation, HttpAdapter, ServiceAdapter, ServiceCall, ServiceError};
use crate::core::retry::{Sleeper, TokioSleeper};

pub const HN_BASE_URL: &str = "https://hn.algolia.com/api/v1";

/// Phrases people use when describing an unmet need
pub const PAIN_KEYWORDS: &[&str] = &[
    "I wish there was an app",
    "why is there no app",
    "someone should build",
    "is there an app for",
    "frustrated with",
    "looking for an app",
    "need a better app",
    "there should be",
    "any alternative to",
    "looking for alternative",
    "sick of using",
    "does anyone else struggle with",
    "is there a better way to",
    "can't find a good app for",
];

/// Only the first keywords are also searched in comments
const COMMENT_KEYWORDS: usize = 8;
const COMMENT_HITS: usize = 20;
const MIN_COMMENT_CHARS: usize = 50;
const MAX_BODY_CHARS: usize = 2000;
const POLITENESS_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "objectID", default)]
    object_id: String,
    title: Option<String>,
    story_title: Option<String>,
    story_text: Option<String>,
    comment_text: Option<String>,
    url: Option<String>,
    points: Option<i64>,
    num_comments: Option<u64>,
    #[serde(default)]
    created_at: String,
    author: Option<String>,
}

fn item_url(id: &str) -> String {
    format!("https://news.ycombinator.com/item?id={}", id)
}

pub struct HackerNewsSource {
    http: Arc<dyn ServiceAdapter>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for HackerNewsSource {
    fn default() -> Self {
        Self::new(Arc::new(
            HttpAdapter::new("hackernews", HN_BASE_URL).with_timeout(Duration::from_secs(15)),
        ))
    }
}

impl HackerNewsSource {
    pub fn new(http: Arc<dyn ServiceAdapter>) -> Self {
        Self {
            http,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    async fn search(
        &self,
        keyword: &str,
        tags: &str,
        hits: usize,
        since: i64,
    ) -> Result<Vec<Hit>, ServiceError> {
        let hits = hits.to_string();
        let filter = format!("created_at_i>{}", since);
        let operation = encode_operation(
            "search",
            &[
                ("query", keyword),
                ("tags", tags),
                ("hitsPerPage", &hits),
                ("numericFilters", &filter),
            ],
        );
        let response = self.http.call(ServiceCall::get(operation)).await?;
        let parsed: SearchResponse = response.json(self.name())?;
        Ok(parsed.hits)
    }
}

#[async_trait]
impl SignalSource for HackerNewsSource {
    fn name(&self) -> &str {
        "hackernews"
    }

    async fn fetch(&self, query: &SignalQuery) -> Result<Vec<Signal>, ServiceError> {
        let since = Utc::now().timestamp() - query.time_range.seconds();
        let mut signals = Vec::new();
        let mut seen = HashSet::new();
        let mut tally = RequestTally::default();

        for keyword in &query.keywords {
            match self.search(keyword, "story", query.limit, since).await {
                Ok(hits) => {
                    tally.success();
                    for hit in hits {
                        if !seen.insert(hit.object_id.clone()) {
                            continue;
                        }
                        let body = hit
                            .story_text
                            .or(hit.comment_text)
                            .unwrap_or_default();
                        signals.push(Signal {
                            url: hit.url.unwrap_or_else(|| item_url(&hit.object_id)),
                            id: hit.object_id,
                            source: "hackernews".to_string(),
                            title: hit.title.unwrap_or_default(),
                            body: body.chars().take(MAX_BODY_CHARS).collect(),
                            score: hit.points.unwrap_or(0),
                            num_comments: hit.num_comments.unwrap_or(0),
                            created_at: hit.created_at,
                            keyword: keyword.clone(),
                            author: hit.author.unwrap_or_default(),
                            subreddit: None,
                        });
                    }
                }
                Err(err) => tally.failure(self.name(), keyword, err),
            }
            self.sleeper.sleep(POLITENESS_DELAY).await;
        }

        for keyword in query.keywords.iter().take(COMMENT_KEYWORDS) {
            match self.search(keyword, "comment", COMMENT_HITS, since).await {
                Ok(hits) => {
                    tally.success();
                    for hit in hits {
                        if !seen.insert(hit.object_id.clone()) {
                            continue;
                        }
                        let text = hit.comment_text.unwrap_or_default();
                        if text.chars().count() < MIN_COMMENT_CHARS {
                            continue;
                        }
                        signals.push(Signal {
                            url: item_url(&hit.object_id),
                            id: hit.object_id,
                            source: "hackernews_comment".to_string(),
                            title: format!(
                                "Comment on: {}",
                                hit.story_title.as_deref().unwrap_or("Unknown")
                            ),
                            body: text.chars().take(MAX_BODY_CHARS).collect(),
                            score: hit.points.unwrap_or(0),
                            num_comments: 0,
                            created_at: hit.created_at,
                            keyword: keyword.clone(),
                            author: hit.author.unwrap_or_default(),
                            subreddit: None,
                        });
                    }
                }
                Err(err) => tally.failure(self.name(), keyword, err),
            }
            self.sleeper.sleep(POLITENESS_DELAY).await;
        }

        debug!(count = signals.len(), "Hacker News search finished");
        tally.finish(signals)
    }
}
