//! Reddit search through the public `.json` listing endpoints.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;

use super::{RequestTally, Signal, SignalQuery, SignalSource};
use crate::adapters::{encode_operation, HttpAdapter, ServiceAdapter, ServiceCall, ServiceError};
use crate::core::retry::{Sleeper, TokioSleeper};

pub const REDDIT_BASE_URL: &str = "https://www.reddit.com";

/// Subreddits where sellers discuss what is moving
pub const TREND_SUBREDDITS: &[&str] = &[
    "dropshipping",
    "ecommerce",
    "FulfillmentByAmazon",
    "Entrepreneur",
    "juststart",
    "ShopifyPros",
];

const MAX_BODY_CHARS: usize = 2000;
const POLITENESS_DELAY: Duration = Duration::from_secs(1);
const USER_AGENT: &str = concat!("forgeline/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: u64,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    subreddit: String,
    created_utc: Option<f64>,
    #[serde(default)]
    author: String,
}

/// Searches all of Reddit, or each listed subreddit in turn
pub struct RedditSource {
    http: Arc<dyn ServiceAdapter>,
    sleeper: Arc<dyn Sleeper>,
    subreddits: Vec<String>,
}

impl Default for RedditSource {
    fn default() -> Self {
        Self::new(Arc::new(
            HttpAdapter::new("reddit", REDDIT_BASE_URL)
                .with_header("User-Agent", USER_AGENT)
                .with_header("Accept", "application/json")
                .with_timeout(Duration::from_secs(15)),
        ))
    }
}

impl RedditSource {
    pub fn new(http: Arc<dyn ServiceAdapter>) -> Self {
        Self {
            http,
            sleeper: Arc::new(TokioSleeper),
            subreddits: Vec::new(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_subreddits<S: AsRef<str>>(mut self, subreddits: &[S]) -> Self {
        self.subreddits = subreddits.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    fn operation(&self, subreddit: Option<&str>, keyword: &str, query: &SignalQuery) -> String {
        let limit = query.limit.min(100).to_string();
        let mut params = vec![
            ("q", keyword),
            ("sort", "relevance"),
            ("t", query.time_range.as_str()),
            ("limit", limit.as_str()),
        ];
        match subreddit {
            Some(sub) => {
                params.push(("restrict_sr", "1"));
                encode_operation(&format!("r/{}/search.json", sub), &params)
            }
            None => encode_operation("search.json", &params),
        }
    }

    async fn search(&self, operation: String) -> Result<Vec<Post>, ServiceError> {
        let response = self.http.call(ServiceCall::get(operation)).await?;
        let listing: Listing = response.json(self.name())?;
        Ok(listing.data.children.into_iter().map(|c| c.data).collect())
    }
}

#[async_trait]
impl SignalSource for RedditSource {
    fn name(&self) -> &str {
        "reddit"
    }

    async fn fetch(&self, query: &SignalQuery) -> Result<Vec<Signal>, ServiceError> {
        let scopes: Vec<Option<&str>> = if self.subreddits.is_empty() {
            vec![None]
        } else {
            self.subreddits.iter().map(|s| Some(s.as_str())).collect()
        };

        let mut signals = Vec::new();
        let mut seen = HashSet::new();
        let mut tally = RequestTally::default();

        for scope in scopes {
            for keyword in &query.keywords {
                let operation = self.operation(scope, keyword, query);
                match self.search(operation).await {
                    Ok(posts) => {
                        tally.success();
                        for post in posts {
                            if post.title.is_empty() && post.selftext.is_empty() {
                                continue;
                            }
                            if !seen.insert(post.id.clone()) {
                                continue;
                            }
                            signals.push(Signal {
                                id: post.id,
                                source: "reddit".to_string(),
                                title: post.title,
                                body: post.selftext.chars().take(MAX_BODY_CHARS).collect(),
                                url: format!("https://reddit.com{}", post.permalink),
                                score: post.score,
                                num_comments: post.num_comments,
                                created_at: post
                                    .created_utc
                                    .and_then(|ts| Utc.timestamp_opt(ts as i64, 0).single())
                                    .map(|dt| dt.to_rfc3339())
                                    .unwrap_or_default(),
                                keyword: keyword.clone(),
                                author: post.author,
                                subreddit: Some(post.subreddit).filter(|s| !s.is_empty()),
                            });
                        }
                    }
                    Err(err) => tally.failure(self.name(), keyword, err),
                }
                self.sleeper.sleep(POLITENESS_DELAY).await;
            }
        }

        tally.finish(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry::RecordingSleeper;
    use crate::sources::testing::ScriptedAdapter;
    use crate::sources::TimeRange;
    use serde_json::json;

    fn listing(posts: serde_json::Value) -> Result<crate::adapters::ServiceResponse, ServiceError> {
        ScriptedAdapter::json(json!({"data": {"children": posts}}))
    }

    #[tokio::test]
    async fn test_subreddit_search() {
        let http = Arc::new(ScriptedAdapter::new(vec![
            listing(json!([
                {"data": {"id": "a1", "title": "Winning product: LED strips", "score": 120,
                          "permalink": "/r/dropshipping/comments/a1/x/", "subreddit": "dropshipping",
                          "created_utc": 1700000000.0}}
            ])),
            listing(json!([
                {"data": {"id": "a1", "title": "dup", "score": 1}},
                {"data": {"id": "b2", "title": "", "selftext": ""}}
            ])),
        ]));
        let source = RedditSource::new(http.clone())
            .with_sleeper(Arc::new(RecordingSleeper::new()))
            .with_subreddits(&["dropshipping", "ecommerce"]);

        let query = SignalQuery::new(vec!["winning product".to_string()])
            .with_time_range(TimeRange::Week)
            .with_limit(25);
        let signals = source.fetch(&query).await.unwrap();

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].url, "https://reddit.com/r/dropshipping/comments/a1/x/");
        assert_eq!(signals[0].subreddit.as_deref(), Some("dropshipping"));
        assert!(signals[0].created_at.starts_with("2023-11-14"));

        let operations = http.operations();
        assert_eq!(
            operations[0],
            "r/dropshipping/search.json?q=winning+product&sort=relevance&t=week&limit=25&restrict_sr=1"
        );
        assert!(operations[1].starts_with("r/ecommerce/search.json"));
    }

    #[tokio::test]
    async fn test_global_search_without_subreddits() {
        let http = Arc::new(ScriptedAdapter::new(vec![listing(json!([]))]));
        let source = RedditSource::new(http.clone())
            .with_sleeper(Arc::new(RecordingSleeper::new()));

        let signals = source
            .fetch(&SignalQuery::new(vec!["is there an app for".to_string()]))
            .await
            .unwrap();
        assert!(signals.is_empty());
        assert!(http.operations()[0].starts_with("search.json?q=is+there+an+app+for"));
    }
}
