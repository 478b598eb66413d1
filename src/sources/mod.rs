//! Public signal connectors and the supplier catalog.
//!
//! A [`SignalSource`] turns a keyword query into raw posts (stories, comments,
//! threads) that analysis phases feed to the LLM. Requests are made one at a
//! time with a politeness delay; a failed keyword is logged and skipped, and a
//! source only errors when every request it made failed.

pub mod cj;
pub mod hackernews;
pub mod reddit;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::adapters::ServiceError;

pub use cj::{is_relevant, parse_price, CjCatalog, SupplierCatalog, SupplierProduct};
pub use hackernews::{HackerNewsSource, PAIN_KEYWORDS};
pub use reddit::{RedditSource, TREND_SUBREDDITS};

/// One scraped post or comment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub id: String,
    pub source: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: u64,
    #[serde(default)]
    pub created_at: String,
    /// Keyword whose search surfaced this signal
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subreddit: Option<String>,
}

/// How far back a search reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Day,
    Week,
    #[default]
    Month,
    Year,
}

impl TimeRange {
    pub fn seconds(&self) -> i64 {
        const DAY: i64 = 86_400;
        match self {
            Self::Day => DAY,
            Self::Week => 7 * DAY,
            Self::Month => 30 * DAY,
            Self::Year => 365 * DAY,
        }
    }

    /// Value of Reddit's `t` search parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            other => Err(format!(
                "unknown time range '{}' (expected day, week, month or year)",
                other
            )),
        }
    }
}

/// What to search for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalQuery {
    pub keywords: Vec<String>,
    pub time_range: TimeRange,
    /// Results requested per search call
    pub limit: usize,
}

impl SignalQuery {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords,
            time_range: TimeRange::default(),
            limit: 30,
        }
    }

    pub fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = time_range;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }
}

/// A public source of posts
#[async_trait]
pub trait SignalSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, query: &SignalQuery) -> Result<Vec<Signal>, ServiceError>;
}

/// Outcome counter shared by sources issuing many independent requests
#[derive(Debug, Default)]
pub(crate) struct RequestTally {
    succeeded: usize,
    last_error: Option<ServiceError>,
}

impl RequestTally {
    pub(crate) fn success(&mut self) {
        self.succeeded += 1;
    }

    pub(crate) fn failure(&mut self, source: &str, what: &str, err: ServiceError) {
        warn!(source, request = what, "Search failed: {}", err);
        self.last_error = Some(err);
    }

    /// Fails only if every request failed
    pub(crate) fn finish(self, signals: Vec<Signal>) -> Result<Vec<Signal>, ServiceError> {
        match self.last_error {
            Some(err) if self.succeeded == 0 => Err(err),
            _ => Ok(signals),
        }
    }
}

/// Query every source, merge by id (first seen wins) and sort by score
pub async fn collect_signals(
    sources: &[Box<dyn SignalSource>],
    query: &SignalQuery,
) -> Result<Vec<Signal>, ServiceError> {
    let mut merged = Vec::new();
    let mut seen = HashSet::new();
    let mut last_error = None;

    for source in sources {
        match source.fetch(query).await {
            Ok(signals) => {
                info!(source = source.name(), count = signals.len(), "Collected signals");
                for signal in signals {
                    if seen.insert(signal.id.clone()) {
                        merged.push(signal);
                    }
                }
            }
            Err(err) => {
                warn!(source = source.name(), "Source failed: {}", err);
                last_error = Some(err);
            }
        }
    }

    if merged.is_empty() {
        if let Some(err) = last_error {
            return Err(err);
        }
    }

    // Stable: equal scores keep source order
    merged.sort_by(|a, b| b.score.cmp(&a.score));
    Ok(merged)
}
