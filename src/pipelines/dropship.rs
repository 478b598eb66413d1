//! Dropship pipeline: product trend research, niche analysis, supplier sourcing
//! and a storefront build request.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{
    llm_adapter, send_build_request, webhook_adapter, AnalysisOutput, AnalysisPlan, AnalyzePhase,
    CollectPhase,
};
use crate::adapters::ServiceAdapter;
use crate::config::Config;
use crate::core::{Phase, PhaseContext, PhaseOutput, PhaseSpec, RetryPolicy, Sleeper, TokioSleeper};
use crate::domain::{estimate_sell_price, Artifact, Listing};
use crate::error::PipelineError;
use crate::normalize::ExpectedShape;
use crate::sources::{
    is_relevant, CjCatalog, RedditSource, Signal, SignalQuery, SignalSource, SupplierCatalog,
};
use crate::store::ListingStore;

pub const PIPELINE: &str = "dropship";
pub const PHASES: &[&str] = &["research", "analyze", "source", "build-store"];

pub const RESEARCH_OUTPUT: &str = "research.json";
pub const NICHES_OUTPUT: &str = "niches.json";
pub const PRODUCTS_OUTPUT: &str = "products.json";
pub const STORE_OUTPUT: &str = "store.json";
pub const STORE_KIND: &str = "niches";

const BATCH_SIZE: usize = 20;
/// Posts considered for niche analysis
const MAX_POSTS: usize = 60;
const MAX_TEXT_IN_PROMPT: usize = 200;

/// Search queries per niche: its name plus sample products
const MAX_QUERIES_PER_NICHE: usize = 5;
const RESULTS_PER_QUERY: usize = 10;
const QUERY_DELAY: Duration = Duration::from_millis(1500);
/// Supplier prices below this are treated as junk listings
const MIN_SUPPLIER_PRICE: f64 = 1.0;
/// Substituted when the catalog reports no price
const FALLBACK_SUPPLIER_PRICE: f64 = 1.0;

/// Products listed in the store prompt
const MAX_STORE_PRODUCTS: usize = 8;

/// Per-run overrides from the command line
#[derive(Debug, Clone, Default)]
pub struct DropshipOverrides {
    pub keywords: Option<Vec<String>>,
    pub time_range: Option<crate::sources::TimeRange>,
    pub min_confidence: Option<u8>,
}

/// Phases of the dropship pipeline, in order
pub fn phases(config: &Config, overrides: &DropshipOverrides) -> Vec<Box<dyn Phase>> {
    let credentials = &config.credentials;
    let settings = &config.dropship;

    let sources: Vec<Box<dyn SignalSource>> =
        vec![Box::new(RedditSource::default().with_subreddits(&settings.subreddits))];
    let mut query = SignalQuery::new(
        overrides
            .keywords
            .clone()
            .unwrap_or_else(|| settings.keywords.clone()),
    );
    if let Some(range) = overrides.time_range {
        query = query.with_time_range(range);
    }

    let llm = llm_adapter(config);

    let research = CollectPhase::new(
        PhaseSpec::new("research", RESEARCH_OUTPUT)
            .min_bytes(2)
            .retry(config.retry.clone()),
        sources,
        query,
    );

    let analyze = AnalyzePhase::new(
        PhaseSpec::new("analyze", NICHES_OUTPUT)
            .input(RESEARCH_OUTPUT)
            .retry(config.retry.clone())
            .credential("ANTHROPIC_API_KEY", credentials.anthropic_api_key.as_deref()),
        llm,
        config.llm.clone(),
        analysis_plan(config.niches_store()),
    );

    let catalog: Arc<dyn SupplierCatalog> = Arc::new(CjCatalog::new(
        credentials.cj_api_key.as_deref().unwrap_or_default(),
    ));
    let source = SourcePhase::new(
        catalog,
        config.listings_store(),
        settings.top_niches,
        settings.min_margin,
        credentials.cj_api_key.as_deref(),
    )
    .with_min_confidence(overrides.min_confidence.unwrap_or(settings.min_confidence))
    .with_retry(config.retry.clone());

    let build = StoreBuildPhase::new(
        webhook_adapter(credentials.build_webhook_url.as_deref()),
        credentials.build_webhook_url.as_deref(),
    );

    vec![
        Box::new(research),
        Box::new(analyze),
        Box::new(source),
        Box::new(build),
    ]
}

pub fn analysis_plan(store_path: PathBuf) -> AnalysisPlan {
    AnalysisPlan {
        input: RESEARCH_OUTPUT.to_string(),
        max_posts: MAX_POSTS,
        batch_size: BATCH_SIZE,
        shape: ExpectedShape::niches(),
        store_path,
        store_kind: STORE_KIND,
        prompt: analysis_prompt,
    }
}

/// Prompt asking for product niches in a batch of trend discussions
pub fn analysis_prompt(posts: &[Signal]) -> String {
    let condensed: Vec<Value> = posts
        .iter()
        .map(|post| {
            let mut entry = json!({"title": post.title, "source": post.source, "score": post.score});
            if !post.body.is_empty() {
                entry["text"] = Value::String(post.body.chars().take(MAX_TEXT_IN_PROMPT).collect());
            }
            entry
        })
        .collect();
    let data = serde_json::to_string_pretty(&condensed).unwrap_or_default();

    format!(
        "You are an e-commerce analyst specializing in dropshipping.\n\n\
         Analyze the product trends and discussions below and extract the most promising \
         PRODUCT NICHES for a new dropshipping store.\n\n\
         For each niche provide: \"name\" (short niche name), \"category\" (Home, Kitchen, \
         Fitness, Tech, Beauty, Pets, Outdoor, ...), \"description\", \"demand_signals\", \
         \"competition_level\" (low / medium / high), \"estimated_margin\", \
         \"target_audience\", \"risk_factors\", \"confidence\" (integer 1-10) and \
         \"sample_products\" (3-5 specific products).\n\n\
         Return ONLY a JSON array of niches.\n\nScraped data:\n{}",
        data
    )
}

/// Supplier search queries for a niche: its name, then up to four sample products
pub fn niche_queries(niche: &Artifact) -> Vec<String> {
    let mut queries = vec![niche.name.clone()];
    if let Some(samples) = niche.fields.get("sample_products").and_then(Value::as_array) {
        for sample in samples {
            let query = match sample {
                Value::String(s) => s.trim().to_string(),
                Value::Object(obj) => obj
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
                _ => continue,
            };
            if !query.is_empty() && !queries.contains(&query) {
                queries.push(query);
            }
        }
    }
    queries.truncate(MAX_QUERIES_PER_NICHE);
    queries
}

/// Listings sourced in one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcingOutput {
    pub niches: Vec<String>,
    pub queries: usize,
    pub failed_queries: usize,
    pub added: usize,
    /// Profitable listings, most net profit first
    pub listings: Vec<Listing>,
}

/// Finds supplier products for the top niches and keeps the profitable ones
pub struct SourcePhase {
    spec: PhaseSpec,
    catalog: Arc<dyn SupplierCatalog>,
    sleeper: Arc<dyn Sleeper>,
    store_path: PathBuf,
    top_n: usize,
    min_margin: f64,
    min_confidence: u8,
}

impl SourcePhase {
    pub fn new(
        catalog: Arc<dyn SupplierCatalog>,
        store_path: PathBuf,
        top_n: usize,
        min_margin: f64,
        api_key: Option<&str>,
    ) -> Self {
        Self {
            spec: PhaseSpec::new("source", PRODUCTS_OUTPUT)
                .input(NICHES_OUTPUT)
                .credential("CJ_API_KEY", api_key),
            catalog,
            sleeper: Arc::new(TokioSleeper),
            store_path,
            top_n,
            min_margin,
            min_confidence: 0,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: u8) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.spec = self.spec.retry(policy);
        self
    }

    fn listing(&self, niche: &Artifact, product: crate::sources::SupplierProduct) -> Listing {
        let supplier_price = if product.price <= 0.0 {
            FALLBACK_SUPPLIER_PRICE
        } else {
            product.price
        };
        Listing {
            shipping_cost: product.shipping_cost(),
            name: product.name,
            niche: niche.name.clone(),
            supplier: self.catalog.name().to_string(),
            supplier_id: product.id,
            supplier_price,
            sell_price: estimate_sell_price(supplier_price),
            source_url: product.source_url,
            image_url: product.image_url,
            category: product.category,
            sourced_at: Utc::now(),
        }
    }

    fn is_profitable(&self, listing: &Listing) -> bool {
        listing.net_margin() >= self.min_margin && listing.supplier_price >= MIN_SUPPLIER_PRICE
    }
}

#[async_trait]
impl Phase for SourcePhase {
    fn spec(&self) -> &PhaseSpec {
        &self.spec
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PipelineError> {
        let analysis: AnalysisOutput = ctx.input_json(NICHES_OUTPUT)?;
        let niches: Vec<&Artifact> = analysis
            .artifacts
            .iter()
            .filter(|n| n.confidence.unwrap_or(0) >= self.min_confidence)
            .take(self.top_n)
            .collect();
        if niches.is_empty() {
            return Err(PipelineError::MissingInput(format!(
                "analyzed niches with confidence >= {}",
                self.min_confidence
            )));
        }
        info!(
            niches = niches.len(),
            skipped = analysis.artifacts.len().saturating_sub(niches.len()),
            min_confidence = self.min_confidence,
            "Sourcing niches"
        );

        let mut listings = Vec::new();
        let mut queries = 0;
        let mut failed = 0;
        let mut last_error = None;

        for niche in &niches {
            let mut seen = HashSet::new();
            let mut kept = 0;

            for query in niche_queries(niche) {
                if queries > 0 {
                    self.sleeper.sleep(QUERY_DELAY).await;
                }
                queries += 1;

                let products = match self.catalog.search(&query, RESULTS_PER_QUERY).await {
                    Ok(products) => products,
                    Err(err) => {
                        warn!(niche = %niche.name, query = %query, error = %err, "Supplier search failed");
                        failed += 1;
                        last_error = Some(err);
                        continue;
                    }
                };

                for product in products {
                    if product.id.is_empty() || !seen.insert(product.id.clone()) {
                        continue;
                    }
                    if !is_relevant(&product.name, &query) {
                        continue;
                    }
                    let listing = self.listing(niche, product);
                    if self.is_profitable(&listing) {
                        kept += 1;
                        listings.push(listing);
                    }
                }
            }
            info!(niche = %niche.name, kept, "Niche sourced");
        }

        if failed == queries {
            if let Some(err) = last_error {
                return Err(err.into());
            }
        }

        let mut store = ListingStore::open(&self.store_path).await?;
        let added = store.add(listings.clone()).await?;

        listings.sort_by(|a, b| b.net_profit().total_cmp(&a.net_profit()));
        let output = SourcingOutput {
            niches: niches.iter().map(|n| n.name.clone()).collect(),
            queries,
            failed_queries: failed,
            added,
            listings,
        };
        let summary = format!(
            "{} profitable listings across {} niches ({} new)",
            output.listings.len(),
            output.niches.len(),
            added
        );
        Ok(PhaseOutput::json(&output)?.with_summary(summary))
    }
}

/// Storefront brand words per category
fn store_name(niche: &Artifact) -> String {
    let word = niche.name.split_whitespace().next().unwrap_or("Nova");
    match niche.field_str("category").unwrap_or("Home") {
        "Kitchen" => format!("{}Kitchen", word),
        "Fitness" => format!("{}Fit", word),
        "Tech" => format!("{}Tech", word),
        "Beauty" => format!("{}Glow", word),
        "Pets" => format!("{}Paws", word),
        "Outdoor" => format!("{}Trail", word),
        _ => format!("{}Nest", word),
    }
}

/// Build prompt for a storefront selling the niche's listings
pub fn store_prompt(niche: &Artifact, listings: &[&Listing]) -> String {
    let name = store_name(niche);
    let audience = niche
        .field_str("target_audience")
        .unwrap_or("general consumers");

    let products = if listings.is_empty() {
        format!(
            "- Include 6 realistic placeholder products relevant to {}, priced $15-$80.",
            niche.name
        )
    } else {
        listings
            .iter()
            .take(MAX_STORE_PRODUCTS)
            .map(|l| {
                let name: String = l.name.chars().take(100).collect();
                format!(
                    "- **{}**: ${:.2} (was ${:.2})",
                    name,
                    l.sell_price,
                    l.sell_price * 1.4
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Build a modern e-commerce dropshipping store called \"{name}\".\n\n\
         ## Brand\n- Niche: {niche}\n- Target audience: {audience}\n\
         - Tagline: Premium {lower} for {audience_lower}\n\n\
         ## Pages\nHome (hero, featured products, trust badges), product catalog with \
         category filters, product detail, cart, about, contact with FAQ.\n\n\
         ## Products\n{products}\n\nOnly include products directly related to {niche}.\n\n\
         ## Design\nMobile-first, clean and trustworthy, sticky header with cart count. \
         Checkout collects shipping info in demo mode without real payments.",
        name = name,
        niche = niche.name,
        audience = audience,
        lower = niche.name.to_lowercase(),
        audience_lower = audience.to_lowercase(),
        products = products,
    )
}

/// Store build request as sent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRequest {
    pub store_name: String,
    pub niche: String,
    pub products: usize,
    pub prompt: String,
}

/// Sends a storefront build request for the top niche
pub struct StoreBuildPhase {
    spec: PhaseSpec,
    webhook: Arc<dyn ServiceAdapter>,
}

impl StoreBuildPhase {
    pub fn new(webhook: Arc<dyn ServiceAdapter>, webhook_url: Option<&str>) -> Self {
        Self {
            spec: PhaseSpec::new("build-store", STORE_OUTPUT)
                .input(NICHES_OUTPUT)
                .input(PRODUCTS_OUTPUT)
                .optional()
                .side_effect()
                .retry(RetryPolicy::default().with_max_attempts(2))
                .credential("FORGELINE_BUILD_WEBHOOK", webhook_url),
            webhook,
        }
    }
}

#[async_trait]
impl Phase for StoreBuildPhase {
    fn spec(&self) -> &PhaseSpec {
        &self.spec
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PipelineError> {
        let analysis: AnalysisOutput = ctx.input_json(NICHES_OUTPUT)?;
        let sourcing: SourcingOutput = ctx.input_json(PRODUCTS_OUTPUT)?;

        let niche = analysis
            .artifacts
            .first()
            .ok_or_else(|| PipelineError::MissingInput("analyzed niches".to_string()))?;
        let listings: Vec<&Listing> = sourcing
            .listings
            .iter()
            .filter(|l| l.niche.eq_ignore_ascii_case(&niche.name))
            .collect();

        let request = StoreRequest {
            store_name: store_name(niche),
            niche: niche.name.clone(),
            products: listings.len().min(MAX_STORE_PRODUCTS),
            prompt: store_prompt(niche, &listings),
        };
        info!(store = %request.store_name, niche = %request.niche, "Sending store to builder");
        send_build_request(
            self.webhook.as_ref(),
            json!({"kind": "store", "name": request.store_name, "prompt": request.prompt}),
        )
        .await?;

        let summary = format!("store '{}' requested", request.store_name);
        Ok(PhaseOutput::json(&request)?.with_summary(summary))
    }

    fn preview(&self, ctx: &PhaseContext<'_>) -> Option<String> {
        let niche = ctx
            .input_json::<AnalysisOutput>(NICHES_OUTPUT)
            .ok()
            .and_then(|a| a.artifacts.first().map(|n| n.name.clone()));
        Some(match niche {
            Some(name) => format!("would request a storefront for niche '{}'", name),
            None => "would request a storefront for the top niche".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ServiceError;
    use crate::core::{MemoryCheckpointStore, RecordingSleeper};
    use crate::pipelines::testing::RecordingWebhook;
    use crate::sources::SupplierProduct;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use uuid::Uuid;

    /// Catalog answering every query from a fixed list, or failing
    struct FakeCatalog {
        products: Vec<SupplierProduct>,
        fail: bool,
        queries: Mutex<Vec<String>>,
    }

    impl FakeCatalog {
        fn new(products: Vec<SupplierProduct>) -> Self {
            Self {
                products,
                fail: false,
                queries: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(Vec::new())
            }
        }
    }

    #[async_trait]
    impl SupplierCatalog for FakeCatalog {
        fn name(&self) -> &str {
            "fake-supplier"
        }

        async fn search(&self, query: &str, _limit: usize) -> Result<Vec<SupplierProduct>, ServiceError> {
            self.queries.lock().unwrap().push(query.to_string());
            if self.fail {
                return Err(ServiceError::transient("fake-supplier", "connection reset"));
            }
            Ok(self.products.clone())
        }
    }

    fn product(id: &str, name: &str, price: f64) -> SupplierProduct {
        SupplierProduct {
            id: id.to_string(),
            name: name.to_string(),
            price,
            free_shipping: false,
            image_url: String::new(),
            category: String::new(),
            source_url: String::new(),
        }
    }

    fn niches_input(niches: Vec<Artifact>) -> HashMap<String, Vec<u8>> {
        let analysis = AnalysisOutput {
            analyzed_posts: 10,
            added: niches.len(),
            artifacts: niches,
        };
        let mut outputs = HashMap::new();
        outputs.insert(NICHES_OUTPUT.to_string(), serde_json::to_vec(&analysis).unwrap());
        outputs
    }

    #[test]
    fn test_niche_queries() {
        let niche = Artifact::new("Pet Supplies").with_field(
            "sample_products",
            json!(["Dog Bed", {"name": "Cat Bowl"}, "Dog Bed", 7, "A", "B", "C"]),
        );
        assert_eq!(
            niche_queries(&niche),
            vec!["Pet Supplies", "Dog Bed", "Cat Bowl", "A", "B"]
        );
    }

    #[tokio::test]
    async fn test_source_keeps_profitable_relevant_listings() {
        let temp = TempDir::new().unwrap();
        let catalog = Arc::new(FakeCatalog::new(vec![
            // $4 → sells at $19.99: comfortably over 30% net
            product("p1", "Orthopedic Dog Bed", 4.0),
            // Under a dollar: junk listing
            product("p2", "Mini Dog Bed Toy", 0.5),
            product("p3", "Garden Hose", 2.0),
            product("", "Dog Bed Without Id", 2.0),
        ]));
        let sleeper = Arc::new(RecordingSleeper::new());
        let phase = SourcePhase::new(
            catalog.clone(),
            temp.path().join("products.json"),
            1,
            0.30,
            Some("key"),
        )
        .with_sleeper(sleeper.clone());

        let outputs = niches_input(vec![
            Artifact::new("Dog Beds")
                .with_confidence(9)
                .with_field("sample_products", json!(["Orthopedic Dog Bed"])),
            Artifact::new("Not Sourced").with_confidence(5),
        ]);
        let checkpoints = MemoryCheckpointStore::new();
        let ctx = PhaseContext::new(Uuid::new_v4(), false, &outputs, &checkpoints);
        let output = phase.execute(&ctx).await.unwrap();
        let sourcing: SourcingOutput = serde_json::from_slice(&output.data).unwrap();

        assert_eq!(sourcing.niches, vec!["Dog Beds"]);
        assert_eq!(sourcing.queries, 2);
        assert_eq!(sleeper.sleeps(), vec![QUERY_DELAY]);
        assert_eq!(sourcing.listings.len(), 1);
        assert_eq!(sourcing.listings[0].supplier_id, "p1");
        assert_eq!(sourcing.listings[0].sell_price, 19.99);
        assert_eq!(sourcing.listings[0].supplier, "fake-supplier");
        assert_eq!(sourcing.added, 1);

        let store = ListingStore::snapshot(&temp.path().join("products.json")).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_source_skips_low_confidence_niches() {
        let temp = TempDir::new().unwrap();
        let catalog = Arc::new(FakeCatalog::new(vec![product("p1", "Orthopedic Dog Bed", 4.0)]));
        let phase = SourcePhase::new(
            catalog.clone(),
            temp.path().join("products.json"),
            5,
            0.30,
            Some("key"),
        )
        .with_min_confidence(7)
        .with_sleeper(Arc::new(RecordingSleeper::new()));

        let outputs = niches_input(vec![
            Artifact::new("Phone Cases").with_confidence(4),
            Artifact::new("Unscored"),
            Artifact::new("Dog Beds").with_confidence(7),
        ]);
        let checkpoints = MemoryCheckpointStore::new();
        let ctx = PhaseContext::new(Uuid::new_v4(), false, &outputs, &checkpoints);
        let output = phase.execute(&ctx).await.unwrap();
        let sourcing: SourcingOutput = serde_json::from_slice(&output.data).unwrap();

        assert_eq!(sourcing.niches, vec!["Dog Beds"]);
        assert!(catalog
            .queries
            .lock()
            .unwrap()
            .iter()
            .all(|q| q == "Dog Beds"));

        // Nothing over the bar: no supplier calls at all
        let strict = SourcePhase::new(
            Arc::new(FakeCatalog::new(Vec::new())),
            temp.path().join("products.json"),
            5,
            0.30,
            Some("key"),
        )
        .with_min_confidence(9);
        let err = strict.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(_)));
    }

    #[tokio::test]
    async fn test_source_fails_when_every_query_fails() {
        let temp = TempDir::new().unwrap();
        let phase = SourcePhase::new(
            Arc::new(FakeCatalog::failing()),
            temp.path().join("products.json"),
            3,
            0.30,
            Some("key"),
        )
        .with_sleeper(Arc::new(RecordingSleeper::new()));

        let outputs = niches_input(vec![Artifact::new("Dog Beds")]);
        let checkpoints = MemoryCheckpointStore::new();
        let ctx = PhaseContext::new(Uuid::new_v4(), false, &outputs, &checkpoints);
        let err = phase.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::Transport(_)));
    }

    #[tokio::test]
    async fn test_store_build_uses_top_niche_listings() {
        let niche = Artifact::new("Dog Beds")
            .with_confidence(9)
            .with_field("category", "Pets");
        let mut outputs = niches_input(vec![niche.clone()]);

        let phase = SourcePhase::new(
            Arc::new(FakeCatalog::new(Vec::new())),
            PathBuf::from("unused.json"),
            1,
            0.30,
            Some("key"),
        );
        let listing = phase.listing(&niche, product("p1", "Orthopedic Dog Bed", 4.0));
        let sourcing = SourcingOutput {
            niches: vec!["Dog Beds".to_string()],
            queries: 1,
            failed_queries: 0,
            added: 1,
            listings: vec![listing],
        };
        outputs.insert(PRODUCTS_OUTPUT.to_string(), serde_json::to_vec(&sourcing).unwrap());

        let webhook = Arc::new(RecordingWebhook::default());
        let build = StoreBuildPhase::new(webhook.clone(), Some("https://hook"));
        let checkpoints = MemoryCheckpointStore::new();
        let ctx = PhaseContext::new(Uuid::new_v4(), false, &outputs, &checkpoints);
        let output = build.execute(&ctx).await.unwrap();
        let request: StoreRequest = serde_json::from_slice(&output.data).unwrap();

        assert_eq!(request.store_name, "DogPaws");
        assert_eq!(request.products, 1);
        assert!(request.prompt.contains("**Orthopedic Dog Bed**: $19.99"));
        assert_eq!(webhook.payloads.lock().unwrap()[0]["kind"], "store");
        assert_eq!(
            build.preview(&ctx).as_deref(),
            Some("would request a storefront for niche 'Dog Beds'")
        );
    }
}
