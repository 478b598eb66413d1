//! Supplier catalog: CJ Dropshipping product search.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::adapters::{encode_operation, HttpAdapter, ServiceAdapter, ServiceCall, ServiceError};

pub const CJ_BASE_URL: &str = "https://developers.cjdropshipping.com/api2.0/v1";
const PROVIDER: &str = "cjdropshipping";

/// CJ wraps every response in `{code, message, data}`; 200 is success
const CJ_OK: i64 = 200;
const MAX_PAGE_SIZE: usize = 200;

/// Words ignored when matching product names against a query
const NOISE_WORDS: &[&str] = &[
    "for", "the", "with", "and", "set", "new", "hot", "products", "product", "tools", "tool",
    "equipment", "gear", "accessories", "accessory", "items",
];
const MAX_RELEVANT_NAME_CHARS: usize = 200;

/// A product as the supplier lists it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupplierProduct {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub free_shipping: bool,
    pub image_url: String,
    pub category: String,
    pub source_url: String,
}

impl SupplierProduct {
    /// Flat shipping estimate: free, $2 under $10, otherwise $3.50
    pub fn shipping_cost(&self) -> f64 {
        if self.free_shipping {
            0.0
        } else if self.price < 10.0 {
            2.0
        } else {
            3.50
        }
    }
}

/// Searchable supplier product catalog
#[async_trait]
pub trait SupplierCatalog: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SupplierProduct>, ServiceError>;
}

/// Parse a supplier price: a number, a numeric string, or a range such as
/// `"3.02 -- 6.04"` (the low end is used)
pub fn parse_price(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s
            .split("--")
            .next()
            .and_then(|low| low.trim().parse::<f64>().ok())
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Whether a product name plausibly matches a search query
///
/// Short queries (one or two meaningful words) need one word in the name;
/// longer queries need two.
pub fn is_relevant(product_name: &str, query: &str) -> bool {
    if product_name.chars().count() > MAX_RELEVANT_NAME_CHARS {
        return false;
    }

    let name = product_name.to_lowercase();
    let words: Vec<String> = query
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() > 2 && !NOISE_WORDS.contains(&w.as_str()))
        .collect();

    if words.is_empty() {
        return true;
    }

    let matches = words.iter().filter(|w| name.contains(w.as_str())).count();
    if words.len() <= 2 {
        matches >= 1
    } else {
        matches >= 2
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    fn into_data(self) -> Result<Value, ServiceError> {
        if self.code == CJ_OK {
            return Ok(self.data);
        }
        let message = self.message.unwrap_or_else(|| "unknown error".to_string());
        // CJ reports auth and throttling in-band with HTTP 200
        Err(match self.code {
            1600001 | 1600002 | 1600003 => ServiceError::auth(PROVIDER, message),
            1600200 | 429 => ServiceError::quota(PROVIDER, message, None),
            _ => ServiceError::permanent(PROVIDER, format!("code {}: {}", self.code, message)),
        })
    }
}

fn product_from_value(raw: &Value) -> SupplierProduct {
    let text = |key: &str| raw.get(key).and_then(Value::as_str).unwrap_or("").to_string();

    let id = text("pid");
    let name = raw
        .get("productNameEn")
        .or_else(|| raw.get("productName"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
        .to_string();
    let free_shipping = raw
        .get("isFreeShipping")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || raw.get("addMarkStatus").and_then(Value::as_i64) == Some(1);

    SupplierProduct {
        source_url: if id.is_empty() {
            String::new()
        } else {
            format!("https://cjdropshipping.com/product/p-{}.html", id)
        },
        id,
        name,
        price: raw.get("sellPrice").map(parse_price).unwrap_or(0.0),
        free_shipping,
        image_url: text("productImage"),
        category: text("categoryName"),
    }
}

/// CJ Dropshipping API client; exchanges the API key for an access token once
pub struct CjCatalog {
    auth: HttpAdapter,
    api_key: String,
    base_url: String,
    products: OnceCell<HttpAdapter>,
}

impl CjCatalog {
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, CJ_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        Self {
            auth: HttpAdapter::new(PROVIDER, base_url),
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
            products: OnceCell::new(),
        }
    }

    async fn authenticate(&self) -> Result<HttpAdapter, ServiceError> {
        let response = self
            .auth
            .call(ServiceCall::new(
                "authentication/getAccessToken",
                json!({"apiKey": self.api_key}),
            ))
            .await?;
        let envelope: Envelope = response.json(PROVIDER)?;
        let data = envelope.into_data()?;

        let token = data
            .get("accessToken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServiceError::auth(PROVIDER, "no access token in response"))?;

        info!("Authenticated with CJ Dropshipping");
        Ok(HttpAdapter::new(PROVIDER, self.base_url.clone()).with_header("CJ-Access-Token", token))
    }
}

#[async_trait]
impl SupplierCatalog for CjCatalog {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SupplierProduct>, ServiceError> {
        let http = self.products.get_or_try_init(|| self.authenticate()).await?;

        let size = limit.clamp(1, MAX_PAGE_SIZE).to_string();
        let operation = encode_operation(
            "product/list",
            &[("productNameEn", query), ("pageNum", "1"), ("pageSize", &size)],
        );
        let response = http.call(ServiceCall::get(operation)).await?;
        let envelope: Envelope = response.json(PROVIDER)?;
        let data = envelope.into_data()?;

        let products: Vec<SupplierProduct> = data
            .get("list")
            .and_then(Value::as_array)
            .map(|list| list.iter().map(product_from_value).collect())
            .unwrap_or_default();

        debug!(query, count = products.len(), "CJ product search");
        Ok(products)
    }
}
