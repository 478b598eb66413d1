//! Store of supplier listings sourced for niches.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{document, StoreError};
use crate::core::lock::FileLock;
use crate::domain::Listing;

pub const LISTINGS_KIND: &str = "products";

pub struct ListingStore {
    path: PathBuf,
    items: Vec<Listing>,
    lock: Option<FileLock>,
}

impl ListingStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let lock = FileLock::for_store(path).map_err(|e| StoreError::Locked(format!("{:#}", e)))?;
        let items = document::load(path, LISTINGS_KIND).await?;
        debug!(path = %path.display(), count = items.len(), "Opened listing store");

        Ok(Self {
            path: path.to_path_buf(),
            items,
            lock: Some(lock),
        })
    }

    pub async fn snapshot(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            path: path.to_path_buf(),
            items: document::load(path, LISTINGS_KIND).await?,
            lock: None,
        })
    }

    /// Add listings not already present for the same niche; returns the count added
    pub async fn add(&mut self, listings: Vec<Listing>) -> Result<usize, StoreError> {
        if self.lock.is_none() {
            return Err(StoreError::ReadOnly);
        }

        let mut seen: HashSet<(String, String)> = self.items.iter().map(Listing::key).collect();
        let before = self.items.len();
        for listing in listings {
            if seen.insert(listing.key()) {
                self.items.push(listing);
            }
        }

        let added = self.items.len() - before;
        if added > 0 {
            document::save(&self.path, LISTINGS_KIND, &self.items).await?;
        }
        Ok(added)
    }

    /// Listings at or above `min_margin` net margin, most profitable first
    pub fn profitable(&self, min_margin: f64) -> Vec<&Listing> {
        let mut listings: Vec<&Listing> = self
            .items
            .iter()
            .filter(|l| l.net_margin() >= min_margin)
            .collect();
        listings.sort_by(|a, b| b.net_profit().total_cmp(&a.net_profit()));
        listings
    }

    /// Listing count per niche
    pub fn by_niche(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for listing in &self.items {
            *counts.entry(listing.niche.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn all(&self) -> &[Listing] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn listing(niche: &str, name: &str, supplier_price: f64, sell_price: f64) -> Listing {
        Listing {
            name: name.to_string(),
            niche: niche.to_string(),
            supplier: "cjdropshipping".to_string(),
            supplier_id: format!("pid-{}", name),
            supplier_price,
            shipping_cost: 0.0,
            sell_price,
            source_url: String::new(),
            image_url: String::new(),
            category: String::new(),
            sourced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_dedup_is_per_niche() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("products.json");
        let mut store = ListingStore::open(&path).await.unwrap();

        let added = store
            .add(vec![
                listing("Camping", "Lantern", 4.0, 19.99),
                listing("camping", "LANTERN", 4.0, 19.99),
                listing("Garden", "Lantern", 4.0, 19.99),
            ])
            .await
            .unwrap();
        assert_eq!(added, 2);

        drop(store);
        let reloaded = ListingStore::snapshot(&path).await.unwrap();
        assert_eq!(reloaded.len(), 2);
    }

    #[tokio::test]
    async fn test_profitable_sorted_by_profit() {
        let temp = TempDir::new().unwrap();
        let mut store = ListingStore::open(&temp.path().join("products.json")).await.unwrap();

        store
            .add(vec![
                listing("Pets", "Bowl", 2.0, 14.99),
                listing("Pets", "Bed", 20.0, 49.99),
                listing("Pets", "Thin", 18.0, 19.99),
            ])
            .await
            .unwrap();

        let names: Vec<&str> = store
            .profitable(0.30)
            .iter()
            .map(|l| l.name.as_str())
            .collect();
        assert_eq!(names, vec!["Bed", "Bowl"]);
    }
}
