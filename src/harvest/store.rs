//! Current-state store.
//!
//! The abstract schema is one document collection keyed by
//! `(type, unique_name)` with secondary iteration by type and expiration.
//! The curator is the only writer. The in-memory implementation below is
//! the process-local backend; anything that satisfies [`Store`] (a
//! document database, a KV store) can replace it.

use std::collections::BTreeMap;

use chrono::{
    DateTime,
    Utc,
};

use crate::{
    products::Product,
    types::ProductType,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Worth retrying with backoff.
    #[error("transient store failure: {reason}")]
    Transient { reason: String },

    /// Fatal for the curator.
    #[error("permanent store failure: {reason}")]
    Permanent { reason: String },
}

pub trait Store {
    /// Replace-by-key upsert.
    fn upsert(&mut self, product: Product) -> Result<(), StoreError>;

    fn get(&self, product_type: ProductType, unique_name: &str) -> Option<&Product>;

    fn remove(&mut self, product_type: ProductType, unique_name: &str) -> Option<Product>;

    /// All products of one type, in unique-name order.
    fn by_type(&self, product_type: ProductType) -> Vec<&Product>;

    /// Every stored product, type-major order.
    fn all(&self) -> Vec<&Product>;

    /// Drop everything whose expiration has passed. Returns the removed
    /// keys.
    fn remove_expired(&mut self, now: DateTime<Utc>) -> Vec<(ProductType, String)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: BTreeMap<(ProductType, String), Product>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn upsert(&mut self, product: Product) -> Result<(), StoreError> {
        self.documents.insert(product.key(), product);
        Ok(())
    }

    fn get(&self, product_type: ProductType, unique_name: &str) -> Option<&Product> {
        self.documents
            .get(&(product_type, unique_name.to_owned()))
    }

    fn remove(&mut self, product_type: ProductType, unique_name: &str) -> Option<Product> {
        self.documents
            .remove(&(product_type, unique_name.to_owned()))
    }

    fn by_type(&self, product_type: ProductType) -> Vec<&Product> {
        self.documents
            .range((product_type, String::new())..)
            .take_while(|((t, _), _)| *t == product_type)
            .map(|(_, product)| product)
            .collect()
    }

    fn all(&self) -> Vec<&Product> {
        self.documents.values().collect()
    }

    fn remove_expired(&mut self, now: DateTime<Utc>) -> Vec<(ProductType, String)> {
        let expired: Vec<(ProductType, String)> = self
            .documents
            .iter()
            .filter(|(_, product)| product.expiration_time <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.documents.remove(key);
        }

        expired
    }

    fn len(&self) -> usize {
        self.documents.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{
        Duration,
        TimeZone,
        Utc,
    };

    use crate::{
        harvest::store::{
            MemoryStore,
            Store,
        },
        products::Product,
        types::ProductType,
    };

    #[test]
    fn it_keeps_one_copy_per_key() {
        let mut store = MemoryStore::new();
        let rcvd = Utc.with_ymd_and_hms(2021, 5, 14, 7, 18, 0).unwrap();

        let mut first = Product::new(ProductType::Metar, "KOCQ", rcvd, rcvd + Duration::hours(2));
        first.contents = Some("old".into());
        store.upsert(first).unwrap();

        let mut second = Product::new(ProductType::Metar, "KOCQ", rcvd, rcvd + Duration::hours(2));
        second.contents = Some("new".into());
        store.upsert(second).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(
            store
                .get(ProductType::Metar, "KOCQ")
                .unwrap()
                .contents
                .as_deref(),
            Some("new")
        );
    }

    #[test]
    fn it_sweeps_expired_products() {
        let mut store = MemoryStore::new();
        let rcvd = Utc.with_ymd_and_hms(2021, 5, 14, 7, 18, 0).unwrap();

        store
            .upsert(Product::new(
                ProductType::Metar,
                "KAAA",
                rcvd,
                rcvd + Duration::hours(2),
            ))
            .unwrap();
        store
            .upsert(Product::new(
                ProductType::Metar,
                "KBBB",
                rcvd,
                rcvd + Duration::hours(4),
            ))
            .unwrap();

        // expiration exactly at `now` is expired (inclusive)
        let removed = store.remove_expired(rcvd + Duration::hours(2));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].1, "KAAA");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn it_iterates_by_type() {
        let mut store = MemoryStore::new();
        let rcvd = Utc.with_ymd_and_hms(2021, 5, 14, 7, 18, 0).unwrap();

        for name in ["KAAA", "KBBB"] {
            store
                .upsert(Product::new(
                    ProductType::Metar,
                    name,
                    rcvd,
                    rcvd + Duration::hours(2),
                ))
                .unwrap();
        }
        store
            .upsert(Product::new(
                ProductType::Taf,
                "KAAA",
                rcvd,
                rcvd + Duration::hours(2),
            ))
            .unwrap();

        assert_eq!(store.by_type(ProductType::Metar).len(), 2);
        assert_eq!(store.by_type(ProductType::Taf).len(), 1);
        assert_eq!(store.by_type(ProductType::Pirep).len(), 0);
    }
}
