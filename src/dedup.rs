//! # Change filter
//!
//! FIS-B retransmits everything on a schedule; most of those copies are
//! byte-identical and only load the curator. Each product is digested over
//! its content-significant fields and forwarded only when the digest is
//! new — with a refresh floor so an unchanged product still heartbeats
//! through occasionally, guarding the store against silent loss.
//!
//! Products whose retransmission *is* the signal (the TWGO family, CRLs,
//! service status, cancellations) bypass the filter entirely.

use std::collections::HashMap;

use chrono::{
    DateTime,
    Duration,
    Utc,
};

use crate::{
    config::Config,
    products::Product,
    types::ProductType,
};

/// Cache cap; the least recently seen entry is evicted on pressure.
const MAX_CACHE_ENTRIES: usize = 16384;

#[derive(Debug)]
struct CacheEntry {
    digest: String,
    last_forwarded: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ChangeFilter {
    ttl: Duration,
    refresh_floor: Duration,
    expunge_interval: Duration,
    always_forward_pireps: bool,
    cache: HashMap<(ProductType, String), CacheEntry>,
    last_expunge: Option<DateTime<Utc>>,
}

impl ChangeFilter {
    pub fn new(config: &Config) -> Self {
        Self {
            ttl: Duration::minutes(config.dedup_ttl_mins),
            refresh_floor: Duration::minutes(config.dedup_refresh_floor_mins),
            expunge_interval: Duration::minutes(config.expunge_interval_mins as i64),
            always_forward_pireps: config.always_forward_pireps,
            cache: HashMap::new(),
            last_expunge: None,
        }
    }

    /// Decide whether `product` flows downstream.
    pub fn should_forward(&mut self, product: &Product) -> bool {
        if product.product_type.bypasses_dedup() {
            return true;
        }
        if product.product_type == ProductType::Pirep && self.always_forward_pireps {
            return true;
        }

        let now = product.rcvd_time;
        self.maybe_expunge(now);

        let key = product.key();
        let digest = product.digest();

        if !self.cache.contains_key(&key) && self.cache.len() >= MAX_CACHE_ENTRIES {
            if let Some(oldest) = self
                .cache
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(key, _)| key.clone())
            {
                self.cache.remove(&oldest);
            }
        }

        let forward = match self.cache.get(&key) {
            None => true,
            Some(entry) => {
                entry.digest != digest || now - entry.last_forwarded >= self.refresh_floor
            }
        };

        let entry = self.cache.entry(key).or_insert_with(|| {
            CacheEntry {
                digest: digest.clone(),
                last_forwarded: now,
                last_seen: now,
            }
        });
        entry.digest = digest;
        entry.last_seen = now;
        if forward {
            entry.last_forwarded = now;
        }

        forward
    }

    fn maybe_expunge(&mut self, now: DateTime<Utc>) {
        match self.last_expunge {
            None => {
                self.last_expunge = Some(now);
                return;
            }
            Some(last) if now - last <= self.expunge_interval => return,
            _ => {}
        }
        self.last_expunge = Some(now);

        let ttl = self.ttl;
        self.cache.retain(|_, entry| now - entry.last_seen <= ttl);
    }
}
