//! # Harvest
//!
//! The curator. Owns the authoritative current-state store (single-writer)
//! and materializes it from spooled products: replace-by-key upserts,
//! periodic expiration through the virtual clock, CRL coherence, raster
//! assembly, and optional location enrichment.

pub mod crl;
pub mod images;
pub mod location;
pub mod palette;
pub mod store;
pub mod trigger;
pub mod vectors;

use std::collections::HashMap;

use chrono::{
    DateTime,
    Duration,
    Utc,
};
use tokio::sync::oneshot;
use tracing::{
    debug,
    info,
    warn,
};

use crate::{
    clock::Clock,
    config::Config,
    harvest::{
        images::ImageAssembler,
        location::LocationDb,
        store::{
            Store,
            StoreError,
        },
        trigger::TriggerRunner,
    },
    products::Product,
    sink::ErrorSink,
    spool,
    types::{
        ProductType,
        StationId,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Image(#[from] images::ImageError),

    #[error(transparent)]
    Location(#[from] location::LocationError),

    #[error(transparent)]
    Trigger(#[from] trigger::TriggerError),

    #[error("spool error")]
    Spool(#[from] spool::Error),
}

pub struct Harvester<S: Store> {
    config: Config,
    clock: Clock,
    store: S,
    images: ImageAssembler,
    location: Option<LocationDb>,
    triggers: Option<TriggerRunner>,
    /// Pooled service-status traffic per station: successive messages list
    /// different subsets of the tracked aircraft.
    service_pool: HashMap<StationId, HashMap<String, DateTime<Utc>>>,
    sink: ErrorSink,
    last_maintenance: Option<DateTime<Utc>>,
}

impl<S: Store> Harvester<S> {
    pub fn new(config: &Config, clock: Clock, store: S) -> Result<Self, HarvestError> {
        let location = match &config.location_dir {
            Some(dir) => Some(LocationDb::load(dir)?),
            None => None,
        };

        Ok(Self {
            config: config.clone(),
            clock,
            store,
            images: ImageAssembler::new(config)?,
            location,
            triggers: None,
            service_pool: HashMap::new(),
            sink: ErrorSink::open("harvest"),
            last_maintenance: None,
        })
    }

    /// Arm the test-mode trigger schedule.
    pub fn with_test_group(mut self, test_number: u32) -> Result<Self, HarvestError> {
        self.triggers = Some(TriggerRunner::new(
            &self.config.trigger_dir,
            &self.config.results_dir,
            &self.config.image_dir,
            test_number,
        )?);
        Ok(self)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply one product to the current state. Idempotent: replaying a
    /// spool file after a crash lands on the same state.
    pub fn apply(&mut self, mut product: Product) -> Result<(), HarvestError> {
        let now = self.clock.now();

        // Dead on arrival: products expired before they got here. Seen
        // when replaying old captures without the virtual clock.
        if self.config.expire_enabled && product.expiration_time <= now {
            debug!(
                product_type = %product.product_type,
                unique_name = %product.unique_name,
                "dropping product expired on arrival"
            );
            return Ok(());
        }

        product.insert_time = Some(now);

        match product.product_type {
            ProductType::Image(_) => {
                // tiles merge into rasters; only the rendered summary
                // reaches the store, during maintenance
                self.images.ingest(&product, now);
                Ok(())
            }
            ProductType::Crl(product_id) => {
                let station = product.station.clone();
                self.store.upsert(product)?;
                if self.config.annotate_crl {
                    if let Some(station) = station {
                        crl::reconcile(
                            &mut self.store,
                            product_id,
                            &station,
                            now,
                            self.config.prune_unlisted_reports,
                        )?;
                    }
                }
                Ok(())
            }
            ProductType::ServiceStatus => {
                self.apply_service_status(product)?;
                Ok(())
            }
            ProductType::CancelNotam => {
                self.cancel(
                    &[
                        ProductType::NotamTfr,
                        ProductType::NotamFdc,
                        ProductType::NotamTra,
                        ProductType::NotamTmoa,
                        ProductType::NotamD,
                    ],
                    product,
                )
            }
            ProductType::CancelCwa => self.cancel(&[ProductType::Cwa], product),
            ProductType::CancelGAirmet => {
                self.cancel(
                    &[
                        ProductType::GAirmet00Hr,
                        ProductType::GAirmet03Hr,
                        ProductType::GAirmet06Hr,
                    ],
                    product,
                )
            }
            product_type => {
                if let Some(db) = &self.location {
                    location::enrich(&mut product, db, &self.config);
                }

                // stored TWGO geometry is served as GeoJSON
                if product_type.is_twgo() {
                    vectors::geometry_to_geojson(&mut product);
                }

                let station = product.station.clone();
                self.store.upsert(product)?;

                if self.config.immediate_crl_update {
                    if let Some(station) = station {
                        crl::update_for_report(&mut self.store, product_type, &station, now)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Merge one service status message into the station pool and store
    /// the pooled view.
    fn apply_service_status(&mut self, product: Product) -> Result<(), HarvestError> {
        let Some(station) = product.station.clone()
        else {
            return Ok(());
        };

        let pool = self.service_pool.entry(station).or_default();
        for address in product.traffic.iter().flatten() {
            pool.insert(address.clone(), product.expiration_time);
        }

        let now = self.clock.now();
        pool.retain(|_, expires| *expires > now);

        let mut traffic: Vec<String> = pool.keys().cloned().collect();
        traffic.sort();

        let mut pooled = product;
        pooled.traffic = Some(traffic);
        self.store.upsert(pooled)?;

        Ok(())
    }

    /// Apply a cancellation: delete the target record(s) and keep a
    /// short-lived tombstone so late retransmissions of the report don't
    /// resurrect it unnoticed.
    fn cancel(
        &mut self,
        targets: &[ProductType],
        tombstone: Product,
    ) -> Result<(), HarvestError> {
        let id = tombstone.unique_name.clone();

        for target in targets {
            if self.store.remove(*target, &id).is_some() {
                info!(product_type = %target, unique_name = %id, "report cancelled");
            }

            // D-NOTAM ids carry a location suffix
            if *target == ProductType::NotamD {
                let suffixed: Vec<String> = self
                    .store
                    .by_type(ProductType::NotamD)
                    .iter()
                    .filter(|product| {
                        product.unique_name.starts_with(&format!("{id}-"))
                    })
                    .map(|product| product.unique_name.clone())
                    .collect();
                for unique_name in suffixed {
                    self.store.remove(ProductType::NotamD, &unique_name);
                    info!(unique_name = %unique_name, "report cancelled");
                }
            }
        }

        self.store.upsert(tombstone)?;
        Ok(())
    }

    /// One maintenance tick: expiration sweep, raster upkeep, CRL
    /// re-annotation for anything the sweep removed.
    pub fn maintenance(&mut self) -> Result<(), HarvestError> {
        let now = self.clock.now();

        if self.config.expire_enabled {
            let removed = self.store.remove_expired(now);
            if !removed.is_empty() {
                debug!(count = removed.len(), "expired products");

                if self.config.annotate_crl {
                    // removal can break a CRL's completeness
                    let mut stations: Vec<(u16, StationId)> = Vec::new();
                    for crl_product in self.store.all() {
                        if let ProductType::Crl(product_id) = crl_product.product_type {
                            if let Some(station) = &crl_product.station {
                                stations.push((product_id, station.clone()));
                            }
                        }
                    }
                    for (product_id, station) in stations {
                        crl::reconcile(
                            &mut self.store,
                            product_id,
                            &station,
                            now,
                            self.config.prune_unlisted_reports,
                        )?;
                    }
                }
            }
        }

        let maintenance = self.images.maintain(now)?;
        for summary in maintenance.updates {
            self.store.upsert(summary)?;
        }
        for image in maintenance.removals {
            self.store
                .remove(ProductType::Image(image), &image.to_string());
        }

        self.last_maintenance = Some(now);
        Ok(())
    }

    fn maintenance_due(&self) -> bool {
        match self.last_maintenance {
            None => true,
            Some(last) => {
                self.clock.now() - last
                    >= Duration::seconds(self.config.maint_interval_secs as i64)
            }
        }
    }

    /// Drain and apply everything currently in the spool, deleting each
    /// file after successful application.
    pub fn drain_spool(&mut self) -> Result<usize, HarvestError> {
        let files = spool::list(&self.config.spool_dir)?;
        let count = files.len();

        for path in files {
            match spool::read(&path) {
                Ok(product) => {
                    match self.apply(product) {
                        Ok(()) => {}
                        // leave the file for replay after backoff
                        Err(HarvestError::Store(error @ StoreError::Transient { .. })) => {
                            return Err(error.into());
                        }
                        Err(error) => self.sink.record(&error, path.to_str()),
                    }
                }
                Err(error) => {
                    self.sink.record(&error, path.to_str());
                }
            }
            std::fs::remove_file(&path).map_err(spool::Error::from)?;

            if self.maintenance_due() {
                self.maintenance()?;
            }
            self.check_triggers()?;
        }

        Ok(count)
    }

    fn check_triggers(&mut self) -> Result<(), HarvestError> {
        if let Some(triggers) = &mut self.triggers {
            triggers.check(&self.store, self.clock.now())?;
        }
        Ok(())
    }

    /// Ingest loop. Runs until `stop` fires, then drains the spool once
    /// more and returns — after a clean stop the spool is empty.
    pub async fn run(&mut self, mut stop: oneshot::Receiver<()>) -> Result<(), HarvestError> {
        std::fs::create_dir_all(&self.config.spool_dir).map_err(spool::Error::from)?;

        info!(
            spool = %self.config.spool_dir.display(),
            virtual_clock = self.clock.is_offset(),
            "harvest running"
        );

        loop {
            if self.maintenance_due() {
                self.maintenance()?;
            }
            self.check_triggers()?;

            let applied = match self.drain_spool() {
                Ok(applied) => applied,
                Err(HarvestError::Store(StoreError::Transient { reason })) => {
                    warn!(%reason, "transient store failure, backing off");
                    tokio::time::sleep(std::time::Duration::from_secs(
                        self.config.retry_store_secs,
                    ))
                    .await;
                    continue;
                }
                Err(error) => return Err(error),
            };

            match stop.try_recv() {
                Ok(()) | Err(oneshot::error::TryRecvError::Closed) => {
                    self.drain_spool()?;
                    self.maintenance()?;
                    info!("harvest stopped, spool drained");
                    return Ok(());
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
            }

            // A test run is over once every trigger has fired and the
            // spool is dry.
            if applied == 0 {
                if let Some(triggers) = &self.triggers {
                    if triggers.is_done() {
                        self.maintenance()?;
                        info!("test group complete");
                        return Ok(());
                    }
                }
            }

            if applied == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            }
        }
    }
}
