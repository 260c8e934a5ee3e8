//! CRL reconciliation.
//!
//! A CRL is the station's own index of what should be in the store. The
//! curator annotates each listed report with whether all its required
//! parts are actually present and unexpired, and the list as a whole with
//! `Complete`/`Incomplete`. Overflowed lists can never be complete: they
//! are an admission that the list itself is truncated.

use chrono::{
    DateTime,
    Utc,
};

use crate::{
    harvest::store::{
        Store,
        StoreError,
    },
    products::CrlStatus,
    types::{
        ProductType,
        StationId,
    },
};

/// Product types a CRL of the given class indexes.
pub fn report_types(crl_product_id: u16) -> &'static [ProductType] {
    match crl_product_id {
        8 => &[ProductType::NotamTfr],
        11 => &[ProductType::Airmet],
        12 => &[ProductType::Sigmet, ProductType::Wst],
        14 => &[
            ProductType::GAirmet00Hr,
            ProductType::GAirmet03Hr,
            ProductType::GAirmet06Hr,
        ],
        15 => &[ProductType::Cwa],
        16 => &[ProductType::NotamTra],
        17 => &[ProductType::NotamTmoa],
        _ => &[],
    }
}

/// Whether a stored report satisfies a CRL entry's part requirements.
fn parts_present<S: Store>(
    store: &S,
    types: &[ProductType],
    id: &str,
    needs_both: bool,
    now: DateTime<Utc>,
) -> bool {
    for product_type in types {
        // D-NOTAM ids get a location suffix; CRL-listed classes do not,
        // so an exact match is correct here.
        let Some(product) = store.get(*product_type, id)
        else {
            continue;
        };

        if product.expiration_time <= now {
            continue;
        }

        if needs_both {
            let has_text = product.contents.is_some();
            let has_graphics = !product.geometry.is_empty() || product.geojson.is_some();
            if has_text && has_graphics {
                return true;
            }
        }
        else {
            return true;
        }
    }

    false
}

/// Recompute one CRL's annotations in place. With `prune_unlisted`, also
/// drop stored reports of the class that the station no longer lists —
/// only sensible when a single station is in range.
pub fn reconcile<S: Store>(
    store: &mut S,
    crl_product_id: u16,
    station: &StationId,
    now: DateTime<Utc>,
    prune_unlisted: bool,
) -> Result<(), StoreError> {
    let unique_name = format!("CRL-{crl_product_id}-{station}");
    let Some(product) = store.get(ProductType::Crl(crl_product_id), &unique_name)
    else {
        return Ok(());
    };

    let mut product = product.clone();
    let Some(crl) = product.crl.as_mut()
    else {
        return Ok(());
    };

    let types = report_types(crl_product_id);
    let mut all_complete = true;

    for report in &mut crl.reports {
        let needs_both = report.has_text && report.has_graphics;
        report.complete = parts_present(store, types, &report.id, needs_both, now);
        all_complete &= report.complete;
    }

    crl.status = Some(if all_complete && !crl.has_overflow {
        CrlStatus::Complete
    }
    else {
        CrlStatus::Incomplete
    });

    // An overflowed list is truncated; what is missing from it proves
    // nothing.
    if prune_unlisted && !crl.has_overflow {
        let listed: Vec<String> = crl.reports.iter().map(|report| report.id.clone()).collect();
        for product_type in types {
            let unlisted: Vec<String> = store
                .by_type(*product_type)
                .iter()
                .filter(|stored| !listed.contains(&stored.unique_name))
                .map(|stored| stored.unique_name.clone())
                .collect();
            for unique_name in unlisted {
                store.remove(*product_type, &unique_name);
            }
        }
    }

    store.upsert(product)
}

/// Immediate update path: a report with a CRL-bearing class arrived; bring
/// its station's CRL up to date right away.
pub fn update_for_report<S: Store>(
    store: &mut S,
    product_type: ProductType,
    station: &StationId,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if let Some(crl_product_id) = product_type.crl_product_id() {
        reconcile(store, crl_product_id, station, now, false)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{
        Duration,
        TimeZone,
        Utc,
    };

    use crate::{
        harvest::{
            crl::reconcile,
            store::{
                MemoryStore,
                Store,
            },
        },
        products::{
            CrlFields,
            CrlReportRef,
            CrlStatus,
            Product,
        },
        types::{
            ProductType,
            StationId,
        },
    };

    fn station() -> StationId {
        StationId::from_position(40.0383, -86.255593)
    }

    fn crl_product(
        now: chrono::DateTime<Utc>,
        overflow: bool,
        reports: Vec<CrlReportRef>,
    ) -> Product {
        let mut product = Product::new(
            ProductType::Crl(8),
            format!("CRL-8-{}", station()),
            now,
            now + Duration::minutes(20),
        );
        product.station = Some(station());
        product.crl = Some(CrlFields {
            range_nm: 100,
            has_overflow: overflow,
            reports,
            status: None,
        });
        product
    }

    fn report_ref(id: &str, has_graphics: bool) -> CrlReportRef {
        CrlReportRef {
            id: id.to_owned(),
            has_text: true,
            has_graphics,
            complete: false,
        }
    }

    fn stored_tfr(now: chrono::DateTime<Utc>, id: &str, with_graphics: bool) -> Product {
        let mut product = Product::new(
            ProductType::NotamTfr,
            id,
            now,
            now + Duration::hours(1),
        );
        product.contents = Some("NOTAM-TFR ...".into());
        if with_graphics {
            product.geojson = Some(serde_json::json!({"type": "FeatureCollection"}));
        }
        product
    }

    #[test]
    fn it_marks_a_satisfied_list_complete() {
        let now = Utc.with_ymd_and_hms(2021, 5, 14, 12, 0, 0).unwrap();
        let mut store = MemoryStore::new();

        store.upsert(stored_tfr(now, "21-123", true)).unwrap();
        store
            .upsert(crl_product(now, false, vec![report_ref("21-123", true)]))
            .unwrap();

        reconcile(&mut store, 8, &station(), now, false).unwrap();

        let crl = store
            .get(ProductType::Crl(8), &format!("CRL-8-{}", station()))
            .unwrap()
            .crl
            .clone()
            .unwrap();
        assert_eq!(crl.status, Some(CrlStatus::Complete));
        assert!(crl.reports[0].complete);
    }

    #[test]
    fn it_requires_both_parts_for_tg_entries() {
        let now = Utc.with_ymd_and_hms(2021, 5, 14, 12, 0, 0).unwrap();
        let mut store = MemoryStore::new();

        // text stored, graphics missing
        store.upsert(stored_tfr(now, "21-123", false)).unwrap();
        store
            .upsert(crl_product(now, false, vec![report_ref("21-123", true)]))
            .unwrap();

        reconcile(&mut store, 8, &station(), now, false).unwrap();

        let crl = store
            .get(ProductType::Crl(8), &format!("CRL-8-{}", station()))
            .unwrap()
            .crl
            .clone()
            .unwrap();
        assert_eq!(crl.status, Some(CrlStatus::Incomplete));
        assert!(!crl.reports[0].complete);
    }

    #[test]
    fn it_never_marks_an_overflowed_list_complete() {
        let now = Utc.with_ymd_and_hms(2021, 5, 14, 12, 0, 0).unwrap();
        let mut store = MemoryStore::new();

        store.upsert(stored_tfr(now, "21-123", true)).unwrap();
        store
            .upsert(crl_product(now, true, vec![report_ref("21-123", true)]))
            .unwrap();

        reconcile(&mut store, 8, &station(), now, false).unwrap();

        let crl = store
            .get(ProductType::Crl(8), &format!("CRL-8-{}", station()))
            .unwrap()
            .crl
            .clone()
            .unwrap();
        // every entry resolves, but overflow forbids completeness
        assert!(crl.reports[0].complete);
        assert_eq!(crl.status, Some(CrlStatus::Incomplete));
    }

    #[test]
    fn it_treats_expired_reports_as_missing() {
        let now = Utc.with_ymd_and_hms(2021, 5, 14, 12, 0, 0).unwrap();
        let mut store = MemoryStore::new();

        let mut expired = stored_tfr(now, "21-123", true);
        expired.expiration_time = now - Duration::minutes(1);
        store.upsert(expired).unwrap();
        store
            .upsert(crl_product(now, false, vec![report_ref("21-123", true)]))
            .unwrap();

        reconcile(&mut store, 8, &station(), now, false).unwrap();

        let crl = store
            .get(ProductType::Crl(8), &format!("CRL-8-{}", station()))
            .unwrap()
            .crl
            .clone()
            .unwrap();
        assert_eq!(crl.status, Some(CrlStatus::Incomplete));
    }
}
