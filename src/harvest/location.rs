//! Location enrichment.
//!
//! A read-only side store (airports, navaids, designated points, SUA
//! shapes, a magnetic declination grid) attaches positions to products
//! that only name places. PIREP `/OV` fields are the hard case: a fix,
//! optionally with a magnetic bearing and distance, hand-typed by humans.
//! Bearings are corrected magnetic-to-true with the declination at the
//! base fix; when no declination is known the product goes out without a
//! position rather than guessing.

use std::{
    collections::HashMap,
    path::Path,
    sync::LazyLock,
};

use regex::Regex;
use serde_json::json;
use tracing::debug;

use crate::{
    config::Config,
    products::Product,
    types::ProductType,
};

static OV_FIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z0-9]{3,5})(?:([0-9]{3})([0-9]{3}))?$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("location store i/o error")]
    Io(#[from] std::io::Error),
    #[error("location store parse error")]
    Json(#[from] serde_json::Error),
}

/// Read-only location side store, loaded once at curator start.
#[derive(Debug, Default)]
pub struct LocationDb {
    airports: HashMap<String, [f64; 2]>,
    navaids: HashMap<String, [f64; 2]>,
    designated_points: HashMap<String, [f64; 2]>,
    sua_shapes: HashMap<String, Vec<[f64; 2]>>,
    /// One-degree declination grid keyed by (lat, lon) floor degrees,
    /// east positive.
    declination: HashMap<(i32, i32), f64>,
}

impl LocationDb {
    pub fn load(directory: &Path) -> Result<Self, LocationError> {
        fn table(path: &Path) -> Result<HashMap<String, [f64; 2]>, LocationError> {
            if !path.is_file() {
                return Ok(HashMap::new());
            }
            Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
        }

        let mut db = Self {
            airports: table(&directory.join("airports.json"))?,
            navaids: table(&directory.join("navaids.json"))?,
            designated_points: table(&directory.join("designated_points.json"))?,
            sua_shapes: HashMap::new(),
            declination: HashMap::new(),
        };

        let sua_path = directory.join("sua.json");
        if sua_path.is_file() {
            db.sua_shapes = serde_json::from_str(&std::fs::read_to_string(&sua_path)?)?;
        }

        let declination_path = directory.join("declination.json");
        if declination_path.is_file() {
            let cells: Vec<(i32, i32, f64)> =
                serde_json::from_str(&std::fs::read_to_string(&declination_path)?)?;
            db.declination = cells
                .into_iter()
                .map(|(lat, lon, value)| ((lat, lon), value))
                .collect();
        }

        Ok(db)
    }

    /// Position of a weather reporting location. Four-letter K idents fall
    /// back to their three-letter form.
    pub fn wx_position(&self, ident: &str) -> Option<[f64; 2]> {
        if let Some(position) = self.airports.get(ident) {
            return Some(*position);
        }
        if let Some(short) = ident.strip_prefix('K') {
            if let Some(position) = self.airports.get(short) {
                return Some(*position);
            }
        }
        None
    }

    fn fix_position(&self, ident: &str) -> Option<[f64; 2]> {
        self.navaids
            .get(ident)
            .or_else(|| self.designated_points.get(ident))
            .or_else(|| self.airports.get(ident))
            .copied()
    }

    pub fn declination_at(&self, latitude: f64, longitude: f64) -> Option<f64> {
        self.declination
            .get(&(latitude.floor() as i32, longitude.floor() as i32))
            .copied()
    }

    /// Resolve a PIREP `/OV` field: `FIX` or `FIXbbbddd` (magnetic bearing
    /// and distance in NM). Compound fields (routes, free text) do not
    /// resolve.
    pub fn resolve_ov(&self, ov: &str) -> Option<[f64; 2]> {
        let first = ov.split_whitespace().next()?;
        let captures = OV_FIX_RE.captures(first)?;

        let base = self.fix_position(&captures[1])?;

        let (Some(bearing), Some(distance)) = (captures.get(2), captures.get(3))
        else {
            return Some(base);
        };

        let magnetic_bearing: f64 = bearing.as_str().parse().ok()?;
        let distance_nm: f64 = distance.as_str().parse().ok()?;

        // bearing 000..360 with distance 0 is the fix itself
        if distance_nm == 0.0 {
            return Some(base);
        }

        // magnetic to true; without a declination we refuse to guess
        let declination = self.declination_at(base[1], base[0])?;
        let true_bearing = (magnetic_bearing + declination).to_radians();

        let latitude = base[1] + distance_nm * true_bearing.cos() / 60.0;
        let longitude =
            base[0] + distance_nm * true_bearing.sin() / (60.0 * base[1].to_radians().cos());

        Some([longitude, latitude])
    }

    pub fn sua_shape(&self, key: &str) -> Option<&Vec<[f64; 2]>> {
        self.sua_shapes.get(key)
    }
}

fn point_feature(id: &str, position: [f64; 2]) -> serde_json::Value {
    json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": position},
            "properties": {"id": id},
        }],
    })
}

/// Attach a `geojson` position to one product, per the enrichment flags.
/// Unresolvable PIREPs optionally log to a side file.
pub fn enrich(product: &mut Product, db: &LocationDb, config: &Config) {
    match product.product_type {
        ProductType::Metar
        | ProductType::Taf
        | ProductType::Winds06Hr
        | ProductType::Winds12Hr
        | ProductType::Winds24Hr => {
            if !config.wx_location {
                return;
            }
            let Some(location) = &product.location
            else {
                return;
            };
            if let Some(position) = db.wx_position(location) {
                product.geojson = Some(point_feature(&product.unique_name, position));
            }
        }
        ProductType::Pirep => {
            if !config.pirep_location {
                return;
            }
            let ov = product
                .pirep
                .as_ref()
                .and_then(|pirep| pirep.fields.get("ov").cloned());
            match ov.as_deref().and_then(|ov| db.resolve_ov(ov)) {
                Some(position) => {
                    product.geojson = Some(point_feature(&product.unique_name, position));
                }
                None => {
                    debug!(unique_name = %product.unique_name, "PIREP position unresolved");
                    if config.save_unmatched_pireps {
                        if let Some(contents) = &product.contents {
                            let _ = std::fs::OpenOptions::new()
                                .append(true)
                                .create(true)
                                .open(&config.unmatched_pireps_file)
                                .and_then(|mut file| {
                                    use std::io::Write;
                                    writeln!(file, "{contents}")
                                });
                        }
                    }
                }
            }
        }
        ProductType::Sua => {
            if !config.sua_location {
                return;
            }
            let Some(sua) = &product.sua
            else {
                return;
            };
            let shape = sua
                .nfdc_id
                .as_deref()
                .and_then(|id| db.sua_shape(id))
                .or_else(|| db.sua_shape(&sua.airspace_id));
            if let Some(ring) = shape {
                product.geojson = Some(json!({
                    "type": "FeatureCollection",
                    "features": [{
                        "type": "Feature",
                        "geometry": {"type": "Polygon", "coordinates": [ring]},
                        "properties": {"id": product.unique_name},
                    }],
                }));
            }
        }
        _ => {}
    }
}
