//! GeoJSON conversion and vector export.
//!
//! Stored products carry the wire-shaped `geometry` list; consumers want
//! GeoJSON. Circles are rendered as 32-point polygons. The CSV/WKT export
//! feeds mapping tools directly.

use std::io::Write;

use serde_json::json;

use crate::{
    geometry::{
        Coordinates,
        GeometryElement,
        ShapeKind,
    },
    harvest::store::Store,
    products::Product,
};

const CIRCLE_SEGMENTS: u32 = 32;

/// Approximate a circle as a closed polygon. Radius is nautical miles
/// (arc minutes of latitude).
pub fn circle_to_polygon(longitude: f64, latitude: f64, radius_nm: f64) -> Vec<[f64; 2]> {
    let radius_deg = radius_nm / 60.0;
    let stretch = 1.0 / latitude.to_radians().cos();

    let mut points = Vec::with_capacity(CIRCLE_SEGMENTS as usize + 1);
    for i in 0..=CIRCLE_SEGMENTS {
        let angle = (i as f64 / CIRCLE_SEGMENTS as f64) * std::f64::consts::TAU;
        points.push([
            longitude + radius_deg * stretch * angle.sin(),
            latitude + radius_deg * angle.cos(),
        ]);
    }

    points
}

fn feature(element: &GeometryElement, id: &str) -> serde_json::Value {
    let geometry = match (&element.shape, &element.coordinates) {
        (ShapeKind::Point, Coordinates::Point(point)) => {
            json!({"type": "Point", "coordinates": point})
        }
        (ShapeKind::Circle, Coordinates::Point(center)) => {
            let ring =
                circle_to_polygon(center[0], center[1], element.radius_nm.unwrap_or(0.0));
            json!({"type": "Polygon", "coordinates": [ring]})
        }
        (ShapeKind::Polygon, Coordinates::Path(path)) => {
            json!({"type": "Polygon", "coordinates": [path]})
        }
        (ShapeKind::Polyline, Coordinates::Path(path)) => {
            json!({"type": "LineString", "coordinates": path})
        }
        // a shape kind with the wrong coordinate form cannot be built by
        // the geometry pass; render it as an empty collection
        _ => json!({"type": "GeometryCollection", "geometries": []}),
    };

    let mut properties = serde_json::Map::new();
    properties.insert("id".to_owned(), json!(id));
    properties.insert("altitudes".to_owned(), json!(element.altitudes));
    if let Some(start) = element.start_time {
        properties.insert("start_time".to_owned(), json!(start));
    }
    if let Some(stop) = element.stop_time {
        properties.insert("stop_time".to_owned(), json!(stop));
    }
    if let Some(label) = &element.element {
        properties.insert("element".to_owned(), json!(label));
    }
    if let Some(conditions) = &element.conditions {
        properties.insert("conditions".to_owned(), json!(conditions));
    }

    json!({"type": "Feature", "geometry": geometry, "properties": properties})
}

/// Replace a product's `geometry` list with an equivalent `geojson`
/// feature collection.
pub fn geometry_to_geojson(product: &mut Product) {
    if product.geometry.is_empty() {
        return;
    }

    let features: Vec<serde_json::Value> = product
        .geometry
        .iter()
        .map(|element| feature(element, &product.unique_name))
        .collect();

    product.geojson = Some(json!({"type": "FeatureCollection", "features": features}));
    product.geometry.clear();
}

fn wkt(element: &GeometryElement) -> Option<String> {
    let path_wkt = |path: &[[f64; 2]]| {
        path.iter()
            .map(|p| format!("{} {}", p[0], p[1]))
            .collect::<Vec<_>>()
            .join(", ")
    };

    match (&element.shape, &element.coordinates) {
        (ShapeKind::Point, Coordinates::Point(point)) => {
            Some(format!("POINT ({} {})", point[0], point[1]))
        }
        (ShapeKind::Circle, Coordinates::Point(center)) => {
            let ring =
                circle_to_polygon(center[0], center[1], element.radius_nm.unwrap_or(0.0));
            Some(format!("POLYGON (({}))", path_wkt(&ring)))
        }
        (ShapeKind::Polygon, Coordinates::Path(path)) => {
            Some(format!("POLYGON (({}))", path_wkt(path)))
        }
        (ShapeKind::Polyline, Coordinates::Path(path)) => {
            Some(format!("LINESTRING ({})", path_wkt(path)))
        }
        _ => None,
    }
}

fn geojson_wkt(geometry: &serde_json::Value) -> Option<String> {
    let point = |value: &serde_json::Value| {
        Some(format!("{} {}", value.get(0)?.as_f64()?, value.get(1)?.as_f64()?))
    };
    let path = |value: &serde_json::Value| -> Option<String> {
        let points: Option<Vec<String>> = value.as_array()?.iter().map(point).collect();
        Some(points?.join(", "))
    };

    match geometry.get("type")?.as_str()? {
        "Point" => Some(format!("POINT ({})", point(geometry.get("coordinates")?)?)),
        "LineString" => {
            Some(format!("LINESTRING ({})", path(geometry.get("coordinates")?)?))
        }
        "Polygon" => {
            let ring = geometry.get("coordinates")?.get(0)?;
            Some(format!("POLYGON (({}))", path(ring)?))
        }
        _ => None,
    }
}

/// Export every stored vector layer as CSV with WKT geometry, one row per
/// geometry element. Stored TWGO products carry GeoJSON; anything not yet
/// converted exports from its raw geometry list.
pub fn dump<S: Store, W: Write>(store: &S, mut out: W) -> std::io::Result<()> {
    writeln!(out, "type,unique_name,element,wkt")?;

    for product in store.all() {
        for element in &product.geometry {
            let Some(wkt) = wkt(element)
            else {
                continue;
            };
            writeln!(
                out,
                "{},{},{},\"{}\"",
                product.product_type,
                product.unique_name,
                element.element.as_deref().unwrap_or(""),
                wkt
            )?;
        }

        let features = product
            .geojson
            .as_ref()
            .and_then(|geojson| geojson.get("features"))
            .and_then(|features| features.as_array());
        for feature in features.into_iter().flatten() {
            let Some(wkt) = feature.get("geometry").and_then(geojson_wkt)
            else {
                continue;
            };
            let element = feature
                .pointer("/properties/element")
                .and_then(|value| value.as_str())
                .unwrap_or("");
            writeln!(
                out,
                "{},{},{},\"{}\"",
                product.product_type, product.unique_name, element, wkt
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{
        TimeZone,
        Utc,
    };

    use crate::{
        geometry::{
            AltitudeReference,
            Altitudes,
            Coordinates,
            GeometryElement,
            ShapeKind,
        },
        harvest::vectors::{
            circle_to_polygon,
            geometry_to_geojson,
        },
        products::Product,
        types::ProductType,
    };

    #[test]
    fn it_closes_the_circle_polygon() {
        let ring = circle_to_polygon(-84.218445, 39.90097, 30.0);
        assert_eq!(ring.len(), 33);
        assert_eq!(ring.first(), ring.last());

        // radius check along the north axis
        let north = ring[0];
        assert!((north[1] - (39.90097 + 0.5)).abs() < 1e-9);
    }

    #[test]
    fn it_dumps_stored_geojson_as_wkt() {
        use crate::harvest::store::{
            MemoryStore,
            Store,
        };

        let rcvd = Utc.with_ymd_and_hms(2021, 5, 14, 12, 0, 0).unwrap();
        let mut product = Product::new(ProductType::Airmet, "21-1205", rcvd, rcvd);
        product.geojson = Some(serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[-84.0, 39.0], [-84.0, 40.0], [-83.0, 40.0], [-84.0, 39.0]]],
                },
                "properties": {"id": "21-1205", "element": "IFR"},
            }],
        }));

        let mut store = MemoryStore::new();
        store.upsert(product).unwrap();

        let mut out = Vec::new();
        crate::harvest::vectors::dump(&store, &mut out).unwrap();
        let csv = String::from_utf8(out).unwrap();

        assert!(csv.contains("AIRMET,21-1205,IFR,\"POLYGON ((-84 39, -84 40, -83 40, -84 39))\""));
    }

    #[test]
    fn it_converts_geometry_to_a_feature_collection() {
        let rcvd = Utc.with_ymd_and_hms(2021, 5, 14, 12, 0, 0).unwrap();
        let mut product = Product::new(ProductType::NotamTfr, "0-6733", rcvd, rcvd);
        product.geometry = vec![GeometryElement {
            shape: ShapeKind::Circle,
            coordinates: Coordinates::Point([-84.218445, 39.90097]),
            altitudes: Altitudes {
                top_ft: 4000,
                top_reference: AltitudeReference::Agl,
                bottom_ft: 0,
                bottom_reference: AltitudeReference::Agl,
            },
            radius_nm: Some(30.0),
            start_time: None,
            stop_time: None,
            cancelled: false,
            element: Some("TFR".to_owned()),
            airport_id: None,
            conditions: None,
        }];

        geometry_to_geojson(&mut product);

        assert!(product.geometry.is_empty());
        let geojson = product.geojson.unwrap();
        assert_eq!(geojson["type"], "FeatureCollection");
        assert_eq!(geojson["features"][0]["geometry"]["type"], "Polygon");
        assert_eq!(geojson["features"][0]["properties"]["id"], "0-6733");
    }
}
