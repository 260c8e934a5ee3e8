//! Geometry synthesis from overlay records.
//!
//! Overlay records cap at 64 vertices, so large polygons and polylines
//! span several records that have to be stitched back together. Records
//! also encode the altitude band inside each vertex; a typical two-band
//! shape arrives as two identical coordinate runs differing only in
//! altitude. This module flattens all of that into self-contained geometry
//! elements.

use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    frame::twgo::{
        GraphicRecord,
        OBJECT_ELEMENTS,
        Vertex,
    },
    time,
};

#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    #[error("record without geometry")]
    NoGeometry,

    #[error("circular prism is not a plain circle")]
    FancyPrism,

    #[error("altitude bands have different footprints")]
    AltitudesDontMatch,

    #[error("more than two altitude bands")]
    TooManyAltitudes,

    #[error("combined records disagree: {reason}")]
    OperatorMismatch { reason: &'static str },

    #[error(transparent)]
    Time(#[from] time::TimeError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeKind {
    #[serde(rename = "POLYGON")]
    Polygon,
    #[serde(rename = "POLYLINE")]
    Polyline,
    #[serde(rename = "CIRCLE")]
    Circle,
    #[serde(rename = "POINT")]
    Point,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AltitudeReference {
    #[serde(rename = "MSL")]
    Msl,
    #[serde(rename = "AGL")]
    Agl,
}

/// Altitude band. Top first, matching the broadcast order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Altitudes {
    pub top_ft: u32,
    pub top_reference: AltitudeReference,
    pub bottom_ft: u32,
    pub bottom_reference: AltitudeReference,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coordinates {
    /// Lon/lat of a point or circle center.
    Point([f64; 2]),
    /// Lon/lat path of a polygon or polyline.
    Path(Vec<[f64; 2]>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeometryElement {
    #[serde(rename = "type")]
    pub shape: ShapeKind,
    pub coordinates: Coordinates,
    pub altitudes: Altitudes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius_nm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub airport_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<String>>,
}

/// Condition qualifiers from the G-AIRMET object qualifier bitmap.
fn decode_qualifiers(qualifiers: &[u8; 3]) -> Vec<String> {
    let mut conditions = Vec::new();

    if qualifiers[0] & 0x80 != 0 {
        conditions.push("UNSPCFD".to_owned());
    }
    if qualifiers[1] & 0x01 != 0 {
        conditions.push("ASH".to_owned());
    }
    for (mask, name) in [
        (0x80, "DUST"),
        (0x40, "CLOUDS"),
        (0x20, "BLSNOW"),
        (0x10, "SMOKE"),
        (0x08, "HAZE"),
        (0x04, "FOG"),
        (0x02, "MIST"),
        (0x01, "PCPN"),
    ] {
        if qualifiers[2] & mask != 0 {
            conditions.push(name.to_owned());
        }
    }

    conditions
}

fn simple_coords(vertex: &Vertex) -> ([f64; 2], u32) {
    match vertex {
        Vertex::Simple {
            longitude,
            latitude,
            altitude_ft,
        } => ([*longitude, *latitude], *altitude_ft),
        Vertex::Prism { .. } => unreachable!("prism vertex in simple geometry"),
    }
}

/// Build geometry elements from the graphic records of one report.
///
/// `reference` is an instant close to the report (start of activity or
/// issue time) used to complete month+day applicability fragments.
pub fn build_elements(
    records: &[GraphicRecord],
    reference: DateTime<Utc>,
    product_id: u16,
) -> Result<Vec<GeometryElement>, GeometryError> {
    let mut records = split_multi_vertex_circles(records);
    merge_continuations(&mut records)?;

    let mut altitude_override = None;
    if product_id == 16 || product_id == 17 {
        altitude_override = merge_operator_pair(&mut records)?;
    }

    let mut elements = Vec::with_capacity(records.len());
    for record in &records {
        let mut element = build_element(record, reference)?;
        if let Some(altitudes) = altitude_override {
            element.altitudes = altitudes;
        }
        elements.push(element);
    }

    Ok(elements)
}

/// Circles and points occasionally arrive with several vertices in one
/// record; split them so each element holds exactly one.
fn split_multi_vertex_circles(records: &[GraphicRecord]) -> Vec<GraphicRecord> {
    let mut result = Vec::with_capacity(records.len());

    for record in records {
        let single = match record.geometry_option {
            Some(option) if option.is_circle() || option.is_point() => record.vertices.len() > 1,
            _ => false,
        };

        if single {
            for vertex in &record.vertices {
                let mut copy = record.clone();
                copy.vertices = vec![*vertex];
                result.push(copy);
            }
        }
        else {
            result.push(record.clone());
        }
    }

    result
}

fn path_of(record: &GraphicRecord) -> Vec<(f64, f64, u32)> {
    record
        .vertices
        .iter()
        .map(|v| {
            let (coords, altitude) = simple_coords(v);
            (coords[0], coords[1], altitude)
        })
        .collect()
}

/// A polygon is complete when its path has returned to its starting
/// vertex (per altitude band).
fn polygon_is_complete(path: &[(f64, f64, u32)]) -> bool {
    let Some(mut start) = path.first().copied()
    else {
        return true;
    };

    let mut complete = false;
    for vertex in &path[1..] {
        if *vertex == start {
            complete = true;
        }
        else if complete {
            // next altitude band starts here
            start = *vertex;
            complete = false;
        }
    }

    complete
}

/// Merge polygon/polyline records that continue the previous record's
/// vertex run.
fn merge_continuations(records: &mut Vec<GraphicRecord>) -> Result<(), GeometryError> {
    let mut merged: Vec<GraphicRecord> = Vec::with_capacity(records.len());

    for record in records.drain(..) {
        let continues = match (merged.last(), record.geometry_option) {
            (Some(previous), Some(option))
                if previous.geometry_option == record.geometry_option =>
            {
                if option.is_polyline() {
                    let prev_path = path_of(previous);
                    let path = path_of(&record);
                    prev_path.last() == path.first()
                }
                else if option.is_polygon() {
                    !polygon_is_complete(&path_of(previous))
                }
                else {
                    false
                }
            }
            _ => false,
        };

        if continues {
            let previous = merged.last_mut().expect("checked above");
            let prev_path = path_of(previous);
            let path = path_of(&record);

            let mut vertices = record.vertices;
            if prev_path.last() == path.first() {
                vertices.remove(0);
            }
            previous.vertices.extend(vertices);
        }
        else {
            merged.push(record);
        }
    }

    *records = merged;
    Ok(())
}

/// TRA/TMOA overlay operator 1: two records describe one object, the
/// second carrying the other altitude band. Collapse to the first record
/// and return the combined band when the footprints are polygons.
fn merge_operator_pair(
    records: &mut Vec<GraphicRecord>,
) -> Result<Option<Altitudes>, GeometryError> {
    if records.len() != 2 || records[0].overlay_operator != 1 {
        return Ok(None);
    }

    let first = records[0].geometry_option.ok_or(GeometryError::NoGeometry)?;
    let second = records[1].geometry_option.ok_or(GeometryError::NoGeometry)?;

    if first.is_polygon() != second.is_polygon() || first.is_circle() != second.is_circle() {
        return Err(GeometryError::OperatorMismatch {
            reason: "geometry kinds differ",
        });
    }
    if records[0].vertices.len() != records[1].vertices.len() {
        return Err(GeometryError::OperatorMismatch {
            reason: "vertex counts differ",
        });
    }

    if first.is_polygon() {
        let (_, top) = simple_coords(&records[0].vertices[0]);
        let (_, bottom) = simple_coords(&records[1].vertices[0]);
        let altitudes = Altitudes {
            top_ft: top,
            top_reference: reference_of(first),
            bottom_ft: bottom,
            bottom_reference: reference_of(second),
        };
        records.truncate(1);
        Ok(Some(altitudes))
    }
    else if first.is_circle() {
        // Circles carry both bands in one vertex; splice the second
        // record's bottom into the first.
        let bottom = match &records[1].vertices[0] {
            Vertex::Prism { z_bottom_ft, .. } => *z_bottom_ft,
            _ => {
                return Err(GeometryError::OperatorMismatch {
                    reason: "expected prism vertex",
                });
            }
        };
        if let Vertex::Prism { z_bottom_ft, .. } = &mut records[0].vertices[0] {
            *z_bottom_ft = bottom;
        }
        records.truncate(1);
        Ok(None)
    }
    else {
        Err(GeometryError::OperatorMismatch {
            reason: "not a polygon or circle",
        })
    }
}

fn reference_of(option: crate::frame::twgo::GeometryOption) -> AltitudeReference {
    if option.is_agl() {
        AltitudeReference::Agl
    }
    else {
        AltitudeReference::Msl
    }
}

fn build_element(
    record: &GraphicRecord,
    reference: DateTime<Utc>,
) -> Result<GeometryElement, GeometryError> {
    let option = record.geometry_option.ok_or(GeometryError::NoGeometry)?;
    let altitude_reference = reference_of(option);

    let mut altitudes = Altitudes {
        top_ft: 0,
        top_reference: altitude_reference,
        bottom_ft: 0,
        bottom_reference: altitude_reference,
    };

    let (shape, coordinates, radius_nm) = if option.is_circle() {
        let vertex = record.vertices.first().ok_or(GeometryError::NoGeometry)?;
        let Vertex::Prism {
            longitude_bottom,
            latitude_bottom,
            longitude_top,
            latitude_top,
            z_bottom_ft,
            z_top_ft,
            r_major_nm,
            r_minor_nm,
            alpha,
        } = vertex
        else {
            return Err(GeometryError::FancyPrism);
        };

        // Only upright cylinders are handled; nothing else has been seen
        // on the air or in test data.
        if longitude_bottom != longitude_top
            || latitude_bottom != latitude_top
            || *alpha != 0
            || r_major_nm != r_minor_nm
        {
            return Err(GeometryError::FancyPrism);
        }

        altitudes.top_ft = *z_top_ft;
        altitudes.bottom_ft = *z_bottom_ft;

        (
            ShapeKind::Circle,
            Coordinates::Point([*longitude_bottom, *latitude_bottom]),
            Some(*r_major_nm),
        )
    }
    else if option.is_point() {
        let vertex = record.vertices.first().ok_or(GeometryError::NoGeometry)?;
        let (coords, altitude) = simple_coords(vertex);
        altitudes.top_ft = altitude;
        (ShapeKind::Point, Coordinates::Point(coords), None)
    }
    else {
        // Polygon or polyline: factor per-vertex altitudes into at most
        // two bands over one shared footprint.
        let mut bands: Vec<(u32, Vec<[f64; 2]>)> = Vec::new();
        for vertex in &record.vertices {
            let (coords, altitude) = simple_coords(vertex);
            if let Some(band) = bands.iter_mut().find(|(a, _)| *a == altitude) {
                band.1.push(coords);
            }
            else {
                bands.push((altitude, vec![coords]));
            }
        }

        match bands.len() {
            1 => {
                altitudes.top_ft = bands[0].0;
            }
            2 => {
                if bands[0].1 != bands[1].1 {
                    return Err(GeometryError::AltitudesDontMatch);
                }
                // the higher band is always broadcast first
                altitudes.top_ft = bands[0].0;
                altitudes.bottom_ft = bands[1].0;
            }
            _ => return Err(GeometryError::TooManyAltitudes),
        }

        let shape = if option.is_polygon() {
            ShapeKind::Polygon
        }
        else {
            ShapeKind::Polyline
        };
        (shape, Coordinates::Path(bands.swap_remove(0).1), None)
    };

    let start_time = match &record.start {
        Some(t) if record.date_time_format == 1 => {
            Some(time::referenced_month_day(
                reference,
                t.month.unwrap_or(1),
                t.day.unwrap_or(1),
                t.hour,
                t.minute,
            )?)
        }
        _ => None,
    };
    let stop_time = match &record.stop {
        Some(t) if record.date_time_format == 1 => {
            Some(time::referenced_month_day(
                reference,
                t.month.unwrap_or(1),
                t.day.unwrap_or(1),
                t.hour,
                t.minute,
            )?)
        }
        _ => None,
    };

    Ok(GeometryElement {
        shape,
        coordinates,
        altitudes,
        radius_nm,
        start_time,
        stop_time,
        cancelled: record.object_status == 13,
        element: record
            .object_element
            .and_then(|e| OBJECT_ELEMENTS.get(e as usize).map(|s| (*s).to_owned())),
        airport_id: record.airport_id.clone(),
        conditions: record.object_qualifiers.as_ref().map(decode_qualifiers),
    })
}

/// Latest stop time across all elements, and whether every element has
/// one. Drives the smart TWGO expiration rule.
pub fn stop_time_facts(elements: &[GeometryElement]) -> (Option<DateTime<Utc>>, bool) {
    let mut latest = None;
    let mut all_have_stop = !elements.is_empty();

    for element in elements {
        match element.stop_time {
            Some(stop) => {
                if latest.map_or(true, |current| stop > current) {
                    latest = Some(stop);
                }
            }
            None => all_have_stop = false,
        }
    }

    (latest, all_have_stop)
}

#[cfg(test)]
mod tests {
    use chrono::{
        TimeZone,
        Utc,
    };

    use crate::{
        frame::twgo::{
            ApplicabilityTime,
            GeometryOption,
            GraphicRecord,
            Vertex,
        },
        geometry::{
            Coordinates,
            ShapeKind,
            build_elements,
            stop_time_facts,
        },
    };

    fn record(option: GeometryOption, vertices: Vec<Vertex>) -> GraphicRecord {
        GraphicRecord {
            report_number: 1,
            report_year: 21,
            record_applicability_start_year: 0,
            record_applicability_end_year: 0,
            overlay_record_id: 1,
            airport_id: None,
            object_element: None,
            object_type: 14,
            object_status: 15,
            object_qualifiers: None,
            param_flag: false,
            date_time_format: 1,
            geometry_option: Some(option),
            overlay_operator: 0,
            start: Some(ApplicabilityTime {
                month: Some(9),
                day: Some(21),
                hour: 19,
                minute: 45,
            }),
            stop: Some(ApplicabilityTime {
                month: Some(9),
                day: Some(22),
                hour: 0,
                minute: 0,
            }),
            vertices,
        }
    }

    fn simple(longitude: f64, latitude: f64, altitude_ft: u32) -> Vertex {
        Vertex::Simple {
            longitude,
            latitude,
            altitude_ft,
        }
    }

    #[test]
    fn it_collapses_two_altitude_bands() {
        let footprint = [(-84.0, 39.0), (-84.0, 40.0), (-83.0, 40.0), (-84.0, 39.0)];
        let mut vertices: Vec<Vertex> =
            footprint.iter().map(|(x, y)| simple(*x, *y, 10000)).collect();
        vertices.extend(footprint.iter().map(|(x, y)| simple(*x, *y, 2000)));

        let reference = Utc.with_ymd_and_hms(2020, 9, 18, 20, 0, 0).unwrap();
        let elements =
            build_elements(&[record(GeometryOption::PolygonMsl, vertices)], reference, 8).unwrap();

        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].shape, ShapeKind::Polygon);
        assert_eq!(elements[0].altitudes.top_ft, 10000);
        assert_eq!(elements[0].altitudes.bottom_ft, 2000);
        match &elements[0].coordinates {
            Coordinates::Path(path) => assert_eq!(path.len(), 4),
            other => panic!("unexpected coordinates: {other:?}"),
        }
        assert_eq!(
            elements[0].stop_time,
            Some(Utc.with_ymd_and_hms(2020, 9, 22, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn it_merges_split_polylines() {
        let first = record(
            GeometryOption::PolylineMsl,
            vec![
                simple(-84.0, 39.0, 4000),
                simple(-84.5, 39.5, 4000),
                simple(-85.0, 40.0, 4000),
            ],
        );
        let second = record(
            GeometryOption::PolylineMsl,
            vec![simple(-85.0, 40.0, 4000), simple(-85.5, 40.5, 4000)],
        );

        let reference = Utc.with_ymd_and_hms(2020, 9, 18, 20, 0, 0).unwrap();
        let elements = build_elements(&[first, second], reference, 14).unwrap();

        assert_eq!(elements.len(), 1);
        match &elements[0].coordinates {
            Coordinates::Path(path) => assert_eq!(path.len(), 4),
            other => panic!("unexpected coordinates: {other:?}"),
        }
    }

    #[test]
    fn it_splits_circles_to_one_per_element() {
        let prism = Vertex::Prism {
            longitude_bottom: -84.218445,
            latitude_bottom: 39.90097,
            longitude_top: -84.218445,
            latitude_top: 39.90097,
            z_bottom_ft: 0,
            z_top_ft: 17999,
            r_major_nm: 30.0,
            r_minor_nm: 30.0,
            alpha: 0,
        };
        let record = record(GeometryOption::CirclePrismMsl, vec![prism, prism]);

        let reference = Utc.with_ymd_and_hms(2020, 9, 18, 20, 0, 0).unwrap();
        let elements = build_elements(&[record], reference, 8).unwrap();

        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].shape, ShapeKind::Circle);
        assert_eq!(elements[0].radius_nm, Some(30.0));
    }

    #[test]
    fn it_reports_stop_time_facts() {
        let reference = Utc.with_ymd_and_hms(2020, 9, 18, 20, 0, 0).unwrap();
        let elements = build_elements(
            &[record(
                GeometryOption::PolygonMsl,
                vec![
                    simple(-84.0, 39.0, 4000),
                    simple(-83.0, 39.0, 4000),
                    simple(-84.0, 39.0, 4000),
                ],
            )],
            reference,
            8,
        )
        .unwrap();

        let (latest, all) = stop_time_facts(&elements);
        assert!(all);
        assert_eq!(latest, Some(Utc.with_ymd_and_hms(2020, 9, 22, 0, 0, 0).unwrap()));
    }
}
