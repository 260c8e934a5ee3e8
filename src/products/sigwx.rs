//! Significant weather TWGO products (ids 11, 12, 15): AIRMET, SIGMET,
//! convective SIGMET (WST), and CWA. The concrete type comes from the
//! first token of the report text.

use std::sync::LazyLock;

use chrono::Duration;
use regex::Regex;

use crate::{
    config::Config,
    frame::{
        Packet,
        twgo::{
            ReportStatus,
            TwgoPayload,
            TwgoRecords,
        },
    },
    geometry,
    products::{
        Product,
        SynthesisError,
        report_id,
        textwx::clean_faa_text,
    },
    time,
    types::ProductType,
};

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^ ]+) ([^ ]+) ([0-3]\d[0-2]\d[0-5]\d)").unwrap());

// Rarely a SIGMET arrives without the issuing station token.
static HEADER_NO_STATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^ ]+) +([0-3]\d[0-2]\d[0-5]\d)").unwrap());

pub fn synthesize(
    text: Option<&TwgoPayload>,
    graphics: Option<&TwgoPayload>,
    product_id: u16,
    packet: &Packet,
    config: &Config,
) -> Result<Option<Product>, SynthesisError> {
    let text = text.ok_or(SynthesisError::MalformedTwgo {
        reason: "significant weather report without a text half",
    })?;

    let TwgoRecords::Text(records) = &text.records
    else {
        return Err(SynthesisError::MalformedTwgo {
            reason: "text half without text records",
        });
    };
    let [record] = records.as_slice()
    else {
        return Err(SynthesisError::MalformedTwgo {
            reason: "more than one text record",
        });
    };

    let id = report_id(record.report_year as u32, record.report_number);

    // CWAs are the only class cancelled through this path.
    if product_id == 15 && record.report_status == ReportStatus::Cancelled {
        let product = Product::new(
            ProductType::CancelCwa,
            id,
            packet.rcvd_time,
            packet.rcvd_time + Duration::seconds(config.cancel_expiration_secs),
        );
        return Ok(Some(product));
    }

    if record.text.is_empty() {
        return Err(SynthesisError::MalformedTwgo {
            reason: "empty significant weather text",
        });
    }

    let contents = clean_faa_text(&record.text);

    let (type_token, time_token) = if let Some(captures) = HEADER_RE.captures(&contents) {
        (captures[1].to_owned(), captures[3].to_owned())
    }
    else if let Some(captures) = HEADER_NO_STATION_RE.captures(&contents) {
        (captures[1].to_owned(), captures[2].to_owned())
    }
    else {
        return Err(SynthesisError::UnparseableText { text: contents });
    };

    let product_type = match type_token.as_str() {
        "AIRMET" => ProductType::Airmet,
        "SIGMET" => ProductType::Sigmet,
        "WST" => ProductType::Wst,
        "CWA" => ProductType::Cwa,
        _ => {
            return Err(SynthesisError::UnparseableText { text: contents });
        }
    };

    let issued_time = time::day_hour_min(packet.rcvd_time, &time_token)?;

    let mut product = Product::new(product_type, id, packet.rcvd_time, packet.rcvd_time);
    product.station = Some(packet.station.clone());
    product.issued_time = Some(issued_time);
    product.contents = Some(contents);

    if let Some(graphics) = graphics {
        if let TwgoRecords::Graphics(records) = &graphics.records {
            // These products only ever carry polygons.
            if let Some(first) = records.first() {
                let polygon = first
                    .geometry_option
                    .map(|option| option.is_polygon())
                    .unwrap_or(false);
                if !polygon {
                    return Err(SynthesisError::MalformedTwgo {
                        reason: "significant weather overlay is not a polygon",
                    });
                }
            }

            product.geometry = geometry::build_elements(records, issued_time, product_id)?;

            let (latest_stop, _) = geometry::stop_time_facts(&product.geometry);
            if let Some(first) = product.geometry.first() {
                product.for_use_from_time = first.start_time;
            }
            product.for_use_to_time = latest_stop;
        }
    }

    product.expiration_time = product.twgo_expiration(packet.rcvd_time, None, config);
    Ok(Some(product))
}

#[cfg(test)]
mod tests {
    use chrono::{
        TimeZone,
        Utc,
    };

    use crate::{
        capture::{
            CaptureLine,
            PAYLOAD_LENGTH,
        },
        config::Config,
        frame::{
            Packet,
            twgo::{
                ApplicabilityTime,
                GeometryOption,
                GraphicRecord,
                ReportStatus,
                TextRecord,
                TwgoPayload,
                TwgoRecords,
                Vertex,
            },
        },
        products::sigwx::synthesize,
        types::ProductType,
    };

    fn packet_at(iso: &str) -> Packet {
        let rcvd_time = iso.parse().unwrap();
        let payload = vec![0u8; PAYLOAD_LENGTH];
        let hex: String = payload.iter().map(|b| format!("{b:02x}")).collect();
        let line: CaptureLine = format!("+{hex};rs=0;rssi=-20.0;t=0.0;").parse().unwrap();

        let mut packet = Packet::decode(&line, &Config::default()).unwrap();
        packet.rcvd_time = rcvd_time;
        packet
    }

    fn text_payload(text: &str) -> TwgoPayload {
        TwgoPayload {
            record_format: 2,
            location: String::new(),
            record_reference_point: 0,
            records: TwgoRecords::Text(vec![TextRecord {
                report_number: 1205,
                report_year: 21,
                report_status: ReportStatus::Active,
                text: text.to_owned(),
            }]),
        }
    }

    fn polygon_graphics() -> TwgoPayload {
        let vertex = |longitude: f64, latitude: f64| {
            Vertex::Simple {
                longitude,
                latitude,
                altitude_ft: 4000,
            }
        };

        TwgoPayload {
            record_format: 8,
            location: String::new(),
            record_reference_point: 0,
            records: TwgoRecords::Graphics(vec![GraphicRecord {
                report_number: 1205,
                report_year: 21,
                record_applicability_start_year: 0,
                record_applicability_end_year: 0,
                overlay_record_id: 1,
                airport_id: None,
                object_element: Some(6),
                object_type: 14,
                object_status: 15,
                object_qualifiers: None,
                param_flag: false,
                date_time_format: 1,
                geometry_option: Some(GeometryOption::PolygonMsl),
                overlay_operator: 0,
                start: Some(ApplicabilityTime {
                    month: Some(5),
                    day: Some(14),
                    hour: 9,
                    minute: 0,
                }),
                stop: Some(ApplicabilityTime {
                    month: Some(5),
                    day: Some(14),
                    hour: 15,
                    minute: 0,
                }),
                vertices: vec![
                    vertex(-84.0, 39.0),
                    vertex(-84.0, 40.0),
                    vertex(-83.0, 40.0),
                    vertex(-84.0, 39.0),
                ],
            }]),
        }
    }

    #[test]
    fn it_types_by_the_first_token() {
        let packet = packet_at("2021-05-14T09:05:00Z");
        let text = text_payload("AIRMET KIND 140900 AIRMET SIERRA FOR IFR\nOH LE VALID UNTIL 141500");

        let product = synthesize(
            Some(&text),
            Some(&polygon_graphics()),
            11,
            &packet,
            &Config::default(),
        )
        .unwrap()
        .unwrap();

        assert_eq!(product.product_type, ProductType::Airmet);
        assert_eq!(product.unique_name, "21-1205");
        assert_eq!(
            product.issued_time,
            Some(Utc.with_ymd_and_hms(2021, 5, 14, 9, 0, 0).unwrap())
        );
        assert_eq!(product.geometry.len(), 1);
        assert_eq!(
            product.for_use_to_time,
            Some(Utc.with_ymd_and_hms(2021, 5, 14, 15, 0, 0).unwrap())
        );
        // single element with a stop time drives smart expiration
        assert_eq!(
            product.expiration_time,
            Utc.with_ymd_and_hms(2021, 5, 14, 15, 0, 0).unwrap()
        );
    }

    #[test]
    fn it_emits_a_cwa_cancellation() {
        let packet = packet_at("2021-05-14T09:05:00Z");
        let mut text = text_payload("");
        if let TwgoRecords::Text(records) = &mut text.records {
            records[0].report_status = ReportStatus::Cancelled;
        }

        let product = synthesize(Some(&text), None, 15, &packet, &Config::default())
            .unwrap()
            .unwrap();

        assert_eq!(product.product_type, ProductType::CancelCwa);
        assert_eq!(product.unique_name, "21-1205");
    }

    #[test]
    fn it_survives_a_missing_station_token() {
        let packet = packet_at("2021-05-14T09:05:00Z");
        let text = text_payload("SIGMET  140900 SIGMET ROMEO 2");

        let product = synthesize(Some(&text), None, 12, &packet, &Config::default())
            .unwrap()
            .unwrap();

        assert_eq!(product.product_type, ProductType::Sigmet);
    }
}
