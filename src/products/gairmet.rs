//! G-AIRMET products (id 14). Graphics only; the forecast hour (00, 03,
//! 06) is never transmitted and has to be inferred from the applicability
//! window.

use chrono::Duration;

use crate::{
    config::Config,
    frame::{
        ApduTime,
        Packet,
        twgo::{
            TwgoPayload,
            TwgoRecords,
        },
    },
    geometry,
    products::{
        Product,
        SynthesisError,
        report_id,
    },
    time,
    types::ProductType,
};

pub fn synthesize(
    payload: &TwgoPayload,
    packet: &Packet,
    apdu_time: &ApduTime,
    config: &Config,
) -> Result<Option<Product>, SynthesisError> {
    let TwgoRecords::Graphics(records) = &payload.records
    else {
        return Err(SynthesisError::MalformedTwgo {
            reason: "G-AIRMET without graphic records",
        });
    };
    let first = records.first().ok_or(SynthesisError::MalformedTwgo {
        reason: "G-AIRMET with no records",
    })?;

    let id = report_id(first.report_year as u32, first.report_number);

    if first.object_status == 13 {
        let product = Product::new(
            ProductType::CancelGAirmet,
            id,
            packet.rcvd_time,
            packet.rcvd_time + Duration::seconds(config.cancel_expiration_secs),
        );
        return Ok(Some(product));
    }

    if first.object_status != 15 || first.date_time_format != 1 {
        return Err(SynthesisError::MalformedTwgo {
            reason: "unexpected G-AIRMET status or time format",
        });
    }

    let issued_time = time::referenced_month_day(
        packet.rcvd_time,
        apdu_time.month.unwrap_or(1),
        apdu_time.day.unwrap_or(1),
        apdu_time.hour,
        apdu_time.minute,
    )?;

    let start = first.start.ok_or(SynthesisError::MalformedTwgo {
        reason: "G-AIRMET without a start time",
    })?;
    let stop = first.stop.ok_or(SynthesisError::MalformedTwgo {
        reason: "G-AIRMET without a stop time",
    })?;

    let start_time = time::referenced_month_day(
        issued_time,
        start.month.unwrap_or(1),
        start.day.unwrap_or(1),
        start.hour,
        start.minute,
    )?;
    let mut stop_time = time::referenced_month_day(
        issued_time,
        stop.month.unwrap_or(1),
        stop.day.unwrap_or(1),
        stop.hour,
        stop.minute,
    )?;

    // Forecast hour inference, table A-52: identical start and stop means
    // the 06 hour product (whose real window is 3 hours); otherwise the
    // stop hour mod 6 separates the 00 and 03 hour products.
    let product_type = if start_time == stop_time {
        stop_time = start_time + Duration::hours(3);
        ProductType::GAirmet06Hr
    }
    else {
        match stop_time.format("%H:%M").to_string().as_str() {
            "00:00" | "06:00" | "12:00" | "18:00" => ProductType::GAirmet00Hr,
            "03:00" | "09:00" | "15:00" | "21:00" => ProductType::GAirmet03Hr,
            _ => {
                return Err(SynthesisError::MalformedTwgo {
                    reason: "G-AIRMET stop time fits no forecast",
                });
            }
        }
    };

    let mut product = Product::new(product_type, id, packet.rcvd_time, packet.rcvd_time);
    product.station = Some(packet.station.clone());
    product.issued_time = Some(issued_time);
    product.for_use_from_time = Some(start_time);
    product.for_use_to_time = Some(stop_time);
    product.geometry = geometry::build_elements(records, issued_time, 14)?;

    product.expiration_time = product.twgo_expiration(packet.rcvd_time, None, config);
    Ok(Some(product))
}
