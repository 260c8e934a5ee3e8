//! Text weather products from generic DLAC frames (product id 413):
//! METAR/SPECI, TAF, winds and temperatures aloft, and PIREPs.

use std::{
    collections::BTreeMap,
    sync::LazyLock,
};

use chrono::{
    DateTime,
    Duration,
    Utc,
};
use regex::Regex;

use crate::{
    config::Config,
    frame::{
        ApduTime,
        Packet,
    },
    products::{
        PirepFields,
        Product,
        SynthesisError,
    },
    time,
    types::ProductType,
};

static METAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(METAR|SPECI) ([0-9A-Z]{4}) ([0-9]{6})").unwrap());

static TAF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(TAF|TAF\.AMD|TAF COR) ([0-9A-Z]{4}) ([0-9]{6})Z ([0-9]{4})/([0-9]{4})").unwrap()
});

// Naval air stations issue TAFs without the Zulu issue time.
static TAF_NO_Z_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(TAF|TAF\.AMD|TAF COR) ([0-9A-Z]{4}) ([0-9]{4})/([0-9]{4})").unwrap()
});

static WINDS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(WINDS) ([0-9A-Z]{3}) ([0-9]{6})Z").unwrap());

static PIREP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(PIREP) ([^ ]+) ([0-9]{6})Z ([^ ]+) (UA|UUA) (.+)").unwrap());

// The space after /OV keeps `/OVC` inside remarks from parsing as a field.
const PIREP_FIELDS: [(&str, &str); 11] = [
    ("/OV ", "ov"),
    ("/TM", "tm"),
    ("/FL", "fl"),
    ("/TP", "tp"),
    ("/TB", "tb"),
    ("/SK", "sk"),
    ("/RM", "rm"),
    ("/WX", "wx"),
    ("/TA", "ta"),
    ("/WV", "wv"),
    ("/IC", "ic"),
];

/// Forecast hour by product-available slot (rows: 0200, 0800, 1400, 2000)
/// and valid time (columns: 0600, 1200, 1800, 0000). Table A-9 of DO-358B.
const WIND_MATRIX: [[i32; 4]; 4] = [
    [6, 12, -1, 24],
    [24, 6, 12, -1],
    [-1, 24, 6, 12],
    [12, -1, 24, 6],
];

/// FAA text trails whitespace on nearly every line; normalize before
/// parsing or storing.
pub fn clean_faa_text(text: &str) -> String {
    let cleaned: Vec<&str> = text.lines().map(str::trim_end).collect();
    cleaned.join("\n").trim_end().to_owned()
}

pub fn synthesize(
    text: &str,
    packet: &Packet,
    apdu_time: &ApduTime,
    config: &Config,
) -> Result<Option<Product>, SynthesisError> {
    let contents = clean_faa_text(text);

    if contents.starts_with("METAR") || contents.starts_with("SPECI") {
        metar(&contents, packet, config).map(Some)
    }
    else if contents.starts_with("TAF") {
        taf(&contents, packet).map(Some)
    }
    else if contents.starts_with("WINDS") {
        winds(&contents, packet, apdu_time).map(Some)
    }
    else if contents.starts_with("PIREP") {
        pirep(&contents, packet, config).map(Some)
    }
    else {
        Err(SynthesisError::UnparseableText { text: contents })
    }
}

fn metar(contents: &str, packet: &Packet, config: &Config) -> Result<Product, SynthesisError> {
    let captures = METAR_RE.captures(contents).ok_or_else(|| {
        SynthesisError::UnparseableText {
            text: contents.to_owned(),
        }
    })?;

    let location = &captures[2];
    let observation_time = time::day_hour_min(packet.rcvd_time, &captures[3])?;

    let mut product = Product::new(
        ProductType::Metar,
        location,
        packet.rcvd_time,
        observation_time + Duration::minutes(config.metar_expiration_mins),
    );
    product.location = Some(location.to_owned());
    product.contents = Some(contents.to_owned());
    product.observation_time = Some(observation_time);

    Ok(product)
}

fn taf(contents: &str, packet: &Packet) -> Result<Product, SynthesisError> {
    let (location, issued, begin, end) = if let Some(captures) = TAF_RE.captures(contents) {
        (
            captures[2].to_owned(),
            captures[3].to_owned(),
            captures[4].to_owned(),
            captures[5].to_owned(),
        )
    }
    else if let Some(captures) = TAF_NO_Z_RE.captures(contents) {
        // no issue time; fall back to the start of the valid period
        (
            captures[2].to_owned(),
            captures[3].to_owned(),
            captures[3].to_owned(),
            captures[4].to_owned(),
        )
    }
    else {
        return Err(SynthesisError::UnparseableText {
            text: contents.to_owned(),
        });
    };

    let valid_period_end = time::day_hour_min(packet.rcvd_time, &end)?;

    let mut product = Product::new(
        ProductType::Taf,
        location.clone(),
        packet.rcvd_time,
        valid_period_end,
    );
    product.location = Some(location);
    product.contents = Some(contents.to_owned());
    product.issued_time = Some(time::day_hour_min(packet.rcvd_time, &issued)?);
    product.valid_period_begin_time = Some(time::day_hour_min(packet.rcvd_time, &begin)?);
    product.valid_period_end_time = Some(valid_period_end);

    Ok(product)
}

fn winds(
    contents: &str,
    packet: &Packet,
    apdu_time: &ApduTime,
) -> Result<Product, SynthesisError> {
    let captures = WINDS_RE.captures(contents).ok_or_else(|| {
        SynthesisError::UnparseableText {
            text: contents.to_owned(),
        }
    })?;

    let location = captures[2].to_owned();
    let valid_str = &captures[3];

    // The header line repeats the fixed altitude columns; only the data
    // line is kept.
    let data_line = contents
        .lines()
        .nth(1)
        .map(str::trim_end)
        .unwrap_or_default()
        .to_owned();

    // The wire never says which forecast this is. The product-available
    // hour (APDU header) and the valid time in the message index a matrix
    // that does.
    let illegal = || {
        SynthesisError::IllegalWindProduct {
            hour: apdu_time.hour,
            valid_time: valid_str.to_owned(),
        }
    };

    let pa_index = match apdu_time.hour {
        1..=2 => 0,
        7..=8 => 1,
        13..=14 => 2,
        19..=20 => 3,
        _ => return Err(illegal()),
    };

    let valid_hhmm: u32 = valid_str[2..].parse().map_err(|_| illegal())?;
    let vt_index = match valid_hhmm {
        600 => 0,
        1200 => 1,
        1800 => 2,
        0 => 3,
        _ => return Err(illegal()),
    };

    let forecast_hours = WIND_MATRIX[pa_index][vt_index];

    let valid_time = time::day_hour_min(packet.rcvd_time, valid_str)?;

    // Everything else is computed off the valid time, the only instant
    // with a day of month.
    let (product_type, avail_offset, run_offset, use_from, use_to) = match forecast_hours {
        6 => (ProductType::Winds06Hr, -4, -6, -4, 3),
        12 => (ProductType::Winds12Hr, -10, -12, -3, 6),
        24 => (ProductType::Winds24Hr, -22, -24, -6, 6),
        _ => return Err(illegal()),
    };

    // The broadcast availability time is the accurate one; put its hour
    // and minute back into the derived instant.
    let issued_estimate = valid_time + Duration::hours(avail_offset);
    let issued = issued_estimate
        .date_naive()
        .and_hms_opt(apdu_time.hour, apdu_time.minute, 0)
        .map(|t| DateTime::<Utc>::from_naive_utc_and_offset(t, Utc))
        .unwrap_or(issued_estimate);

    let for_use_to = valid_time + Duration::hours(use_to);

    // The 6 hour forecast must stay available until the next one arrives;
    // give it an extra day.
    let expiration = if product_type == ProductType::Winds06Hr {
        for_use_to + Duration::days(1)
    }
    else {
        for_use_to
    };

    let mut product = Product::new(product_type, location.clone(), packet.rcvd_time, expiration);
    product.location = Some(location);
    product.contents = Some(data_line);
    product.issued_time = Some(issued);
    product.valid_time = Some(valid_time);
    product.model_run_time = Some(valid_time + Duration::hours(run_offset));
    product.for_use_from_time = Some(valid_time + Duration::hours(use_from));
    product.for_use_to_time = Some(for_use_to);

    Ok(product)
}

fn pirep(contents: &str, packet: &Packet, config: &Config) -> Result<Product, SynthesisError> {
    let captures = PIREP_RE.captures(contents).ok_or_else(|| {
        SynthesisError::UnparseableText {
            text: contents.to_owned(),
        }
    })?;

    // captures[2] is a location the FIS-B producer fabricates from the /OV
    // field; it is not usable. The reporting station is captures[4].
    let report_station = captures[4].to_owned();
    let report_type = captures[5].to_owned();
    let body = captures[6].to_owned();

    let unique_name = format!("{}{}{}", report_type, report_station, body.replace(' ', ""));

    // Field markers share the `/` with free text; rewrite the markers to a
    // private separator first, then split.
    let mut marked = body.clone();
    for (from, to) in PIREP_FIELDS {
        marked = marked.replace(from, &format!("~{to}"));
    }

    let mut fields = BTreeMap::new();
    for piece in marked.split('~').skip(1) {
        let piece = piece.trim();
        if piece.len() < 2 {
            return Err(SynthesisError::UnparseableText {
                text: contents.to_owned(),
            });
        }
        fields.insert(piece[..2].to_lowercase(), piece[2..].trim().to_owned());
    }

    let report_time = time::day_hour_min(packet.rcvd_time, &captures[3])?;

    let expiration_anchor = if config.pirep_expire_from_report_time {
        report_time
    }
    else {
        packet.rcvd_time
    };

    let mut product = Product::new(
        ProductType::Pirep,
        unique_name,
        packet.rcvd_time,
        expiration_anchor + Duration::minutes(config.pirep_expiration_mins),
    );
    product.station = Some(packet.station.clone());
    product.location = Some(report_station);
    product.contents = Some(contents.to_owned());
    product.report_time = Some(report_time);
    product.pirep = Some(PirepFields {
        report_type,
        fields,
    });

    Ok(product)
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
            ApduTime,
            Packet,
        },
        products::textwx::synthesize,
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

    fn apdu_time(hour: u32, minute: u32) -> ApduTime {
        ApduTime {
            month: None,
            day: None,
            hour,
            minute,
        }
    }

    #[test]
    fn it_synthesizes_a_metar() {
        let packet = packet_at("2021-05-14T07:18:00Z");
        let text = "METAR KOCQ 140715Z AUTO 00000KT 10SM OVC120 03/02 A3025 RMK AO1\n   T00310016=";

        let product = synthesize(text, &packet, &apdu_time(7, 18), &Config::default())
            .unwrap()
            .unwrap();

        assert_eq!(product.product_type, ProductType::Metar);
        assert_eq!(product.unique_name, "KOCQ");
        assert_eq!(
            product.observation_time,
            Some(Utc.with_ymd_and_hms(2021, 5, 14, 7, 15, 0).unwrap())
        );
        assert_eq!(
            product.expiration_time,
            Utc.with_ymd_and_hms(2021, 5, 14, 9, 15, 0).unwrap()
        );
        assert!(product.contents.unwrap().contains("METAR KOCQ"));
    }

    #[test]
    fn it_synthesizes_a_taf() {
        let packet = packet_at("2021-05-14T18:30:00Z");
        let text = "TAF KIND 141730Z 1418/1524 24012KT P6SM SCT050=";

        let product = synthesize(text, &packet, &apdu_time(18, 30), &Config::default())
            .unwrap()
            .unwrap();

        assert_eq!(product.product_type, ProductType::Taf);
        assert_eq!(
            product.issued_time,
            Some(Utc.with_ymd_and_hms(2021, 5, 14, 17, 30, 0).unwrap())
        );
        assert_eq!(
            product.valid_period_begin_time,
            Some(Utc.with_ymd_and_hms(2021, 5, 14, 18, 0, 0).unwrap())
        );
        // hour 24 rolls into the next day
        assert_eq!(
            product.valid_period_end_time,
            Some(Utc.with_ymd_and_hms(2021, 5, 16, 0, 0, 0).unwrap())
        );
        assert_eq!(product.expiration_time, product.valid_period_end_time.unwrap());
    }

    #[test]
    fn it_synthesizes_a_naval_taf() {
        let packet = packet_at("2021-05-14T18:30:00Z");
        let text = "TAF KNSE 1418/1518 24012KT P6SM SCT050=";

        let product = synthesize(text, &packet, &apdu_time(18, 30), &Config::default())
            .unwrap()
            .unwrap();

        assert_eq!(
            product.issued_time,
            Some(Utc.with_ymd_and_hms(2021, 5, 14, 18, 0, 0).unwrap())
        );
    }

    #[test]
    fn it_identifies_the_wind_forecast() {
        let packet = packet_at("2021-05-14T02:05:00Z");
        let text = "WINDS IND 141200Z  FT 3000 6000\n 2527 2833+10\n";

        let product = synthesize(text, &packet, &apdu_time(1, 58), &Config::default())
            .unwrap()
            .unwrap();

        // product available 0200, valid 1200 -> 12 hour forecast
        assert_eq!(product.product_type, ProductType::Winds12Hr);
        assert_eq!(
            product.valid_time,
            Some(Utc.with_ymd_and_hms(2021, 5, 14, 12, 0, 0).unwrap())
        );
        assert_eq!(
            product.model_run_time,
            Some(Utc.with_ymd_and_hms(2021, 5, 14, 0, 0, 0).unwrap())
        );
        // availability keeps the broadcast hour and minute
        assert_eq!(
            product.issued_time,
            Some(Utc.with_ymd_and_hms(2021, 5, 14, 1, 58, 0).unwrap())
        );
        assert_eq!(
            product.for_use_to_time,
            Some(Utc.with_ymd_and_hms(2021, 5, 14, 18, 0, 0).unwrap())
        );
        assert_eq!(product.expiration_time, product.for_use_to_time.unwrap());
        assert_eq!(product.contents.as_deref(), Some(" 2527 2833+10"));
    }

    #[test]
    fn it_splits_pirep_fields() {
        let packet = packet_at("2021-05-14T15:20:00Z");
        let text = "PIREP IND 141510Z IND UA /OV IND270010/TM 1510/FL085/TP C172/TB LGT/RM SMOOTH ABV 080";

        let product = synthesize(text, &packet, &apdu_time(15, 10), &Config::default())
            .unwrap()
            .unwrap();

        assert_eq!(product.product_type, ProductType::Pirep);
        let pirep = product.pirep.unwrap();
        assert_eq!(pirep.report_type, "UA");
        assert_eq!(pirep.fields["ov"], "IND270010");
        assert_eq!(pirep.fields["fl"], "085");
        assert_eq!(pirep.fields["tp"], "C172");
        assert_eq!(pirep.fields["rm"], "SMOOTH ABV 080");
        assert_eq!(
            product.report_time,
            Some(Utc.with_ymd_and_hms(2021, 5, 14, 15, 10, 0).unwrap())
        );
    }
}
