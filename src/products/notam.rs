//! NOTAM products (ids 8, 16, 17): NOTAM-D, -FDC, -TFR, -TRA, -TMOA, plus
//! the provider-generated FIS-B unavailable reports that share product
//! id 8.

use std::sync::LazyLock;

use chrono::{
    DateTime,
    Datelike,
    Duration,
    Utc,
};
use regex::Regex;

use crate::{
    config::Config,
    frame::{
        ApduTime,
        Packet,
        twgo::{
            ReportStatus,
            TwgoPayload,
            TwgoRecords,
        },
    },
    geometry,
    products::{
        NotamFields,
        Product,
        SynthesisError,
        UnavailableFields,
        report_id,
        textwx::clean_faa_text,
    },
    time,
    types::ProductType,
};

static NOTAM_TIMES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d\d[01]\d[0-3]\d[0-2]\d[0-5]\d)-(\d\d[01]\d[0-3]\d[0-2]\d[0-5]\d|PERM)")
        .unwrap()
});

static NOTAM_TFR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^NOTAM-TFR ([0-9]/[0-9]{4}) ").unwrap());

static NOTAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"NOTAM-(D|FDC|TMOA|TRA) ([^ ]+) ([^ ]+) !([^ ]+) ([^ ]+) ([^ ]+) ([^ ]+)").unwrap()
});

static NOTAM_CONTENTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)NOTAM-(D|FDC|TMOA|TRA) ([^ ]+) ([^ ]+) (.+)").unwrap());

static FISB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"FIS-B ([0-3]\d[0-2]\d[0-5]\d)Z ([^ ]+) (.+)").unwrap());

static FISB_PROD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+) PRODUCT").unwrap());

pub fn synthesize(
    text: Option<&TwgoPayload>,
    graphics: Option<&TwgoPayload>,
    product_id: u16,
    packet: &Packet,
    apdu_time: &ApduTime,
    config: &Config,
) -> Result<Option<Product>, SynthesisError> {
    let text = text.ok_or(SynthesisError::MalformedTwgo {
        reason: "NOTAM without a text half",
    })?;

    let TwgoRecords::Text(records) = &text.records
    else {
        return Err(SynthesisError::MalformedTwgo {
            reason: "NOTAM text half without text records",
        });
    };
    let [record] = records.as_slice()
    else {
        return Err(SynthesisError::MalformedTwgo {
            reason: "NOTAM with more than one text record",
        });
    };

    // TRA/TMOA reports are identified by month, everything else by report
    // year, matching what their CRLs list.
    let id = if product_id == 16 || product_id == 17 {
        report_id(apdu_time.month.unwrap_or(0), record.report_number)
    }
    else {
        report_id(record.report_year as u32, record.report_number)
    };

    if record.report_status == ReportStatus::Cancelled {
        let product = Product::new(
            ProductType::CancelNotam,
            id,
            packet.rcvd_time,
            packet.rcvd_time + Duration::seconds(config.cancel_expiration_secs),
        );
        return Ok(Some(product));
    }

    // Large NOTAMs alternate full text with empty renewals; renewals are
    // dropped here and keep the stored record alive via its expiration.
    if record.text.is_empty() {
        return Ok(None);
    }

    let contents = clean_faa_text(&record.text);

    if contents.starts_with("FIS-B") {
        return unavailable(&contents, &id, packet, config).map(Some);
    }

    if contents.starts_with("NOTAM-TFR") {
        return tfr(&contents, &id, graphics, product_id, packet, config).map(Some);
    }

    notam(
        &contents,
        &id,
        &text.location,
        graphics,
        product_id,
        packet,
        config,
    )
    .map(Some)
}

/// Insert start-of-activity / end-of-validity parsed from the NOTAM time
/// range, returning the end unless it is `PERM`.
fn insert_activity_times(
    product: &mut Product,
    contents: &str,
    rcvd_time: DateTime<Utc>,
    config: &Config,
) -> Result<Option<DateTime<Utc>>, SynthesisError> {
    let Some(captures) = NOTAM_TIMES_RE.captures(contents)
    else {
        return Ok(None);
    };

    let year = rcvd_time.year();
    product.start_of_activity_time = Some(time::notam_time(year, &captures[1])?);

    if &captures[2] == "PERM" {
        let perm: DateTime<Utc> = config
            .notam_perm_time
            .parse()
            .unwrap_or_else(|_| rcvd_time + Duration::days(365 * 10));
        product.end_of_validity_time = Some(perm);
        // PERM is a placeholder; never let it drive expiration.
        Ok(None)
    }
    else {
        let end = time::notam_time(year, &captures[2])?;
        product.end_of_validity_time = Some(end);
        Ok(Some(end))
    }
}

fn attach_geometry(
    product: &mut Product,
    graphics: Option<&TwgoPayload>,
    product_id: u16,
    reference: DateTime<Utc>,
) -> Result<(), SynthesisError> {
    if let Some(graphics) = graphics {
        if let TwgoRecords::Graphics(records) = &graphics.records {
            product.geometry = geometry::build_elements(records, reference, product_id)?;
        }
    }
    Ok(())
}

fn unavailable(
    contents: &str,
    id: &str,
    packet: &Packet,
    config: &Config,
) -> Result<Product, SynthesisError> {
    // An old test-data-only variant spells out "SERVICE OUTAGE".
    let contents = if let Some(rest) = contents.strip_prefix("FIS-B SERVICE OUTAGE ") {
        format!("FIS-B {rest}")
    }
    else {
        contents.to_owned()
    };

    let captures = FISB_RE.captures(&contents).ok_or_else(|| {
        SynthesisError::UnparseableText {
            text: contents.clone(),
        }
    })?;

    let issued_time = time::day_hour_min(packet.rcvd_time, &captures[1])?;
    let centers = captures[2].split(',').map(str::to_owned).collect();
    let body = captures[3].to_owned();

    let product_name = FISB_PROD_RE
        .captures(&body)
        .ok_or_else(|| {
            SynthesisError::UnparseableText {
                text: contents.clone(),
            }
        })?[1]
        .to_owned();

    let mut product = Product::new(
        ProductType::FisBUnavailable,
        id,
        packet.rcvd_time,
        packet.rcvd_time + Duration::minutes(config.fisb_unavailable_expiration_mins),
    );
    product.issued_time = Some(issued_time);
    product.contents = Some(body);
    product.unavailable = Some(UnavailableFields {
        product: product_name,
        centers,
    });

    Ok(product)
}

fn tfr(
    contents: &str,
    id: &str,
    graphics: Option<&TwgoPayload>,
    product_id: u16,
    packet: &Packet,
    config: &Config,
) -> Result<Product, SynthesisError> {
    // NOTAM-TFRs are provider blobs, not FAA-format NOTAMs. Only the TFR
    // number parses reliably; the issue time the provider sends is one of
    // three different things and is ignored.
    let captures = NOTAM_TFR_RE.captures(contents).ok_or_else(|| {
        SynthesisError::UnparseableText {
            text: contents.to_owned(),
        }
    })?;

    let mut product = Product::new(
        ProductType::NotamTfr,
        id,
        packet.rcvd_time,
        packet.rcvd_time,
    );
    product.station = Some(packet.station.clone());
    product.contents = Some(contents.to_owned());
    product.notam = Some(NotamFields {
        subtype: "TFR".to_owned(),
        accountable: None,
        affected: None,
        keyword: None,
        number: Some(captures[1].to_owned()),
    });

    insert_activity_times(&mut product, contents, packet.rcvd_time, config)?;

    let reference = product
        .start_of_activity_time
        .unwrap_or(packet.rcvd_time);
    attach_geometry(&mut product, graphics, product_id, reference)?;

    product.expiration_time = product.twgo_expiration(packet.rcvd_time, None, config);
    Ok(product)
}

fn notam(
    contents: &str,
    id: &str,
    location: &str,
    graphics: Option<&TwgoPayload>,
    product_id: u16,
    packet: &Packet,
    config: &Config,
) -> Result<Product, SynthesisError> {
    let unparseable = || {
        SynthesisError::UnparseableText {
            text: contents.to_owned(),
        }
    };

    let components = NOTAM_RE.captures(contents).ok_or_else(unparseable)?;
    let body = NOTAM_CONTENTS_RE.captures(contents).ok_or_else(unparseable)?;

    let mut subtype = components[1].to_owned();
    let accountable = components[4].to_owned();
    let number = components[5].to_owned();
    let affected = components[6].to_owned();
    let keyword = components[7].to_owned();

    let notam_contents = body[4].to_owned();
    if !notam_contents.starts_with('!') {
        return Err(unparseable());
    }

    // D NOTAMs carrying an SUA schedule come from the service areas.
    if subtype == "D" && accountable.starts_with("SUA") {
        subtype = "D-SUA".to_owned();
    }

    let product_type = match subtype.as_str() {
        "FDC" => ProductType::NotamFdc,
        "TRA" => ProductType::NotamTra,
        "TMOA" => ProductType::NotamTmoa,
        _ => ProductType::NotamD,
    };

    // Test groups reuse report numbers across locations; real traffic does
    // not. D NOTAMs get the location folded into the id (they have no CRL
    // to stay consistent with).
    let id = if product_type == ProductType::NotamD && !location.is_empty() {
        format!("{id}-{location}")
    }
    else {
        id.to_owned()
    };

    let mut product = Product::new(product_type, id, packet.rcvd_time, packet.rcvd_time);
    product.station = Some(packet.station.clone());
    product.location = Some(location.to_owned());
    product.contents = Some(notam_contents);
    product.notam = Some(NotamFields {
        subtype,
        accountable: Some(accountable),
        affected: Some(affected),
        keyword: Some(keyword),
        number: Some(number),
    });

    let end_of_validity =
        insert_activity_times(&mut product, contents, packet.rcvd_time, config)?;

    let reference = product
        .start_of_activity_time
        .unwrap_or(packet.rcvd_time);
    attach_geometry(&mut product, graphics, product_id, reference)?;

    product.expiration_time = product.twgo_expiration(packet.rcvd_time, end_of_validity, config);
    Ok(product)
}
