//! Special use airspace products (id 13). Text only, pipe delimited. Being
//! phased out in favor of TRA/TMOA NOTAMs but still on the air.

use std::sync::LazyLock;

use chrono::Datelike;
use regex::Regex;

use crate::{
    frame::{
        Packet,
        twgo::{
            ReportStatus,
            TwgoPayload,
            TwgoRecords,
        },
    },
    products::{
        Product,
        SuaFields,
        SynthesisError,
        report_id,
    },
    time,
    types::ProductType,
};

static SUA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"SUA ([0-3]\d[0-2]\d[0-5]\d) (.+)").unwrap());

pub fn synthesize(
    payload: &TwgoPayload,
    packet: &Packet,
) -> Result<Option<Product>, SynthesisError> {
    let TwgoRecords::Text(records) = &payload.records
    else {
        return Err(SynthesisError::MalformedTwgo {
            reason: "SUA without a text record",
        });
    };
    let [record] = records.as_slice()
    else {
        return Err(SynthesisError::MalformedTwgo {
            reason: "SUA with more than one text record",
        });
    };

    if record.report_status == ReportStatus::Cancelled {
        return Err(SynthesisError::MalformedTwgo {
            reason: "SUA cancellations are not transmitted",
        });
    }

    let id = report_id(record.report_year as u32, record.report_number);

    let text = record.text.trim_end();
    let fields: Vec<&str> = text.split('|').collect();
    if fields.len() < 11 {
        return Err(SynthesisError::UnparseableText {
            text: text.to_owned(),
        });
    }

    // Field 0 carries a provider revalidation time (boilerplate, unused)
    // and the schedule id.
    let captures = SUA_RE.captures(fields[0]).ok_or_else(|| {
        SynthesisError::UnparseableText {
            text: text.to_owned(),
        }
    })?;
    let schedule_id = captures[2].to_owned();

    let year = packet.rcvd_time.year();
    let start_time = time::notam_time(year, fields[5])?;
    let end_time = time::notam_time(year, fields[6])?;

    let parse_altitude = |s: &str| s.trim().parse::<i64>().unwrap_or(0) * 100;

    let mut separation_rule = fields[9].trim().to_owned();
    if separation_rule.is_empty() {
        separation_rule = "U".to_owned();
    }

    let mut sua = SuaFields {
        airspace_id: fields[1].to_owned(),
        airspace_name: fields[4].to_owned(),
        airspace_type: fields[3].to_owned(),
        schedule_id,
        schedule_status: fields[2].to_owned(),
        low_altitude_ft: parse_altitude(fields[7]),
        high_altitude_ft: parse_altitude(fields[8]),
        separation_rule,
        shape_defined: fields[10].to_owned(),
        nfdc_id: None,
        nfdc_name: None,
        dafif_id: None,
        dafif_name: None,
    };

    // NFDC/DAFIF identifiers are all present or all missing.
    if fields.len() >= 15 && !fields[11].is_empty() {
        sua.nfdc_id = Some(fields[11].to_owned());
        sua.nfdc_name = Some(fields[12].to_owned());
        sua.dafif_id = Some(fields[13].to_owned());
        sua.dafif_name = Some(fields[14].to_owned());
    }

    let mut product = Product::new(ProductType::Sua, id, packet.rcvd_time, end_time);
    product.station = Some(packet.station.clone());
    product.start_time = Some(start_time);
    product.end_time = Some(end_time);
    product.sua = Some(sua);

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
                ReportStatus,
                TextRecord,
                TwgoPayload,
                TwgoRecords,
            },
        },
        products::sua::synthesize,
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

    #[test]
    fn it_parses_the_schedule() {
        let packet = packet_at("2021-05-14T12:00:00Z");
        let text = "SUA 141200 12345|A-123|H|M|HILL TOP MOA|2105141300|2105142200|050|180|A|Y|NFDC1|HILL TOP|DAFIF1|HILL TOP D\n";

        let payload = TwgoPayload {
            record_format: 2,
            location: String::new(),
            record_reference_point: 0,
            records: TwgoRecords::Text(vec![TextRecord {
                report_number: 311,
                report_year: 21,
                report_status: ReportStatus::Active,
                text: text.to_owned(),
            }]),
        };

        let product = synthesize(&payload, &packet).unwrap().unwrap();
        assert_eq!(product.product_type, ProductType::Sua);
        assert_eq!(product.unique_name, "21-311");

        let sua = product.sua.unwrap();
        assert_eq!(sua.airspace_name, "HILL TOP MOA");
        assert_eq!(sua.schedule_id, "12345");
        assert_eq!(sua.schedule_status, "H");
        assert_eq!(sua.low_altitude_ft, 5000);
        assert_eq!(sua.high_altitude_ft, 18000);
        assert_eq!(sua.nfdc_id.as_deref(), Some("NFDC1"));

        assert_eq!(
            product.start_time,
            Some(Utc.with_ymd_and_hms(2021, 5, 14, 13, 0, 0).unwrap())
        );
        // the schedule end is the expiration
        assert_eq!(
            product.expiration_time,
            Utc.with_ymd_and_hms(2021, 5, 14, 22, 0, 0).unwrap()
        );
    }
}
