//! CRL products from current-report-list frames. One per station and
//! product class.

use chrono::Duration;

use crate::{
    frame::{
        Packet,
        crl::CrlFrame,
    },
    products::{
        CrlFields,
        CrlReportRef,
        Product,
        SynthesisError,
        report_id,
    },
    types::ProductType,
};

pub fn synthesize(frame: &CrlFrame, packet: &Packet) -> Result<Product, SynthesisError> {
    // Expiration is twice the nominal retransmission interval of the class
    // (table C-1): 10 minutes for the NOTAM-type lists, 5 for the rest.
    let retransmit_mins = match frame.product_id {
        8 | 15 | 16 | 17 => 10,
        11 | 12 | 14 => 5,
        product_id => return Err(SynthesisError::BadCrlProduct { product_id }),
    };

    let reports = frame
        .reports
        .iter()
        .map(|report| {
            CrlReportRef {
                id: report_id(report.report_year_or_month as u32, report.report_number),
                has_text: report.has_text,
                has_graphics: report.has_graphics,
                complete: false,
            }
        })
        .collect();

    let mut product = Product::new(
        ProductType::Crl(frame.product_id),
        format!("CRL-{}-{}", frame.product_id, packet.station),
        packet.rcvd_time,
        packet.rcvd_time + Duration::minutes(2 * retransmit_mins),
    );
    product.station = Some(packet.station.clone());
    product.crl = Some(CrlFields {
        range_nm: frame.product_range_nm,
        has_overflow: frame.overflow,
        reports,
        status: None,
    });

    Ok(product)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use crate::{
        capture::{
            CaptureLine,
            PAYLOAD_LENGTH,
        },
        config::Config,
        frame::{
            Packet,
            crl::{
                CrlFrame,
                CrlReport,
            },
        },
        products::crl::synthesize,
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
    fn it_synthesizes_a_crl_product() {
        let packet = packet_at("2021-05-14T12:00:00Z");
        let frame = CrlFrame {
            product_id: 8,
            product_range_nm: 100,
            tfr_notam: true,
            overflow: false,
            location: None,
            reports: vec![CrlReport {
                report_year_or_month: 21,
                report_number: 123,
                has_text: true,
                has_graphics: true,
            }],
        };

        let product = synthesize(&frame, &packet).unwrap();
        assert_eq!(product.product_type, ProductType::Crl(8));
        assert!(product.unique_name.starts_with("CRL-8-"));
        assert_eq!(
            product.expiration_time,
            packet.rcvd_time + Duration::minutes(20)
        );

        let crl = product.crl.unwrap();
        assert_eq!(crl.range_nm, 100);
        assert!(!crl.has_overflow);
        assert_eq!(crl.reports[0].id, "21-123");
        assert!(crl.reports[0].has_graphics);
    }

    #[test]
    fn it_rejects_classes_without_a_crl() {
        let packet = packet_at("2021-05-14T12:00:00Z");
        let frame = CrlFrame {
            product_id: 13,
            product_range_nm: 0,
            tfr_notam: false,
            overflow: false,
            location: None,
            reports: vec![],
        };

        assert!(synthesize(&frame, &packet).is_err());
    }
}
