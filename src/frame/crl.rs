//! Current report list frame decoder.
//!
//! A station periodically lists every report it currently considers
//! active for a product class, with flags telling whether each report has
//! a text part, a graphics part, or both. The list caps at 138 entries;
//! past that the overflow flag is set and the list is incomplete by
//! definition.

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    config::Config,
    dlac,
};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("CRL frame truncated")]
    Truncated,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrlFrame {
    pub product_id: u16,
    pub product_range_nm: u32,
    pub tfr_notam: bool,
    pub overflow: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub reports: Vec<CrlReport>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrlReport {
    /// Report year for most products; report month for TRA and TMOA.
    pub report_year_or_month: u8,
    pub report_number: u16,
    pub has_text: bool,
    pub has_graphics: bool,
}

impl CrlFrame {
    pub fn decode(ba: &[u8], config: &Config) -> Result<Self, DecodeError> {
        if ba.len() < 4 {
            return Err(DecodeError::Truncated);
        }

        let product_id = ((ba[0] as u16) << 3) | ((ba[1] as u16 & 0xE0) >> 5);
        let tfr_notam = (ba[1] & 0x10) != 0;
        let overflow = (ba[1] & 0x02) != 0;
        let has_location = (ba[1] & 0x01) != 0;
        let product_range_nm = ba[2] as u32 * 5;

        // A location has never been observed on the air; the layout shifts
        // when one is present.
        let (location, count_offset) = if has_location {
            (
                Some(dlac::decode(
                    ba.get(3..6).ok_or(DecodeError::Truncated)?,
                    config.dlac_4bit_tab,
                )),
                6,
            )
        }
        else {
            (None, 3)
        };

        let report_count = *ba.get(count_offset).ok_or(DecodeError::Truncated)? as usize;
        let entries_offset = count_offset + 1;

        let mut reports = Vec::with_capacity(report_count);
        for i in 0..report_count {
            let offset = entries_offset + i * 3;
            let entry = ba.get(offset..offset + 3).ok_or(DecodeError::Truncated)?;

            reports.push(CrlReport {
                report_year_or_month: entry[0] & 0x7F,
                report_number: (((entry[1] & 0x3F) as u16) << 8) | entry[2] as u16,
                has_text: (entry[1] & 0x80) != 0,
                has_graphics: (entry[1] & 0x40) != 0,
            });
        }

        Ok(Self {
            product_id,
            product_range_nm,
            tfr_notam,
            overflow,
            location,
            reports,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::Config,
        frame::crl::CrlFrame,
    };

    #[test]
    fn it_decodes_a_crl_frame() {
        // product 8, TFR flag, no overflow, range 100 NM, 2 reports
        let mut ba = vec![
            (8u16 >> 3) as u8,
            (((8u16 & 0x07) as u8) << 5) | 0x10,
            20,
            2,
        ];
        // report 21-123, text+graphics
        ba.extend_from_slice(&[21, 0x80 | 0x40 | 0, 123]);
        // report 21-5000, text only
        ba.extend_from_slice(&[21, 0x80 | ((5000u16 >> 8) as u8 & 0x3F), (5000 & 0xFF) as u8]);

        let decoded = CrlFrame::decode(&ba, &Config::default()).unwrap();
        assert_eq!(decoded.product_id, 8);
        assert!(decoded.tfr_notam);
        assert!(!decoded.overflow);
        assert_eq!(decoded.product_range_nm, 100);
        assert_eq!(decoded.reports.len(), 2);
        assert_eq!(decoded.reports[0].report_number, 123);
        assert!(decoded.reports[0].has_graphics);
        assert_eq!(decoded.reports[1].report_number, 5000);
        assert!(!decoded.reports[1].has_graphics);
    }
}
