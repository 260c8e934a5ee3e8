//! # Product synthesis
//!
//! Turns reassembled frames into typed products with fully qualified
//! ISO-8601 times. One frame frequently fans out into several products (a
//! text block of METARs, an empty-block raster run); each product leaves
//! here self-contained, with its own `unique_name` and a mandatory
//! `expiration_time`.

pub mod crl;
pub mod gairmet;
pub mod notam;
pub mod raster;
pub mod service_status;
pub mod sigwx;
pub mod sua;
pub mod textwx;

use std::collections::BTreeMap;

use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest,
    Sha256,
};

use crate::{
    config::Config,
    frame::{
        ApduPayload,
        Frame,
        Packet,
        twgo::TwgoPayload,
    },
    geometry::{
        self,
        GeometryElement,
    },
    time,
    types::{
        ProductType,
        ScaleFactor,
        StationId,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("segmented frame reached product synthesis")]
    UnexpectedSegment,

    #[error("unknown product id {product_id}")]
    UnknownProductId { product_id: u16 },

    #[error("unparseable text product: {text:?}")]
    UnparseableText { text: String },

    #[error("TWGO record shape invalid: {reason}")]
    MalformedTwgo { reason: &'static str },

    #[error("no wind forecast fits product hour {hour} / valid time {valid_time}")]
    IllegalWindProduct { hour: u32, valid_time: String },

    #[error("CRL for product id {product_id} which has none")]
    BadCrlProduct { product_id: u16 },

    #[error(transparent)]
    Time(#[from] time::TimeError),

    #[error(transparent)]
    Geometry(#[from] geometry::GeometryError),
}

/// NOTAM-specific fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotamFields {
    /// D, FDC, TFR, TRA, TMOA, or D-SUA.
    pub subtype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accountable: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
}

/// Split PIREP body fields (`/OV`, `/TM`, ... keyed lowercase without the
/// slash).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PirepFields {
    /// UA (routine) or UUA (urgent).
    pub report_type: String,
    pub fields: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnavailableFields {
    /// Product named unavailable, e.g. `TAF`.
    pub product: String,
    pub centers: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuaFields {
    pub airspace_id: String,
    pub airspace_name: String,
    pub airspace_type: String,
    pub schedule_id: String,
    pub schedule_status: String,
    pub low_altitude_ft: i64,
    pub high_altitude_ft: i64,
    pub separation_rule: String,
    pub shape_defined: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nfdc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nfdc_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dafif_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dafif_name: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrlStatus {
    Complete,
    Incomplete,
}

/// One report reference inside a CRL product.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrlReportRef {
    /// `year-number` (or `month-number` for TRA/TMOA), matching the
    /// `unique_name` of the report it refers to.
    pub id: String,
    pub has_text: bool,
    pub has_graphics: bool,
    /// Annotated by the curator when all required parts are stored.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub complete: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrlFields {
    pub range_nm: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_overflow: bool,
    pub reports: Vec<CrlReportRef>,
    /// Completeness of the whole list, maintained by the curator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CrlStatus>,
}

/// One raster tile, addressed by alternate block number.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockFields {
    pub alt_bn: u32,
    pub scale_factor: ScaleFactor,
    pub bins: Vec<u8>,
}

/// Reception statistics for one station.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RsrStats {
    pub received: u32,
    pub expected_per_sec: u32,
    pub percent: u32,
}

/// A fully synthesized product.
///
/// The shape is deliberately wide: every product type uses the common core
/// (`type`, `unique_name`, times, `expiration_time`) plus its own optional
/// block, and the whole record serializes to one self-contained JSON
/// object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "type")]
    pub product_type: ProductType,
    pub unique_name: String,
    pub rcvd_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station: Option<StationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub geometry: Vec<GeometryElement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geojson: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_period_begin_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_period_end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_run_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub for_use_from_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub for_use_to_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_of_activity_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_of_validity_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notam: Option<NotamFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pirep: Option<PirepFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<UnavailableFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sua: Option<SuaFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crl: Option<CrlFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stations: Option<BTreeMap<String, RsrStats>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<BlockFields>,
}

impl Product {
    pub fn new(
        product_type: ProductType,
        unique_name: impl Into<String>,
        rcvd_time: DateTime<Utc>,
        expiration_time: DateTime<Utc>,
    ) -> Self {
        Self {
            product_type,
            unique_name: unique_name.into(),
            rcvd_time,
            expiration_time,
            insert_time: None,
            station: None,
            location: None,
            contents: None,
            geometry: Vec::new(),
            geojson: None,
            issued_time: None,
            observation_time: None,
            valid_time: None,
            valid_period_begin_time: None,
            valid_period_end_time: None,
            model_run_time: None,
            for_use_from_time: None,
            for_use_to_time: None,
            start_of_activity_time: None,
            end_of_validity_time: None,
            report_time: None,
            start_time: None,
            end_time: None,
            notam: None,
            pirep: None,
            unavailable: None,
            sua: None,
            crl: None,
            traffic: None,
            stations: None,
            block: None,
        }
    }

    /// Store key.
    pub fn key(&self) -> (ProductType, String) {
        (self.product_type, self.unique_name.clone())
    }

    /// SHA-256 over the content-significant fields: everything except
    /// receive-side metadata. serde_json emits object keys sorted, so the
    /// serialization is canonical.
    pub fn digest(&self) -> String {
        let mut value = serde_json::to_value(self).expect("product serializes");
        if let Some(map) = value.as_object_mut() {
            map.remove("rcvd_time");
            map.remove("insert_time");
            map.remove("geojson");
        }

        let canonical = serde_json::to_string(&value).expect("value serializes");
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Expiration for the TWGO family: the latest geometry stop time when
    /// every element carries one, an explicit end of validity when given
    /// (NOTAMs), else a fixed time past last reception. The bypass flag
    /// forces the fixed fallback for test determinism.
    pub fn twgo_expiration(
        &self,
        rcvd_time: DateTime<Utc>,
        end_of_validity: Option<DateTime<Utc>>,
        config: &Config,
    ) -> DateTime<Utc> {
        if !config.bypass_smart_expiration {
            if let Some(end) = end_of_validity {
                return end;
            }

            let (latest, all_have_stop) = geometry::stop_time_facts(&self.geometry);
            if all_have_stop {
                if let Some(latest) = latest {
                    return latest;
                }
            }
        }

        rcvd_time + chrono::Duration::minutes(config.twgo_default_expiration_mins)
    }
}

/// Report id as used for TWGO unique names and CRL references:
/// `year-number`, or `month-number` for TRA/TMOA.
pub fn report_id(year_or_month: u32, number: u16) -> String {
    format!("{year_or_month}-{number}")
}

/// L2 proper: turns one reassembled packet into products.
pub struct Synthesizer<'a> {
    config: &'a Config,
}

impl<'a> Synthesizer<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Synthesize all products of one packet. Failures are per frame;
    /// good frames still emit.
    pub fn synthesize(&self, packet: &Packet) -> (Vec<Product>, Vec<SynthesisError>) {
        let mut products = Vec::new();
        let mut errors = Vec::new();

        // Test transmissions of not-yet-operational products.
        if !packet.app_data_valid {
            return (products, errors);
        }

        for frame in &packet.frames {
            match self.synthesize_frame(packet, frame) {
                Ok(mut frame_products) => products.append(&mut frame_products),
                Err(error) => errors.push(error),
            }
        }

        (products, errors)
    }

    fn synthesize_frame(
        &self,
        packet: &Packet,
        frame: &Frame,
    ) -> Result<Vec<Product>, SynthesisError> {
        match frame {
            Frame::Apdu(apdu) => {
                match &apdu.payload {
                    ApduPayload::Segment { .. } => Err(SynthesisError::UnexpectedSegment),
                    ApduPayload::Text(text) => {
                        Ok(textwx::synthesize(text, packet, &apdu.time, self.config)?
                            .into_iter()
                            .collect())
                    }
                    ApduPayload::Twgo(payload) => {
                        if !twgo_is_sane(payload) {
                            return Ok(Vec::new());
                        }
                        match apdu.product_id {
                            13 => Ok(sua::synthesize(payload, packet)?.into_iter().collect()),
                            14 => {
                                Ok(gairmet::synthesize(payload, packet, &apdu.time, self.config)?
                                    .into_iter()
                                    .collect())
                            }
                            product_id => {
                                Err(SynthesisError::UnknownProductId { product_id })
                            }
                        }
                    }
                    ApduPayload::TwgoPair { text, graphics } => {
                        if let Some(text) = text {
                            if !twgo_is_sane(text) {
                                return Ok(Vec::new());
                            }
                        }
                        if let Some(graphics) = graphics {
                            if !twgo_is_sane(graphics) {
                                return Ok(Vec::new());
                            }
                        }

                        match apdu.product_id {
                            11 | 12 | 15 => {
                                Ok(sigwx::synthesize(
                                    text.as_ref(),
                                    graphics.as_ref(),
                                    apdu.product_id,
                                    packet,
                                    self.config,
                                )?
                                .into_iter()
                                .collect())
                            }
                            8 | 16 | 17 => {
                                Ok(notam::synthesize(
                                    text.as_ref(),
                                    graphics.as_ref(),
                                    apdu.product_id,
                                    packet,
                                    &apdu.time,
                                    self.config,
                                )?
                                .into_iter()
                                .collect())
                            }
                            product_id => Err(SynthesisError::UnknownProductId { product_id }),
                        }
                    }
                    ApduPayload::Raster(payload) => {
                        raster::synthesize(payload, apdu.product_id, packet, &apdu.time)
                    }
                }
            }
            Frame::Crl(crl_frame) => Ok(vec![crl::synthesize(crl_frame, packet)?]),
            Frame::ServiceStatus(frame) => Ok(vec![service_status::synthesize(frame, packet)]),
            Frame::Reserved { .. } => Ok(Vec::new()),
        }
    }
}

/// DO-358B sanity checks shared by all TWGO consumers: only record formats
/// 2 and 8 and reference points 0x00/0xFF may be processed.
fn twgo_is_sane(payload: &TwgoPayload) -> bool {
    (payload.record_format == 2 || payload.record_format == 8)
        && (payload.record_reference_point == 0x00 || payload.record_reference_point == 0xFF)
}
