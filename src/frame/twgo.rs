//! Text-with-graphic-overlay payload decoder.
//!
//! TWGO payloads (products 8, 11..17) carry a 6-byte header and then either
//! text records or graphic overlay records. Text records are DLAC; graphic
//! records are vertex lists with altitude bands and optional applicability
//! times. Not every product has both halves: SUA and unavailable-product
//! reports are text only, G-AIRMET is graphics only.

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    config::Config,
    dlac,
    frame::{
        GEO_18_BITS,
        GEO_19_BITS,
        convert_raw_coords,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("TWGO payload truncated")]
    Truncated,

    #[error("unknown vertex type {geometry_option}")]
    UnknownVertexType { geometry_option: u8 },

    #[error("unimplemented overlay operator {operator}")]
    UnimplementedOverlayOperator { operator: u8 },
}

fn get(ba: &[u8], index: usize) -> Result<u8, DecodeError> {
    ba.get(index).copied().ok_or(DecodeError::Truncated)
}

fn slice<'a>(ba: &'a [u8], range: std::ops::Range<usize>) -> Result<&'a [u8], DecodeError> {
    ba.get(range).ok_or(DecodeError::Truncated)
}

/// Record format nibble. 2 is text, 8 is graphics; anything else makes the
/// payload undecodable and it is discarded downstream.
pub const RECORD_FORMAT_TEXT: u8 = 2;
pub const RECORD_FORMAT_GRAPHICS: u8 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    Cancelled,
    Active,
}

/// Overlay geometry option. Ellipse variants from earlier standard
/// revisions are no longer transmitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryOption {
    PolygonMsl,
    PolygonAgl,
    CirclePrismMsl,
    CirclePrismAgl,
    PointAgl,
    PointMsl,
    PolylineMsl,
    PolylineAgl,
}

impl GeometryOption {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            3 => Some(Self::PolygonMsl),
            4 => Some(Self::PolygonAgl),
            7 => Some(Self::CirclePrismMsl),
            8 => Some(Self::CirclePrismAgl),
            9 => Some(Self::PointAgl),
            10 => Some(Self::PointMsl),
            11 => Some(Self::PolylineMsl),
            12 => Some(Self::PolylineAgl),
            _ => None,
        }
    }

    pub fn is_agl(&self) -> bool {
        matches!(
            self,
            Self::PolygonAgl | Self::CirclePrismAgl | Self::PointAgl | Self::PolylineAgl
        )
    }

    pub fn is_polygon(&self) -> bool {
        matches!(self, Self::PolygonMsl | Self::PolygonAgl)
    }

    pub fn is_polyline(&self) -> bool {
        matches!(self, Self::PolylineMsl | Self::PolylineAgl)
    }

    pub fn is_circle(&self) -> bool {
        matches!(self, Self::CirclePrismMsl | Self::CirclePrismAgl)
    }

    pub fn is_point(&self) -> bool {
        matches!(self, Self::PointAgl | Self::PointMsl)
    }
}

/// Object element labels, indexed by the 5-bit object element field.
pub const OBJECT_ELEMENTS: [&str; 8] = [
    "TFR", "TURB", "LLWS", "SFC", "ICING", "FRZLVL", "IFR", "MTN",
];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TwgoPayload {
    pub record_format: u8,
    /// 3 DLAC characters; the reporting location for D-NOTAMs.
    pub location: String,
    /// Only 0x00 (facility) and 0xFF (external) are valid; others cause the
    /// payload to be ignored downstream.
    pub record_reference_point: u8,
    pub records: TwgoRecords,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TwgoRecords {
    Text(Vec<TextRecord>),
    Graphics(Vec<GraphicRecord>),
    /// Reserved record format; carried so the sanity check downstream can
    /// reject the payload without losing the header.
    Unsupported,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TextRecord {
    pub report_number: u16,
    /// Two digit year, except NOTAM-TFR/-D which send a single digit.
    pub report_year: u8,
    pub report_status: ReportStatus,
    /// Empty for cancellations and for NOTAM-TFR renewals.
    pub text: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ApplicabilityTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
    pub hour: u32,
    pub minute: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphicRecord {
    pub report_number: u16,
    pub report_year: u8,
    pub record_applicability_start_year: u8,
    pub record_applicability_end_year: u8,
    pub overlay_record_id: u8,
    /// Airport location id when the label flag is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub airport_id: Option<String>,
    /// Set when the object element field is meaningful; indexes
    /// [`OBJECT_ELEMENTS`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_element: Option<u8>,
    pub object_type: u8,
    /// 13 cancelled, 15 in effect.
    pub object_status: u8,
    /// G-AIRMET condition bitmap bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_qualifiers: Option<[u8; 3]>,
    /// Present when the parameter flag was set; the standard says such
    /// records are to be ignored.
    pub param_flag: bool,
    pub date_time_format: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry_option: Option<GeometryOption>,
    /// 1 means this record combines with the next into one object
    /// (TRA/TMOA only).
    pub overlay_operator: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<ApplicabilityTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<ApplicabilityTime>,
    pub vertices: Vec<Vertex>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Vertex {
    /// 6-byte vertex: position plus altitude in feet.
    Simple {
        longitude: f64,
        latitude: f64,
        altitude_ft: u32,
    },
    /// 14-byte extended range circular prism.
    Prism {
        longitude_bottom: f64,
        latitude_bottom: f64,
        longitude_top: f64,
        latitude_top: f64,
        z_bottom_ft: u32,
        z_top_ft: u32,
        r_major_nm: f64,
        r_minor_nm: f64,
        alpha: u8,
    },
}

impl TwgoPayload {
    pub fn decode(ba: &[u8], product_id: u16, config: &Config) -> Result<Self, DecodeError> {
        let record_format = (get(ba, 0)? & 0xF0) >> 4;
        let record_count = ((get(ba, 1)? & 0xF0) >> 4) as usize;
        let location = dlac::decode(slice(ba, 2..5)?, config.dlac_4bit_tab);
        let record_reference_point = get(ba, 5)?;

        let body = slice(ba, 6..ba.len())?;

        let records = match record_format {
            RECORD_FORMAT_TEXT => {
                TwgoRecords::Text(decode_text_records(body, record_count, config)?)
            }
            RECORD_FORMAT_GRAPHICS => {
                TwgoRecords::Graphics(decode_graphic_records(body, record_count, product_id)?)
            }
            _ => TwgoRecords::Unsupported,
        };

        Ok(Self {
            record_format,
            location,
            record_reference_point,
            records,
        })
    }
}

fn decode_text_records(
    ba: &[u8],
    record_count: usize,
    config: &Config,
) -> Result<Vec<TextRecord>, DecodeError> {
    let mut records = Vec::with_capacity(record_count);
    let mut ros = 0;

    for _ in 0..record_count {
        let length = ((get(ba, ros)? as usize) << 8) | get(ba, ros + 1)? as usize;
        if length < 5 {
            return Err(DecodeError::Truncated);
        }

        let report_number = ((get(ba, ros + 2)? as u16) << 6) | (get(ba, ros + 3)? as u16 >> 2);
        let report_year = ((get(ba, ros + 3)? & 0x03) << 5) | ((get(ba, ros + 4)? & 0xF8) >> 3);
        let report_status = if (get(ba, ros + 4)? & 0x04) != 0 {
            ReportStatus::Active
        }
        else {
            ReportStatus::Cancelled
        };

        let text = if report_status == ReportStatus::Active {
            dlac::decode(
                slice(ba, ros + 5..ros + length)?,
                config.dlac_4bit_tab,
            )
        }
        else {
            String::new()
        };

        records.push(TextRecord {
            report_number,
            report_year,
            report_status,
            text,
        });

        ros += length;
    }

    Ok(records)
}

fn decode_graphic_records(
    ba: &[u8],
    record_count: usize,
    product_id: u16,
) -> Result<Vec<GraphicRecord>, DecodeError> {
    let mut records = Vec::with_capacity(record_count);
    let mut record_start = 0;

    for _ in 0..record_count {
        let mut ros = record_start;

        let overlay_record_length =
            ((get(ba, ros)? as usize) << 2) | ((get(ba, ros + 1)? as usize & 0xC0) >> 6);
        let report_number =
            (((get(ba, ros + 1)? & 0x3F) as u16) << 8) | get(ba, ros + 2)? as u16;
        let report_year = get(ba, ros + 3)? >> 1;
        let record_applicability_start_year =
            ((get(ba, ros + 3)? & 0x01) << 1) | ((get(ba, ros + 4)? & 0x80) >> 7);
        let record_applicability_end_year = (get(ba, ros + 4)? & 0x60) >> 5;
        let overlay_record_id = ((get(ba, ros + 4)? & 0x1E) >> 1) + 1;
        let label_flag = get(ba, ros + 4)? & 0x01;

        ros = record_start + 5;

        let airport_id = if label_flag == 0 {
            ros += 2;
            None
        }
        else {
            let label = dlac::decode(slice(ba, ros..ros + 9)?, false);
            ros += 9;
            Some(label)
        };

        let element_flag = (get(ba, ros)? & 0x80) != 0;
        let qual_flag = (get(ba, ros)? & 0x40) != 0;
        let param_flag = (get(ba, ros)? & 0x20) != 0;
        let object_element = element_flag.then_some(get(ba, ros)? & 0x1F);
        ros += 1;

        let object_type = (get(ba, ros)? & 0xF0) >> 4;
        let object_status = get(ba, ros)? & 0x0F;
        ros += 1;

        // Qualifier bytes are only defined for G-AIRMET.
        let object_qualifiers = if product_id == 14 && qual_flag {
            let qualifiers = [get(ba, ros)?, get(ba, ros + 1)?, get(ba, ros + 2)?];
            ros += 3;
            Some(qualifiers)
        }
        else {
            None
        };

        if param_flag {
            ros += 2;
        }

        let record_applicability_options = (get(ba, ros)? & 0xC0) >> 6;
        let date_time_format = (get(ba, ros)? & 0x30) >> 4;
        let geometry_option_raw = get(ba, ros)? & 0x0F;
        ros += 1;

        let overlay_operator = (get(ba, ros)? & 0xC0) >> 6;
        if overlay_operator >= 2 {
            return Err(DecodeError::UnimplementedOverlayOperator {
                operator: overlay_operator,
            });
        }

        let vertex_count = if geometry_option_raw != 0 {
            (get(ba, ros)? & 0x3F) as usize + 1
        }
        else {
            0
        };
        ros += 1;

        let mut start = None;
        let mut stop = None;
        if record_applicability_options == 1 || record_applicability_options == 3 {
            let (time, consumed) = decode_applicability(ba, ros, date_time_format)?;
            start = time;
            ros += consumed;
        }
        if record_applicability_options == 2 || record_applicability_options == 3 {
            let (time, consumed) = decode_applicability(ba, ros, date_time_format)?;
            stop = time;
            ros += consumed;
        }

        let geometry_option = if geometry_option_raw == 0 {
            None
        }
        else {
            Some(GeometryOption::from_u8(geometry_option_raw).ok_or(
                DecodeError::UnknownVertexType {
                    geometry_option: geometry_option_raw,
                },
            )?)
        };

        let mut vertices = Vec::with_capacity(vertex_count);
        for _ in 0..vertex_count {
            match geometry_option {
                Some(option) if option.is_circle() => {
                    vertices.push(decode_prism_vertex(ba, ros)?);
                    ros += 14;
                }
                Some(_) => {
                    vertices.push(decode_simple_vertex(ba, ros)?);
                    ros += 6;
                }
                None => {
                    return Err(DecodeError::UnknownVertexType {
                        geometry_option: geometry_option_raw,
                    });
                }
            }
        }

        records.push(GraphicRecord {
            report_number,
            report_year,
            record_applicability_start_year,
            record_applicability_end_year,
            overlay_record_id,
            airport_id,
            object_element,
            object_type,
            object_status,
            object_qualifiers,
            param_flag,
            date_time_format,
            geometry_option,
            overlay_operator,
            start,
            stop,
            vertices,
        });

        record_start += overlay_record_length;
    }

    Ok(records)
}

fn decode_applicability(
    ba: &[u8],
    ros: usize,
    date_time_format: u8,
) -> Result<(Option<ApplicabilityTime>, usize), DecodeError> {
    match date_time_format {
        1 => {
            Ok((
                Some(ApplicabilityTime {
                    month: Some(get(ba, ros)? as u32),
                    day: Some(get(ba, ros + 1)? as u32),
                    hour: get(ba, ros + 2)? as u32,
                    minute: get(ba, ros + 3)? as u32,
                }),
                4,
            ))
        }
        2 => {
            Ok((
                Some(ApplicabilityTime {
                    month: None,
                    day: Some(get(ba, ros)? as u32),
                    hour: get(ba, ros + 1)? as u32,
                    minute: get(ba, ros + 2)? as u32,
                }),
                3,
            ))
        }
        3 => {
            Ok((
                Some(ApplicabilityTime {
                    month: None,
                    day: None,
                    hour: get(ba, ros)? as u32,
                    minute: get(ba, ros + 1)? as u32,
                }),
                2,
            ))
        }
        _ => Ok((None, 0)),
    }
}

fn decode_simple_vertex(ba: &[u8], ros: usize) -> Result<Vertex, DecodeError> {
    let long_raw = ((get(ba, ros)? as u32) << 11)
        | ((get(ba, ros + 1)? as u32) << 3)
        | ((get(ba, ros + 2)? as u32 & 0xE0) >> 5);
    let lat_raw = (((get(ba, ros + 2)? & 0x1F) as u32) << 14)
        | ((get(ba, ros + 3)? as u32) << 6)
        | ((get(ba, ros + 4)? as u32 & 0xFC) >> 2);
    let altitude = (((get(ba, ros + 4)? & 0x03) as u32) << 8) | get(ba, ros + 5)? as u32;

    let (longitude, latitude) = convert_raw_coords(long_raw, lat_raw, GEO_19_BITS);

    Ok(Vertex::Simple {
        longitude,
        latitude,
        altitude_ft: altitude * 100,
    })
}

fn decode_prism_vertex(ba: &[u8], ros: usize) -> Result<Vertex, DecodeError> {
    let long_bot_raw = ((get(ba, ros)? as u32) << 10)
        | ((get(ba, ros + 1)? as u32) << 2)
        | ((get(ba, ros + 2)? as u32 & 0xC0) >> 6);
    let lat_bot_raw = (((get(ba, ros + 2)? & 0x3F) as u32) << 12)
        | ((get(ba, ros + 3)? as u32) << 4)
        | ((get(ba, ros + 4)? as u32 & 0xF0) >> 4);
    let long_top_raw = (((get(ba, ros + 4)? & 0x0F) as u32) << 14)
        | ((get(ba, ros + 5)? as u32) << 6)
        | ((get(ba, ros + 6)? as u32 & 0xFC) >> 2);
    let lat_top_raw = (((get(ba, ros + 6)? & 0x03) as u32) << 16)
        | ((get(ba, ros + 7)? as u32) << 8)
        | get(ba, ros + 8)? as u32;

    let (longitude_bottom, latitude_bottom) =
        convert_raw_coords(long_bot_raw, lat_bot_raw, GEO_18_BITS);
    let (longitude_top, latitude_top) = convert_raw_coords(long_top_raw, lat_top_raw, GEO_18_BITS);

    let z_bottom = ((get(ba, ros + 9)? & 0xFE) >> 1) as u32;
    let z_top =
        (((get(ba, ros + 9)? & 0x01) as u32) << 6) | ((get(ba, ros + 10)? as u32 & 0xFC) >> 2);
    let r_major =
        (((get(ba, ros + 10)? & 0x03) as u32) << 7) | ((get(ba, ros + 11)? as u32 & 0xFE) >> 1);
    let r_minor = (((get(ba, ros + 11)? & 0x01) as u32) << 8) | get(ba, ros + 12)? as u32;
    let alpha = get(ba, ros + 13)?;

    Ok(Vertex::Prism {
        longitude_bottom,
        latitude_bottom,
        longitude_top,
        latitude_top,
        z_bottom_ft: z_bottom * 500,
        z_top_ft: z_top * 500,
        r_major_nm: r_major as f64 * 0.2,
        r_minor_nm: r_minor as f64 * 0.2,
        alpha,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use crate::{
        config::Config,
        frame::{
            GEO_19_BITS,
            twgo::{
                ReportStatus,
                TwgoPayload,
                TwgoRecords,
                Vertex,
                decode_simple_vertex,
            },
        },
    };

    fn dlac_pack(codes: &[u8]) -> Vec<u8> {
        let mut codes = codes.to_vec();
        while codes.len() % 4 != 0 {
            codes.push(27);
        }
        let mut bytes = Vec::new();
        for chunk in codes.chunks(4) {
            bytes.push((chunk[0] << 2) | (chunk[1] >> 4));
            bytes.push((chunk[1] << 4) | (chunk[2] >> 2));
            bytes.push((chunk[2] << 6) | chunk[3]);
        }
        bytes
    }

    #[test]
    fn it_decodes_a_text_record() {
        // Header: format 2, 1 record, location "ABC", reference point 0.
        let mut payload = vec![0x20, 0x10];
        payload.extend_from_slice(&dlac_pack(&[1, 2, 3]));
        payload.push(0x00);

        // One active record, report number 777, year 21, text "HI".
        let text = dlac_pack(&[8, 9, 27, 27]);
        let length = 5 + text.len();
        let report_number: u16 = 777;
        let report_year: u8 = 21;
        payload.push((length >> 8) as u8);
        payload.push(length as u8);
        payload.push((report_number >> 6) as u8);
        payload.push((((report_number & 0x3F) as u8) << 2) | (report_year >> 5));
        payload.push(((report_year & 0x1F) << 3) | 0x04);
        payload.extend_from_slice(&text);

        let decoded = TwgoPayload::decode(&payload, 8, &Config::default()).unwrap();
        assert_eq!(decoded.record_format, 2);
        assert_eq!(decoded.location, "ABC");
        match decoded.records {
            TwgoRecords::Text(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].report_number, 777);
                assert_eq!(records[0].report_year, 21);
                assert_eq!(records[0].report_status, ReportStatus::Active);
                assert_eq!(records[0].text, "HI");
            }
            other => panic!("unexpected records: {other:?}"),
        }
    }

    #[test]
    fn it_decodes_a_simple_vertex() {
        let longitude = 360.0 - 84.218445;
        let latitude = 39.90097;
        let long_raw = (longitude / GEO_19_BITS).round() as u32;
        let lat_raw = (latitude / GEO_19_BITS).round() as u32;
        let altitude: u32 = 55;

        let bytes = [
            (long_raw >> 11) as u8,
            (long_raw >> 3) as u8,
            (((long_raw & 0x07) as u8) << 5) | ((lat_raw >> 14) as u8),
            (lat_raw >> 6) as u8,
            (((lat_raw & 0x3F) as u8) << 2) | ((altitude >> 8) as u8),
            altitude as u8,
        ];

        match decode_simple_vertex(&bytes, 0).unwrap() {
            Vertex::Simple {
                longitude: decoded_longitude,
                latitude: decoded_latitude,
                altitude_ft,
            } => {
                assert_abs_diff_eq!(decoded_longitude, -84.218445, epsilon = 0.001);
                assert_abs_diff_eq!(decoded_latitude, 39.90097, epsilon = 0.001);
                assert_eq!(altitude_ft, 5500);
            }
            other => panic!("unexpected vertex: {other:?}"),
        }
    }
}
