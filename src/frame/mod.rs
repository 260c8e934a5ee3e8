//! # Ground uplink frame parser
//!
//! Decodes a 432-byte FIS-B ground uplink payload (DO-358B) into structured
//! frame records: an 8 byte header carrying the station position and slot
//! timing, followed by frames of `{9-bit length, 3 reserved bits, 4-bit
//! type}` until a zero length or the end of the payload.
//!
//! Frame types:
//!
//! - 0  — APDU (all broadcast products)
//! - 14 — current report list
//! - 15 — TIS-B/ADS-R service status
//! - everything else is reserved and only surfaced in detailed mode

pub mod crl;
pub mod raster;
pub mod service_status;
pub mod twgo;

use bytes::Bytes;
use chrono::{
    DateTime,
    Timelike,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    capture::CaptureLine,
    config::Config,
    types::StationId,
};

/// Degrees per count for the 24-bit station position encoding.
pub const GEO_24_BITS: f64 = 360.0 / (1 << 24) as f64;
/// Degrees per count for 19-bit overlay vertex coordinates.
pub const GEO_19_BITS: f64 = 360.0 / (1 << 19) as f64;
/// Degrees per count for 18-bit circular prism coordinates.
pub const GEO_18_BITS: f64 = 360.0 / (1 << 18) as f64;

/// FIS-B station tier by TIS-B site id. Appendix D of DO-358B; tier implies
/// transmit power and product look-ahead range.
pub const TISB_TIER_LOOKUP: [&str; 16] = [
    "NO-TISB", "S4", "S3", "S2", "S1", "L5", "L4", "L3", "L2", "L1", "M3", "M2", "M1", "H3", "H2",
    "H1",
];

const VALID_PRODUCT_IDS: [u16; 17] = [
    413, 8, 11, 12, 13, 14, 15, 16, 17, 63, 64, 70, 71, 84, 90, 91, 103,
];

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame at offset {offset} overruns the payload")]
    FrameOverrun { offset: usize },

    #[error("unknown product id {product_id}")]
    UnknownProductId { product_id: u16 },

    #[error("segmented APDU with segment number 0")]
    SegmentNumberZero,

    #[error("APDU header truncated")]
    HeaderTruncated,

    #[error(transparent)]
    Twgo(#[from] twgo::DecodeError),

    #[error(transparent)]
    Raster(#[from] raster::DecodeError),

    #[error(transparent)]
    Crl(#[from] crl::DecodeError),
}

/// Convert raw wire coordinates to degrees.
///
/// Values fold into -180..180 / -90..90 and are rounded to 6 decimals,
/// matching typical GPS precision (station ids are built from the rounded
/// values and must be stable).
pub fn convert_raw_coords(raw_longitude: u32, raw_latitude: u32, bit_factor: f64) -> (f64, f64) {
    let mut longitude = raw_longitude as f64 * bit_factor;
    if longitude > 180.0 {
        longitude -= 360.0;
    }

    let mut latitude = raw_latitude as f64 * bit_factor;
    if latitude > 90.0 {
        latitude -= 180.0;
    }

    (
        (longitude * 1e6).round() / 1e6,
        (latitude * 1e6).round() / 1e6,
    )
}

/// One decoded ground uplink.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Packet {
    pub rcvd_time: DateTime<Utc>,
    pub station: StationId,
    pub latitude: f64,
    pub longitude: f64,
    /// Zero for test transmissions of new products; such packets must be
    /// ignored downstream.
    pub app_data_valid: bool,
    pub position_valid: bool,
    /// TIS-B site id nibble; indexes [`TISB_TIER_LOOKUP`].
    pub tisb_site_id: u8,
    pub transmission_time_slot: u8,
    /// Message start opportunity, `slot_id * 22`.
    pub mso: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<PacketDetail>,
    pub frames: Vec<Frame>,
}

/// Fields nobody needs for routine decoding, kept verbatim in detailed
/// mode.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PacketDetail {
    pub utc_coupled: bool,
    pub mso_utc_ms: f64,
    pub data_channel: u8,
    pub tisb_site_id_type: String,
    pub reserved_7_2: u8,
    pub reserved_8_58: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Frame {
    Apdu(ApduFrame),
    Crl(crl::CrlFrame),
    ServiceStatus(service_status::ServiceStatusFrame),
    Reserved {
        frame_type: u8,
        reserved_2_24: u8,
        contents: Vec<u8>,
    },
}

/// Partial product time from the APDU header. Only `t_opt` 0 (hours and
/// minutes) and 2 (plus month and day) are transmitted.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ApduTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
    pub hour: u32,
    pub minute: u32,
}

/// Segmentation block of a segmented APDU.
///
/// `apdu_number` is 1-based; the product file id ties fragments of one
/// payload together and is unique per reporting area.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub product_file_id: u16,
    pub product_file_length: u16,
    pub apdu_number: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApduFrame {
    pub product_id: u16,
    pub time: ApduTime,
    pub payload: ApduPayload,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ApduPayload {
    /// Product 413: generic DLAC text (METAR, TAF, winds, PIREP).
    Text(String),
    /// Products 8..17: text records and graphic overlays.
    Twgo(twgo::TwgoPayload),
    /// Products 63..103: gridded bins.
    Raster(raster::RasterPayload),
    /// A fragment of a segmented payload, still undecoded. The 6-byte TWGO
    /// payload header repeats in every fragment.
    Segment {
        header: SegmentHeader,
        contents: Bytes,
    },
    /// Reassembly output: a TWGO product with its halves matched up. Never
    /// produced by the frame parser itself.
    TwgoPair {
        text: Option<twgo::TwgoPayload>,
        graphics: Option<twgo::TwgoPayload>,
    },
}

impl Packet {
    /// Decode a capture line into a packet. Frame decode failures abort the
    /// whole packet; the caller records the error and drops it.
    pub fn decode(line: &CaptureLine, config: &Config) -> Result<Self, DecodeError> {
        let ba = &line.payload;

        let raw_latitude = ((ba[0] as u32) << 15) | ((ba[1] as u32) << 7) | ((ba[2] as u32) >> 1);
        let raw_longitude = (((ba[2] & 0x01) as u32) << 23)
            | ((ba[3] as u32) << 15)
            | ((ba[4] as u32) << 7)
            | ((ba[5] as u32) >> 1);
        let (longitude, latitude) = convert_raw_coords(raw_longitude, raw_latitude, GEO_24_BITS);

        let slot_id = ba[6] & 0x1F;
        let tisb_site_id = (ba[7] & 0xF0) >> 4;

        let detail = config.detailed.then(|| {
            let secs_past_midnight_mod_32 = line.rcvd_time.num_seconds_from_midnight() % 32;
            let mut data_channel_0 = slot_id as i32 - secs_past_midnight_mod_32 as i32;
            if data_channel_0 < 0 {
                data_channel_0 += 32;
            }

            PacketDetail {
                utc_coupled: (ba[6] & 0x80) != 0,
                mso_utc_ms: (slot_id as f64 * 22.0) * 0.25 + 6.0,
                data_channel: data_channel_0 as u8 + 1,
                tisb_site_id_type: TISB_TIER_LOOKUP[tisb_site_id as usize].to_owned(),
                reserved_7_2: (ba[6] & 0x40) >> 6,
                reserved_8_58: ba[7] & 0x0F,
            }
        });

        let mut frames = Vec::new();
        let mut offset = 8;

        loop {
            if offset >= ba.len() - 1 {
                break;
            }

            let frame_length =
                (((ba[offset] as usize) << 1) | ((ba[offset + 1] as usize & 0x80) >> 7)) as usize;
            if frame_length == 0 {
                break;
            }

            let reserved_2_24 = (ba[offset + 1] & 0x70) >> 4;
            let frame_type = ba[offset + 1] & 0x0F;

            let end = offset + 2 + frame_length;
            if end > ba.len() {
                return Err(DecodeError::FrameOverrun { offset });
            }
            let contents = &ba[offset + 2..end];

            match frame_type {
                0 => {
                    frames.push(Frame::Apdu(decode_apdu(contents, config)?));
                }
                14 => {
                    frames.push(Frame::Crl(crl::CrlFrame::decode(contents, config)?));
                }
                15 => {
                    frames.push(Frame::ServiceStatus(service_status::ServiceStatusFrame::decode(
                        contents,
                    )));
                }
                _ => {
                    if config.detailed {
                        frames.push(Frame::Reserved {
                            frame_type,
                            reserved_2_24,
                            contents: contents.to_vec(),
                        });
                    }
                }
            }

            offset = end;
        }

        Ok(Self {
            rcvd_time: line.rcvd_time,
            station: StationId::from_position(latitude, longitude),
            latitude,
            longitude,
            app_data_valid: (ba[6] & 0x20) != 0,
            position_valid: (ba[5] & 0x01) != 0,
            tisb_site_id,
            transmission_time_slot: slot_id + 1,
            mso: slot_id as u16 * 22,
            detail,
            frames,
        })
    }

    /// Packets per second this station class transmits. High power stations
    /// send 4/s, medium 3/s, low 2/s, surface 1/s.
    pub fn expected_packets_per_second(&self) -> u32 {
        match self.tisb_site_id {
            13.. => 4,
            10.. => 3,
            5.. => 2,
            _ => 1,
        }
    }
}

/// Bit cursor over an APDU header.
///
/// The header is not byte aligned once the optional month/day and
/// segmentation blocks come into play, so fields are pulled off MSB first.
struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, count: usize) -> Result<u32, DecodeError> {
        let mut value = 0u32;
        for _ in 0..count {
            let byte = self
                .bytes
                .get(self.pos / 8)
                .ok_or(DecodeError::HeaderTruncated)?;
            let bit = (byte >> (7 - (self.pos % 8))) & 1;
            value = (value << 1) | bit as u32;
            self.pos += 1;
        }
        Ok(value)
    }

    /// First byte after the bits consumed so far.
    fn payload_start(&self) -> usize {
        self.pos.div_ceil(8)
    }
}

fn decode_apdu(ba: &[u8], config: &Config) -> Result<ApduFrame, DecodeError> {
    let mut bits = BitReader::new(ba);

    let _agp_flags = bits.take(3)?;
    let product_id = bits.take(11)? as u16;
    let s_flag = bits.take(1)? == 1;
    let t_opt = bits.take(2)?;

    let (month, day) = if t_opt >= 1 {
        (Some(bits.take(4)?), Some(bits.take(5)?))
    }
    else {
        (None, None)
    };
    let hour = bits.take(5)?;
    let minute = bits.take(6)?;

    let segment = if s_flag {
        let product_file_id = bits.take(10)? as u16;
        let product_file_length = bits.take(9)? as u16;
        let apdu_number = bits.take(9)? as u16;

        if apdu_number == 0 {
            return Err(DecodeError::SegmentNumberZero);
        }

        Some(SegmentHeader {
            product_file_id,
            product_file_length,
            apdu_number,
        })
    }
    else {
        None
    };

    if !VALID_PRODUCT_IDS.contains(&product_id) {
        return Err(DecodeError::UnknownProductId { product_id });
    }

    let payload_bytes = ba
        .get(bits.payload_start()..)
        .ok_or(DecodeError::HeaderTruncated)?;

    let payload = if let Some(header) = segment {
        ApduPayload::Segment {
            header,
            contents: Bytes::copy_from_slice(payload_bytes),
        }
    }
    else {
        match product_id {
            413 => ApduPayload::Text(crate::dlac::decode(payload_bytes, config.dlac_4bit_tab)),
            8..=17 => {
                ApduPayload::Twgo(twgo::TwgoPayload::decode(
                    payload_bytes,
                    product_id,
                    config,
                )?)
            }
            _ => ApduPayload::Raster(raster::RasterPayload::decode(payload_bytes, product_id)?),
        }
    };

    Ok(ApduFrame {
        product_id,
        time: ApduTime {
            month,
            day,
            hour,
            minute,
        },
        payload,
    })
}

#[cfg(test)]
mod tests {
    use crate::{
        capture::{
            CaptureLine,
            PAYLOAD_LENGTH,
        },
        config::Config,
        frame::{
            ApduPayload,
            Frame,
            GEO_24_BITS,
            Packet,
            convert_raw_coords,
        },
    };

    /// Write one frame (header + contents) at `offset`, returning the next
    /// free offset.
    fn put_frame(payload: &mut [u8], offset: usize, frame_type: u8, contents: &[u8]) -> usize {
        let length = contents.len();
        payload[offset] = (length >> 1) as u8;
        payload[offset + 1] = (((length & 1) as u8) << 7) | (frame_type & 0x0F);
        payload[offset + 2..offset + 2 + length].copy_from_slice(contents);
        offset + 2 + length
    }

    fn packet_with_frames(frames: &[(u8, Vec<u8>)]) -> Packet {
        let mut payload = vec![0u8; PAYLOAD_LENGTH];

        // Station at ~40.04N 86.26W, app data valid, slot 4, high tier.
        let raw_latitude = (40.0383 / GEO_24_BITS) as u32;
        let raw_longitude = ((360.0 - 86.255593) / GEO_24_BITS) as u32;
        payload[0] = (raw_latitude >> 15) as u8;
        payload[1] = (raw_latitude >> 7) as u8;
        payload[2] = ((raw_latitude << 1) as u8) | ((raw_longitude >> 23) as u8 & 1);
        payload[3] = (raw_longitude >> 15) as u8;
        payload[4] = (raw_longitude >> 7) as u8;
        payload[5] = (raw_longitude << 1) as u8;
        payload[6] = 0x20 | 0x04;
        payload[7] = 0xF0;

        let mut offset = 8;
        for (frame_type, contents) in frames {
            offset = put_frame(&mut payload, offset, *frame_type, contents);
        }

        let hex: String = payload.iter().map(|b| format!("{b:02x}")).collect();
        let line: CaptureLine = format!("+{hex};rs=1;rssi=-20.1;t=1620976680.500000;")
            .parse()
            .unwrap();

        Packet::decode(&line, &Config::default()).unwrap()
    }

    /// Build a type-413 APDU frame: header (t_opt=0) + DLAC text.
    fn text_apdu(dlac: &[u8]) -> Vec<u8> {
        // 3 reserved bits, 11-bit product id 413, s=0, t_opt=0,
        // hour=7 (5 bits), minute=15 (6 bits) -> 28 bits, pad to 4 bytes.
        let mut bits: u32 = 0;
        bits = (bits << 3) | 0;
        bits = (bits << 11) | 413;
        bits = (bits << 1) | 0;
        bits = (bits << 2) | 0;
        bits = (bits << 5) | 7;
        bits = (bits << 6) | 15;
        // 28 bits used, shift into the top of a 32-bit word
        bits <<= 4;

        let mut frame = vec![
            (bits >> 24) as u8,
            (bits >> 16) as u8,
            (bits >> 8) as u8,
            bits as u8,
        ];
        frame.extend_from_slice(dlac);
        frame
    }

    #[test]
    fn it_converts_raw_coordinates() {
        let (longitude, latitude) =
            convert_raw_coords(((360.0 - 86.0) / GEO_24_BITS) as u32, 0, GEO_24_BITS);
        assert!((longitude + 86.0).abs() < 0.001);
        assert_eq!(latitude, 0.0);
    }

    #[test]
    fn it_decodes_the_uplink_header() {
        let packet = packet_with_frames(&[]);
        assert!(packet.app_data_valid);
        assert_eq!(packet.transmission_time_slot, 5);
        assert_eq!(packet.mso, 4 * 22);
        assert_eq!(packet.expected_packets_per_second(), 4);
        assert!((packet.latitude - 40.0383).abs() < 0.001);
        assert!((packet.longitude + 86.255593).abs() < 0.001);
        assert!(packet.frames.is_empty());
    }

    #[test]
    fn it_decodes_a_text_apdu() {
        // "OK" plus NC padding
        let codes = [15u8, 11, 27, 27];
        let dlac = [
            (codes[0] << 2) | (codes[1] >> 4),
            (codes[1] << 4) | (codes[2] >> 2),
            (codes[2] << 6) | codes[3],
        ];

        let packet = packet_with_frames(&[(0, text_apdu(&dlac))]);
        assert_eq!(packet.frames.len(), 1);
        match &packet.frames[0] {
            Frame::Apdu(apdu) => {
                assert_eq!(apdu.product_id, 413);
                assert_eq!(apdu.time.hour, 7);
                assert_eq!(apdu.time.minute, 15);
                assert!(apdu.time.month.is_none());
                match &apdu.payload {
                    ApduPayload::Text(text) => assert_eq!(text, "OK"),
                    other => panic!("unexpected payload: {other:?}"),
                }
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn it_stops_at_a_zero_length_frame() {
        let packet = packet_with_frames(&[(0, text_apdu(&[0, 0, 0]))]);
        // trailing zero padding terminates the walk after the one frame
        assert_eq!(packet.frames.len(), 1);
    }
}
