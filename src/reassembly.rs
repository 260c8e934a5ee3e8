//! # Reassembly
//!
//! Two jobs between the frame parser and product synthesis:
//!
//! 1. **Segment joining.** Payloads larger than one frame arrive as
//!    ordered fragments sharing a product file id. Fragments are buffered
//!    until all are present, then concatenated (dropping the repeated TWGO
//!    payload header) and re-decoded as a single payload. Partial buffers
//!    expire after a TTL.
//!
//! 2. **TWGO pairing.** Products with separate text and graphics halves
//!    are matched by report identity. Text passes through immediately (the
//!    standard requires it) and is retained; graphics buffer until their
//!    text is active, then the pair goes out together. The wrinkle is
//!    retransmission: an unchanged text must not flow again once its
//!    graphics have been seen, or the pair would be forever chased by a
//!    bare text — but a text-only report must keep flowing or it would
//!    expire downstream.

use std::collections::HashMap;

use bytes::{
    Bytes,
    BytesMut,
};
use chrono::{
    DateTime,
    Duration,
    Utc,
};
use tracing::debug;

use crate::{
    config::Config,
    frame::{
        ApduFrame,
        ApduPayload,
        Frame,
        Packet,
        SegmentHeader,
        twgo::{
            self,
            ReportStatus,
            TwgoPayload,
            TwgoRecords,
        },
    },
};

/// Bytes of TWGO payload header repeated in every fragment.
const TWGO_HEADER_LENGTH: usize = 6;

/// Table caps; the oldest entry is evicted on pressure.
const MAX_SEGMENT_BUFFERS: usize = 512;
const MAX_PENDING_PAIRS: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum ReassemblyError {
    #[error("segment {index} out of bounds for a {total} fragment payload")]
    SegmentIndexOutOfBounds { index: usize, total: usize },

    #[error("fragments of one payload disagree on length")]
    SegmentCountMismatch,

    #[error(transparent)]
    Twgo(#[from] twgo::DecodeError),
}

/// Running drop counters, exposed for the stage's shutdown log line.
#[derive(Clone, Copy, Debug, Default)]
pub struct Counters {
    pub segment_timeouts: u64,
    pub twgo_orphans: u64,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
struct SegmentKey {
    product_id: u16,
    product_file_id: u16,
}

#[derive(Debug)]
struct SegmentBuffer {
    fragments: Vec<Option<Bytes>>,
    have: usize,
    inserted: DateTime<Utc>,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
struct TwgoKey {
    product_id: u16,
    report_number: u16,
    report_year: u8,
    location: String,
    month: u32,
}

#[derive(Debug, Default)]
struct TwgoState {
    text: Option<TwgoPayload>,
    graphics: Option<TwgoPayload>,
    last_update: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct Reassembler {
    config: Config,
    segments: HashMap<SegmentKey, SegmentBuffer>,
    pairs: HashMap<TwgoKey, TwgoState>,
    last_expunge: Option<DateTime<Utc>>,
    counters: Counters,
}

impl Reassembler {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            segments: HashMap::new(),
            pairs: HashMap::new(),
            last_expunge: None,
            counters: Counters::default(),
        }
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Run one packet through reassembly. Frames may be consumed (buffered
    /// fragments, unmatched graphics) or replaced (joined payloads, paired
    /// TWGO).
    pub fn process(&mut self, mut packet: Packet) -> (Packet, Vec<ReassemblyError>) {
        let now = packet.rcvd_time;
        let mut errors = Vec::new();
        let mut frames = Vec::with_capacity(packet.frames.len());

        // Join segments first; a completed payload feeds the pairing pass
        // below in the same packet.
        for frame in packet.frames.drain(..) {
            match frame {
                Frame::Apdu(apdu) => {
                    if let ApduPayload::Segment { header, contents } = apdu.payload {
                        match self.push_fragment(apdu.product_id, header, contents, now) {
                            Ok(Some(payload)) => {
                                frames.push(Frame::Apdu(ApduFrame {
                                    product_id: apdu.product_id,
                                    time: apdu.time,
                                    payload: ApduPayload::Twgo(payload),
                                }));
                            }
                            Ok(None) => {}
                            Err(error) => errors.push(error),
                        }
                    }
                    else {
                        frames.push(Frame::Apdu(ApduFrame {
                            product_id: apdu.product_id,
                            time: apdu.time,
                            payload: apdu.payload,
                        }));
                    }
                }
                other => frames.push(other),
            }
        }

        let mut matched = Vec::with_capacity(frames.len());
        for frame in frames {
            match frame {
                Frame::Apdu(apdu)
                    if matches!(apdu.product_id, 8 | 11 | 12 | 15 | 16 | 17)
                        && matches!(apdu.payload, ApduPayload::Twgo(_)) =>
                {
                    let ApduPayload::Twgo(payload) = apdu.payload
                    else {
                        unreachable!();
                    };

                    if let Some(pair) = self.match_twgo(apdu.product_id, &apdu.time, payload, now)
                    {
                        matched.push(Frame::Apdu(ApduFrame {
                            product_id: apdu.product_id,
                            time: apdu.time,
                            payload: pair,
                        }));
                    }
                }
                other => matched.push(other),
            }
        }

        packet.frames = matched;

        self.maybe_expunge(now);

        (packet, errors)
    }

    fn push_fragment(
        &mut self,
        product_id: u16,
        header: SegmentHeader,
        contents: Bytes,
        now: DateTime<Utc>,
    ) -> Result<Option<TwgoPayload>, ReassemblyError> {
        let key = SegmentKey {
            product_id,
            product_file_id: header.product_file_id,
        };
        let total = header.product_file_length as usize;
        let index = header.apdu_number as usize - 1;

        if index >= total {
            return Err(ReassemblyError::SegmentIndexOutOfBounds { index, total });
        }

        if !self.segments.contains_key(&key) && self.segments.len() >= MAX_SEGMENT_BUFFERS {
            if let Some(oldest) = self
                .segments
                .iter()
                .min_by_key(|(_, buffer)| buffer.inserted)
                .map(|(key, _)| key.clone())
            {
                self.segments.remove(&oldest);
                self.counters.segment_timeouts += 1;
            }
        }

        let buffer = self.segments.entry(key.clone()).or_insert_with(|| {
            SegmentBuffer {
                fragments: vec![None; total],
                have: 0,
                inserted: now,
            }
        });

        if buffer.fragments.len() != total {
            self.segments.remove(&key);
            return Err(ReassemblyError::SegmentCountMismatch);
        }

        if buffer.fragments[index].is_some() {
            // retransmission of a fragment we already hold
            return Ok(None);
        }

        buffer.fragments[index] = Some(contents);
        buffer.have += 1;

        if buffer.have < total {
            return Ok(None);
        }

        let buffer = self.segments.remove(&key).expect("buffer exists");
        let mut joined = BytesMut::new();
        for (index, fragment) in buffer.fragments.into_iter().enumerate() {
            let fragment = fragment.expect("all fragments present");
            if index == 0 {
                joined.extend_from_slice(&fragment);
            }
            else {
                joined.extend_from_slice(&fragment[TWGO_HEADER_LENGTH.min(fragment.len())..]);
            }
        }

        debug!(product_id, product_file_id = header.product_file_id, "segment complete");

        let payload = TwgoPayload::decode(&joined, product_id, &self.config)?;
        Ok(Some(payload))
    }

    fn match_twgo(
        &mut self,
        product_id: u16,
        time: &crate::frame::ApduTime,
        payload: TwgoPayload,
        now: DateTime<Utc>,
    ) -> Option<ApduPayload> {
        let (report_number, report_year, is_text) = match &payload.records {
            TwgoRecords::Text(records) => {
                let first = records.first()?;
                (first.report_number, first.report_year, true)
            }
            TwgoRecords::Graphics(records) => {
                let first = records.first()?;
                (first.report_number, first.report_year, false)
            }
            TwgoRecords::Unsupported => return None,
        };

        // Uniqueness needs the location (D-NOTAMs reuse numbers across
        // reporting points) and, for TRA/TMOA, the month.
        let key = TwgoKey {
            product_id,
            report_number,
            report_year,
            location: payload.location.clone(),
            month: time.month.unwrap_or(0),
        };

        if !self.pairs.contains_key(&key) && self.pairs.len() >= MAX_PENDING_PAIRS {
            if let Some(oldest) = self
                .pairs
                .iter()
                .min_by_key(|(_, state)| state.last_update)
                .map(|(key, _)| key.clone())
            {
                self.pairs.remove(&oldest);
                self.counters.twgo_orphans += 1;
            }
        }

        let state = self.pairs.entry(key.clone()).or_default();
        state.last_update = Some(now);

        if !is_text {
            state.graphics = Some(payload);

            return state.text.clone().map(|text| {
                ApduPayload::TwgoPair {
                    text: Some(text),
                    graphics: state.graphics.clone(),
                }
            });
        }

        let record = match &payload.records {
            TwgoRecords::Text(records) => &records[0],
            _ => unreachable!(),
        };

        // A cancellation clears both halves and still flows downstream so
        // the cancellation product can be synthesized.
        if record.report_status == ReportStatus::Cancelled {
            self.pairs.remove(&key);
            return Some(ApduPayload::TwgoPair {
                text: Some(payload),
                graphics: None,
            });
        }

        // Empty active texts are renewals; only NOTAM-TFRs (product 8)
        // send them, and only those pass.
        if record.text.is_empty() {
            if product_id == 8 {
                return Some(ApduPayload::TwgoPair {
                    text: Some(payload),
                    graphics: None,
                });
            }
            return None;
        }

        match &state.text {
            None => {
                // first sight of this text; pair with any waiting graphics
                state.text = Some(payload.clone());
                Some(ApduPayload::TwgoPair {
                    text: Some(payload),
                    graphics: state.graphics.clone(),
                })
            }
            Some(stored) => {
                let stored_text = match &stored.records {
                    TwgoRecords::Text(records) => &records[0].text,
                    _ => unreachable!(),
                };

                if stored_text != &record.text {
                    // changed report; any retained graphics may no longer
                    // agree with it
                    state.graphics = None;
                    state.text = Some(payload.clone());
                    Some(ApduPayload::TwgoPair {
                        text: Some(payload),
                        graphics: None,
                    })
                }
                else if state.graphics.is_some() {
                    // unchanged retransmission of a paired report; the
                    // pair already went out
                    state.text = Some(payload);
                    None
                }
                else {
                    // text-only report: keep it flowing so it stays alive
                    // downstream
                    state.text = Some(payload.clone());
                    Some(ApduPayload::TwgoPair {
                        text: Some(payload),
                        graphics: None,
                    })
                }
            }
        }
    }

    fn maybe_expunge(&mut self, now: DateTime<Utc>) {
        let interval = Duration::minutes(self.config.expunge_interval_mins as i64);
        match self.last_expunge {
            None => {
                self.last_expunge = Some(now);
                return;
            }
            Some(last) if now - last <= interval => return,
            _ => {}
        }
        self.last_expunge = Some(now);

        let segment_ttl = Duration::seconds(self.config.segment_ttl_secs as i64);
        let before = self.segments.len();
        self.segments
            .retain(|_, buffer| now - buffer.inserted <= segment_ttl);
        let timeouts = (before - self.segments.len()) as u64;
        self.counters.segment_timeouts += timeouts;
        if timeouts > 0 {
            debug!(timeouts, "expired partial segment buffers");
        }

        let twgo_ttl = Duration::seconds(self.config.twgo_ttl_secs as i64);
        let before = self.pairs.len();
        self.pairs.retain(|_, state| {
            state
                .last_update
                .map(|last| now - last <= twgo_ttl)
                .unwrap_or(false)
        });
        let orphans = (before - self.pairs.len()) as u64;
        self.counters.twgo_orphans += orphans;
        if orphans > 0 {
            debug!(orphans, "expired unmatched TWGO records");
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chrono::Duration;

    use crate::{
        capture::{
            CaptureLine,
            PAYLOAD_LENGTH,
        },
        config::Config,
        frame::{
            ApduFrame,
            ApduPayload,
            ApduTime,
            Frame,
            Packet,
            SegmentHeader,
            twgo::TwgoRecords,
        },
        reassembly::Reassembler,
    };

    fn packet_at(iso: &str, frames: Vec<Frame>) -> Packet {
        let rcvd_time = iso.parse().unwrap();
        let payload = vec![0u8; PAYLOAD_LENGTH];
        let hex: String = payload.iter().map(|b| format!("{b:02x}")).collect();
        let line: CaptureLine = format!("+{hex};rs=0;rssi=-20.0;t=0.0;").parse().unwrap();

        let mut packet = Packet::decode(&line, &Config::default()).unwrap();
        packet.rcvd_time = rcvd_time;
        packet.frames = frames;
        packet
    }

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

    /// TWGO payload bytes: header plus one active text record saying "HI".
    fn twgo_text_bytes() -> Vec<u8> {
        let mut payload = vec![0x20, 0x10];
        payload.extend_from_slice(&dlac_pack(&[1, 2, 3]));
        payload.push(0x00);

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
        payload
    }

    fn segment_frame(
        product_id: u16,
        number: u16,
        of: u16,
        contents: Vec<u8>,
    ) -> Frame {
        Frame::Apdu(ApduFrame {
            product_id,
            time: ApduTime {
                month: None,
                day: None,
                hour: 12,
                minute: 0,
            },
            payload: ApduPayload::Segment {
                header: SegmentHeader {
                    product_file_id: 42,
                    product_file_length: of,
                    apdu_number: number,
                },
                contents: Bytes::from(contents),
            },
        })
    }

    #[test]
    fn it_joins_fragments_in_index_order() {
        let config = Config::default();
        let mut reassembler = Reassembler::new(&config);

        let full = twgo_text_bytes();
        let split = 8;
        // fragment 2 repeats the 6 byte payload header
        let mut second = full[..6].to_vec();
        second.extend_from_slice(&full[split..]);
        let first = full[..split].to_vec();

        // out of order: fragment 2 first
        let (packet, errors) = reassembler.process(packet_at(
            "2020-09-18T20:05:32.128Z",
            vec![segment_frame(8, 2, 2, second)],
        ));
        assert!(errors.is_empty());
        assert!(packet.frames.is_empty());

        let (packet, errors) = reassembler.process(packet_at(
            "2020-09-18T20:05:33.046Z",
            vec![segment_frame(8, 1, 2, first)],
        ));
        assert!(errors.is_empty());
        // joined, decoded, and (being a text half) passed through pairing
        assert_eq!(packet.frames.len(), 1);
        match &packet.frames[0] {
            Frame::Apdu(apdu) => {
                match &apdu.payload {
                    ApduPayload::TwgoPair { text: Some(text), graphics: None } => {
                        match &text.records {
                            TwgoRecords::Text(records) => {
                                assert_eq!(records[0].report_number, 777);
                                assert_eq!(records[0].text, "HI");
                            }
                            other => panic!("unexpected records: {other:?}"),
                        }
                    }
                    other => panic!("unexpected payload: {other:?}"),
                }
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn it_ignores_duplicate_fragments() {
        let config = Config::default();
        let mut reassembler = Reassembler::new(&config);

        let full = twgo_text_bytes();
        let first = full[..8].to_vec();

        let (packet, errors) = reassembler.process(packet_at(
            "2020-09-18T20:05:32.128Z",
            vec![
                segment_frame(8, 1, 2, first.clone()),
                segment_frame(8, 1, 2, first),
            ],
        ));
        assert!(errors.is_empty());
        assert!(packet.frames.is_empty());
    }

    #[test]
    fn it_rejects_out_of_bounds_fragment_indices() {
        let config = Config::default();
        let mut reassembler = Reassembler::new(&config);

        let (_, errors) = reassembler.process(packet_at(
            "2020-09-18T20:05:32.128Z",
            vec![segment_frame(8, 3, 2, vec![0; 8])],
        ));
        assert_eq!(errors.len(), 1);
    }

    fn twgo_frame(product_id: u16, payload: crate::frame::twgo::TwgoPayload) -> Frame {
        Frame::Apdu(ApduFrame {
            product_id,
            time: ApduTime {
                month: None,
                day: None,
                hour: 12,
                minute: 0,
            },
            payload: ApduPayload::Twgo(payload),
        })
    }

    fn text_payload(text: &str) -> crate::frame::twgo::TwgoPayload {
        use crate::frame::twgo::{
            ReportStatus,
            TextRecord,
            TwgoPayload,
        };

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

    fn graphics_payload() -> crate::frame::twgo::TwgoPayload {
        use crate::frame::twgo::{
            GeometryOption,
            GraphicRecord,
            TwgoPayload,
            Vertex,
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
                object_element: None,
                object_type: 14,
                object_status: 15,
                object_qualifiers: None,
                param_flag: false,
                date_time_format: 0,
                geometry_option: Some(GeometryOption::PolygonMsl),
                overlay_operator: 0,
                start: None,
                stop: None,
                vertices: vec![Vertex::Simple {
                    longitude: -84.0,
                    latitude: 39.0,
                    altitude_ft: 4000,
                }],
            }]),
        }
    }

    #[test]
    fn it_buffers_graphics_until_text_arrives() {
        let config = Config::default();
        let mut reassembler = Reassembler::new(&config);

        // graphics first: nothing may be emitted
        let (packet, errors) = reassembler.process(packet_at(
            "2021-05-14T09:00:00Z",
            vec![twgo_frame(11, graphics_payload())],
        ));
        assert!(errors.is_empty());
        assert!(packet.frames.is_empty());

        // text arrives: one paired frame with both halves
        let (packet, _) = reassembler.process(packet_at(
            "2021-05-14T09:00:05Z",
            vec![twgo_frame(11, text_payload("AIRMET KIND 140900 ..."))],
        ));
        assert_eq!(packet.frames.len(), 1);
        match &packet.frames[0] {
            Frame::Apdu(apdu) => {
                match &apdu.payload {
                    ApduPayload::TwgoPair {
                        text: Some(_),
                        graphics: Some(_),
                    } => {}
                    other => panic!("unexpected payload: {other:?}"),
                }
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        // unchanged retransmission of a paired text stays quiet
        let (packet, _) = reassembler.process(packet_at(
            "2021-05-14T09:05:00Z",
            vec![twgo_frame(11, text_payload("AIRMET KIND 140900 ..."))],
        ));
        assert!(packet.frames.is_empty());

        // a changed text resets the retained graphics and flows alone
        let (packet, _) = reassembler.process(packet_at(
            "2021-05-14T09:10:00Z",
            vec![twgo_frame(11, text_payload("AIRMET KIND 140900 AMD"))],
        ));
        assert_eq!(packet.frames.len(), 1);
        match &packet.frames[0] {
            Frame::Apdu(apdu) => {
                match &apdu.payload {
                    ApduPayload::TwgoPair {
                        text: Some(_),
                        graphics: None,
                    } => {}
                    other => panic!("unexpected payload: {other:?}"),
                }
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn it_expires_stale_segment_buffers() {
        let mut config = Config::default();
        config.segment_ttl_secs = 60;
        config.expunge_interval_mins = 1;
        let mut reassembler = Reassembler::new(&config);

        let full = twgo_text_bytes();
        let t0: chrono::DateTime<chrono::Utc> = "2020-09-18T20:00:00Z".parse().unwrap();

        let (_, errors) = reassembler.process(packet_at(
            "2020-09-18T20:00:00Z",
            vec![segment_frame(8, 1, 2, full[..8].to_vec())],
        ));
        assert!(errors.is_empty());

        // two empty packets walk the clock past the expunge interval
        let later = t0 + Duration::minutes(3);
        reassembler.process(packet_at(&later.to_rfc3339(), vec![]));
        let later = t0 + Duration::minutes(5);
        reassembler.process(packet_at(&later.to_rfc3339(), vec![]));

        assert_eq!(reassembler.counters().segment_timeouts, 1);

        // the late second fragment now opens a fresh buffer instead of
        // completing the expired one
        let mut second = full[..6].to_vec();
        second.extend_from_slice(&full[8..]);
        let later = t0 + Duration::minutes(6);
        let (packet, _) = reassembler.process(packet_at(
            &later.to_rfc3339(),
            vec![segment_frame(8, 2, 2, second)],
        ));
        assert!(packet.frames.is_empty());
    }
}
