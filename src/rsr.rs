//! Radio station reception tracking.
//!
//! Keeps a sliding window of per-second packet counts per station and
//! periodically emits a synthetic RSR product describing how much of each
//! station's expected traffic is actually being received.

use std::collections::{
    BTreeMap,
    HashMap,
};

use chrono::Duration;

use crate::{
    config::Config,
    frame::Packet,
    products::{
        Product,
        RsrStats,
    },
    types::{
        ProductType,
        StationId,
    },
};

#[derive(Debug)]
pub struct RsrTracker {
    window_secs: i64,
    every_secs: i64,
    use_expected_rate: bool,
    /// Packet counts keyed by whole second, then station.
    counts: BTreeMap<i64, HashMap<StationId, u32>>,
    /// Station class rate, captured from the uplink header.
    class_rate: HashMap<StationId, u32>,
    last_second: i64,
    total_secs: i64,
}

impl RsrTracker {
    pub fn new(config: &Config) -> Self {
        Self {
            window_secs: config.rsr_window_secs as i64,
            every_secs: config.rsr_every_secs.max(1) as i64,
            use_expected_rate: config.rsr_use_expected_rate,
            counts: BTreeMap::new(),
            class_rate: HashMap::new(),
            last_second: -1,
            total_secs: 0,
        }
    }

    /// Record one received packet. Returns an RSR product when an emission
    /// interval has elapsed with enough data in the window.
    pub fn observe(&mut self, packet: &Packet) -> Option<Product> {
        let second = packet.rcvd_time.timestamp();

        self.class_rate
            .insert(packet.station.clone(), packet.expected_packets_per_second());

        let mut emitted = None;

        if second > self.last_second {
            if self.total_secs > self.window_secs && self.total_secs % self.every_secs == 0 {
                emitted = self.emit(packet, second);
            }

            self.last_second = second;
            self.total_secs += 1;

            // Keep only the window plus slack.
            let cutoff = second - (self.window_secs + 2);
            self.counts = self.counts.split_off(&cutoff);
        }

        *self
            .counts
            .entry(second)
            .or_default()
            .entry(packet.station.clone())
            .or_insert(0) += 1;

        emitted
    }

    fn emit(&self, packet: &Packet, current_second: i64) -> Option<Product> {
        let mut received: HashMap<StationId, u32> = HashMap::new();
        let mut peak_per_sec: HashMap<StationId, u32> = HashMap::new();

        for second in (current_second - self.window_secs)..current_second {
            let Some(stations) = self.counts.get(&second)
            else {
                continue;
            };
            for (station, count) in stations {
                *received.entry(station.clone()).or_insert(0) += count;
                let peak = peak_per_sec.entry(station.clone()).or_insert(0);
                *peak = (*peak).max(*count);
            }
        }

        if received.is_empty() {
            return None;
        }

        let mut stations = BTreeMap::new();
        for (station, received) in received {
            let expected_per_sec = if self.use_expected_rate {
                self.class_rate.get(&station).copied().unwrap_or(1)
            }
            else {
                peak_per_sec.get(&station).copied().unwrap_or(1).max(1)
            };

            let percent = ((received as f64 * 100.0)
                / (expected_per_sec as f64 * self.window_secs as f64))
                .round() as u32;

            stations.insert(
                station.to_string(),
                RsrStats {
                    received,
                    expected_per_sec,
                    percent: percent.min(100),
                },
            );
        }

        let mut product = Product::new(
            ProductType::Rsr,
            "RSR",
            packet.rcvd_time,
            packet.rcvd_time + Duration::seconds(self.window_secs + 10),
        );
        product.stations = Some(stations);

        Some(product)
    }
}
