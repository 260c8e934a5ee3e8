//! TIS-B/ADS-R service status frame decoder.
//!
//! Lists the aircraft a ground station is currently providing surveillance
//! services for, 4 bytes per aircraft. Consecutive messages may carry
//! different subsets of the tracked aircraft, so downstream keeps a pooled
//! view and ages entries out.

use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceStatusFrame {
    pub aircraft: Vec<TrackedAircraft>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackedAircraft {
    /// 24-bit ICAO address, lowercase hex.
    pub address: String,
    /// Address qualifier; almost always 0 (ICAO address).
    pub address_type: u8,
}

impl TrackedAircraft {
    /// Address with a `/n` qualifier suffix when the qualifier is
    /// non-standard.
    pub fn display_address(&self) -> String {
        if self.address_type == 0 {
            self.address.clone()
        }
        else {
            format!("{}/{}", self.address, self.address_type)
        }
    }
}

impl ServiceStatusFrame {
    pub fn decode(ba: &[u8]) -> Self {
        let aircraft = ba
            .chunks_exact(4)
            .map(|entry| {
                let address =
                    ((entry[1] as u32) << 16) | ((entry[2] as u32) << 8) | entry[3] as u32;
                TrackedAircraft {
                    address: format!("{address:06x}"),
                    address_type: entry[0] & 0x07,
                }
            })
            .collect();

        Self { aircraft }
    }
}
