//! Service status products: the aircraft a station currently serves with
//! TIS-B/ADS-R. Short lived by design; the curator pools successive
//! messages.

use chrono::Duration;

use crate::{
    frame::{
        Packet,
        service_status::ServiceStatusFrame,
    },
    products::Product,
    types::ProductType,
};

const EXPIRATION_SECS: i64 = 40;

pub fn synthesize(frame: &ServiceStatusFrame, packet: &Packet) -> Product {
    let traffic = frame
        .aircraft
        .iter()
        .map(|aircraft| aircraft.display_address())
        .collect();

    let mut product = Product::new(
        ProductType::ServiceStatus,
        packet.station.to_string(),
        packet.rcvd_time,
        packet.rcvd_time + Duration::seconds(EXPIRATION_SECS),
    );
    product.station = Some(packet.station.clone());
    product.traffic = Some(traffic);

    product
}
