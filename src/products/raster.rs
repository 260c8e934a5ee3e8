//! Raster block products. One decoded block frame becomes one product per
//! tile — several for empty-block runs and for blocks above 60 degrees
//! latitude, which arrive at half resolution and are split in two.

use chrono::{
    DateTime,
    Duration,
    Utc,
};

use crate::{
    frame::{
        ApduTime,
        Packet,
        raster::{
            BINS_PER_BLOCK,
            RasterContent,
            RasterPayload,
        },
    },
    products::{
        BlockFields,
        Product,
        SynthesisError,
    },
    time,
    types::{
        ImageType,
        ProductType,
        ScaleFactor,
    },
};

/// Reinterpret a wire block number as `row * 1000 + column`, rows of
/// latitude from the equator and columns of longitude from the prime
/// meridian. Trivially separable into raster coordinates, unlike the wire
/// numbering.
pub fn alternate_block_number(block_number: u32, scale_factor: ScaleFactor) -> u32 {
    let (block_offset, div_factor) = match scale_factor {
        ScaleFactor::High => (0, 1),
        ScaleFactor::Medium => (1800, 5),
        ScaleFactor::Low => (3600, 9),
    };

    let adjusted = block_number - block_offset;
    let row = adjusted / (block_offset + 450);
    let col = (adjusted % (block_offset + 450)) / div_factor;

    row * 1000 + col
}

/// First alternate row at 60 degrees latitude, where only even-numbered
/// blocks are transmitted.
fn first_split_row(scale_factor: ScaleFactor) -> u32 {
    match scale_factor {
        ScaleFactor::High => 900,
        ScaleFactor::Medium => 180,
        ScaleFactor::Low => 100,
    }
}

/// Above 60 degrees a block covers two columns. Split it into a left and a
/// right half with doubled bins so every column keeps the standard 32-bin
/// width.
fn split_bins(bins: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut left = Vec::with_capacity(BINS_PER_BLOCK);
    let mut right = Vec::with_capacity(BINS_PER_BLOCK);

    for row in 0..4 {
        for col in 0..16 {
            let l = bins[row * 32 + col + 16];
            let r = bins[row * 32 + col];
            left.extend_from_slice(&[l, l]);
            right.extend_from_slice(&[r, r]);
        }
    }

    (left, right)
}

fn image_type(payload: &RasterPayload, product_id: u16) -> Result<ImageType, SynthesisError> {
    match product_id {
        63 => Ok(ImageType::NexradRegional),
        64 => Ok(ImageType::NexradConus),
        84 => Ok(ImageType::CloudTops),
        103 => Ok(ImageType::Lightning),
        70 | 71 => Ok(ImageType::Icing(payload.altitude_level_ft.unwrap_or(0))),
        90 | 91 => Ok(ImageType::Turbulence(payload.altitude_level_ft.unwrap_or(0))),
        _ => Err(SynthesisError::UnknownProductId { product_id }),
    }
}

pub fn synthesize(
    payload: &RasterPayload,
    product_id: u16,
    packet: &Packet,
    apdu_time: &ApduTime,
) -> Result<Vec<Product>, SynthesisError> {
    let image = image_type(payload, product_id)?;

    // The APDU time is the product instant: all tiles of one image carry
    // the same one, and a newer instant starts a new image.
    let event_time =
        time::from_hour_minute(packet.rcvd_time, apdu_time.hour, apdu_time.minute, true)?;

    let expiration = event_time
        + Duration::minutes(if image.allows_latency() { 75 } else { 105 });

    let mut products = Vec::new();

    match &payload.content {
        RasterContent::Bins(bins) => {
            emit_block(
                &mut products,
                image,
                payload.block_number,
                payload.scale_factor,
                bins,
                event_time,
                expiration,
                packet,
            );
        }
        RasterContent::EmptyBlocks(following) => {
            let empty = vec![0u8; BINS_PER_BLOCK];

            let block_increment = match payload.scale_factor {
                ScaleFactor::High => 1,
                ScaleFactor::Medium => 5,
                ScaleFactor::Low => 9,
            };

            let mut block_number = payload.block_number;

            // The run covers the anchor block plus one flag per following
            // block.
            for is_empty in std::iter::once(true).chain(following.iter().copied()) {
                if is_empty {
                    emit_block(
                        &mut products,
                        image,
                        block_number,
                        payload.scale_factor,
                        &empty,
                        event_time,
                        expiration,
                        packet,
                    );
                }

                if block_number >= 405_000 && payload.scale_factor == ScaleFactor::Medium {
                    block_number += 2;
                }
                else {
                    block_number += block_increment;
                }
            }
        }
    }

    Ok(products)
}

#[allow(clippy::too_many_arguments)]
fn emit_block(
    products: &mut Vec<Product>,
    image: ImageType,
    block_number: u32,
    scale_factor: ScaleFactor,
    bins: &[u8],
    event_time: DateTime<Utc>,
    expiration: DateTime<Utc>,
    packet: &Packet,
) {
    let alt_bn = alternate_block_number(block_number, scale_factor);
    let row = alt_bn / 1000;

    let mut make = |alt_bn: u32, bins: Vec<u8>| {
        let mut product = Product::new(
            ProductType::Image(image),
            format!("{}-{}", image.abbreviation(), event_time.format("%Y-%m-%dT%H:%M:%SZ")),
            packet.rcvd_time,
            expiration,
        );
        if image.is_forecast() {
            product.valid_time = Some(event_time);
        }
        else {
            product.observation_time = Some(event_time);
        }
        product.block = Some(BlockFields {
            alt_bn,
            scale_factor,
            bins,
        });
        products.push(product);
    };

    if row >= first_split_row(scale_factor) {
        let (left, right) = split_bins(bins);
        make(alt_bn, left);
        make(alt_bn + 1, right);
    }
    else {
        make(alt_bn, bins.to_vec());
    }
}
