//! Global block payload decoder.
//!
//! Gridded products (NEXRAD, icing, turbulence, cloud tops, lightning)
//! arrive as per-block tiles of 128 bins (32 wide, 4 tall), run-length
//! encoded with a codec that varies by product family. A block may instead
//! carry an empty-block bitmap covering a run of blocks after it.

use serde::{
    Deserialize,
    Serialize,
};

use crate::types::ScaleFactor;

/// Bins per block.
pub const BINS_PER_BLOCK: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("raster payload truncated")]
    Truncated,

    #[error("run length overran {BINS_PER_BLOCK} bins")]
    TooManyBins,

    #[error("payload ended with fewer than {BINS_PER_BLOCK} bins")]
    NotEnoughBins,

    #[error("unknown raster product id {product_id}")]
    UnknownProduct { product_id: u16 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RasterPayload {
    pub block_number: u32,
    pub scale_factor: ScaleFactor,
    /// 0 northern, 1 southern.
    pub hemisphere: u8,
    /// Altitude slice for icing and turbulence products, feet MSL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_level_ft: Option<u32>,
    pub content: RasterContent,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RasterContent {
    /// One flag per block following the anchor block; the anchor block
    /// itself is also empty.
    EmptyBlocks(Vec<bool>),
    /// 128 decoded bin values.
    Bins(Vec<u8>),
}

impl RasterPayload {
    pub fn decode(ba: &[u8], product_id: u16) -> Result<Self, DecodeError> {
        if ba.len() < 4 {
            return Err(DecodeError::Truncated);
        }

        let block_number =
            (((ba[0] & 0x0F) as u32) << 16) | ((ba[1] as u32) << 8) | ba[2] as u32;
        let element_id = (ba[0] & 0x80) >> 7;
        let product_specific = (ba[0] & 0x70) >> 4;

        let (scale_factor, hemisphere, altitude_level_ft) = match product_id {
            63 | 64 | 84 | 103 => {
                (
                    ScaleFactor::from_u8(product_specific & 0x03)
                        .ok_or(DecodeError::UnknownProduct { product_id })?,
                    (product_specific & 0x04) >> 2,
                    None,
                )
            }
            70 | 71 | 90 | 91 => {
                // Altitude slice: low products start at 2000 ft, high at
                // 18000 ft, 2000 ft per step.
                let base = if product_id == 70 || product_id == 90 {
                    2000
                }
                else {
                    18000
                };
                (
                    ScaleFactor::Medium,
                    0,
                    Some(product_specific as u32 * 2000 + base),
                )
            }
            _ => return Err(DecodeError::UnknownProduct { product_id }),
        };

        let content = if element_id == 0 {
            RasterContent::EmptyBlocks(decode_empty_bitmap(ba)?)
        }
        else {
            let bins = match product_id {
                63 | 64 => decode_nexrad_runs(&ba[3..])?,
                84 | 90 | 91 => decode_turbulence_runs(&ba[3..])?,
                70 | 71 => decode_icing_runs(&ba[3..])?,
                103 => decode_lightning_runs(&ba[3..])?,
                _ => return Err(DecodeError::UnknownProduct { product_id }),
            };
            RasterContent::Bins(bins)
        };

        Ok(Self {
            block_number,
            scale_factor,
            hemisphere,
            altitude_level_ft,
            content,
        })
    }
}

fn decode_empty_bitmap(ba: &[u8]) -> Result<Vec<bool>, DecodeError> {
    let mut flags = Vec::new();
    let first = *ba.get(3).ok_or(DecodeError::Truncated)?;
    let bitmap_length = (first & 0x0F) as usize;

    // Bits are taken LSB first within each byte; the first word only
    // contributes its high nibble.
    let mut byte = first >> 4;
    for _ in 0..4 {
        flags.push(byte & 0x01 != 0);
        byte >>= 1;
    }

    for i in 0..bitmap_length {
        let mut byte = *ba.get(4 + i).ok_or(DecodeError::Truncated)?;
        for _ in 0..8 {
            flags.push(byte & 0x01 != 0);
            byte >>= 1;
        }
    }

    Ok(flags)
}

fn push_run(bins: &mut Vec<u8>, value: u8, count: usize) -> Result<(), DecodeError> {
    if bins.len() + count > BINS_PER_BLOCK {
        return Err(DecodeError::TooManyBins);
    }
    for _ in 0..count {
        bins.push(value);
    }
    Ok(())
}

/// NEXRAD: single byte runs, 5-bit count − 1, 3-bit intensity.
fn decode_nexrad_runs(ba: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut bins = Vec::with_capacity(BINS_PER_BLOCK);
    let mut ros = 0;

    while bins.len() < BINS_PER_BLOCK {
        let byte = *ba.get(ros).ok_or(DecodeError::NotEnoughBins)?;
        push_run(&mut bins, byte & 0x07, ((byte >> 3) as usize) + 1)?;
        ros += 1;
    }

    Ok(bins)
}

/// Turbulence and cloud tops: nibble runs, with 0xE escaping to a full
/// count byte.
fn decode_turbulence_runs(ba: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut bins = Vec::with_capacity(BINS_PER_BLOCK);
    let mut ros = 0;

    while bins.len() < BINS_PER_BLOCK {
        let byte = *ba.get(ros).ok_or(DecodeError::NotEnoughBins)?;
        let value = byte & 0x0F;
        let high = (byte & 0xF0) >> 4;

        if high == 0x0E {
            let count = *ba.get(ros + 1).ok_or(DecodeError::NotEnoughBins)? as usize + 1;
            push_run(&mut bins, value, count)?;
            ros += 2;
        }
        else {
            push_run(&mut bins, value, high as usize + 1)?;
            ros += 1;
        }
    }

    Ok(bins)
}

/// Icing: two-byte runs, count − 1 then a `ddsssppp` value byte (SLD,
/// severity, probability).
fn decode_icing_runs(ba: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut bins = Vec::with_capacity(BINS_PER_BLOCK);
    let mut ros = 0;

    while bins.len() < BINS_PER_BLOCK {
        let count = *ba.get(ros).ok_or(DecodeError::NotEnoughBins)? as usize + 1;
        let value = *ba.get(ros + 1).ok_or(DecodeError::NotEnoughBins)?;
        push_run(&mut bins, value, count)?;
        ros += 2;
    }

    Ok(bins)
}

/// Lightning: single byte runs of `ccccpsss` (count − 1, polarity,
/// strikes). `0xF8` is an undocumented 32-bin filler seen in the wild.
/// Polarity with zero strikes normalizes to value 0.
fn decode_lightning_runs(ba: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut bins = Vec::with_capacity(BINS_PER_BLOCK);
    let mut ros = 0;

    while bins.len() < BINS_PER_BLOCK {
        let byte = *ba.get(ros).ok_or(DecodeError::NotEnoughBins)?;
        let strikes = byte & 0x07;
        let polarity = (byte & 0x08) >> 3;
        let run = ((byte & 0xF0) >> 4) as usize;

        let count = if strikes == 0 && polarity == 1 && byte == 0xF8 {
            run + 17
        }
        else {
            run + 1
        };

        let mut value = byte & 0x0F;
        if value == 0x08 {
            value = 0;
        }

        push_run(&mut bins, value, count)?;
        ros += 1;
    }

    Ok(bins)
}
