//! Bin-value palettes for raster rendering.
//!
//! Each image family maps its bin values to RGBA. Icing packs three data
//! items into one bin (SLD, severity, probability) and lightning two
//! (polarity, strikes), so those families render several variants, each
//! with its own extractor and palette.

use crate::types::ImageType;

/// Sentinel for bins inside the bounding box that no received block
/// covers. Never a valid palette index.
pub const NOT_INCLUDED: u8 = 0xFF;

pub type Rgba = [u8; 4];

const TRANSPARENT: Rgba = [0, 0, 0, 0];

/// One rendered output of an image product.
pub struct RenderVariant {
    /// File name suffix; empty for single-variant products.
    pub suffix: &'static str,
    /// Pulls this variant's value out of the stored bin byte.
    pub extract: fn(u8) -> u8,
    /// Colors by extracted value.
    pub palette: &'static [Rgba],
    /// Extracted value meaning "no data" (in-coverage but unknown).
    pub no_data: Option<u8>,
}

fn identity(value: u8) -> u8 {
    value
}

fn icing_sld(value: u8) -> u8 {
    (value >> 6) & 0x03
}

fn icing_severity(value: u8) -> u8 {
    (value >> 3) & 0x07
}

fn icing_probability(value: u8) -> u8 {
    value & 0x07
}

fn lightning_all(value: u8) -> u8 {
    value & 0x07
}

fn lightning_positive(value: u8) -> u8 {
    if value & 0x08 != 0 {
        value & 0x07
    }
    else {
        0
    }
}

/// dBZ ramp at the FIS-B scale values. Value 0 is below-threshold (CONUS
/// uses it as no-data, which the variant table reflects). Tends to make
/// any rainstorm look intense.
const RADAR: [Rgba; 8] = [
    TRANSPARENT,
    [0x00, 0xC8, 0x00, 0xFF],
    [0x00, 0x8C, 0x00, 0xFF],
    [0xFF, 0xFF, 0x00, 0xFF],
    [0xFF, 0xC8, 0x00, 0xFF],
    [0xFF, 0x64, 0x00, 0xFF],
    [0xFF, 0x00, 0x00, 0xFF],
    [0xC8, 0x00, 0xC8, 0xFF],
];

/// Conventional radar ramp: each intensity reads a step down.
const RADAR_CONVENTIONAL: [Rgba; 8] = [
    TRANSPARENT,
    [0xB4, 0xF0, 0xB4, 0xFF],
    [0x00, 0xC8, 0x00, 0xFF],
    [0x00, 0x8C, 0x00, 0xFF],
    [0xFF, 0xFF, 0x00, 0xFF],
    [0xFF, 0xC8, 0x00, 0xFF],
    [0xFF, 0x64, 0x00, 0xFF],
    [0xFF, 0x00, 0x00, 0xFF],
];

/// Eddy dissipation rate ramp; 15 is no data.
const TURBULENCE: [Rgba; 16] = [
    TRANSPARENT,
    [0xC8, 0xFF, 0xC8, 0xFF],
    [0xA0, 0xF0, 0xA0, 0xFF],
    [0x78, 0xE1, 0x78, 0xFF],
    [0xFF, 0xFF, 0x96, 0xFF],
    [0xFF, 0xE1, 0x6E, 0xFF],
    [0xFF, 0xC3, 0x46, 0xFF],
    [0xFF, 0xA5, 0x1E, 0xFF],
    [0xFF, 0x87, 0x00, 0xFF],
    [0xFF, 0x5A, 0x00, 0xFF],
    [0xFF, 0x2D, 0x00, 0xFF],
    [0xE1, 0x00, 0x00, 0xFF],
    [0xB4, 0x00, 0x00, 0xFF],
    [0x87, 0x00, 0x00, 0xFF],
    [0x5A, 0x00, 0x00, 0xFF],
    TRANSPARENT,
];

/// Cloud top altitude ramp, brown gradient; 15 is no data.
const CLOUD_TOPS: [Rgba; 16] = [
    TRANSPARENT,
    [0xF5, 0xEB, 0xDC, 0xFF],
    [0xEB, 0xDC, 0xC3, 0xFF],
    [0xE1, 0xCD, 0xAA, 0xFF],
    [0xD7, 0xBE, 0x91, 0xFF],
    [0xCD, 0xAF, 0x78, 0xFF],
    [0xC3, 0xA0, 0x5F, 0xFF],
    [0xB9, 0x91, 0x46, 0xFF],
    [0xAF, 0x82, 0x2D, 0xFF],
    [0xA5, 0x73, 0x14, 0xFF],
    [0x96, 0x64, 0x0A, 0xFF],
    [0x87, 0x55, 0x00, 0xFF],
    [0x78, 0x46, 0x00, 0xFF],
    [0x69, 0x37, 0x00, 0xFF],
    [0x5A, 0x28, 0x00, 0xFF],
    TRANSPARENT,
];

/// Strike-count buckets; 7 is no data.
const LIGHTNING: [Rgba; 8] = [
    TRANSPARENT,
    [0xFF, 0xFF, 0xB4, 0xFF],
    [0xFF, 0xF0, 0x82, 0xFF],
    [0xFF, 0xD2, 0x50, 0xFF],
    [0xFF, 0xA5, 0x28, 0xFF],
    [0xFF, 0x73, 0x14, 0xFF],
    [0xFF, 0x32, 0x00, 0xFF],
    TRANSPARENT,
];

/// SLD probability; 3 is no data.
const ICING_SLD: [Rgba; 4] = [
    TRANSPARENT,
    [0xB4, 0xD2, 0xFF, 0xFF],
    [0x50, 0x8C, 0xFF, 0xFF],
    TRANSPARENT,
];

/// Severity: none, trace, light, moderate, severe, heavy; 7 is no data.
const ICING_SEVERITY: [Rgba; 8] = [
    TRANSPARENT,
    [0xC8, 0xE6, 0xFF, 0xFF],
    [0x96, 0xC8, 0xFF, 0xFF],
    [0x50, 0x96, 0xFF, 0xFF],
    [0x1E, 0x50, 0xE6, 0xFF],
    [0x00, 0x1E, 0xB4, 0xFF],
    TRANSPARENT,
    TRANSPARENT,
];

/// Probability buckets; 7 is no data.
const ICING_PROBABILITY: [Rgba; 8] = [
    TRANSPARENT,
    [0xDC, 0xF0, 0xFF, 0xFF],
    [0xB4, 0xDC, 0xFF, 0xFF],
    [0x8C, 0xC8, 0xFF, 0xFF],
    [0x64, 0xAA, 0xFF, 0xFF],
    [0x3C, 0x8C, 0xFF, 0xFF],
    [0x14, 0x64, 0xE6, 0xFF],
    TRANSPARENT,
];

/// The rendered outputs for an image product. `radar_palette` selects
/// between the FIS-B scale ramp (0) and the conventional one (1).
pub fn variants(image: ImageType, radar_palette: u8) -> Vec<RenderVariant> {
    let radar: &'static [Rgba] = if radar_palette == 0 {
        &RADAR
    }
    else {
        &RADAR_CONVENTIONAL
    };

    match image {
        ImageType::NexradRegional => {
            vec![RenderVariant {
                suffix: "",
                extract: identity,
                palette: radar,
                no_data: None,
            }]
        }
        ImageType::NexradConus => {
            vec![RenderVariant {
                suffix: "",
                extract: identity,
                palette: radar,
                no_data: Some(0),
            }]
        }
        ImageType::CloudTops => {
            vec![RenderVariant {
                suffix: "",
                extract: identity,
                palette: &CLOUD_TOPS,
                no_data: Some(15),
            }]
        }
        ImageType::Turbulence(_) => {
            vec![RenderVariant {
                suffix: "",
                extract: identity,
                palette: &TURBULENCE,
                no_data: Some(15),
            }]
        }
        ImageType::Lightning => {
            vec![
                RenderVariant {
                    suffix: "_ALL",
                    extract: lightning_all,
                    palette: &LIGHTNING,
                    no_data: Some(7),
                },
                RenderVariant {
                    suffix: "_POS",
                    extract: lightning_positive,
                    palette: &LIGHTNING,
                    no_data: Some(7),
                },
            ]
        }
        ImageType::Icing(_) => {
            vec![
                RenderVariant {
                    suffix: "_SLD",
                    extract: icing_sld,
                    palette: &ICING_SLD,
                    no_data: Some(3),
                },
                RenderVariant {
                    suffix: "_SEV",
                    extract: icing_severity,
                    palette: &ICING_SEVERITY,
                    no_data: Some(7),
                },
                RenderVariant {
                    suffix: "_PRB",
                    extract: icing_probability,
                    palette: &ICING_PROBABILITY,
                    no_data: Some(7),
                },
            ]
        }
    }
}

/// Resolve one stored bin to a color under the given map configuration
/// (0: sentinels transparent, 1: distinct debug colors, 2: both the
/// configured not-included color).
pub fn resolve(
    variant: &RenderVariant,
    bin: u8,
    map_configuration: u8,
    not_included: [u8; 3],
) -> Rgba {
    let not_included_rgba = [not_included[0], not_included[1], not_included[2], 0xFF];

    if bin == NOT_INCLUDED {
        return match map_configuration {
            1 => [0xFF, 0x00, 0xFF, 0xFF],
            2 => not_included_rgba,
            _ => TRANSPARENT,
        };
    }

    let value = (variant.extract)(bin);

    if variant.no_data == Some(value) {
        return match map_configuration {
            1 => [0x00, 0xFF, 0xFF, 0xFF],
            2 => not_included_rgba,
            _ => TRANSPARENT,
        };
    }

    variant
        .palette
        .get(value as usize)
        .copied()
        .unwrap_or(TRANSPARENT)
}
