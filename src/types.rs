use std::{
    fmt::{
        Debug,
        Display,
    },
    str::FromStr,
};

use serde::{
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};

/// Ground station identity.
///
/// FIS-B has no station callsigns; a station is identified by where it
/// transmits from. The id is the station latitude and longitude (truncated
/// to 6 decimals, roughly GPS precision) joined by a `~`, so the id doubles
/// as a displayable position.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    pub fn from_position(latitude: f64, longitude: f64) -> Self {
        Self(format!("{:.6}~{:.6}", latitude, longitude))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        let (latitude, longitude) = self.0.split_once('~')?;
        Some((latitude.parse().ok()?, longitude.parse().ok()?))
    }
}

impl Display for StationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for StationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StationId({})", self.0)
    }
}

impl FromStr for StationId {
    type Err = StationIdFromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('~') {
            Ok(Self(s.to_owned()))
        }
        else {
            Err(StationIdFromStrError {
                input: s.to_owned(),
            })
        }
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("invalid station id: {input}")]
pub struct StationIdFromStrError {
    pub input: String,
}

/// Raster resolution selector from the block reference indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScaleFactor {
    High,
    Medium,
    Low,
}

impl ScaleFactor {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::High),
            1 => Some(Self::Medium),
            2 => Some(Self::Low),
            _ => None,
        }
    }

    pub const fn as_u8(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }

    /// Longitudinal blocks per band of latitude.
    pub const fn blocks_per_row(&self) -> u32 {
        match self {
            Self::High => 450,
            Self::Medium => 90,
            Self::Low => 50,
        }
    }

    /// Bin height in arc minutes.
    pub const fn bin_height_minutes(&self) -> f64 {
        match self {
            Self::High => 1.0,
            Self::Medium => 5.0,
            Self::Low => 9.0,
        }
    }

    /// Bin width in arc minutes, below 60 degrees latitude.
    pub const fn bin_width_minutes(&self) -> f64 {
        match self {
            Self::High => 1.5,
            Self::Medium => 7.5,
            Self::Low => 13.5,
        }
    }
}

/// One of the gridded (block-tiled) products.
///
/// Icing and turbulence are broadcast per altitude slice; the slice (in feet
/// MSL) is part of the product identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImageType {
    NexradRegional,
    NexradConus,
    CloudTops,
    Lightning,
    Icing(u32),
    Turbulence(u32),
}

impl ImageType {
    /// Radar-like images accept a composite of source times bounded by the
    /// 10 minute latency rule. All others are single-time rasters.
    pub fn allows_latency(&self) -> bool {
        matches!(
            self,
            Self::NexradRegional | Self::NexradConus | Self::Lightning
        )
    }

    pub fn scale_factor(&self) -> ScaleFactor {
        match self {
            Self::NexradRegional | Self::Lightning | Self::CloudTops => ScaleFactor::High,
            _ => ScaleFactor::Medium,
        }
    }

    /// Forecast rasters carry a valid time, observations an observation
    /// time.
    pub fn is_forecast(&self) -> bool {
        matches!(self, Self::CloudTops | Self::Icing(_) | Self::Turbulence(_))
    }

    /// Seconds after which a raster with no fresh data reverts to no-data.
    pub fn revert_to_no_data_secs(&self) -> i64 {
        if self.allows_latency() {
            75 * 60
        }
        else {
            105 * 60
        }
    }

    /// Short prefix used to build image product unique names.
    pub fn abbreviation(&self) -> String {
        match self {
            Self::NexradRegional => "NR".into(),
            Self::NexradConus => "NC".into(),
            Self::CloudTops => "CT".into(),
            Self::Lightning => "LGT".into(),
            Self::Icing(level) => format!("I{level}"),
            Self::Turbulence(level) => format!("T{level}"),
        }
    }

    /// All raster products the curator maintains.
    pub fn all() -> Vec<Self> {
        let mut list = vec![
            Self::NexradRegional,
            Self::NexradConus,
            Self::CloudTops,
            Self::Lightning,
        ];
        for level in (2000..=24000).step_by(2000) {
            list.push(Self::Icing(level));
            list.push(Self::Turbulence(level));
        }
        list
    }
}

impl Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NexradRegional => write!(f, "NEXRAD_REGIONAL"),
            Self::NexradConus => write!(f, "NEXRAD_CONUS"),
            Self::CloudTops => write!(f, "CLOUD_TOPS"),
            Self::Lightning => write!(f, "LIGHTNING"),
            Self::Icing(level) => write!(f, "ICING_{level:05}"),
            Self::Turbulence(level) => write!(f, "TURBULENCE_{level:05}"),
        }
    }
}

impl Debug for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ImageType({self})")
    }
}

/// Product type tag.
///
/// Every record the pipeline emits or the curator stores carries one of
/// these. Wire product ids map onto several of them; the mapping is done
/// during product synthesis.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProductType {
    Metar,
    Taf,
    Winds06Hr,
    Winds12Hr,
    Winds24Hr,
    Pirep,
    Airmet,
    Sigmet,
    Wst,
    Cwa,
    GAirmet00Hr,
    GAirmet03Hr,
    GAirmet06Hr,
    NotamD,
    NotamFdc,
    NotamTfr,
    NotamTra,
    NotamTmoa,
    Sua,
    FisBUnavailable,
    ServiceStatus,
    CancelNotam,
    CancelCwa,
    CancelGAirmet,
    Crl(u16),
    Rsr,
    Image(ImageType),
}

impl ProductType {
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image(_))
    }

    pub fn is_g_airmet(&self) -> bool {
        matches!(self, Self::GAirmet00Hr | Self::GAirmet03Hr | Self::GAirmet06Hr)
    }

    /// Text-with-graphic-overlay family: records that the smart expiration
    /// and CRL rules apply to.
    pub fn is_twgo(&self) -> bool {
        matches!(
            self,
            Self::Airmet
                | Self::Sigmet
                | Self::Wst
                | Self::Cwa
                | Self::NotamD
                | Self::NotamFdc
                | Self::NotamTfr
                | Self::NotamTra
                | Self::NotamTmoa
                | Self::Sua
        ) || self.is_g_airmet()
    }

    /// Wire product id of the CRL that indexes this product class, if any.
    pub fn crl_product_id(&self) -> Option<u16> {
        match self {
            Self::NotamTfr => Some(8),
            Self::Airmet => Some(11),
            Self::Sigmet | Self::Wst => Some(12),
            Self::GAirmet00Hr | Self::GAirmet03Hr | Self::GAirmet06Hr => Some(14),
            Self::Cwa => Some(15),
            Self::NotamTra => Some(16),
            Self::NotamTmoa => Some(17),
            _ => None,
        }
    }

    /// Types whose periodic retransmission is load-bearing downstream and
    /// must never be swallowed by the change filter.
    pub fn bypasses_dedup(&self) -> bool {
        self.is_twgo()
            || matches!(
                self,
                Self::Crl(_)
                    | Self::ServiceStatus
                    | Self::FisBUnavailable
                    | Self::CancelNotam
                    | Self::CancelCwa
                    | Self::CancelGAirmet
                    | Self::Rsr
            )
    }
}

impl Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Metar => write!(f, "METAR"),
            Self::Taf => write!(f, "TAF"),
            Self::Winds06Hr => write!(f, "WINDS_06_HR"),
            Self::Winds12Hr => write!(f, "WINDS_12_HR"),
            Self::Winds24Hr => write!(f, "WINDS_24_HR"),
            Self::Pirep => write!(f, "PIREP"),
            Self::Airmet => write!(f, "AIRMET"),
            Self::Sigmet => write!(f, "SIGMET"),
            Self::Wst => write!(f, "WST"),
            Self::Cwa => write!(f, "CWA"),
            Self::GAirmet00Hr => write!(f, "G_AIRMET_00_HR"),
            Self::GAirmet03Hr => write!(f, "G_AIRMET_03_HR"),
            Self::GAirmet06Hr => write!(f, "G_AIRMET_06_HR"),
            Self::NotamD => write!(f, "NOTAM_D"),
            Self::NotamFdc => write!(f, "NOTAM_FDC"),
            Self::NotamTfr => write!(f, "NOTAM_TFR"),
            Self::NotamTra => write!(f, "NOTAM_TRA"),
            Self::NotamTmoa => write!(f, "NOTAM_TMOA"),
            Self::Sua => write!(f, "SUA"),
            Self::FisBUnavailable => write!(f, "FIS_B_UNAVAILABLE"),
            Self::ServiceStatus => write!(f, "SERVICE_STATUS"),
            Self::CancelNotam => write!(f, "CANCEL_NOTAM"),
            Self::CancelCwa => write!(f, "CANCEL_CWA"),
            Self::CancelGAirmet => write!(f, "CANCEL_G_AIRMET"),
            Self::Crl(product_id) => write!(f, "CRL_{product_id}"),
            Self::Rsr => write!(f, "RSR"),
            Self::Image(image_type) => write!(f, "{image_type}"),
        }
    }
}

impl Debug for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProductType({self})")
    }
}

impl FromStr for ProductType {
    type Err = ProductTypeFromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || {
            ProductTypeFromStrError {
                input: s.to_owned(),
            }
        };

        let product_type = match s {
            "METAR" => Self::Metar,
            "TAF" => Self::Taf,
            "WINDS_06_HR" => Self::Winds06Hr,
            "WINDS_12_HR" => Self::Winds12Hr,
            "WINDS_24_HR" => Self::Winds24Hr,
            "PIREP" => Self::Pirep,
            "AIRMET" => Self::Airmet,
            "SIGMET" => Self::Sigmet,
            "WST" => Self::Wst,
            "CWA" => Self::Cwa,
            "G_AIRMET_00_HR" => Self::GAirmet00Hr,
            "G_AIRMET_03_HR" => Self::GAirmet03Hr,
            "G_AIRMET_06_HR" => Self::GAirmet06Hr,
            "NOTAM_D" => Self::NotamD,
            "NOTAM_FDC" => Self::NotamFdc,
            "NOTAM_TFR" => Self::NotamTfr,
            "NOTAM_TRA" => Self::NotamTra,
            "NOTAM_TMOA" => Self::NotamTmoa,
            "SUA" => Self::Sua,
            "FIS_B_UNAVAILABLE" => Self::FisBUnavailable,
            "SERVICE_STATUS" => Self::ServiceStatus,
            "CANCEL_NOTAM" => Self::CancelNotam,
            "CANCEL_CWA" => Self::CancelCwa,
            "CANCEL_G_AIRMET" => Self::CancelGAirmet,
            "RSR" => Self::Rsr,
            "NEXRAD_REGIONAL" => Self::Image(ImageType::NexradRegional),
            "NEXRAD_CONUS" => Self::Image(ImageType::NexradConus),
            "CLOUD_TOPS" => Self::Image(ImageType::CloudTops),
            "LIGHTNING" => Self::Image(ImageType::Lightning),
            _ => {
                if let Some(product_id) = s.strip_prefix("CRL_") {
                    Self::Crl(product_id.parse().map_err(|_| err())?)
                }
                else if let Some(level) = s.strip_prefix("ICING_") {
                    Self::Image(ImageType::Icing(level.parse().map_err(|_| err())?))
                }
                else if let Some(level) = s.strip_prefix("TURBULENCE_") {
                    Self::Image(ImageType::Turbulence(level.parse().map_err(|_| err())?))
                }
                else {
                    return Err(err());
                }
            }
        };

        Ok(product_type)
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("invalid product type: {input}")]
pub struct ProductTypeFromStrError {
    pub input: String,
}

impl Serialize for ProductType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProductType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{
        ImageType,
        ProductType,
        StationId,
    };

    #[test]
    fn it_round_trips_product_types() {
        let types = [
            ProductType::Metar,
            ProductType::Winds06Hr,
            ProductType::GAirmet03Hr,
            ProductType::NotamTfr,
            ProductType::Crl(11),
            ProductType::Image(ImageType::NexradConus),
            ProductType::Image(ImageType::Icing(8000)),
            ProductType::Image(ImageType::Turbulence(24000)),
        ];

        for t in types {
            let s = t.to_string();
            assert_eq!(s.parse::<ProductType>().unwrap(), t, "{s}");
        }
    }

    #[test]
    fn it_formats_icing_levels_with_leading_zeros() {
        assert_eq!(ImageType::Icing(2000).to_string(), "ICING_02000");
        assert_eq!(ImageType::Turbulence(18000).to_string(), "TURBULENCE_18000");
    }

    #[test]
    fn it_builds_station_ids_from_positions() {
        let station = StationId::from_position(40.0383, -86.255593);
        assert_eq!(station.as_str(), "40.038300~-86.255593");
        let (latitude, longitude) = station.position().unwrap();
        assert!((latitude - 40.0383).abs() < 1e-9);
        assert!((longitude + 86.255593).abs() < 1e-9);
    }

    #[test]
    fn it_maps_products_to_their_crl() {
        assert_eq!(ProductType::Airmet.crl_product_id(), Some(11));
        assert_eq!(ProductType::Wst.crl_product_id(), Some(12));
        assert_eq!(ProductType::GAirmet06Hr.crl_product_id(), Some(14));
        assert_eq!(ProductType::Metar.crl_product_id(), None);
    }
}
