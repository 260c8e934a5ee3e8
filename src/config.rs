use std::path::PathBuf;

/// All pipeline and curator tunables.
///
/// One immutable value is built at startup (from the CLI and environment)
/// and passed by reference to every stage. Test harnesses construct their
/// own per run.
#[derive(Clone, Debug, clap::Args)]
pub struct Config {
    /// Directory bridging the change filter and the curator. Filenames sort
    /// by arrival time.
    #[clap(long, env = "FISB_SPOOL_DIR", default_value = "spool")]
    pub spool_dir: PathBuf,

    /// Directory receiving rendered rasters and their world files.
    #[clap(long, env = "FISB_IMAGE_DIR", default_value = "images")]
    pub image_dir: PathBuf,

    /// Clock offset file written by the trickle replay driver. Absent in
    /// production.
    #[clap(long, env = "FISB_SYNC_FILE", default_value = "sync.fisb")]
    pub sync_file: PathBuf,

    /// Directory holding per-test trigger schedules and `start-dates.csv`.
    #[clap(long, default_value = "triggers")]
    pub trigger_dir: PathBuf,

    /// Directory receiving per-trigger snapshot dumps in test mode.
    #[clap(long, default_value = "results")]
    pub results_dir: PathBuf,

    /// Optional directory with the read-only location side store
    /// (`airports.json`, `navaids.json`, `designated_points.json`,
    /// `declination.json`).
    #[clap(long, env = "FISB_LOCATION_DIR")]
    pub location_dir: Option<PathBuf>,

    /// Decode reserved fields and frames normally elided.
    #[clap(long)]
    pub detailed: bool,

    /// Legacy DLAC tab handling: mask the space run length to 4 bits.
    /// Needed for some archived captures.
    #[clap(long)]
    pub dlac_4bit_tab: bool,

    /// Drop packets whose frame list decodes empty.
    #[clap(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub skip_empty_frames: bool,

    /// Seconds a partial segment buffer may wait for its remaining
    /// fragments.
    #[clap(long, default_value_t = 60)]
    pub segment_ttl_secs: u64,

    /// Seconds an unmatched graphics record waits for its text half.
    #[clap(long, default_value_t = 12 * 3600)]
    pub twgo_ttl_secs: u64,

    /// Minutes between reassembly/dedup table sweeps.
    #[clap(long, default_value_t = 10)]
    pub expunge_interval_mins: u64,

    /// Emit synthetic RSR reception-quality products.
    #[clap(long)]
    pub rsr: bool,

    /// RSR sliding window, seconds.
    #[clap(long, default_value_t = 10)]
    pub rsr_window_secs: u64,

    /// Seconds between RSR product emissions.
    #[clap(long, default_value_t = 1)]
    pub rsr_every_secs: u64,

    /// Take the expected packet rate from the station class instead of the
    /// observed per-second maximum.
    #[clap(long)]
    pub rsr_use_expected_rate: bool,

    /// METAR lifetime past its observation time, minutes.
    #[clap(long, default_value_t = 120)]
    pub metar_expiration_mins: i64,

    /// PIREP lifetime, minutes.
    #[clap(long, default_value_t = 120)]
    pub pirep_expiration_mins: i64,

    /// Anchor PIREP expiration on the report time rather than on receipt.
    #[clap(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub pirep_expire_from_report_time: bool,

    /// FIS-B unavailable lifetime past last reception, minutes.
    #[clap(long, default_value_t = 20)]
    pub fisb_unavailable_expiration_mins: i64,

    /// Fallback TWGO lifetime past last reception, minutes.
    #[clap(long, default_value_t = 61)]
    pub twgo_default_expiration_mins: i64,

    /// Force the fallback TWGO lifetime even when geometry stop times are
    /// present. Test determinism only.
    #[clap(long)]
    pub bypass_smart_expiration: bool,

    /// Lifetime of a cancellation tombstone, seconds.
    #[clap(long, default_value_t = 3600)]
    pub cancel_expiration_secs: i64,

    /// Stand-in instant for NOTAM `PERM` end times.
    #[clap(long, default_value = "2038-01-01T00:00:00Z")]
    pub notam_perm_time: String,

    /// Minutes a dedup cache entry survives without being refreshed.
    #[clap(long, default_value_t = 45)]
    pub dedup_ttl_mins: i64,

    /// Minutes after which an unchanged product is forwarded again to
    /// heartbeat the curator against silent store loss.
    #[clap(long, default_value_t = 30)]
    pub dedup_refresh_floor_mins: i64,

    /// Forward every PIREP regardless of digest.
    #[clap(long)]
    pub always_forward_pireps: bool,

    /// Seconds between curator maintenance ticks.
    #[clap(long, default_value_t = 10)]
    pub maint_interval_secs: u64,

    /// Remove expired products during maintenance. Disable to inspect old
    /// captures.
    #[clap(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub expire_enabled: bool,

    /// Recompute CRL completeness annotations on ingest.
    #[clap(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub annotate_crl: bool,

    /// Update the matching CRL as soon as a listed report arrives.
    #[clap(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub immediate_crl_update: bool,

    /// Remove stored reports a station's CRL no longer lists. Off by
    /// default: with multiple stations in range, one station's list is
    /// not authoritative for the others.
    #[clap(long)]
    pub prune_unlisted_reports: bool,

    /// Seconds of block silence required before a raster is re-rendered.
    #[clap(long, default_value_t = 10)]
    pub image_quiet_secs: i64,

    /// Sentinel rendering: 0 = transparent, 1 = distinct debug colors,
    /// 2 = both the configured not-included color.
    #[clap(long, default_value_t = 0)]
    pub image_map_configuration: u8,

    /// Radar palette: 0 = FIS-B scale values, 1 = conventional scale
    /// (each intensity a step down).
    #[clap(long, default_value_t = 1)]
    pub radar_palette: u8,

    /// Not-included sentinel color, `RRGGBB` hex.
    #[clap(long, default_value = "ECDA96")]
    pub not_included_rgb: String,

    /// Attach location GeoJSON to METAR/TAF/winds products.
    #[clap(long)]
    pub wx_location: bool,

    /// Attach resolved positions to PIREPs.
    #[clap(long)]
    pub pirep_location: bool,

    /// Attach location GeoJSON to SUA products.
    #[clap(long)]
    pub sua_location: bool,

    /// Append PIREPs whose position cannot be resolved to a side file.
    #[clap(long)]
    pub save_unmatched_pireps: bool,

    /// File receiving unmatched PIREP text.
    #[clap(long, default_value = "pireps-unmatched.txt")]
    pub unmatched_pireps_file: PathBuf,

    /// Seconds between retries after a store failure.
    #[clap(long, default_value_t = 60)]
    pub retry_store_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        use clap::Parser;

        #[derive(clap::Parser)]
        struct Defaults {
            #[clap(flatten)]
            config: Config,
        }

        Defaults::parse_from::<_, &str>([]).config
    }
}

impl Config {
    pub fn not_included_color(&self) -> [u8; 3] {
        let value = u32::from_str_radix(&self.not_included_rgb, 16).unwrap_or(0x00EC_DA96);
        [
            ((value >> 16) & 0xFF) as u8,
            ((value >> 8) & 0xFF) as u8,
            (value & 0xFF) as u8,
        ]
    }
}
