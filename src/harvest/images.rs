//! Raster assembly and rendering.
//!
//! Block tiles accumulate per image product; the rectangle rendered is the
//! minimum bounding box of the live tiles, with uncovered bins holding the
//! not-included sentinel. Radar-like products accept a composite of source
//! times bounded by a 10 minute latency; everything else restarts the
//! raster when a newer product instant arrives. Rendering is gated by a
//! quiet period so a burst of arriving tiles produces one PNG, not many
//! partial ones.

use std::{
    collections::HashMap,
    path::PathBuf,
};

use chrono::{
    DateTime,
    Duration,
    Utc,
};
use tracing::{
    debug,
    info,
};

use crate::{
    config::Config,
    harvest::palette::{
        self,
        NOT_INCLUDED,
    },
    products::Product,
    types::{
        ImageType,
        ProductType,
    },
};

/// Oldest-to-newest source time allowed in a radar composite, minutes. The
/// bound is inclusive: a tile exactly this much older than the newest is
/// evicted.
const MAX_LATENCY_MINS: i64 = 10;

const BLOCK_WIDTH: u32 = 32;
const BLOCK_HEIGHT: u32 = 4;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image i/o error")]
    Io(#[from] std::io::Error),
    #[error("image encode error")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug)]
struct BlockEntry {
    bins: Vec<u8>,
    official_time: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RasterState {
    blocks: HashMap<u32, BlockEntry>,
    newest_official: Option<DateTime<Utc>>,
    oldest_official: Option<DateTime<Utc>>,
    last_changed: Option<DateTime<Utc>>,
    rendered_at: Option<DateTime<Utc>>,
}

/// Result of one maintenance pass.
#[derive(Debug, Default)]
pub struct Maintenance {
    /// Summary products to upsert (one per re-rendered image).
    pub updates: Vec<Product>,
    /// Images that reverted to no-data; their store summaries go away.
    pub removals: Vec<ImageType>,
}

#[derive(Debug)]
pub struct ImageAssembler {
    image_dir: PathBuf,
    quiet_secs: i64,
    map_configuration: u8,
    radar_palette: u8,
    not_included: [u8; 3],
    states: HashMap<ImageType, RasterState>,
}

impl ImageAssembler {
    pub fn new(config: &Config) -> Result<Self, ImageError> {
        std::fs::create_dir_all(&config.image_dir)?;

        // Start fresh: stale renderings from an earlier run would claim a
        // currency they do not have.
        let mut assembler = Self {
            image_dir: config.image_dir.clone(),
            quiet_secs: config.image_quiet_secs,
            map_configuration: config.image_map_configuration,
            radar_palette: config.radar_palette,
            not_included: config.not_included_color(),
            states: HashMap::new(),
        };
        for image in ImageType::all() {
            assembler.delete_files(image)?;
        }

        Ok(assembler)
    }

    /// Merge one block product into its raster.
    pub fn ingest(&mut self, product: &Product, now: DateTime<Utc>) {
        let ProductType::Image(image) = product.product_type
        else {
            return;
        };
        let Some(block) = &product.block
        else {
            return;
        };
        let Some(official_time) = product.valid_time.or(product.observation_time)
        else {
            return;
        };

        let state = self.states.entry(image).or_default();

        if let Some(existing) = state.blocks.get(&block.alt_bn) {
            if existing.official_time == official_time && existing.bins == block.bins {
                // plain retransmission
                return;
            }
        }

        if state
            .newest_official
            .map(|newest| official_time > newest)
            .unwrap_or(true)
        {
            state.newest_official = Some(official_time);

            // Products without composite latency restart wholesale on a
            // newer instant.
            if !image.allows_latency() {
                state.blocks.clear();
            }
        }

        state.blocks.insert(
            block.alt_bn,
            BlockEntry {
                bins: block.bins.clone(),
                official_time,
            },
        );
        state.last_changed = Some(now);
    }

    /// Evict aged tiles, revert empty rasters to no-data, and render
    /// whatever is due.
    pub fn maintain(&mut self, now: DateTime<Utc>) -> Result<Maintenance, ImageError> {
        let mut maintenance = Maintenance::default();

        let images: Vec<ImageType> = self.states.keys().copied().collect();
        for image in images {
            let state = self.states.get_mut(&image).expect("state exists");
            if state.blocks.is_empty() {
                continue;
            }

            let newest = state.newest_official.expect("blocks imply a newest time");
            let no_data_after = Duration::seconds(image.revert_to_no_data_secs());

            let mut oldest_active = newest;
            let before = state.blocks.len();
            state.blocks.retain(|_, entry| {
                if image.allows_latency()
                    && newest - entry.official_time >= Duration::minutes(MAX_LATENCY_MINS)
                {
                    return false;
                }
                if now - entry.official_time >= no_data_after {
                    return false;
                }
                oldest_active = oldest_active.min(entry.official_time);
                true
            });
            state.oldest_official = Some(oldest_active);

            if state.blocks.len() != before {
                debug!(
                    image = %image,
                    evicted = before - state.blocks.len(),
                    "evicted aged raster tiles"
                );
                state.last_changed = Some(now);
            }

            if state.blocks.is_empty() {
                info!(image = %image, "raster reverted to no data");
                self.delete_files(image)?;
                self.states.insert(image, RasterState::default());
                maintenance.removals.push(image);
                continue;
            }

            if let Some(summary) = self.render_if_due(image, now)? {
                maintenance.updates.push(summary);
            }
        }

        Ok(maintenance)
    }

    fn render_if_due(
        &mut self,
        image: ImageType,
        now: DateTime<Utc>,
    ) -> Result<Option<Product>, ImageError> {
        let state = self.states.get_mut(&image).expect("caller checked");
        let last_changed = state.last_changed.expect("blocks imply a change");

        if self.quiet_secs > 0 && (now - last_changed) < Duration::seconds(self.quiet_secs) {
            return Ok(None);
        }
        if state
            .rendered_at
            .map(|rendered| rendered >= last_changed)
            .unwrap_or(false)
        {
            return Ok(None);
        }

        let render = Render::assemble(image, state);
        for variant in palette::variants(image, self.radar_palette) {
            let path = self.image_dir.join(format!("{image}{}.png", variant.suffix));
            render.write_png(
                &path,
                &variant,
                self.map_configuration,
                self.not_included,
            )?;
            render.write_world_file(&path.with_extension("pgw"))?;
        }

        state.rendered_at = Some(now);
        info!(image = %image, width = render.width, height = render.height, "rendered raster");

        // Store summary: one record per image, keyed by the image name.
        let oldest = state.oldest_official.expect("blocks imply an oldest time");
        let newest = state.newest_official.expect("blocks imply a newest time");
        let mut summary = Product::new(
            ProductType::Image(image),
            image.to_string(),
            now,
            oldest + Duration::seconds(image.revert_to_no_data_secs()),
        );
        if image.is_forecast() {
            summary.valid_time = Some(newest);
        }
        else {
            // composites report their oldest source as the observation
            summary.observation_time = Some(oldest);
        }

        Ok(Some(summary))
    }

    fn delete_files(&self, image: ImageType) -> Result<(), ImageError> {
        for variant in palette::variants(image, self.radar_palette) {
            let path = self.image_dir.join(format!("{image}{}.png", variant.suffix));
            if path.is_file() {
                std::fs::remove_file(&path)?;
            }
            let world = path.with_extension("pgw");
            if world.is_file() {
                std::fs::remove_file(&world)?;
            }
        }
        Ok(())
    }
}

/// A dense raster assembled from the live blocks of one image.
struct Render {
    image: ImageType,
    width: u32,
    height: u32,
    min_col: u32,
    max_row: u32,
    bins: Vec<u8>,
}

impl Render {
    fn assemble(image: ImageType, state: &RasterState) -> Self {
        let rows: Vec<u32> = state.blocks.keys().map(|bn| bn / 1000).collect();
        let cols: Vec<u32> = state.blocks.keys().map(|bn| bn % 1000).collect();
        let min_row = *rows.iter().min().expect("blocks exist");
        let max_row = *rows.iter().max().expect("blocks exist");
        let min_col = *cols.iter().min().expect("blocks exist");
        let max_col = *cols.iter().max().expect("blocks exist");

        let width = (max_col - min_col + 1) * BLOCK_WIDTH;
        let height = (max_row - min_row + 1) * BLOCK_HEIGHT;

        let mut bins = vec![NOT_INCLUDED; (width * height) as usize];
        for (block_number, entry) in &state.blocks {
            let row = block_number / 1000;
            let col = block_number % 1000;
            let x0 = (col - min_col) * BLOCK_WIDTH;
            let y0 = (max_row - row) * BLOCK_HEIGHT;

            for (i, bin) in entry.bins.iter().enumerate() {
                let x = x0 + (i as u32 % BLOCK_WIDTH);
                let y = y0 + (i as u32 / BLOCK_WIDTH);
                bins[(y * width + x) as usize] = *bin;
            }
        }

        Self {
            image,
            width,
            height,
            min_col,
            max_row,
            bins,
        }
    }

    fn write_png(
        &self,
        path: &std::path::Path,
        variant: &palette::RenderVariant,
        map_configuration: u8,
        not_included: [u8; 3],
    ) -> Result<(), ImageError> {
        let mut output = image::RgbaImage::new(self.width, self.height);
        for (i, bin) in self.bins.iter().enumerate() {
            let color = palette::resolve(variant, *bin, map_configuration, not_included);
            output.put_pixel(
                i as u32 % self.width,
                i as u32 / self.width,
                image::Rgba(color),
            );
        }

        // write-then-rename so readers never see a partial frame
        let tmp = path.with_extension("png.tmp");
        output.save_with_format(&tmp, image::ImageFormat::Png)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// ESRI world file: pixel sizes and the center of the upper-left
    /// pixel, geographic coordinates.
    fn write_world_file(&self, path: &std::path::Path) -> Result<(), ImageError> {
        let scale = self.image.scale_factor();
        let x_res = scale.bin_width_minutes() / 60.0;
        let y_res = scale.bin_height_minutes() / 60.0;

        let top_latitude = (self.max_row + 1) as f64 * BLOCK_HEIGHT as f64 * y_res;
        let left_longitude =
            -((scale.blocks_per_row() - self.min_col) as f64 * BLOCK_WIDTH as f64 * x_res);

        let contents = format!(
            "{:.9}\n0.0\n0.0\n{:.9}\n{:.9}\n{:.9}\n",
            x_res,
            -y_res,
            left_longitude + x_res / 2.0,
            top_latitude - y_res / 2.0,
        );

        let tmp = path.with_extension("pgw.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{
        DateTime,
        Duration,
        TimeZone,
        Utc,
    };

    use crate::{
        config::Config,
        harvest::images::ImageAssembler,
        products::{
            BlockFields,
            Product,
        },
        types::{
            ImageType,
            ProductType,
            ScaleFactor,
        },
    };

    fn scratch_config(name: &str) -> Config {
        let mut config = Config::default();
        config.image_dir =
            std::env::temp_dir().join(format!("fisb-images-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&config.image_dir);
        config
    }

    fn block_product(
        image: ImageType,
        alt_bn: u32,
        official: DateTime<Utc>,
        value: u8,
    ) -> Product {
        let mut product = Product::new(
            ProductType::Image(image),
            format!("{}-{}", image.abbreviation(), official),
            official,
            official + Duration::minutes(75),
        );
        product.observation_time = Some(official);
        product.block = Some(BlockFields {
            alt_bn,
            scale_factor: ScaleFactor::High,
            bins: vec![value; 128],
        });
        product
    }

    #[test]
    fn it_waits_out_the_quiet_period() {
        let mut config = scratch_config("quiet");
        config.image_quiet_secs = 10;
        let mut assembler = ImageAssembler::new(&config).unwrap();

        let t0 = Utc.with_ymd_and_hms(2021, 5, 14, 12, 0, 0).unwrap();
        let image = ImageType::NexradRegional;
        let png = config.image_dir.join("NEXRAD_REGIONAL.png");

        // blocks arriving one second apart for five seconds
        for i in 0..5 {
            let now = t0 + Duration::seconds(i);
            assembler.ingest(&block_product(image, 614340 + i as u32, t0, 3), now);
            let maintenance = assembler.maintain(now).unwrap();
            assert!(maintenance.updates.is_empty());
            assert!(!png.exists(), "no render during arrivals");
        }

        // just shy of quiet: still nothing
        let maintenance = assembler.maintain(t0 + Duration::seconds(13)).unwrap();
        assert!(maintenance.updates.is_empty());

        // quiet satisfied: exactly one render
        let maintenance = assembler.maintain(t0 + Duration::seconds(15)).unwrap();
        assert_eq!(maintenance.updates.len(), 1);
        assert!(png.exists());
        assert!(config.image_dir.join("NEXRAD_REGIONAL.pgw").exists());

        // and no re-render without new data
        let maintenance = assembler.maintain(t0 + Duration::seconds(30)).unwrap();
        assert!(maintenance.updates.is_empty());

        std::fs::remove_dir_all(&config.image_dir).unwrap();
    }

    #[test]
    fn it_evicts_radar_tiles_over_the_latency_bound() {
        let mut config = scratch_config("latency");
        config.image_quiet_secs = 0;
        let mut assembler = ImageAssembler::new(&config).unwrap();

        let t0 = Utc.with_ymd_and_hms(2021, 5, 14, 12, 0, 0).unwrap();
        let image = ImageType::NexradConus;

        assembler.ingest(&block_product(image, 614340, t0, 3), t0);
        // exactly ten minutes newer: the old tile must go (inclusive bound)
        let t1 = t0 + Duration::minutes(10);
        assembler.ingest(&block_product(image, 614341, t1, 4), t1);

        let maintenance = assembler.maintain(t1).unwrap();
        assert_eq!(maintenance.updates.len(), 1);
        // the surviving composite observes from the newer tile only
        assert_eq!(maintenance.updates[0].observation_time, Some(t1));

        std::fs::remove_dir_all(&config.image_dir).unwrap();
    }

    #[test]
    fn it_restarts_non_latency_rasters_on_a_newer_instant() {
        let mut config = scratch_config("restart");
        config.image_quiet_secs = 0;
        let mut assembler = ImageAssembler::new(&config).unwrap();

        let t0 = Utc.with_ymd_and_hms(2021, 5, 14, 12, 0, 0).unwrap();
        let image = ImageType::CloudTops;

        let mut forecast = block_product(image, 614340, t0, 3);
        forecast.valid_time = forecast.observation_time.take();
        assembler.ingest(&forecast, t0);

        let t1 = t0 + Duration::minutes(5);
        let mut newer = block_product(image, 614999, t1, 4);
        newer.valid_time = newer.observation_time.take();
        assembler.ingest(&newer, t1);

        let maintenance = assembler.maintain(t1).unwrap();
        assert_eq!(maintenance.updates.len(), 1);
        assert_eq!(maintenance.updates[0].valid_time, Some(t1));

        std::fs::remove_dir_all(&config.image_dir).unwrap();
    }
}
