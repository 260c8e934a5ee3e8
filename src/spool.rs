//! Spool directory between the change filter and the curator.
//!
//! Filenames are `YYYYMMDDTHHMMSS.nnnnnn-seq.json`, so lexicographic order
//! is arrival order. Files are written under a `.tmp` name and renamed into
//! place; the curator never sees a half-written product. The spool doubles
//! as the crash-tolerance boundary: products already spooled survive a
//! curator restart and replay idempotently.

use std::path::{
    Path,
    PathBuf,
};

use chrono::{
    DateTime,
    Utc,
};

use crate::products::Product;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("spool i/o error")]
    Io(#[from] std::io::Error),
    #[error("spool serialization error")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct SpoolWriter {
    directory: PathBuf,
    sequence: u32,
}

impl SpoolWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, Error> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            sequence: 0,
        })
    }

    /// Spool one product, stamped with its arrival time.
    pub fn write(&mut self, product: &Product, now: DateTime<Utc>) -> Result<(), Error> {
        // The sequence counter separates products arriving within one
        // microsecond (image tiles do).
        let base = format!(
            "{}-{:04}",
            now.format("%Y%m%dT%H%M%S%.6f"),
            self.sequence
        );
        self.sequence = self.sequence.wrapping_add(1);

        let tmp_path = self.directory.join(format!("{base}.tmp"));
        let final_path = self.directory.join(format!("{base}.json"));

        let line = serde_json::to_string(product)?;
        std::fs::write(&tmp_path, format!("{line}\n"))?;
        std::fs::rename(&tmp_path, &final_path)?;

        Ok(())
    }
}

/// List spooled product files in arrival order.
pub fn list(directory: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(directory)? {
        let path = entry?.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Read one spooled product.
pub fn read(path: &Path) -> Result<Product, Error> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(contents.trim())?)
}

#[cfg(test)]
mod tests {
    use chrono::{
        Duration,
        TimeZone,
        Utc,
    };

    use crate::{
        products::Product,
        spool::{
            SpoolWriter,
            list,
            read,
        },
        types::ProductType,
    };

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("fisb-spool-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn it_round_trips_products_in_order() {
        let dir = scratch_dir("order");
        let mut writer = SpoolWriter::new(&dir).unwrap();

        let rcvd = Utc.with_ymd_and_hms(2021, 5, 14, 7, 18, 0).unwrap();
        for i in 0..3 {
            let mut product = Product::new(
                ProductType::Metar,
                format!("K{i:03}"),
                rcvd,
                rcvd + Duration::hours(2),
            );
            product.contents = Some(format!("METAR K{i:03} ..."));
            writer.write(&product, rcvd + Duration::milliseconds(i)).unwrap();
        }

        let files = list(&dir).unwrap();
        assert_eq!(files.len(), 3);

        let names: Vec<String> = files
            .iter()
            .map(|f| read(f).unwrap().unique_name)
            .collect();
        assert_eq!(names, vec!["K000", "K001", "K002"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn it_ignores_tmp_files() {
        let dir = scratch_dir("tmp");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("20210514T000000.000000-0000.tmp"), "{}").unwrap();

        assert!(list(&dir).unwrap().is_empty());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
