//! Per-stage error sinks.
//!
//! A stage never fails the pipeline over one bad packet; it records the
//! error here and moves on. The sink is an append-only text file truncated
//! at stage start — a non-empty file after a run is the failure signal.

use std::{
    fs::{
        File,
        OpenOptions,
    },
    io::Write,
    path::PathBuf,
};

use tracing::warn;

#[derive(Debug)]
pub struct ErrorSink {
    path: PathBuf,
    count: u64,
}

impl ErrorSink {
    /// Open (and truncate) the sink for a stage.
    pub fn open(stage: &str) -> Self {
        let path = PathBuf::from(format!("{stage}.err"));
        if let Err(error) = File::create(&path) {
            warn!(%error, path = %path.display(), "could not truncate error sink");
        }

        Self { path, count: 0 }
    }

    /// Record one error, with the offending input when available.
    pub fn record(&mut self, error: &dyn std::fmt::Display, context: Option<&str>) {
        self.count += 1;
        warn!(%error, sink = %self.path.display(), "dropped input");

        let entry = match context {
            Some(context) => {
                format!("#--------------------------------------------------\n#{error}\n{context}\n\n")
            }
            None => format!("#--------------------------------------------------\n#{error}\n\n"),
        };

        let result = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(entry.as_bytes()));

        if let Err(error) = result {
            warn!(%error, path = %self.path.display(), "could not append to error sink");
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}
