//! Test replay driver.
//!
//! Replays an archived capture file at its original pace: the inter-line
//! gaps recorded in the `t=` trailers are reproduced on output. Before the
//! first line, the offset between wall time and the capture's timeline is
//! written to the sync file, which the curator reads to move its virtual
//! clock into the past. The file is removed again on exit.

use std::path::Path;

use tokio::{
    fs::File,
    io::{
        AsyncBufReadExt,
        BufReader,
    },
};
use tracing::info;

use crate::config::Config;

/// Head start given to the curator before the first replayed line.
const INITIAL_DELAY_SECS: f64 = 10.0;

#[derive(Debug, thiserror::Error)]
pub enum TrickleError {
    #[error("trickle i/o error")]
    Io(#[from] std::io::Error),

    #[error("capture line without a timestamp: {line:?}")]
    MissingTimestamp { line: String },
}

fn line_timestamp(line: &str) -> Option<f64> {
    let index = line.find(";t=")?;
    let rest = &line[index + 3..];
    let end = rest.find(';')?;
    rest[..end].parse().ok()
}

/// Replay `path` to stdout at original pace.
pub async fn run(path: &Path, config: &Config) -> Result<(), TrickleError> {
    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();

    let mut offset_secs: Option<f64> = None;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_owned();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('+') {
            let timestamp = line_timestamp(&line).ok_or_else(|| {
                TrickleError::MissingTimestamp { line: line.clone() }
            })?;

            let offset = match offset_secs {
                Some(offset) => offset,
                None => {
                    // virtual = wall + offset; start slightly before the
                    // first packet so the curator is ready
                    let wall = wall_secs();
                    let offset = (timestamp - INITIAL_DELAY_SECS) - wall;
                    std::fs::write(&config.sync_file, format!("{offset}\n"))?;
                    info!(offset, sync_file = %config.sync_file.display(), "sync written");
                    offset_secs = Some(offset);
                    offset
                }
            };

            // wait until the packet's instant on the virtual timeline
            let wait = timestamp - (wall_secs() + offset);
            if wait > 0.0 {
                tokio::time::sleep(std::time::Duration::from_secs_f64(wait)).await;
            }
        }

        println!("{line}");
    }

    if config.sync_file.is_file() {
        std::fs::remove_file(&config.sync_file)?;
    }

    Ok(())
}

fn wall_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock after 1970")
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use crate::trickle::line_timestamp;

    #[test]
    fn it_parses_the_line_timestamp() {
        assert_eq!(
            line_timestamp("+aabb;rs=2;rssi=-16.4;t=1620976680.500000;"),
            Some(1620976680.5)
        );
        assert_eq!(line_timestamp("+aabb;rs=2;rssi=-16.4;"), None);
    }
}
