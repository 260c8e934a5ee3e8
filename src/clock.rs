use std::path::Path;

use chrono::{
    DateTime,
    Duration,
    Utc,
};

/// Clock capability.
///
/// All expiration and trigger logic goes through one of these instead of
/// the wall clock. In production the offset is zero. In test replay the
/// trickle driver writes a sync file holding the offset (seconds, possibly
/// fractional) between wall time and the capture's timeline; the curator
/// picks it up at startup and lives in the past.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    offset_micros: i64,
}

impl Clock {
    pub fn wall() -> Self {
        Self { offset_micros: 0 }
    }

    pub fn with_offset_secs(offset_secs: f64) -> Self {
        Self {
            offset_micros: (offset_secs * 1e6) as i64,
        }
    }

    /// Load the offset from a trickle sync file. A missing file means
    /// production time.
    pub fn from_sync_file(path: &Path) -> Result<Self, std::io::Error> {
        if !path.is_file() {
            return Ok(Self::wall());
        }

        let contents = std::fs::read_to_string(path)?;
        let offset_secs: f64 = contents.trim().parse().map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("malformed sync file: {}", path.display()),
            )
        })?;

        Ok(Self::with_offset_secs(offset_secs))
    }

    pub fn is_offset(&self) -> bool {
        self.offset_micros != 0
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + Duration::microseconds(self.offset_micros)
    }

    /// Sleep until the given instant on this clock's timeline. Returns
    /// immediately if the instant has passed.
    pub async fn sleep_until(&self, instant: DateTime<Utc>) {
        let wait = instant - self.now();
        if let Ok(wait) = wait.to_std() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::clock::Clock;

    #[test]
    fn it_offsets_now() {
        let clock = Clock::with_offset_secs(-3600.0);
        let delta = Utc::now() - clock.now();
        assert!(delta.num_seconds() >= 3599 && delta.num_seconds() <= 3601);
    }

    #[test]
    fn it_treats_a_missing_sync_file_as_wall_time() {
        let clock = Clock::from_sync_file(std::path::Path::new("/nonexistent/sync.fisb")).unwrap();
        assert!(!clock.is_offset());
    }
}
