//! Test-mode trigger schedule.
//!
//! Conformance test groups specify instants (seconds past midnight of the
//! group's anchor date) at which the current state must be inspected. A
//! trigger file drives that: at each trigger the curator snapshots its
//! per-type store views, rendered images, and vector layers into a
//! per-trigger directory for comparison.

use std::path::{
    Path,
    PathBuf,
};

use chrono::{
    DateTime,
    Duration,
    NaiveDate,
    TimeZone,
    Utc,
};
use tracing::info;

use crate::{
    harvest::{
        store::Store,
        vectors,
    },
    types::ProductType,
};

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("trigger i/o error")]
    Io(#[from] std::io::Error),

    #[error("no start date for test group {test_number}")]
    NoStartDate { test_number: u32 },

    #[error("malformed trigger row: {row:?}")]
    MalformedRow { row: String },
}

#[derive(Clone, Debug)]
pub struct Trigger {
    pub at: DateTime<Utc>,
    pub sequence: u32,
    pub message: String,
}

/// Anchor date for a test group, from `start-dates.csv`
/// (`group,YYYY-MM-DD` rows).
fn start_date(trigger_dir: &Path, test_number: u32) -> Result<NaiveDate, TriggerError> {
    let contents = std::fs::read_to_string(trigger_dir.join("start-dates.csv"))?;

    for row in contents.lines() {
        let row = row.trim();
        if row.is_empty() || row.starts_with('#') {
            continue;
        }
        let Some((group, date)) = row.split_once(',')
        else {
            continue;
        };
        if group.trim().parse::<u32>() == Ok(test_number) {
            return date
                .trim()
                .parse()
                .map_err(|_| TriggerError::MalformedRow { row: row.to_owned() });
        }
    }

    Err(TriggerError::NoStartDate { test_number })
}

/// Load the trigger schedule for one test group. Rows are
/// `seconds_after_midnight, offset_seconds, sequence_number, message`.
pub fn load(trigger_dir: &Path, test_number: u32) -> Result<Vec<Trigger>, TriggerError> {
    let anchor = start_date(trigger_dir, test_number)?;
    let midnight = Utc.from_utc_datetime(&anchor.and_hms_opt(0, 0, 0).expect("midnight exists"));

    let path = trigger_dir.join(format!("tg{test_number:02}.csv"));
    let contents = std::fs::read_to_string(path)?;

    let mut triggers = Vec::new();
    for row in contents.lines() {
        let row = row.trim();
        if row.is_empty() || row.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = row.splitn(4, ',').map(str::trim).collect();
        let [seconds, offset, sequence, message] = fields.as_slice()
        else {
            return Err(TriggerError::MalformedRow { row: row.to_owned() });
        };

        let seconds: i64 = seconds
            .parse()
            .map_err(|_| TriggerError::MalformedRow { row: row.to_owned() })?;
        let offset: i64 = offset
            .parse()
            .map_err(|_| TriggerError::MalformedRow { row: row.to_owned() })?;
        let sequence: u32 = sequence
            .parse()
            .map_err(|_| TriggerError::MalformedRow { row: row.to_owned() })?;

        triggers.push(Trigger {
            at: midnight + Duration::seconds(seconds + offset),
            sequence,
            message: (*message).to_owned(),
        });
    }

    triggers.sort_by_key(|trigger| trigger.at);
    Ok(triggers)
}

#[derive(Debug)]
pub struct TriggerRunner {
    pending: Vec<Trigger>,
    results_dir: PathBuf,
    image_dir: PathBuf,
    test_number: u32,
}

impl TriggerRunner {
    pub fn new(
        trigger_dir: &Path,
        results_dir: &Path,
        image_dir: &Path,
        test_number: u32,
    ) -> Result<Self, TriggerError> {
        Ok(Self {
            pending: load(trigger_dir, test_number)?,
            results_dir: results_dir.to_owned(),
            image_dir: image_dir.to_owned(),
            test_number,
        })
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    /// Fire every trigger whose virtual time has passed, snapshotting the
    /// store into its dump directory.
    pub fn check<S: Store>(
        &mut self,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<(), TriggerError> {
        while let Some(trigger) = self.pending.first() {
            if trigger.at > now {
                break;
            }
            let trigger = self.pending.remove(0);

            info!(
                sequence = trigger.sequence,
                at = %trigger.at,
                message = %trigger.message,
                "trigger fired"
            );
            self.dump(store, &trigger)?;
        }

        Ok(())
    }

    fn dump<S: Store>(&self, store: &S, trigger: &Trigger) -> Result<(), TriggerError> {
        let dir = self
            .results_dir
            .join(format!("tg{:02}", self.test_number))
            .join(format!("{:02}", trigger.sequence));
        std::fs::create_dir_all(&dir)?;

        // one JSON file per product type present
        let mut types: Vec<ProductType> = store
            .all()
            .iter()
            .map(|product| product.product_type)
            .collect();
        types.sort();
        types.dedup();

        for product_type in types {
            let products = store.by_type(product_type);
            let json = serde_json::to_string_pretty(&products).expect("products serialize");
            std::fs::write(dir.join(format!("{product_type}.json")), json)?;
        }

        // rendered images travel along
        if self.image_dir.is_dir() {
            for entry in std::fs::read_dir(&self.image_dir)? {
                let path = entry?.path();
                if let Some(name) = path.file_name() {
                    std::fs::copy(&path, dir.join(name))?;
                }
            }
        }

        let mut csv = Vec::new();
        vectors::dump(store, &mut csv)?;
        std::fs::write(dir.join("vectors.csv"), csv)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{
        TimeZone,
        Utc,
    };

    use crate::harvest::trigger::load;

    #[test]
    fn it_loads_a_schedule() {
        let dir = std::env::temp_dir().join(format!("fisb-triggers-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("start-dates.csv"), "1,2021-05-14\n2,2020-09-18\n").unwrap();
        std::fs::write(
            dir.join("tg02.csv"),
            "# trigger schedule\n3600, -5, 1, check METAR present\n7200, 10, 2, check expiry\n",
        )
        .unwrap();

        let triggers = load(&dir, 2).unwrap();
        assert_eq!(triggers.len(), 2);
        assert_eq!(
            triggers[0].at,
            Utc.with_ymd_and_hms(2020, 9, 18, 0, 59, 55).unwrap()
        );
        assert_eq!(triggers[1].sequence, 2);
        assert_eq!(triggers[0].message, "check METAR present");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
