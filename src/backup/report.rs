use crate::errors::ErrorKind;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// What happened to a single call record during a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    Exported,
    /// The record already carried an archive path.
    Skipped,
    Failed(Option<ErrorKind>),
}

/// Tally of a backup run. Only used for logging, a run never fails as a whole.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackupReport {
    pub customers: usize,
    pub failed_customers: usize,
    pub records: usize,
    pub exported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: HashMap<ErrorKind, usize>,
}

impl BackupReport {
    pub fn record(&mut self, outcome: RecordOutcome) {
        self.records += 1;

        match outcome {
            RecordOutcome::Exported => self.exported += 1,
            RecordOutcome::Skipped => self.skipped += 1,
            RecordOutcome::Failed(kind) => {
                self.failed += 1;
                if let Some(kind) = kind {
                    self.count_failure(kind);
                }
            }
        }
    }

    /// Notes a customer whose records could not even be listed.
    pub fn customer_failed(&mut self, kind: Option<ErrorKind>) {
        self.failed_customers += 1;
        if let Some(kind) = kind {
            self.count_failure(kind);
        }
    }

    pub fn failures_of(&self, kind: ErrorKind) -> usize {
        self.failures.get(&kind).copied().unwrap_or_default()
    }

    fn count_failure(&mut self, kind: ErrorKind) {
        *self.failures.entry(kind).or_default() += 1;
    }
}

impl Display for BackupReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} customers ({} failed), {} records: {} exported, {} skipped, {} failed",
            self.customers,
            self.failed_customers,
            self.records,
            self.exported,
            self.skipped,
            self.failed
        )?;

        let mut kinds: Vec<_> = self.failures.iter().collect();
        kinds.sort_by_key(|(kind, _)| kind.name());
        for (kind, count) in kinds {
            write!(f, ", {} {}", count, kind)?;
        }

        Ok(())
    }
}
