use serde::Serialize;
use tracing::debug;

use crate::models::{FileEdit, FileTable};

/// Result of merging one turn's records into a file table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    /// Paths whose content actually changed, in first-touched order.
    pub changed: Vec<String>,
    /// New value for the "currently viewed file" pointer, if it should move.
    pub viewed: Option<String>,
}

impl MergeOutcome {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Merges file-edit records into the project's file table.
///
/// Records apply in emission order; a later record for the same path wins.
/// Replaying the same record list converges to the same table.
#[derive(Debug, Clone)]
pub struct FileSetAggregator {
    entry_path: String,
}

impl FileSetAggregator {
    #[must_use]
    pub fn new(entry_path: impl Into<String>) -> Self {
        Self {
            entry_path: canonical_path(&entry_path.into()),
        }
    }

    #[must_use]
    pub fn entry_path(&self) -> &str {
        &self.entry_path
    }

    /// Apply `records` to `table` in place.
    pub fn apply(&self, table: &mut FileTable, records: &[FileEdit]) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let mut touched_entry = false;
        for record in records {
            let path = canonical_path(&record.path);
            if path.is_empty() {
                continue;
            }
            if path == self.entry_path {
                touched_entry = true;
            }
            if table.put(&path, &record.content) && !outcome.changed.contains(&path) {
                outcome.changed.push(path);
            }
        }
        if touched_entry {
            outcome.viewed = Some(self.entry_path.clone());
        }
        debug!(
            records = records.len(),
            changed = outcome.changed.len(),
            "merged file records"
        );
        outcome
    }

    /// Pure form of [`Self::apply`].
    #[must_use]
    pub fn merge(&self, table: &FileTable, records: &[FileEdit]) -> (FileTable, MergeOutcome) {
        let mut next = table.clone();
        let outcome = self.apply(&mut next, records);
        (next, outcome)
    }
}

/// Normalize separators and drop leading `/` and `./` segments. Case is kept.
#[must_use]
pub fn canonical_path(path: &str) -> String {
    let mut p = path.trim().replace('\\', "/");
    loop {
        if let Some(rest) = p.strip_prefix("./") {
            p = rest.to_string();
        } else if let Some(rest) = p.strip_prefix('/') {
            p = rest.to_string();
        } else {
            break;
        }
    }
    p
}
