//! Test doubles shared by the strategy tests.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use crate::converge::{ChangeOutcome, FileApplier, Ownership};
use crate::error::Result;

/// Applier that never touches disk and reports a fixed outcome
pub(crate) struct StubApplier {
    outcome: ChangeOutcome,
    existing: Vec<PathBuf>,
    pub(crate) applied: RefCell<Vec<PathBuf>>,
}

impl StubApplier {
    pub(crate) fn new(outcome: ChangeOutcome, existing: &[PathBuf]) -> Self {
        Self {
            outcome,
            existing: existing.to_vec(),
            applied: RefCell::new(Vec::new()),
        }
    }
}

impl FileApplier for StubApplier {
    fn ensure_directory(&self, _: &Path, _: &Ownership) -> Result<ChangeOutcome> {
        Ok(ChangeOutcome::Unchanged)
    }

    fn apply(&self, path: &Path, _: &str, _: &Ownership) -> Result<ChangeOutcome> {
        self.applied.borrow_mut().push(path.to_path_buf());
        Ok(self.outcome)
    }

    fn create_marker(&self, _: &Path) -> Result<ChangeOutcome> {
        Ok(ChangeOutcome::Created)
    }

    fn exists(&self, path: &Path) -> bool {
        self.existing.iter().any(|p| p == path)
    }
}
