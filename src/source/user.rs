//! The writable per-user source.
//!
//! Reopening is driven entirely by the shm flag: as long as the mapped
//! byte stays clear there is no IO at all on refresh, even when the
//! database file is missing.  A flag byte that cannot be mapped behaves as
//! permanently set, so the source reopens on every refresh rather than
//! serve stale data.

use std::path::Path;
use std::path::PathBuf;

use crate::database::Database;
use crate::shm::ShmFlag;

#[derive(Debug)]
pub(crate) struct UserBackend {
    shm_dir: PathBuf,
    shm: Option<ShmFlag>,
}

impl UserBackend {
    pub(crate) fn new(shm_dir: PathBuf) -> Self {
        Self { shm_dir, shm: None }
    }

    pub(crate) fn needs_reopen(&self) -> bool {
        match &self.shm {
            Some(flag) => flag.is_flagged(),
            None => true,
        }
    }

    pub(crate) fn reopen(
        &mut self,
        name: &str,
        file_path: &Path,
    ) -> Option<Database> {
        self.shm = ShmFlag::open(&self.shm_dir, name);

        Database::open(file_path).ok()
    }
}
