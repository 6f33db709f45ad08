//! Read-only sources at an absolute path.
//!
//! Opened exactly once, on the first refresh.  Whatever the outcome, the
//! result is kept for the lifetime of the source.

use std::path::Path;

use tracing::warn;

use crate::database::Database;

#[derive(Debug)]
pub(crate) struct FileBackend {
    tried: bool,
}

impl FileBackend {
    pub(crate) fn new() -> Self {
        Self { tried: false }
    }

    pub(crate) fn needs_reopen(&self) -> bool {
        !self.tried
    }

    pub(crate) fn reopen(
        &mut self,
        file_path: &Path,
    ) -> Option<Database> {
        self.tried = true;

        match Database::open(file_path) {
            Ok(database) => Some(database),
            Err(e) => {
                warn!(path = ?file_path, ?e, "unable to open file database");
                None
            }
        }
    }
}
