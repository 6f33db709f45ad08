//! Read-only sources under the system database directory.
//!
//! The mapping is kept until the backing file identity changes.  A missing
//! file is retried on every refresh, but the degradation is only reported
//! once.

use std::path::Path;

use tracing::warn;

use crate::database::Database;

#[derive(Debug)]
pub(crate) struct SystemBackend {
    warned: bool,
}

impl SystemBackend {
    pub(crate) fn new() -> Self {
        Self { warned: false }
    }

    pub(crate) fn needs_reopen(
        &self,
        current: Option<&Database>,
    ) -> bool {
        match current {
            Some(database) => !database.is_valid(),
            None => true,
        }
    }

    pub(crate) fn reopen(
        &mut self,
        file_path: &Path,
    ) -> Option<Database> {
        match Database::open(file_path) {
            Ok(database) => Some(database),
            Err(e) => {
                if !self.warned {
                    warn!(path = ?file_path, ?e, "database does not exist; expect degraded performance");
                    self.warned = true;
                }
                None
            }
        }
    }
}
