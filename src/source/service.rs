//! Sources whose database file is materialised by the writer service.
//!
//! The file does not exist until the writer has run at least once.  On the
//! first failed open we issue a synchronous `Init` call to kick the writer
//! into creating it, then retry once.  Further failures are silent; a
//! missing database is a valid steady state.

use std::path::Path;

use tracing::debug;

use crate::database::Database;
use crate::source::BusAddress;
use crate::transport::Bus;
use crate::transport::CallArgs;
use crate::transport::MethodCall;

#[derive(Debug)]
pub(crate) struct ServiceBackend {
    init_requested: bool,
}

impl ServiceBackend {
    pub(crate) fn new() -> Self {
        Self {
            init_requested: false,
        }
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
        address: Option<&BusAddress>,
        bus: &dyn Bus,
    ) -> Option<Database> {
        if let Ok(database) = Database::open(file_path) {
            return Some(database);
        }

        let Some(address) = address else {
            return None;
        };

        if self.init_requested {
            return None;
        }

        // Kick the service to have the file created, then try again.
        self.init_requested = true;

        let init = MethodCall {
            bus: address.bus,
            destination: address.name.to_owned(),
            object_path: address.object_path.clone(),
            interface: address.interface.to_owned(),
            method: "Init".to_owned(),
            args: CallArgs::None,
        };

        if let Err(e) = bus.call_sync(init, None) {
            debug!(?e, path = ?file_path, "writer init request failed");
        }

        Database::open(file_path).ok()
    }
}
