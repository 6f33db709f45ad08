//! One layer of the configuration stack.
//!
//! A source couples a database file with the policy for noticing that the
//! file has been replaced, plus the bus coordinates of the writer that owns
//! it.  Five kinds exist; each kind keeps only its own reopen state:
//!
//! - `user`: the writable per-user database, invalidated by the shm flag
//! - `system`: a read-only file under the system db dir
//! - `file`: a read-only file at an absolute path, opened exactly once
//! - `service`: materialised on demand by the writer via `Init`
//! - `proxied`: like `service`, addressed by per-app id for confined
//!   applications
//!
//! Static attributes (name, kind, bus coordinates, writability) never
//! change after construction; only the open database does.

mod file;
mod service;
mod system;
mod user;

#[cfg(test)]
mod source_test;

pub(crate) use file::FileBackend;
pub(crate) use service::ServiceBackend;
pub(crate) use system::SystemBackend;
pub(crate) use user::UserBackend;

use std::path::PathBuf;

use tracing::debug;

use crate::constants::PROXY_BUS_NAME;
use crate::constants::PROXY_INTERFACE;
use crate::constants::PROXY_OBJECT_PREFIX;
use crate::constants::WRITER_BUS_NAME;
use crate::constants::WRITER_INTERFACE;
use crate::constants::WRITER_OBJECT_PREFIX;
use crate::database::Database;
use crate::database::Locks;
use crate::dirs::Dirs;
use crate::transport::Bus;
use crate::transport::BusId;

/// Where to reach the writer owning a source.
#[derive(Debug, Clone, PartialEq)]
pub struct BusAddress {
    pub bus: BusId,
    pub name: &'static str,
    pub interface: &'static str,
    pub object_path: String,
}

/// The static attributes of a source, copied out by the engine so that
/// match rules and writer calls need no lock.
#[derive(Debug, Clone)]
pub struct SourceAddress {
    pub bus: Option<BusAddress>,
    pub writable: bool,
}

#[derive(Debug)]
pub(crate) enum SourceKind {
    User(UserBackend),
    System(SystemBackend),
    File(FileBackend),
    Service(ServiceBackend),
    Proxied(ServiceBackend),
}

impl SourceKind {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::System(_) => "system",
            Self::File(_) => "file",
            Self::Service(_) => "service",
            Self::Proxied(_) => "proxied",
        }
    }
}

#[derive(Debug)]
pub struct Source {
    name: String,
    kind: SourceKind,
    writable: bool,
    bus_address: Option<BusAddress>,
    file_path: PathBuf,
    database: Option<Database>,
}

impl Source {
    /// Parses one profile line of the form `<kind>-db:<name-or-path>`.
    ///
    /// Returns `None` for unknown kinds; the caller decides whether that
    /// deserves a warning.
    pub fn from_description(
        description: &str,
        dirs: &Dirs,
    ) -> Option<Source> {
        if let Some(name) = description.strip_prefix("user-db:") {
            Some(Self::new_user(name, dirs))
        } else if let Some(name) = description.strip_prefix("system-db:") {
            Some(Source {
                name: name.to_owned(),
                kind: SourceKind::System(SystemBackend::new()),
                writable: false,
                bus_address: None,
                file_path: dirs.system_db_path(name),
                database: None,
            })
        } else if let Some(path) = description.strip_prefix("file-db:") {
            Some(Source {
                name: path.to_owned(),
                kind: SourceKind::File(FileBackend::new()),
                writable: false,
                bus_address: None,
                file_path: PathBuf::from(path),
                database: None,
            })
        } else if let Some(name) = description.strip_prefix("service-db:") {
            Some(Source {
                name: name.to_owned(),
                kind: SourceKind::Service(ServiceBackend::new()),
                writable: true,
                bus_address: Some(BusAddress {
                    bus: BusId::Session,
                    name: WRITER_BUS_NAME,
                    interface: WRITER_INTERFACE,
                    object_path: format!("{}{}", WRITER_OBJECT_PREFIX, name),
                }),
                file_path: dirs.service_db_path(name),
                database: None,
            })
        } else if let Some(app_id) = description.strip_prefix("proxied-db:") {
            Some(Source {
                name: app_id.to_owned(),
                kind: SourceKind::Proxied(ServiceBackend::new()),
                writable: true,
                bus_address: Some(BusAddress {
                    bus: BusId::Session,
                    name: PROXY_BUS_NAME,
                    interface: PROXY_INTERFACE,
                    object_path: format!("{}{}", PROXY_OBJECT_PREFIX, app_id),
                }),
                file_path: dirs.proxied_db_path(app_id),
                database: None,
            })
        } else {
            None
        }
    }

    /// The source used by the built-in default profile.
    pub fn new_user(
        name: &str,
        dirs: &Dirs,
    ) -> Source {
        Source {
            name: name.to_owned(),
            kind: SourceKind::User(UserBackend::new(dirs.shm_dir())),
            writable: true,
            bus_address: Some(BusAddress {
                bus: BusId::Session,
                name: WRITER_BUS_NAME,
                interface: WRITER_INTERFACE,
                object_path: format!("{}{}", WRITER_OBJECT_PREFIX, name),
            }),
            file_path: dirs.user_db_path(name),
            database: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.kind_name()
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Non-first sources in a profile are always read-only.
    pub(crate) fn make_read_only(&mut self) {
        self.writable = false;
    }

    pub fn bus_address(&self) -> Option<&BusAddress> {
        self.bus_address.as_ref()
    }

    pub fn address(&self) -> SourceAddress {
        SourceAddress {
            bus: self.bus_address.clone(),
            writable: self.writable,
        }
    }

    pub fn values(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    pub fn locks(&self) -> Option<&Locks> {
        self.database.as_ref().and_then(Database::locks)
    }

    /// Checks whether the backing database changed and reopens it if so.
    ///
    /// Returns true iff the open database identity changed.  A missing
    /// database staying missing is not a change.
    pub fn refresh(
        &mut self,
        bus: &dyn Bus,
    ) -> bool {
        let needs_reopen = match &self.kind {
            SourceKind::User(backend) => backend.needs_reopen(),
            SourceKind::System(backend) => backend.needs_reopen(self.database.as_ref()),
            SourceKind::File(backend) => backend.needs_reopen(),
            SourceKind::Service(backend) | SourceKind::Proxied(backend) => {
                backend.needs_reopen(self.database.as_ref())
            }
        };

        if !needs_reopen {
            return false;
        }

        let fresh = match &mut self.kind {
            SourceKind::User(backend) => backend.reopen(&self.name, &self.file_path),
            SourceKind::System(backend) => backend.reopen(&self.file_path),
            SourceKind::File(backend) => backend.reopen(&self.file_path),
            SourceKind::Service(backend) | SourceKind::Proxied(backend) => {
                backend.reopen(&self.file_path, self.bus_address.as_ref(), bus)
            }
        };

        let changed = self.database.is_some() || fresh.is_some();

        if changed {
            debug!(name = %self.name, kind = self.kind.kind_name(), "source database changed");
        }

        self.database = fresh;
        changed
    }
}
