//! Read-only database snapshots.
//!
//! A database is an opaque key-to-value lookup backed by a memory-mapped
//! file, with an optional locks sub-table.  The engine never inspects the
//! on-disk representation beyond this module; it only sees the handle API:
//! `has`, `get`, `list`, the locks view and `is_valid`.


use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::path::PathBuf;

use memmap2::Mmap;
use serde::Deserialize;

use crate::changeset::Changeset;
use crate::value::Value;

/// Identifies the file backing a mapping, for staleness checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default)]
    values: BTreeMap<String, Value>,
    #[serde(default)]
    locks: BTreeSet<String>,
}

/// The locks sub-table of a database.
#[derive(Debug)]
pub struct Locks {
    keys: BTreeSet<String>,
}

impl Locks {
    pub fn has(
        &self,
        key: &str,
    ) -> bool {
        self.keys.contains(key)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

#[derive(Debug)]
pub struct Database {
    values: BTreeMap<String, Value>,
    locks: Option<Locks>,
    path: PathBuf,
    identity: FileIdentity,
    // Held so the mapping outlives the parse it fed.
    _map: Mmap,
}

impl Database {
    /// Maps and decodes the database file at `path`.
    pub fn open(path: &Path) -> io::Result<Database> {
        let file = File::open(path)?;
        let meta = file.metadata()?;
        let identity = FileIdentity {
            dev: meta.dev(),
            ino: meta.ino(),
        };

        let map = unsafe { memmap2::MmapOptions::new().map(&file)? };

        let snapshot: Snapshot = serde_json::from_slice(&map)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let locks = if snapshot.locks.is_empty() {
            None
        } else {
            Some(Locks {
                keys: snapshot.locks,
            })
        };

        Ok(Database {
            values: snapshot.values,
            locks,
            path: path.to_owned(),
            identity,
            _map: map,
        })
    }

    pub fn has(
        &self,
        key: &str,
    ) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<&Value> {
        self.values.get(key)
    }

    /// Lists the names immediately below `dir`: plain names for keys, names
    /// with a trailing slash for subdirs.
    pub fn list(
        &self,
        dir: &str,
    ) -> Vec<String> {
        let mut names = BTreeSet::new();

        for key in self
            .values
            .range(dir.to_owned()..)
            .take_while(|(key, _)| key.starts_with(dir))
            .map(|(key, _)| key)
        {
            let rest = &key[dir.len()..];

            match rest.find('/') {
                Some(i) => names.insert(rest[..=i].to_owned()),
                None => names.insert(rest.to_owned()),
            };
        }

        names.into_iter().collect()
    }

    pub fn locks(&self) -> Option<&Locks> {
        self.locks.as_ref()
    }

    /// Whether the backing file is still the one this handle mapped.
    /// Becomes false once the file is replaced or removed.
    pub fn is_valid(&self) -> bool {
        match std::fs::metadata(&self.path) {
            Ok(meta) => {
                self.identity
                    == FileIdentity {
                        dev: meta.dev(),
                        ino: meta.ino(),
                    }
            }
            Err(_) => false,
        }
    }

    /// Copies the contents into a database-mode changeset.
    pub fn to_changeset(&self) -> Changeset {
        let mut changeset = Changeset::new_database();

        for (key, value) in &self.values {
            changeset.insert_raw(key.clone(), Some(value.clone()));
        }

        changeset
    }
}
