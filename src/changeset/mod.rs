//! Ordered sets of changes to a configuration database.
//!
//! A changeset maps paths to either a new value or a reset.  Two modes
//! exist:
//!
//! - **delta**: the argument to the write APIs.  Entries may be resets, and
//!   a reset may target a dir, meaning "reset every key under it".
//! - **database**: a snapshot of database contents.  Entries are always
//!   `key -> value`; resets are resolved at insertion time.
//!
//! A changeset starts out mutable and single-threaded.  Sealing it makes it
//! immutable (and therefore safe to share) and precomputes the description
//! used for change notifications and by the remote writer.


use std::collections::BTreeMap;

use bytes::Bytes;

use crate::errors::Error;
use crate::errors::PathError;
use crate::errors::Result;
use crate::paths;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Delta,
    Database,
}

/// The description of a sealed changeset: a common prefix, the sorted
/// relative paths beneath it, and the parallel values (`None` for reset).
///
/// Sorting guarantees that a dir reset appears before any key it contains,
/// so a consumer can apply deletes before inserts.
#[derive(Debug, Clone)]
pub struct ChangesetDescription {
    pub prefix: String,
    pub paths: Vec<String>,
    pub values: Vec<Option<Value>>,
}

#[derive(Debug, Clone)]
pub struct Changeset {
    table: BTreeMap<String, Option<Value>>,
    mode: Mode,
    sealed: bool,
    description: Option<ChangesetDescription>,
}

impl Default for Changeset {
    fn default() -> Self {
        Self::new()
    }
}

impl Changeset {
    /// Creates a new, empty changeset in delta mode.
    pub fn new() -> Self {
        Self {
            table: BTreeMap::new(),
            mode: Mode::Delta,
            sealed: false,
            description: None,
        }
    }

    /// Creates a new, empty changeset in database mode.
    ///
    /// A database-mode changeset expresses the contents of an entire
    /// database: the contents are what you would have if you applied it to
    /// an empty database.  Reset operations are meaningless under that
    /// reading, so a database-mode changeset never records one.
    pub fn new_database() -> Self {
        Self {
            table: BTreeMap::new(),
            mode: Mode::Database,
            sealed: false,
            description: None,
        }
    }

    /// Convenience constructor for a delta with a single write or reset.
    pub fn new_write(
        path: &str,
        value: Option<Value>,
    ) -> Result<Self> {
        let mut changeset = Self::new();
        changeset.set(path, value)?;
        Ok(changeset)
    }

    pub fn is_database(&self) -> bool {
        self.mode == Mode::Database
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Adds an operation to modify `path`.
    ///
    /// `path` may be a key or a dir.  A dir must be a reset: it is not
    /// permitted to assign a value to a dir.  Resetting a dir removes every
    /// recorded entry under it and, in delta mode, records the reset itself.
    pub fn set(
        &mut self,
        path: &str,
        value: Option<Value>,
    ) -> Result<()> {
        if self.sealed {
            return Err(Error::Sealed);
        }

        paths::check_path(path)?;

        if path.ends_with('/') {
            if value.is_some() {
                return Err(PathError::ExpectedKey(path.to_owned()).into());
            }

            // A dir reset also resets every key within that dir.
            self.table.retain(|key, _| !key.starts_with(path));

            if self.mode == Mode::Delta {
                self.table.insert(path.to_owned(), None);
            }
        } else if value.is_none() {
            // In delta mode the reset is recorded explicitly.  A database
            // just drops whatever may be there already.
            if self.mode == Mode::Delta {
                self.table.insert(path.to_owned(), None);
            } else {
                self.table.remove(path);
            }
        } else {
            self.table.insert(path.to_owned(), value);
        }

        Ok(())
    }

    /// Checks if this changeset has an outstanding request to change `key`.
    ///
    /// Returns `None` if the key is not involved at all, `Some(None)` if it
    /// is being reset, and `Some(Some(value))` if it is being written.
    pub fn get(
        &self,
        key: &str,
    ) -> Option<Option<&Value>> {
        self.table.get(key).map(|value| value.as_ref())
    }

    /// Checks if all entries satisfy `predicate`.
    ///
    /// The predicate is called on each entry in turn until it returns
    /// false.  The empty changeset satisfies every predicate.
    pub fn all(
        &self,
        mut predicate: impl FnMut(&str, Option<&Value>) -> bool,
    ) -> bool {
        self.table.iter().all(|(path, value)| predicate(path, value.as_ref()))
    }

    /// Checks if this changeset writes to the exact same set of paths as
    /// `other`.  Values are not considered.
    ///
    /// Used to prevent a queue building up out of repeated writes to the
    /// same keys, as seen when an application writes on every move of a
    /// slider.
    pub fn is_similar_to(
        &self,
        other: &Changeset,
    ) -> bool {
        self.table.len() == other.table.len() && self.table.keys().all(|key| other.table.contains_key(key))
    }

    /// Seals this changeset, making it immutable, and precomputes its
    /// description.  Idempotent.
    pub fn seal(&mut self) {
        if self.sealed {
            return;
        }

        self.sealed = true;

        if self.table.is_empty() {
            return;
        }

        let n_items = self.table.len();

        // The map iterates in sorted order, which is exactly the order the
        // writer requires: a dir reset sorts ahead of every key inside it.
        let first = self.table.keys().next().map(String::as_str).unwrap_or_default();
        let mut prefix_length = first.len();

        for key in self.table.keys().skip(1) {
            let common = first
                .bytes()
                .zip(key.bytes())
                .take_while(|(a, b)| a == b)
                .count();
            prefix_length = prefix_length.min(common);
        }

        // "/a/ab" and "/a/ac" share "/a/a", but the usable prefix is "/a/".
        // A single item keeps its full path as the prefix.  Every path
        // begins with '/', so this terminates on a char boundary.
        if n_items > 1 {
            while first.as_bytes()[prefix_length - 1] != b'/' {
                prefix_length -= 1;
            }
        }

        let prefix = first[..prefix_length].to_owned();
        let mut relative = Vec::with_capacity(n_items);
        let mut values = Vec::with_capacity(n_items);

        for (path, value) in &self.table {
            relative.push(path[prefix_length..].to_owned());
            values.push(value.clone());
        }

        self.description = Some(ChangesetDescription {
            prefix,
            paths: relative,
            values,
        });
    }

    /// Describes this changeset, sealing it first if necessary.
    ///
    /// Returns `None` for the empty changeset.
    pub fn describe(&mut self) -> Option<&ChangesetDescription> {
        self.seal();
        self.description.as_ref()
    }

    /// The description of an already-sealed changeset.
    pub fn description(&self) -> Option<&ChangesetDescription> {
        self.description.as_ref()
    }

    /// Applies `changes` to this changeset.
    ///
    /// Entries are visited in sorted order so that a dir reset in `changes`
    /// clears existing entries before any key under that dir is copied in.
    pub fn change(
        &mut self,
        changes: &Changeset,
    ) -> Result<()> {
        for (path, value) in &changes.table {
            self.set(path, value.clone())?;
        }

        Ok(())
    }

    /// Compares two database-mode changesets, producing the delta that
    /// turns `from` into `to`, or `None` when they are equal.
    ///
    /// No attempt is made to emit dir resets; each removed key is reset
    /// individually.
    pub fn diff(
        from: &Changeset,
        to: &Changeset,
    ) -> Option<Changeset> {
        debug_assert!(from.is_database() && to.is_database());

        let mut delta = Changeset::new();

        for (key, value) in &to.table {
            if from.table.get(key) != Some(value) {
                delta.table.insert(key.clone(), value.clone());
            }
        }

        for key in from.table.keys() {
            if !to.table.contains_key(key) {
                delta.table.insert(key.clone(), None);
            }
        }

        if delta.table.is_empty() {
            None
        } else {
            Some(delta)
        }
    }

    /// Returns the subset of `delta` that would actually alter `database`,
    /// or `None` when every entry is redundant.
    ///
    /// A key write is redundant if the database already holds that value; a
    /// key reset is redundant if the key is absent; a dir reset is
    /// redundant if nothing exists under the dir.
    pub fn filter_changes(
        database: &Changeset,
        delta: &Changeset,
    ) -> Option<Changeset> {
        debug_assert!(database.is_database());

        let mut filtered = Changeset::new();

        for (path, value) in &delta.table {
            let relevant = if path.ends_with('/') {
                database
                    .table
                    .range(path.clone()..)
                    .take_while(|(key, _)| key.starts_with(path.as_str()))
                    .next()
                    .is_some()
            } else {
                database.table.get(path).and_then(|held| held.as_ref()) != value.as_ref()
            };

            if relevant {
                filtered.table.insert(path.clone(), value.clone());
            }
        }

        if filtered.table.is_empty() {
            None
        } else {
            Some(filtered)
        }
    }

    /// Serialises this changeset into its wire form: a self-describing map
    /// of path to nullable value.
    pub fn serialise(&self) -> Bytes {
        let mut map = serde_json::Map::with_capacity(self.table.len());

        for (path, value) in &self.table {
            let encoded = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
            map.insert(path.clone(), encoded);
        }

        Bytes::from(serde_json::to_vec(&serde_json::Value::Object(map)).unwrap_or_default())
    }

    /// Recreates a changeset from its wire form.
    ///
    /// This call never fails: improperly-formatted entries are simply
    /// ignored.  A reset may name any path, a value only a key -- it is not
    /// possible to assign a value to a dir.
    pub fn deserialise(data: &[u8]) -> Changeset {
        let mut changeset = Changeset::new();

        let Ok(serde_json::Value::Object(map)) = serde_json::from_slice(data) else {
            return changeset;
        };

        for (path, raw) in map {
            if raw.is_null() {
                if paths::is_path(&path) {
                    changeset.table.insert(path, None);
                }
            } else if let Ok(value) = serde_json::from_value::<Value>(raw) {
                if paths::is_key(&path) {
                    changeset.table.insert(path, Some(value));
                }
            }
        }

        changeset
    }

    /// Inserts an entry known to be valid, bypassing mode and path checks.
    pub(crate) fn insert_raw(
        &mut self,
        path: String,
        value: Option<Value>,
    ) {
        self.table.insert(path, value);
    }
}
