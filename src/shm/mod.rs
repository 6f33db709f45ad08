//! One-byte-per-database invalidation flags.
//!
//! For a database named `N` there is a one-byte file `<shm dir>/N`.  The
//! writer service flips the byte to 0xff whenever it replaces the database
//! file; readers keep the byte mapped and treat a non-zero value as "your
//! mapping is stale, reopen".
//!
//! Open failures (missing directory that cannot be created, disk full, a
//! non-regular path component) leave the caller with no mapping, which is
//! treated as permanently flagged: the reader will reopen on every refresh
//! rather than risk serving stale data.


use std::fs;
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::Path;

use memmap2::Mmap;
use tracing::debug;
use tracing::error;

/// A mapped invalidation flag.  The mapping never moves for the lifetime of
/// this value.
#[derive(Debug)]
pub struct ShmFlag {
    map: Mmap,
}

impl ShmFlag {
    /// Opens (creating as needed) the flag file for `name` and maps it.
    ///
    /// Returns `None` when the file cannot be created or mapped; the
    /// condition is logged and the caller should behave as if the flag were
    /// permanently set.
    pub fn open(
        shm_dir: &Path,
        name: &str,
    ) -> Option<ShmFlag> {
        if let Err(e) = fs::create_dir_all(shm_dir) {
            error!(?e, dir = ?shm_dir, "unable to create shm directory");
            return None;
        }

        let path = shm_dir.join(name);

        let file = match OpenOptions::new().read(true).write(true).create(true).open(&path) {
            Ok(file) => file,
            Err(e) => {
                error!(?e, ?path, "unable to open shm file");
                return None;
            }
        };

        // A fresh file is zero-length; grow it to its one unflagged byte.
        match file.metadata() {
            Ok(meta) if meta.len() == 0 => {
                if let Err(e) = file.set_len(1) {
                    error!(?e, ?path, "unable to initialise shm file");
                    return None;
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!(?e, ?path, "unable to stat shm file");
                return None;
            }
        }

        let map = match unsafe { memmap2::MmapOptions::new().len(1).map(&file) } {
            Ok(map) => map,
            Err(e) => {
                error!(?e, ?path, "unable to map shm file");
                return None;
            }
        };

        debug!(name, "opened shm flag");

        Some(ShmFlag { map })
    }

    /// Whether the writer has invalidated the mapped database.
    pub fn is_flagged(&self) -> bool {
        self.map[0] != 0
    }
}

/// Marks the database `name` as invalidated.  Idempotent; used by the
/// writer side and by tests.
///
/// The flagged file is unlinked afterwards: existing mappings keep seeing
/// the flag, while the next [`ShmFlag::open`] creates a fresh, clean byte.
pub fn flag(
    shm_dir: &Path,
    name: &str,
) {
    let path = shm_dir.join(name);

    match OpenOptions::new().write(true).open(&path) {
        Ok(file) => {
            if let Err(e) = file.write_at(&[0xff], 0) {
                error!(?e, ?path, "unable to flag shm file");
            }

            let _ = fs::remove_file(&path);
        }
        Err(e) => {
            debug!(?e, ?path, "no shm file to flag");
        }
    }
}
