//! Profile resolution and parsing.
//!
//! A profile is an ordered list of sources, computed exactly once at engine
//! construction.  The outcome is never an abort: every failure mode maps to
//! either the null profile (zero sources) or the built-in default of a
//! single user source.
//!
//! Selection precedence:
//!
//! 1. an explicit selector passed by the caller
//! 2. the mandatory per-uid file under the system runtime dir
//! 3. the `CONFSTACK_PROFILE` environment selector
//! 4. the per-user runtime profile
//! 5. a profile named `user` under the sysconf/data search dirs
//! 6. the built-in default
//!
//! A selector without a leading slash is resolved against the sysconf
//! profile dir first, then each data dir.  A selector that was obtained but
//! whose file cannot be opened yields the null profile with one warning; a
//! missing implicit profile silently falls through.

#[cfg(test)]
mod profile_test;

use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use tracing::warn;

use crate::dirs::Dirs;
use crate::source::Source;

/// Computes the ordered source list for `selector`.
pub fn open_profile(
    selector: Option<&str>,
    dirs: &Dirs,
) -> Vec<Source> {
    let mut selector = selector.map(str::to_owned);
    let mut file: Option<File> = None;

    // We proceed until we have either a profile name or an open profile
    // file, never both.  Once we have a name we stick with it, even if the
    // file turns out to be missing.

    if selector.is_none() {
        file = open_quietly(&dirs.mandatory_profile_path());
    }

    if selector.is_none() && file.is_none() {
        selector = dirs.profile_env.clone();
    }

    if selector.is_none() && file.is_none() {
        file = open_quietly(&dirs.runtime_profile_path());
    }

    if selector.is_none() && file.is_none() {
        file = open_search(dirs, "user");
    }

    if selector.is_none() && file.is_none() {
        return default_profile(dirs);
    }

    if let Some(name) = &selector {
        file = if name.starts_with('/') {
            open_quietly(Path::new(name))
        } else {
            open_search(dirs, name)
        };

        if file.is_none() {
            warn!(profile = %name, "unable to open named profile: using the null configuration");
            return Vec::new();
        }
    }

    match file {
        Some(file) => parse_profile(file, dirs),
        None => Vec::new(),
    }
}

/// The built-in fallback: a single writable user source.
fn default_profile(dirs: &Dirs) -> Vec<Source> {
    vec![Source::new_user("user", dirs)]
}

fn open_quietly(path: &Path) -> Option<File> {
    File::open(path).ok()
}

/// Resolves a bare selector against the search directories.
///
/// Only a missing file falls through to the next candidate; any other
/// error stops the search with a warning.
fn open_search(
    dirs: &Dirs,
    selector: &str,
) -> Option<File> {
    for candidate in dirs.profile_search_paths(selector) {
        match File::open(&candidate) {
            Ok(file) => return Some(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(path = ?candidate, ?e, "unable to open profile file");
                return None;
            }
        }
    }

    None
}

fn parse_profile(
    file: File,
    dirs: &Dirs,
) -> Vec<Source> {
    let mut sources = Vec::new();

    for line in BufReader::new(file).lines() {
        let Ok(line) = line else {
            break;
        };

        if let Some(source) = parse_line(&line, dirs) {
            sources.push(source);
        }
    }

    // Only the first source of a profile may ever be written through.
    for source in sources.iter_mut().skip(1) {
        source.make_read_only();
    }

    sources
}

/// Parses one profile line into a source description, or `None` for
/// comments and empty lines.
fn parse_line(
    line: &str,
    dirs: &Dirs,
) -> Option<Source> {
    let line = match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    };

    let line = line.trim();

    if line.is_empty() {
        return None;
    }

    let source = Source::from_description(line, dirs);

    if source.is_none() {
        warn!(line, "unknown database description");
    }

    source
}
