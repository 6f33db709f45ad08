//! Total validation predicates for configuration paths.
//!
//! A path is an absolute UTF-8 string beginning with `/` and containing no
//! `//`.  A key does not end with `/`; a dir does.  A relative path is the
//! portion after a dir: non-empty, no leading `/`, no `//`.

use crate::errors::PathError;

fn check_common(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }

    if !path.starts_with('/') {
        return Err(PathError::NoLeadingSlash(path.to_owned()));
    }

    if path.contains("//") {
        return Err(PathError::DoubleSlash(path.to_owned()));
    }

    Ok(())
}

/// Checks that `path` is a well-formed path (key or dir).
pub fn check_path(path: &str) -> Result<(), PathError> {
    check_common(path)
}

/// Checks that `path` is a well-formed key (no trailing slash).
pub fn check_key(path: &str) -> Result<(), PathError> {
    check_common(path)?;

    if path.ends_with('/') {
        return Err(PathError::ExpectedKey(path.to_owned()));
    }

    Ok(())
}

/// Checks that `path` is a well-formed dir (trailing slash).
pub fn check_dir(path: &str) -> Result<(), PathError> {
    check_common(path)?;

    if !path.ends_with('/') {
        return Err(PathError::ExpectedDir(path.to_owned()));
    }

    Ok(())
}

/// Checks that `path` is a well-formed relative path.
pub fn check_rel_path(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }

    if path.starts_with('/') {
        return Err(PathError::RelativeLeadingSlash(path.to_owned()));
    }

    if path.contains("//") {
        return Err(PathError::DoubleSlash(path.to_owned()));
    }

    Ok(())
}

pub fn is_path(path: &str) -> bool {
    check_path(path).is_ok()
}

pub fn is_key(path: &str) -> bool {
    check_key(path).is_ok()
}

pub fn is_dir(path: &str) -> bool {
    check_dir(path).is_ok()
}

pub fn is_rel_path(path: &str) -> bool {
    check_rel_path(path).is_ok()
}
