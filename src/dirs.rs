//! Filesystem roots used by sources, profiles and the shm flag layer.
//!
//! Every directory the engine touches is resolved exactly once, at engine
//! construction, into a [`Dirs`] value.  Nothing below this module reads the
//! process environment, which keeps the source and profile layers fully
//! testable against temporary directories.

use std::env;
use std::path::Path;
use std::path::PathBuf;

use crate::constants::MANDATORY_PROFILE_DIR;
use crate::constants::PROFILE_ENV_VAR;
use crate::constants::SYSCONF_DIR;

#[derive(Debug, Clone)]
pub struct Dirs {
    /// System configuration root (normally `/etc`).
    pub sysconf_dir: PathBuf,
    /// User configuration root (`$XDG_CONFIG_HOME` or `~/.config`).
    pub config_home: PathBuf,
    /// User runtime root (`$XDG_RUNTIME_DIR`, falling back to `~/.cache`).
    pub runtime_dir: PathBuf,
    /// Data directory search path (`$XDG_DATA_DIRS`).
    pub data_dirs: Vec<PathBuf>,
    /// Directory holding mandatory per-uid profile files.
    pub mandatory_profile_dir: PathBuf,
    /// Profile selector from the environment, if any.
    pub profile_env: Option<String>,
    /// Current uid, used to locate the mandatory profile.
    pub uid: u32,
}

impl Dirs {
    /// Resolves every root from the real process environment.
    pub fn from_env() -> Self {
        let home = env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/"));

        let config_home = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".config"));

        let runtime_dir = env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".cache"));

        let data_dirs = env::var("XDG_DATA_DIRS")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| String::from("/usr/local/share:/usr/share"))
            .split(':')
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect();

        Self {
            sysconf_dir: PathBuf::from(SYSCONF_DIR),
            config_home,
            runtime_dir,
            data_dirs,
            mandatory_profile_dir: PathBuf::from(MANDATORY_PROFILE_DIR),
            profile_env: env::var(PROFILE_ENV_VAR).ok(),
            uid: unsafe { libc::getuid() },
        }
    }

    /// Builds a set of roots entirely beneath `base`, for tests.
    pub fn under(base: &Path) -> Self {
        Self {
            sysconf_dir: base.join("etc"),
            config_home: base.join("config"),
            runtime_dir: base.join("runtime"),
            data_dirs: vec![base.join("share")],
            mandatory_profile_dir: base.join("run/user"),
            profile_env: None,
            uid: unsafe { libc::getuid() },
        }
    }

    pub fn user_db_path(
        &self,
        name: &str,
    ) -> PathBuf {
        self.config_home.join("confstack").join(name)
    }

    pub fn system_db_path(
        &self,
        name: &str,
    ) -> PathBuf {
        self.sysconf_dir.join("confstack/db").join(name)
    }

    pub fn service_db_path(
        &self,
        name: &str,
    ) -> PathBuf {
        self.runtime_dir.join("confstack-service").join(name)
    }

    pub fn proxied_db_path(
        &self,
        app_id: &str,
    ) -> PathBuf {
        self.runtime_dir.join("confstack/app").join(app_id)
    }

    /// Directory holding the one-byte invalidation flag files.
    pub fn shm_dir(&self) -> PathBuf {
        self.runtime_dir.join("confstack")
    }

    pub fn runtime_profile_path(&self) -> PathBuf {
        self.runtime_dir.join("confstack/profile")
    }

    pub fn mandatory_profile_path(&self) -> PathBuf {
        self.mandatory_profile_dir.join(self.uid.to_string())
    }

    /// Search locations for a profile selector without a leading slash: the
    /// sysconf profile dir first, then each data dir in order.
    pub fn profile_search_paths(
        &self,
        selector: &str,
    ) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(1 + self.data_dirs.len());
        paths.push(self.sysconf_dir.join("confstack/profile").join(selector));
        for dir in &self.data_dirs {
            paths.push(dir.join("confstack/profile").join(selector));
        }
        paths
    }
}
