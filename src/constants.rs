//! Well-known bus coordinates and filesystem roots.

/// Bus name owned by the writer service.
pub const WRITER_BUS_NAME: &str = "org.confstack";

/// Interface carrying the `Change`/`Init` methods and the `Notify` /
/// `WritabilityNotify` signals.
pub const WRITER_INTERFACE: &str = "org.confstack.Writer";

/// Per-database writer object paths hang off this prefix.
pub const WRITER_OBJECT_PREFIX: &str = "/org/confstack/Writer/";

/// Bus name owned by the proxy for confined applications.
pub const PROXY_BUS_NAME: &str = "org.confstack.Proxy";

pub const PROXY_INTERFACE: &str = "org.confstack.Proxy";

pub const PROXY_OBJECT_PREFIX: &str = "/org/confstack/Proxy/";

/// The bus daemon itself, for match-rule management.
pub const BUS_DAEMON_NAME: &str = "org.freedesktop.DBus";
pub const BUS_DAEMON_PATH: &str = "/org/freedesktop/DBus";
pub const BUS_DAEMON_INTERFACE: &str = "org.freedesktop.DBus";

/// Environment variable naming the profile to load.
pub const PROFILE_ENV_VAR: &str = "CONFSTACK_PROFILE";

/// Mandatory per-uid profile files live here, named by uid.
pub const MANDATORY_PROFILE_DIR: &str = "/run/confstack/user";

/// System configuration root.
pub const SYSCONF_DIR: &str = "/etc";
