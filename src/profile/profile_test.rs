use tempfile::TempDir;

use crate::dirs::Dirs;
use crate::profile::open_profile;
use crate::test_utils::enable_logger;
use crate::test_utils::explicit_profile;
use crate::test_utils::write_profile;

fn setup() -> (TempDir, Dirs) {
    enable_logger();
    let tmp = TempDir::new().unwrap();
    let dirs = Dirs::under(tmp.path());
    (tmp, dirs)
}

#[test]
fn test_explicit_profile_parses_in_file_order() {
    let (tmp, dirs) = setup();
    let selector = explicit_profile(tmp.path(), "user-db:user\nsystem-db:site\nsystem-db:global\n");

    let sources = open_profile(Some(&selector), &dirs);

    assert_eq!(sources.len(), 3);
    assert_eq!(sources[0].name(), "user");
    assert_eq!(sources[1].name(), "site");
    assert_eq!(sources[2].name(), "global");
}

#[test]
fn test_comments_and_blank_lines_are_ignored() {
    let (tmp, dirs) = setup();
    let selector = explicit_profile(
        tmp.path(),
        "# the user database\n\n   user-db:user   # trailing comment\n\t\nsystem-db:site\n",
    );

    let sources = open_profile(Some(&selector), &dirs);

    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].name(), "user");
    assert_eq!(sources[1].name(), "site");
}

#[test]
fn test_unknown_kinds_are_skipped() {
    let (tmp, dirs) = setup();
    let selector = explicit_profile(tmp.path(), "nosuch-db:thing\nuser-db:user\n");

    let sources = open_profile(Some(&selector), &dirs);

    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].name(), "user");
}

#[test]
fn test_missing_explicit_profile_is_null() {
    let (tmp, dirs) = setup();
    let selector = tmp.path().join("does-not-exist").display().to_string();

    assert!(open_profile(Some(&selector), &dirs).is_empty());
}

#[test]
fn test_nothing_at_all_gives_default_profile() {
    let (_tmp, dirs) = setup();

    let sources = open_profile(None, &dirs);

    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].name(), "user");
    assert_eq!(sources[0].kind_name(), "user");
    assert!(sources[0].writable());
}

#[test]
fn test_bare_selector_searches_sysconf_then_data_dirs() {
    let (_tmp, dirs) = setup();

    write_profile(&dirs.data_dirs[0].join("confstack/profile/roaming"), "system-db:fallback\n");
    assert_eq!(open_profile(Some("roaming"), &dirs)[0].name(), "fallback");

    // The sysconf copy takes precedence once it exists.
    write_profile(&dirs.sysconf_dir.join("confstack/profile/roaming"), "system-db:primary\n");
    assert_eq!(open_profile(Some("roaming"), &dirs)[0].name(), "primary");
}

#[test]
fn test_mandatory_profile_wins_over_everything_implicit() {
    let (_tmp, mut dirs) = setup();

    dirs.profile_env = Some("from-env".to_owned());
    write_profile(&dirs.sysconf_dir.join("confstack/profile/from-env"), "system-db:env\n");
    write_profile(&dirs.mandatory_profile_path(), "system-db:mandated\n");

    let sources = open_profile(None, &dirs);
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].name(), "mandated");
}

#[test]
fn test_environment_selector() {
    let (_tmp, mut dirs) = setup();

    dirs.profile_env = Some("from-env".to_owned());
    write_profile(&dirs.sysconf_dir.join("confstack/profile/from-env"), "system-db:env\n");

    let sources = open_profile(None, &dirs);
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].name(), "env");
}

#[test]
fn test_environment_selector_sticks_even_when_missing() {
    let (_tmp, mut dirs) = setup();

    // A named-but-missing profile must not fall back to "user" or to the
    // default profile.
    dirs.profile_env = Some("ghost".to_owned());
    write_profile(&dirs.sysconf_dir.join("confstack/profile/user"), "user-db:user\n");

    assert!(open_profile(None, &dirs).is_empty());
}

#[test]
fn test_runtime_profile_precedes_user_profile() {
    let (_tmp, dirs) = setup();

    write_profile(&dirs.sysconf_dir.join("confstack/profile/user"), "user-db:user\n");
    write_profile(&dirs.runtime_profile_path(), "system-db:runtime\n");

    let sources = open_profile(None, &dirs);
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].name(), "runtime");
}

#[test]
fn test_user_profile_found_by_search() {
    let (_tmp, dirs) = setup();

    write_profile(&dirs.sysconf_dir.join("confstack/profile/user"), "user-db:mine\nsystem-db:site\n");

    let sources = open_profile(None, &dirs);
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].name(), "mine");
}

#[test]
fn test_only_first_source_may_be_writable() {
    let (tmp, dirs) = setup();
    let selector = explicit_profile(tmp.path(), "user-db:user\nservice-db:shm\nuser-db:other\n");

    let sources = open_profile(Some(&selector), &dirs);

    assert!(sources[0].writable());
    assert!(!sources[1].writable());
    assert!(!sources[2].writable());
}

#[test]
fn test_system_first_profile_is_read_only() {
    let (tmp, dirs) = setup();
    let selector = explicit_profile(tmp.path(), "system-db:site\nuser-db:user\n");

    let sources = open_profile(Some(&selector), &dirs);

    assert!(!sources[0].writable());
    assert!(!sources[1].writable());
}
