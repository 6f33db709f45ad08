use tempfile::TempDir;

use crate::dirs::Dirs;
use crate::shm;
use crate::source::Source;
use crate::test_utils::enable_logger;
use crate::test_utils::remove_database;
use crate::test_utils::write_database;
use crate::test_utils::MockBus;
use crate::transport::CallArgs;
use crate::value::Value;

fn setup() -> (TempDir, Dirs, MockBus) {
    enable_logger();
    let tmp = TempDir::new().unwrap();
    let dirs = Dirs::under(tmp.path());
    (tmp, dirs, MockBus::new())
}

#[test]
fn test_descriptions() {
    let (_tmp, dirs, _bus) = setup();

    let user = Source::from_description("user-db:user", &dirs).unwrap();
    assert_eq!(user.kind_name(), "user");
    assert!(user.writable());
    assert!(user.bus_address().is_some());

    let system = Source::from_description("system-db:site", &dirs).unwrap();
    assert_eq!(system.kind_name(), "system");
    assert!(!system.writable());
    assert!(system.bus_address().is_none());

    let file = Source::from_description("file-db:/path/to/db", &dirs).unwrap();
    assert_eq!(file.kind_name(), "file");
    assert!(!file.writable());

    let service = Source::from_description("service-db:shm", &dirs).unwrap();
    assert_eq!(service.kind_name(), "service");
    assert!(service.writable());

    let proxied = Source::from_description("proxied-db:org.example.App", &dirs).unwrap();
    assert_eq!(proxied.kind_name(), "proxied");

    assert!(Source::from_description("strange-db:what", &dirs).is_none());
    assert!(Source::from_description("user", &dirs).is_none());
}

#[test]
fn test_user_source_follows_shm_flag() {
    let (_tmp, dirs, bus) = setup();
    let mut source = Source::from_description("user-db:user", &dirs).unwrap();

    // First refresh opens the flag byte; there is no database file, and
    // nothing-to-nothing is not a change.
    assert!(!source.refresh(&bus));
    assert!(source.values().is_none());

    // Unflagged: no reopen, even though a database has appeared.
    write_database(&dirs.user_db_path("user"), &[("/values/int32", Value::Int32(123456))], &[]);
    assert!(!source.refresh(&bus));
    assert!(source.values().is_none());

    // Flagging triggers the reopen.
    shm::flag(&dirs.shm_dir(), "user");
    assert!(source.refresh(&bus));
    assert!(source.values().unwrap().has("/values/int32"));
    assert!(source.locks().is_none());

    // Steady state again.
    assert!(!source.refresh(&bus));

    // Removing the database behind a flag empties the source.
    remove_database(&dirs.user_db_path("user"));
    shm::flag(&dirs.shm_dir(), "user");
    assert!(source.refresh(&bus));
    assert!(source.values().is_none());
}

#[test]
fn test_user_source_picks_up_locks() {
    let (_tmp, dirs, bus) = setup();
    let mut source = Source::from_description("user-db:user", &dirs).unwrap();

    write_database(
        &dirs.user_db_path("user"),
        &[("/values/int32", Value::Int32(1))],
        &["/values/int32"],
    );
    shm::flag(&dirs.shm_dir(), "user");

    assert!(source.refresh(&bus));
    assert!(source.locks().unwrap().has("/values/int32"));
}

#[test]
fn test_file_source_opens_exactly_once() {
    let (tmp, dirs, bus) = setup();
    let db_path = tmp.path().join("file.db");

    // Missing on the first (and only) open attempt: degraded forever.
    let description = format!("file-db:{}", db_path.display());
    let mut source = Source::from_description(&description, &dirs).unwrap();
    assert!(!source.refresh(&bus));
    assert!(source.values().is_none());

    write_database(&db_path, &[("/value", Value::Text("first file".into()))], &[]);
    assert!(!source.refresh(&bus));
    assert!(source.values().is_none());

    // A fresh source sees the file, and then never lets go of it.
    let mut source = Source::from_description(&description, &dirs).unwrap();
    assert!(source.refresh(&bus));
    assert_eq!(source.values().unwrap().get("/value"), Some(&Value::Text("first file".into())));

    write_database(&db_path, &[("/value", Value::Text("second file".into()))], &[]);
    assert!(!source.refresh(&bus));
    assert_eq!(source.values().unwrap().get("/value"), Some(&Value::Text("first file".into())));
}

#[test]
fn test_system_source_reopens_on_identity_change() {
    let (_tmp, dirs, bus) = setup();
    let mut source = Source::from_description("system-db:site", &dirs).unwrap();

    // Missing file: no change, retried every refresh.
    assert!(!source.refresh(&bus));
    assert!(!source.refresh(&bus));
    assert!(source.values().is_none());

    // Created after the fact.
    write_database(&dirs.system_db_path("site"), &[("/value", Value::UInt32(0))], &[]);
    assert!(source.refresh(&bus));
    assert!(source.values().unwrap().has("/value"));

    // Identity unchanged: nothing happens.
    assert!(!source.refresh(&bus));

    // Replaced on disk: reopened.
    remove_database(&dirs.system_db_path("site"));
    write_database(&dirs.system_db_path("site"), &[("/value", Value::UInt32(1))], &[]);
    assert!(source.refresh(&bus));
    assert_eq!(source.values().unwrap().get("/value"), Some(&Value::UInt32(1)));

    // Removed entirely: the source empties out.
    remove_database(&dirs.system_db_path("site"));
    assert!(source.refresh(&bus));
    assert!(source.values().is_none());
}

#[test]
fn test_service_source_requests_init_once() {
    let (_tmp, dirs, bus) = setup();
    let mut source = Source::from_description("service-db:shm", &dirs).unwrap();

    // The file is missing, so the writer is kicked... but it does not
    // oblige.  The request happens only once.
    assert!(!source.refresh(&bus));
    assert!(!source.refresh(&bus));

    let init_calls = bus.take_sync_calls();
    assert_eq!(init_calls.len(), 1);
    assert_eq!(init_calls[0].method, "Init");
    assert_eq!(init_calls[0].args, CallArgs::None);
    assert_eq!(init_calls[0].object_path, "/org/confstack/Writer/shm");

    // Once the writer materialises the file, the source picks it up with
    // no further Init traffic.
    write_database(&dirs.service_db_path("shm"), &[("/values/int32", Value::Int32(123456))], &[]);
    assert!(source.refresh(&bus));
    assert!(source.values().unwrap().has("/values/int32"));
    assert!(bus.take_sync_calls().is_empty());
}

#[test]
fn test_proxied_source_uses_proxy_coordinates() {
    let (_tmp, dirs, bus) = setup();
    let mut source = Source::from_description("proxied-db:org.example.App", &dirs).unwrap();

    let address = source.bus_address().unwrap();
    assert_eq!(address.name, "org.confstack.Proxy");
    assert_eq!(address.object_path, "/org/confstack/Proxy/org.example.App");

    assert!(!source.refresh(&bus));
    let init_calls = bus.take_sync_calls();
    assert_eq!(init_calls.len(), 1);
    assert_eq!(init_calls[0].destination, "org.confstack.Proxy");
    assert_eq!(init_calls[0].interface, "org.confstack.Proxy");
}
