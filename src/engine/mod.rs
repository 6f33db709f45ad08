//! The configuration engine.
//!
//! An engine owns zero or more sources.  With zero sources nothing is
//! writable, nothing will ever be written, and reads always return `None`.
//! Otherwise writing only ever happens through the first source, and only
//! if the profile made it writable; non-first sources are read-only.
//!
//! Changes can be requested two ways:
//!
//! - **sync**: the `Change` call is sent to the writer and we block until
//!   the reply arrives.  The change signal follows via the bus.
//! - **fast**: the value is recorded locally and the change notification
//!   fires immediately, as if the value were already in the database.  The
//!   local shadow is kept until the writer confirms the write.  If the
//!   write fails, a second notification fires: to the program it looks
//!   like the value changed and then quickly changed back.
//!
//! In fast mode, putting every request on the wire at once would keep the
//! writer busy rewriting the database after a burst of changes, so at most
//! one request is in flight per engine.  While one is outstanding,
//! subsequent changes merge into a single pending delta that is promoted
//! when the in-flight reply arrives.
//!
//! # Threading
//!
//! The engine owns no thread and schedules no timers.  Calls into the
//! consumer happen on whatever thread triggered them: caller threads for
//! the synchronous paths, the transport's threads for replies and signals.
//! Every operation may be invoked concurrently from any thread.
//!
//! Three locks provide that safety.  The sources lock guards the source
//! stack across refreshes and is held for the duration of every read.  The
//! queue lock guards the pending and in-flight deltas, the last-handled
//! tag and the queue condition variable.  The subscription lock guards the
//! two subscription count maps.  When the sources lock and the queue lock
//! are held together, the sources lock is taken first; the subscription
//! lock is never held together with either.  No lock is ever held across
//! the consumer notification callback, which is allowed to re-enter the
//! engine.


use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::Weak;

use lazy_static::lazy_static;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::changeset::Changeset;
use crate::constants::BUS_DAEMON_INTERFACE;
use crate::constants::BUS_DAEMON_NAME;
use crate::constants::BUS_DAEMON_PATH;
use crate::constants::WRITER_INTERFACE;
use crate::dirs::Dirs;
use crate::errors::Error;
use crate::errors::Result;
use crate::errors::TransportError;
use crate::paths;
use crate::profile;
use crate::source::BusAddress;
use crate::source::Source;
use crate::source::SourceAddress;
use crate::transport::Bus;
use crate::transport::BusId;
use crate::transport::CallArgs;
use crate::transport::MethodCall;
use crate::value::Value;

lazy_static! {
    /// Process-wide engine registry used by the signal dispatcher.  Holds
    /// weak entries: a dying engine becomes unreachable here before its
    /// teardown proceeds, and the signal path treats a dead entry as a
    /// silent drop.
    static ref ENGINE_REGISTRY: Mutex<Vec<Weak<EngineInner>>> = Mutex::new(Vec::new());
}

/// Receives change notifications.
///
/// Invoked synchronously on whatever thread triggered the notification
/// with no engine lock held; implementations may re-enter the engine.  For
/// a change to a single key, `prefix` is that key and `changes` is
/// `[""]`; for broader changes each entry of `changes` is relative to
/// `prefix`.  `tag` carries the writer's tag for authoritative signals and
/// is absent for locally-synthesised ones.  `origin_tag` echoes the token
/// the caller gave to [`Engine::change_fast`], letting a consumer filter
/// its own writes.
pub trait ChangeHandler: Send + Sync {
    fn change_notify(
        &self,
        prefix: &str,
        changes: &[String],
        tag: Option<&str>,
        is_writability: bool,
        origin_tag: Option<u64>,
    );
}

impl<T: ChangeHandler + ?Sized> ChangeHandler for Arc<T> {
    fn change_notify(
        &self,
        prefix: &str,
        changes: &[String],
        tag: Option<&str>,
        is_writability: bool,
        origin_tag: Option<u64>,
    ) {
        (**self).change_notify(prefix, changes, tag, is_writability, origin_tag);
    }
}

/// How [`Engine::read_full`] treats the writable layer and locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadFlags {
    /// The value an application sees: locks honoured, shadow queues
    /// consulted.
    #[default]
    Normal,
    /// The value the user would see after resetting the key.
    DefaultValue,
    /// The user's own value even when a lock hides it.  Ignores locks.
    UserValue,
}

struct SourceSet {
    sources: Vec<Source>,
    /// Bumped once for every source observed to have changed on refresh.
    state: u64,
}

#[derive(Default)]
struct WriteQueue {
    /// Yet to be sent on the wire.  Kept unsealed so later fast changes
    /// can merge in.
    pending: Option<Changeset>,
    /// Sent, awaiting the writer's reply.
    in_flight: Option<Changeset>,
    /// Reply tag of the last handled in-flight change, for echo
    /// suppression.
    last_handled: Option<String>,
}

#[derive(Default)]
struct SubscriptionBook {
    /// Requested on the client side, awaiting match-rule confirmation.
    establishing: HashMap<String, u32>,
    /// Confirmed: a match rule is installed on the bus.
    active: HashMap<String, u32>,
}

struct EngineInner {
    bus: Arc<dyn Bus>,
    handler: Box<dyn ChangeHandler>,
    /// Static copies of each source's bus coordinates and writability, so
    /// match rules and writer calls need no lock.
    addresses: Vec<SourceAddress>,
    sources: Mutex<SourceSet>,
    queue: Mutex<WriteQueue>,
    queue_cond: Condvar,
    subscriptions: Mutex<SubscriptionBook>,
}

/// A handle to a configuration engine.  Cheap to clone; all clones share
/// the same engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let me: *const EngineInner = self;
        let mut registry = ENGINE_REGISTRY.lock().unwrap();
        registry.retain(|weak| !std::ptr::eq(weak.as_ptr(), me));
    }
}

impl Engine {
    /// Creates an engine for `profile` (or the implicit profile when
    /// `None`), resolving directories from the environment.
    pub fn new(
        profile: Option<&str>,
        bus: Arc<dyn Bus>,
        handler: Box<dyn ChangeHandler>,
    ) -> Engine {
        Self::with_dirs(profile, Dirs::from_env(), bus, handler)
    }

    /// Like [`Engine::new`] with explicit directory roots.
    pub fn with_dirs(
        profile: Option<&str>,
        dirs: Dirs,
        bus: Arc<dyn Bus>,
        handler: Box<dyn ChangeHandler>,
    ) -> Engine {
        let sources = profile::open_profile(profile, &dirs);
        let addresses = sources.iter().map(Source::address).collect();

        let inner = Arc::new(EngineInner {
            bus,
            handler,
            addresses,
            sources: Mutex::new(SourceSet { sources, state: 0 }),
            queue: Mutex::new(WriteQueue::default()),
            queue_cond: Condvar::new(),
            subscriptions: Mutex::new(SubscriptionBook::default()),
        });

        ENGINE_REGISTRY.lock().unwrap().push(Arc::downgrade(&inner));

        Engine { inner }
    }

    /// The current state token.  It increases whenever any source's
    /// backing database identity changes, letting consumers detect races
    /// between subscription establishment and database mutation.
    pub fn state(&self) -> u64 {
        self.inner.acquire_sources().state
    }

    /// Reads the effective value at `key`.
    pub fn read(
        &self,
        key: &str,
    ) -> Option<Value> {
        self.read_full(key, ReadFlags::Normal, &[])
    }

    /// Reads `key` with explicit flags and an ordered queue of
    /// read-through deltas (consulted newest-last, like the write queue).
    pub fn read_full(
        &self,
        key: &str,
        flags: ReadFlags,
        read_through: &[Changeset],
    ) -> Option<Value> {
        if let Err(e) = paths::check_key(key) {
            warn!(%e, "read of invalid key");
            return None;
        }

        let set = self.inner.acquire_sources();
        let sources = &set.sources;

        let mut value: Option<Value> = None;
        let mut lock_level = 0;

        // Step 1: find the deepest lock.  Locks in source 0 are ignored:
        // either it is writable and ignoring them is right, or it is not
        // and no write will happen anyway.
        if flags != ReadFlags::UserValue {
            for (i, source) in sources.iter().enumerate().skip(1).rev() {
                if source.locks().is_some_and(|locks| locks.has(key)) {
                    lock_level = i;
                    break;
                }
            }
        }

        // Steps 2 to 4 apply only with no lock and a writable first
        // source: the shadow queues never mask a locked value.
        if lock_level == 0 && !sources.is_empty() && sources[0].writable() {
            let mut found = flags == ReadFlags::DefaultValue;

            // Step 2: uncommitted read-through entries, newest first.
            if !found {
                for changeset in read_through.iter().rev() {
                    if let Some(entry) = changeset.get(key) {
                        found = true;
                        value = entry.cloned();
                        break;
                    }
                }
            }

            // Step 3: the pending then the in-flight delta.
            if !found {
                let queue = self.inner.queue.lock().unwrap();

                for shadow in [&queue.pending, &queue.in_flight].into_iter().flatten() {
                    if let Some(entry) = shadow.get(key) {
                        found = true;
                        value = entry.cloned();
                        break;
                    }
                }
            }

            // Step 4: the first source itself.
            if !found {
                value = sources[0].values().and_then(|db| db.get(key).cloned());
            }

            // Source 0 has been dealt with either way; a found reset must
            // still fall through to the deeper sources.
            lock_level = 1;
        }

        // Step 5: remaining sources, until a value appears.
        if flags != ReadFlags::UserValue {
            for source in sources.iter().skip(lock_level) {
                if value.is_some() {
                    break;
                }
                value = source.values().and_then(|db| db.get(key).cloned());
            }
        }

        value
    }

    /// Lists the names immediately below `dir`, unioned over every source.
    ///
    /// Pending and in-flight changes are deliberately ignored: whether a
    /// queued reset removes a subdir depends on keys this engine cannot
    /// see, so the answer reflects the on-disk state only.
    pub fn list(
        &self,
        dir: &str,
    ) -> Vec<String> {
        if let Err(e) = paths::check_dir(dir) {
            warn!(%e, "list of invalid dir");
            return Vec::new();
        }

        let set = self.inner.acquire_sources();
        let mut names = BTreeSet::new();

        for source in &set.sources {
            if let Some(database) = source.values() {
                names.extend(database.list(dir));
            }
        }

        names.into_iter().collect()
    }

    /// Lists every locked key under `dir`.  When the profile has no
    /// writable first source the whole dir is read-only and `[dir]` itself
    /// is returned.
    pub fn list_locks(
        &self,
        path: &str,
    ) -> Vec<String> {
        if paths::is_dir(path) {
            let set = self.inner.acquire_sources();

            if !set.sources.is_empty() && set.sources[0].writable() {
                let mut found = BTreeSet::new();

                // Dirs cannot be locked, so a prefix check on lock names
                // is the whole story.
                for source in set.sources.iter().skip(1) {
                    if let Some(locks) = source.locks() {
                        for name in locks.names() {
                            if name.starts_with(path) {
                                found.insert(name.to_owned());
                            }
                        }
                    }
                }

                found.into_iter().collect()
            } else {
                vec![path.to_owned()]
            }
        } else if self.is_writable(path) {
            Vec::new()
        } else {
            vec![path.to_owned()]
        }
    }

    /// Whether a write to `key` could currently succeed.
    pub fn is_writable(
        &self,
        key: &str,
    ) -> bool {
        let set = self.inner.acquire_sources();
        is_writable_internal(&set, key)
    }

    /// Queues a change and returns immediately.
    ///
    /// The delta is sealed, validated against locks (resets are always
    /// allowed), merged into the pending slot and promoted onto the wire
    /// if nothing is in flight.  A notification synthesised from the delta
    /// fires unless every entry is redundant against the current effective
    /// state; `origin_tag` is echoed in it so the caller can recognise its
    /// own writes.
    pub fn change_fast(
        &self,
        mut changeset: Changeset,
        origin_tag: Option<u64>,
    ) -> Result<()> {
        debug!("change_fast");

        if changeset.is_empty() {
            return Ok(());
        }

        let has_effect = {
            let effective = self.inner.effective_database();
            Changeset::filter_changes(&effective, &changeset).is_some()
        };

        self.inner.check_only_writable_keys(&changeset)?;

        changeset.seal();

        {
            let mut queue = self.inner.queue.lock().unwrap();

            // The pending slot stays unsealed so that later calls can
            // merge into it; the incoming changeset is not reused for
            // that role.
            if queue.pending.is_none() {
                queue.pending = Some(Changeset::new());
            }

            if let Some(pending) = queue.pending.as_mut() {
                pending.change(&changeset)?;
            }

            self.manage_queue(&mut queue);
        }

        // Emitted after dropping the queue lock: the handler may re-enter.
        if has_effect {
            self.emit_changes(&changeset, origin_tag);
        }

        Ok(())
    }

    /// Sends a change to the writer and blocks for the reply, returning
    /// the writer's tag.  The queue is not involved and no local
    /// notification fires; the change is observed via the authoritative
    /// signal.
    pub fn change_sync(
        &self,
        mut changeset: Changeset,
        token: Option<&CancellationToken>,
    ) -> Result<String> {
        debug!("change_sync");

        if changeset.is_empty() {
            return Ok(String::new());
        }

        self.inner.check_only_writable_keys(&changeset)?;

        changeset.seal();

        // The writability check passed, so a writable bussed source exists.
        let Some(address) = self.inner.addresses.first().and_then(|a| a.bus.clone()) else {
            return Err(Error::NotWritable);
        };

        let reply = self
            .inner
            .bus
            .call_sync(change_call(&address, changeset.serialise()), token)
            .map_err(|e| match e {
                TransportError::Cancelled => Error::Cancelled,
                other => Error::Transport(other),
            })?;

        match reply.as_str() {
            Some(tag) => Ok(tag.to_owned()),
            None => Err(TransportError::UnexpectedReply {
                method: "Change".to_owned(),
                reply,
            }
            .into()),
        }
    }

    /// Whether a delta is still on the wire.
    pub fn has_outstanding(&self) -> bool {
        self.inner.queue.lock().unwrap().in_flight.is_some()
    }

    /// Blocks until no delta is in flight (and therefore none pending).
    pub fn sync(&self) {
        debug!("sync");

        let queue = self.inner.queue.lock().unwrap();
        let _unused = self
            .inner
            .queue_cond
            .wait_while(queue, |queue| queue.in_flight.is_some())
            .unwrap();
    }

    /// Subscribes to change notifications for `path`, returning
    /// immediately.
    ///
    /// The first subscription to a path installs one match rule per bussed
    /// source.  If any source changes while those requests are on the
    /// wire, a synthetic notification for `path` fires so the consumer
    /// re-reads whatever it may have cached.
    pub fn watch_fast(
        &self,
        path: &str,
    ) {
        if let Err(e) = paths::check_path(path) {
            warn!(%e, "watch of invalid path");
            return;
        }

        let (num_establishing, num_active);
        {
            let mut book = self.inner.subscriptions.lock().unwrap();
            num_active = count_subscriptions(&book.active, path);

            if num_active > 0 {
                increment_subscriptions(&mut book.active, path);
                num_establishing = count_subscriptions(&book.establishing, path);
            } else {
                num_establishing = increment_subscriptions(&mut book.establishing, path);
            }
        }

        debug!(path, establishing = num_establishing, active = num_active, "watch_fast");

        if num_establishing > 1 || num_active > 0 {
            return;
        }

        if self.inner.addresses.is_empty() {
            return;
        }

        let bussed: Vec<&BusAddress> = self.inner.addresses.iter().filter_map(|a| a.bus.as_ref()).collect();
        if bussed.is_empty() {
            return;
        }

        // The database could change while our match rules are on the wire,
        // after we already told the caller the watch is in place.  Record
        // the state token now; the last reply compares it again.
        let watch = Arc::new(OutstandingWatch {
            engine: self.clone(),
            path: path.to_owned(),
            state: self.state(),
            pending: AtomicUsize::new(bussed.len()),
        });

        for address in bussed {
            let watch = Arc::clone(&watch);
            self.inner.bus.call_async(
                match_rule_call(address, "AddMatch", path),
                Box::new(move |_reply| watch.completed()),
            );
        }
    }

    /// Drops one subscription to `path`.  The last drop removes the match
    /// rules.  Unsubscribing more often than subscribing is a programming
    /// error and panics.
    pub fn unwatch_fast(
        &self,
        path: &str,
    ) {
        if let Err(e) = paths::check_path(path) {
            warn!(%e, "unwatch of invalid path");
            return;
        }

        let (num_establishing, num_active);
        {
            let mut book = self.inner.subscriptions.lock().unwrap();
            let active = count_subscriptions(&book.active, path);
            let establishing = count_subscriptions(&book.establishing, path);

            assert!(active > 0 || establishing > 0, "unwatch of a path that is not watched");

            if active == 0 {
                num_establishing = decrement_subscriptions(&mut book.establishing, path);
                num_active = active;
            } else {
                num_active = decrement_subscriptions(&mut book.active, path);
                num_establishing = establishing;
            }
        }

        debug!(path, active = num_active, establishing = num_establishing, "unwatch_fast");

        if num_active > 0 || num_establishing > 0 {
            return;
        }

        for address in self.inner.addresses.iter().filter_map(|a| a.bus.as_ref()) {
            self.inner
                .bus
                .call_async(match_rule_call(address, "RemoveMatch", path), Box::new(|_reply| {}));
        }
    }

    /// Subscribes to `path`, blocking until the match rules are installed.
    /// No state-token check is needed: the synchronous calls already
    /// establish happens-before.
    pub fn watch_sync(
        &self,
        path: &str,
    ) {
        if let Err(e) = paths::check_path(path) {
            warn!(%e, "watch of invalid path");
            return;
        }

        let num_active = {
            let mut book = self.inner.subscriptions.lock().unwrap();
            increment_subscriptions(&mut book.active, path)
        };

        debug!(path, active = num_active, "watch_sync");

        if num_active == 1 {
            self.match_rule_sync("AddMatch", path);
        }
    }

    /// Drops one synchronous subscription to `path`.
    pub fn unwatch_sync(
        &self,
        path: &str,
    ) {
        if let Err(e) = paths::check_path(path) {
            warn!(%e, "unwatch of invalid path");
            return;
        }

        let num_active = {
            let mut book = self.inner.subscriptions.lock().unwrap();
            decrement_subscriptions(&mut book.active, path)
        };

        debug!(path, active = num_active, "unwatch_sync");

        if num_active == 0 {
            self.match_rule_sync("RemoveMatch", path);
        }
    }

    /// Installs or removes the match rule for `path` on every bussed
    /// source, silently ignoring all errors.  Only static source
    /// attributes are touched, so no lock is required.
    fn match_rule_sync(
        &self,
        method: &str,
        path: &str,
    ) {
        for address in self.inner.addresses.iter().filter_map(|a| a.bus.as_ref()) {
            let _ = self.inner.bus.call_sync(match_rule_call(address, method, path), None);
        }
    }

    /// Promotes the pending delta to in-flight by sending the `Change`
    /// call.  Runs whenever a new pending delta appears and whenever an
    /// in-flight reply arrives.  Called with the queue lock held.
    fn manage_queue(
        &self,
        queue: &mut WriteQueue,
    ) {
        if queue.pending.is_some() && queue.in_flight.is_none() {
            match self.inner.addresses.first().and_then(|a| a.bus.clone()) {
                Some(address) => {
                    let mut delta = match queue.pending.take() {
                        Some(delta) => delta,
                        None => return,
                    };

                    delta.seal();

                    let payload = delta.serialise();
                    queue.in_flight = Some(delta.clone());

                    let engine = self.clone();
                    self.inner.bus.call_async(
                        change_call(&address, payload),
                        Box::new(move |result| engine.change_completed(delta, result)),
                    );
                }
                None => {
                    // Only pure resets can get this far without a writable
                    // bussed source, and a reset against no database is a
                    // no-op.
                    queue.pending = None;
                }
            }
        }

        if queue.in_flight.is_none() {
            // The in-flight slot is never empty while changes are pending.
            debug_assert!(queue.pending.is_none());
            self.inner.queue_cond.notify_all();
        }
    }

    /// Handles the reply to the in-flight `Change` call.
    fn change_completed(
        &self,
        change: Changeset,
        result: std::result::Result<serde_json::Value, TransportError>,
    ) {
        let mut failure: Option<String> = None;

        {
            let mut queue = self.inner.queue.lock().unwrap();

            match result {
                Ok(reply) => match reply.as_str() {
                    // The same tag will arrive on the change signal the
                    // writer is about to emit; remember it so that signal
                    // is not delivered a second time.
                    Some(tag) => queue.last_handled = Some(tag.to_owned()),
                    None => failure = Some(format!("unexpected reply to Change: {reply}")),
                },
                Err(e) => failure = Some(e.to_string()),
            }

            let _in_flight = queue.in_flight.take();
            debug_assert!(_in_flight.is_some_and(|f| f.is_similar_to(&change)));

            // Another request could be sent now.
            self.manage_queue(&mut queue);
        }

        if let Some(message) = failure {
            // The local shadow of the change is gone; observers get one
            // more notification so they re-read and see the pre-write
            // values.
            warn!(%message, "failed to commit changes");
            self.emit_changes(&change, None);
        }
    }

    /// Synthesises one notification from a sealed delta's description.
    fn emit_changes(
        &self,
        changeset: &Changeset,
        origin_tag: Option<u64>,
    ) {
        if let Some(description) = changeset.description() {
            self.inner
                .handler
                .change_notify(&description.prefix, &description.paths, None, false, origin_tag);
        }
    }
}

impl EngineInner {
    /// Takes the sources lock, refreshing every source on the way in and
    /// bumping the state token once per observed change.
    fn acquire_sources(&self) -> MutexGuard<'_, SourceSet> {
        let mut set = self.sources.lock().unwrap();

        let mut changed = 0;
        for source in set.sources.iter_mut() {
            if source.refresh(self.bus.as_ref()) {
                changed += 1;
            }
        }
        set.state += changed;

        set
    }

    /// The current effective contents of the writable database: source 0
    /// with the in-flight then pending deltas applied.  Locks in deeper
    /// sources are not consulted; the writability check has already run by
    /// the time this matters.
    fn effective_database(&self) -> Changeset {
        let mut database = {
            let set = self.acquire_sources();

            match set.sources.first().filter(|s| s.writable()).and_then(|s| s.values()) {
                Some(db) => db.to_changeset(),
                None => Changeset::new_database(),
            }
        };

        let queue = self.queue.lock().unwrap();

        for shadow in [&queue.in_flight, &queue.pending].into_iter().flatten() {
            let _ = database.change(shadow);
        }

        database
    }

    /// Rejects a delta that touches any non-writable key.  Resets always
    /// succeed, even without a writable database.
    fn check_only_writable_keys(
        &self,
        changeset: &Changeset,
    ) -> Result<()> {
        let set = self.acquire_sources();

        if changeset.all(|path, value| value.is_none() || is_writable_internal(&set, path)) {
            Ok(())
        } else {
            Err(Error::NotWritable)
        }
    }

    /// Whether a signal on `(bus, object_path)` belongs to one of our
    /// sources.  Sender identity is deliberately not considered.
    fn is_interested(
        &self,
        bus: BusId,
        object_path: &str,
    ) -> bool {
        self.addresses
            .iter()
            .filter_map(|a| a.bus.as_ref())
            .any(|address| address.bus == bus && address.object_path == object_path)
    }
}

fn is_writable_internal(
    set: &SourceSet,
    key: &str,
) -> bool {
    if set.sources.is_empty() || !set.sources[0].writable() {
        return false;
    }

    // Locks in the first source are ignored; see read().
    !set
        .sources
        .iter()
        .skip(1)
        .any(|source| source.locks().is_some_and(|locks| locks.has(key)))
}

/// The state of one watch whose match-rule requests are on the wire.
struct OutstandingWatch {
    engine: Engine,
    path: String,
    state: u64,
    pending: AtomicUsize,
}

impl OutstandingWatch {
    fn completed(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
            // more on the way...
            return;
        }

        // Errors from AddMatch are ignored: at worst the consumer misses
        // notifications, which the fast contract allows.

        if self.state != self.engine.state() {
            // Something changed while the requests were on the wire.  We
            // don't know what, so say that potentially everything under
            // the watched path did.
            debug!(path = %self.path, "database changed while establishing subscription: signalling change");
            self.engine
                .inner
                .handler
                .change_notify(&self.path, &[String::new()], None, false, None);
        }

        let mut book = self.engine.inner.subscriptions.lock().unwrap();
        let establishing = count_subscriptions(&book.establishing, &self.path);

        debug!(path = %self.path, establishing, "watch established");

        if establishing > 0 {
            let SubscriptionBook {
                establishing,
                active,
            } = &mut *book;
            move_subscriptions(establishing, active, &self.path);
        }
    }
}

fn count_subscriptions(
    counts: &HashMap<String, u32>,
    path: &str,
) -> u32 {
    counts.get(path).copied().unwrap_or(0)
}

/// Increments the count for `path`, creating it at 1.  Returns the new
/// count; overflow is a programming error.
fn increment_subscriptions(
    counts: &mut HashMap<String, u32>,
    path: &str,
) -> u32 {
    let old = count_subscriptions(counts, path);
    let new = old.checked_add(1).expect("subscription count overflow");
    counts.insert(path.to_owned(), new);
    new
}

/// Decrements the count for `path`, removing it at 0.  The count must
/// exist and be greater than zero.
fn decrement_subscriptions(
    counts: &mut HashMap<String, u32>,
    path: &str,
) -> u32 {
    let old = count_subscriptions(counts, path);
    assert!(old > 0, "decrement of missing subscription count");

    let new = old - 1;
    if new == 0 {
        counts.remove(path);
    } else {
        counts.insert(path.to_owned(), new);
    }
    new
}

/// Adds the count for `path` in `from` onto the one in `to`, removing it
/// from `from`.
fn move_subscriptions(
    from: &mut HashMap<String, u32>,
    to: &mut HashMap<String, u32>,
    path: &str,
) {
    let moved = from.remove(path).unwrap_or(0);
    if moved == 0 {
        return;
    }

    let old = count_subscriptions(to, path);
    let new = old.checked_add(moved).expect("subscription count overflow");
    to.insert(path.to_owned(), new);
}

fn change_call(
    address: &BusAddress,
    payload: bytes::Bytes,
) -> MethodCall {
    MethodCall {
        bus: address.bus,
        destination: address.name.to_owned(),
        object_path: address.object_path.clone(),
        interface: address.interface.to_owned(),
        method: "Change".to_owned(),
        args: CallArgs::Payload(payload),
    }
}

/// Builds the `AddMatch`/`RemoveMatch` call selecting `Notify` signals
/// for `path` on one source's writer object.
fn match_rule_call(
    address: &BusAddress,
    method: &str,
    path: &str,
) -> MethodCall {
    let rule = format!(
        "type='signal',interface='{}',path='{}',arg0path='{}'",
        WRITER_INTERFACE, address.object_path, path
    );

    MethodCall {
        bus: address.bus,
        destination: BUS_DAEMON_NAME.to_owned(),
        object_path: BUS_DAEMON_PATH.to_owned(),
        interface: BUS_DAEMON_INTERFACE.to_owned(),
        method: method.to_owned(),
        args: CallArgs::MatchRule(rule),
    }
}

/// Entry point for every signal the transport receives.
///
/// Validates the payload, then fans the notification out to every live
/// engine with a source on the same bus and object path.  Malformed
/// payloads, unknown members and unmatched coordinates are silently
/// ignored.  `sender` is accepted for interface compatibility but not
/// consulted.
pub fn handle_bus_signal(
    bus: BusId,
    _sender: &str,
    object_path: &str,
    member: &str,
    body: &serde_json::Value,
) {
    match member {
        "Notify" => handle_notify(bus, object_path, body),
        "WritabilityNotify" => handle_writability_notify(bus, object_path, body),
        _ => {}
    }
}

fn snapshot_engines() -> Vec<Engine> {
    ENGINE_REGISTRY
        .lock()
        .unwrap()
        .iter()
        .filter_map(Weak::upgrade)
        .map(|inner| Engine { inner })
        .collect()
}

fn handle_notify(
    bus: BusId,
    object_path: &str,
    body: &serde_json::Value,
) {
    // Body shape: [prefix, [changes...], tag]
    let Some(args) = body.as_array() else { return };
    let [prefix, changes, tag] = args.as_slice() else { return };
    let (Some(prefix), Some(changes), Some(tag)) = (prefix.as_str(), changes.as_array(), tag.as_str()) else {
        return;
    };

    let changes: Vec<&str> = match changes.iter().map(|c| c.as_str()).collect() {
        Some(changes) => changes,
        None => return,
    };

    // Reject junk.
    if changes.is_empty() {
        return;
    }

    if paths::is_key(prefix) {
        // A key prefix must carry exactly [""].
        if changes.len() != 1 || !changes[0].is_empty() {
            return;
        }
    } else if paths::is_dir(prefix) {
        if !changes.iter().all(|change| paths::is_rel_path(change)) {
            return;
        }
    } else {
        return;
    }

    let changes: Vec<String> = changes.into_iter().map(str::to_owned).collect();

    for engine in snapshot_engines() {
        // This may be the echo of a change we already announced when it
        // entered the queue.
        let already_handled = {
            let queue = engine.inner.queue.lock().unwrap();
            queue.last_handled.as_deref() == Some(tag)
        };

        if already_handled {
            continue;
        }

        if engine.inner.is_interested(bus, object_path) {
            engine.inner.handler.change_notify(prefix, &changes, Some(tag), false, None);
        }
    }
}

fn handle_writability_notify(
    bus: BusId,
    object_path: &str,
    body: &serde_json::Value,
) {
    // Body shape: [path]
    let Some(args) = body.as_array() else { return };
    let [path] = args.as_slice() else { return };
    let Some(path) = path.as_str() else { return };

    if !paths::is_path(path) {
        return;
    }

    for engine in snapshot_engines() {
        if engine.inner.is_interested(bus, object_path) {
            engine
                .inner
                .handler
                .change_notify(path, &[String::new()], Some(""), true, None);
        }
    }
}
