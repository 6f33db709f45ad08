//! # confstack
//!
//! A client-side engine for a layered key/value configuration store.
//!
//! Applications read typed values at hierarchical paths, subscribe to
//! change notifications, and write or reset values.  Reads consult a
//! user-writable database stacked over zero or more read-only system
//! databases, with lock entries that can pin a key to a non-writable
//! layer.  Writes go to a remote writer service over a message bus; both a
//! blocking path and an optimistic "fast" path are provided, the latter
//! returning immediately after recording an in-memory shadow of the change
//! and reconciling with the authoritative reply later.
//!
//! ## Quick Start
//! ```no_run
//! use std::sync::Arc;
//!
//! use confstack::Changeset;
//! use confstack::Engine;
//!
//! # fn connect_session_bus() -> Arc<dyn confstack::Bus> { unimplemented!() }
//! # struct Printer;
//! # impl confstack::ChangeHandler for Printer {
//! #     fn change_notify(&self, prefix: &str, _: &[String], _: Option<&str>, _: bool, _: Option<u64>) {
//! #         println!("changed: {prefix}");
//! #     }
//! # }
//! let engine = Engine::new(None, connect_session_bus(), Box::new(Printer));
//!
//! let value = engine.read("/org/example/editor/font-size");
//!
//! engine.watch_fast("/org/example/editor/");
//! engine.change_fast(Changeset::new_write("/org/example/editor/font-size", Some(11.into())).unwrap(), None).unwrap();
//! engine.sync();
//! ```
//!
//! The bus itself is not part of this crate: implement [`Bus`] over your
//! connection and feed incoming signals to [`engine::handle_bus_signal`].

pub mod changeset;
pub mod database;
pub mod dirs;
pub mod engine;
pub mod profile;
pub mod shm;
pub mod source;
pub mod transport;
pub mod value;

mod constants;
mod errors;
mod paths;

pub use changeset::Changeset;
pub use changeset::ChangesetDescription;
pub use constants::*;
pub use database::Database;
pub use dirs::Dirs;
pub use engine::handle_bus_signal;
pub use engine::ChangeHandler;
pub use engine::Engine;
pub use engine::ReadFlags;
pub use errors::*;
pub use paths::*;
pub use source::Source;
pub use transport::Bus;
pub use transport::BusId;
pub use transport::CallArgs;
pub use transport::MethodCall;
pub use transport::ReplyHandler;
pub use value::Value;

#[cfg(test)]
mod paths_test;

//-----------------------------------------------------------
// Test utils
#[cfg(test)]
#[doc(hidden)]
pub mod test_utils;
