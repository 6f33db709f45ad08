//! Bus transport facade.
//!
//! The engine does not speak any concrete bus protocol.  It describes
//! method calls with [`MethodCall`] and hands them to a [`Bus`]
//! implementation injected at construction; incoming signals are fed back
//! through [`crate::engine::handle_bus_signal`] by whatever owns the
//! connection.  Tests substitute a mock.

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::errors::TransportError;

/// Which message bus a source lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusId {
    Session,
    System,
}

/// Arguments carried by a method call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArgs {
    None,
    /// A match rule, for `AddMatch`/`RemoveMatch` on the bus daemon.
    MatchRule(String),
    /// The canonical serialised form of a sealed delta, for `Change`.
    Payload(Bytes),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub bus: BusId,
    pub destination: String,
    pub object_path: String,
    pub interface: String,
    pub method: String,
    pub args: CallArgs,
}

/// Callback invoked with the reply to an asynchronous call.
///
/// Delivered at most once, from whichever thread the transport chooses.
pub type ReplyHandler = Box<dyn FnOnce(Result<serde_json::Value, TransportError>) + Send>;

/// The method-call surface of the message bus.
///
/// `call_async` must never invoke its reply handler from within the call
/// itself: the engine issues asynchronous calls while holding internal
/// locks that the handler will take again.
pub trait Bus: Send + Sync {
    /// Performs a blocking call and returns the reply body.
    ///
    /// If `token` fires before completion the implementation returns
    /// [`TransportError::Cancelled`].
    fn call_sync(
        &self,
        call: MethodCall,
        token: Option<&CancellationToken>,
    ) -> Result<serde_json::Value, TransportError>;

    /// Dispatches a call whose reply will be delivered to `on_reply` later.
    fn call_async(
        &self,
        call: MethodCall,
        on_reply: ReplyHandler,
    );
}
