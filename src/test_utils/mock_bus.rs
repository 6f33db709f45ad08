//! A scriptable in-memory bus.
//!
//! Synchronous calls are answered from a queue of expected replies (or a
//! unit reply when nothing is queued) and logged.  Asynchronous calls park
//! until the test delivers their reply by hand, which keeps the engine's
//! at-most-one-in-flight discipline observable.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use crate::errors::TransportError;
use crate::transport::Bus;
use crate::transport::MethodCall;
use crate::transport::ReplyHandler;

type ReplyResult = Result<serde_json::Value, TransportError>;

/// An asynchronous call the engine has dispatched and the test has not yet
/// answered.
pub struct ParkedCall {
    pub call: MethodCall,
    handler: ReplyHandler,
}

impl ParkedCall {
    /// Delivers the reply, consuming the call.
    pub fn reply(
        self,
        result: ReplyResult,
    ) {
        (self.handler)(result);
    }
}

#[derive(Default)]
pub struct MockBus {
    sync_replies: Mutex<VecDeque<ReplyResult>>,
    sync_log: Mutex<Vec<MethodCall>>,
    parked: Mutex<VecDeque<ParkedCall>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the reply for the next synchronous call.
    pub fn expect_sync_reply(
        &self,
        reply: ReplyResult,
    ) {
        self.sync_replies.lock().unwrap().push_back(reply);
    }

    /// Drains the log of synchronous calls made so far.
    pub fn take_sync_calls(&self) -> Vec<MethodCall> {
        std::mem::take(&mut *self.sync_log.lock().unwrap())
    }

    /// Number of asynchronous calls awaiting a reply.
    pub fn parked_count(&self) -> usize {
        self.parked.lock().unwrap().len()
    }

    /// Removes the oldest parked call without replying to it.
    pub fn pop_parked(&self) -> Option<ParkedCall> {
        self.parked.lock().unwrap().pop_front()
    }

    /// Replies to the oldest parked call, returning a copy of it.
    ///
    /// Panics if nothing is parked.
    pub fn reply_next(
        &self,
        result: ReplyResult,
    ) -> MethodCall {
        let parked = self.pop_parked().expect("no parked call to reply to");
        let call = parked.call.clone();
        parked.reply(result);
        call
    }

    /// Replies to every parked call with the same result.
    pub fn reply_all(
        &self,
        result: &ReplyResult,
    ) {
        while let Some(parked) = self.pop_parked() {
            parked.reply(clone_result(result));
        }
    }
}

fn clone_result(result: &ReplyResult) -> ReplyResult {
    match result {
        Ok(value) => Ok(value.clone()),
        Err(e) => Err(clone_error(e)),
    }
}

fn clone_error(e: &TransportError) -> TransportError {
    match e {
        TransportError::ServiceUnavailable(message) => TransportError::ServiceUnavailable(message.clone()),
        TransportError::CallFailed { method, message } => TransportError::CallFailed {
            method: method.clone(),
            message: message.clone(),
        },
        TransportError::UnexpectedReply { method, reply } => TransportError::UnexpectedReply {
            method: method.clone(),
            reply: reply.clone(),
        },
        TransportError::Cancelled => TransportError::Cancelled,
    }
}

impl Bus for MockBus {
    fn call_sync(
        &self,
        call: MethodCall,
        token: Option<&CancellationToken>,
    ) -> ReplyResult {
        if token.is_some_and(|t| t.is_cancelled()) {
            return Err(TransportError::Cancelled);
        }

        self.sync_log.lock().unwrap().push(call);

        match self.sync_replies.lock().unwrap().pop_front() {
            Some(reply) => reply,
            None => Ok(serde_json::Value::Null),
        }
    }

    fn call_async(
        &self,
        call: MethodCall,
        on_reply: ReplyHandler,
    ) {
        self.parked.lock().unwrap().push_back(ParkedCall {
            call,
            handler: on_reply,
        });
    }
}
