//! Configuration Engine Error Hierarchy
//!
//! Defines the error types surfaced by the engine, categorized by the layer
//! that produced them: path validation, writability checks, the bus
//! transport, and changeset state.

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input was not a well-formed path of the expected flavour
    #[error(transparent)]
    Path(#[from] PathError),

    /// A write targeted a key that is locked or lives in a profile without a
    /// writable source
    #[error("the operation attempted to modify one or more non-writable keys")]
    NotWritable,

    /// Bus call or reply was unusable
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Mutation attempted on a sealed changeset
    #[error("attempted to modify a sealed changeset")]
    Sealed,

    /// Synchronous operation aborted by its cancellation token
    #[error("the operation was cancelled")]
    Cancelled,
}

/// Path validation failures, naming the offending condition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("empty string given as path")]
    Empty,

    #[error("path \"{0}\" does not begin with a slash")]
    NoLeadingSlash(String),

    #[error("path \"{0}\" contains two consecutive slashes")]
    DoubleSlash(String),

    /// A dir was given where a key was required (trailing slash)
    #[error("path \"{0}\" ends with a slash, but a key was expected")]
    ExpectedKey(String),

    /// A key was given where a dir was required (no trailing slash)
    #[error("path \"{0}\" does not end with a slash, but a dir was expected")]
    ExpectedDir(String),

    #[error("relative path \"{0}\" begins with a slash")]
    RelativeLeadingSlash(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Endpoint unavailable or the call could not be delivered
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The peer answered with an error
    #[error("call to {method} failed: {message}")]
    CallFailed { method: String, message: String },

    /// The reply did not carry the expected shape
    #[error("unexpected reply to {method}: {reply}")]
    UnexpectedReply {
        method: String,
        reply: serde_json::Value,
    },

    /// The caller's cancellation token fired before completion
    #[error("call cancelled")]
    Cancelled,
}
