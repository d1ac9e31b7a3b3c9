//! Error taxonomy for the controller.
//!
//! Every failure is scoped to a single device session; nothing in here is
//! allowed to take the controller process down.

use std::io;

use thiserror::Error;

/// A message body that does not decode as OpenFlow 0x04.
///
/// Raised by the wire codec when the peer's bytes run out before the length
/// its header promised, or when a field holds a value outside the protocol's
/// defined range. The session drops the offending message and stays open.
#[derive(Debug, Error)]
#[error("malformed {what} message: {detail}")]
pub struct MalformedMessage {
    pub what: &'static str,
    pub detail: String,
}

impl MalformedMessage {
    pub fn new(what: &'static str, err: io::Error) -> MalformedMessage {
        MalformedMessage {
            what,
            detail: err.to_string(),
        }
    }
}

/// An in-memory structure that cannot be marshaled into a valid wire message,
/// e.g. a physical port number above the protocol maximum.
///
/// Reported to the caller that built the structure; never retried.
#[derive(Debug, Error)]
#[error("cannot encode {what}: {detail}")]
pub struct EncodeFailure {
    pub what: &'static str,
    pub detail: String,
}

impl EncodeFailure {
    pub fn new(what: &'static str, err: io::Error) -> EncodeFailure {
        EncodeFailure {
            what,
            detail: err.to_string(),
        }
    }
}

/// Anything that can go wrong while servicing one device session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    MalformedMessage(#[from] MalformedMessage),

    /// Socket read/write failure or reset. Closes the session; the device is
    /// expected to reconnect on its own.
    #[error("transport failure: {0}")]
    TransportError(#[source] io::Error),

    /// A protocol message arrived in a session state that does not accept it.
    /// Logged and dropped; never fatal.
    #[error("unexpected {message} message in {state} state")]
    UnexpectedStateMessage {
        message: &'static str,
        state: &'static str,
    },

    #[error(transparent)]
    EncodeFailure(#[from] EncodeFailure),
}

impl SessionError {
    /// True when the session must be torn down rather than resumed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::TransportError(_))
    }
}
