use std::fmt::Display;

use thiserror::Error;

use crate::core::{
    id::Id,
    types::Dictionary,
    uri::Uri,
};

/// The reason for closing a WAMP session.
#[derive(Debug, Default, Clone, Copy)]
pub enum CloseReason {
    #[default]
    Normal,
    SystemShutdown,
    CloseRealm,
    Killed,
    TimedOut,
    TransportLost,
    GoodbyeAndOut,
}

impl CloseReason {
    fn uri_component(&self) -> &str {
        match self {
            Self::Normal => "normal",
            Self::SystemShutdown => "system_shutdown",
            Self::CloseRealm => "close_realm",
            Self::Killed => "killed",
            Self::TimedOut => "timed_out",
            Self::TransportLost => "transport_lost",
            Self::GoodbyeAndOut => "goodbye_and_out",
        }
    }

    /// URI for the close reason.
    pub fn uri(&self) -> Uri {
        Uri::from_known(format!("wamp.close.{}", self.uri_component()))
    }
}

/// The terminal event that ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCloseCause {
    /// The session was aborted by the other peer.
    Abort,
    /// The session ended with a GOODBYE exchange.
    Goodbye,
    /// The underlying connection dropped.
    Disconnection,
}

impl Display for SessionCloseCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Goodbye => write!(f, "goodbye"),
            Self::Disconnection => write!(f, "disconnection"),
        }
    }
}

/// A record of why a session ended.
///
/// The record is set at most once per connection: the first terminal event (abort, goodbye, or
/// disconnection) wins, and later events do not overwrite it.
#[derive(Debug, Clone)]
pub struct SessionCloseRecord {
    /// The terminal event.
    pub cause: SessionCloseCause,
    /// The ID of the session that ended, if one was established.
    pub session_id: Option<Id>,
    /// Details transmitted with the terminal message, if any.
    pub details: Dictionary,
    /// The reason URI transmitted with the terminal message, if any.
    pub reason: Option<Uri>,
}

impl SessionCloseRecord {
    /// Creates a record for a connection that dropped without a terminal message.
    pub fn disconnection(session_id: Option<Id>) -> Self {
        Self {
            cause: SessionCloseCause::Disconnection,
            session_id,
            details: Dictionary::default(),
            reason: None,
        }
    }
}

/// Error for a connection that broke while a session (or session handshake) was active.
#[derive(Debug, Clone, Error)]
#[error("connection broken: {}", .close_record.cause)]
pub struct ConnectionBrokenError {
    /// Why the session ended.
    pub close_record: SessionCloseRecord,
}

impl ConnectionBrokenError {
    /// Creates a new error wrapping the close record.
    pub fn new(close_record: SessionCloseRecord) -> Self {
        Self { close_record }
    }

    /// The reason URI describing the break.
    pub fn reason(&self) -> Uri {
        self.close_record
            .reason
            .clone()
            .unwrap_or_else(|| CloseReason::TransportLost.uri())
    }
}
