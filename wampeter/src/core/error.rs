use anyhow::Error;
use serde::{
    Deserialize,
    Serialize,
};
use thiserror::Error;

use crate::{
    core::{
        close::ConnectionBrokenError,
        id::Id,
        types::{
            Dictionary,
            Value,
        },
        uri::Uri,
    },
    message::message::Message,
};

/// A basic error that occurs while processing a WAMP message.
#[derive(Debug, Error)]
pub enum BasicError {
    /// A generic resource was not found.
    ///
    /// WAMP defines standard URIs for not finding specific resource types. This error should only
    /// be used when the standard URI cannot be used.
    #[error("{0}")]
    NotFound(String),
    /// An invalid argument was passed.
    #[error("{0}")]
    InvalidArgument(String),
    /// The operation is not allowed based on process configuration.
    #[error("{0}")]
    NotAllowed(String),
    /// The operation is not allowed based on user permissions.
    #[error("{0}")]
    PermissionDenied(String),
    /// Some internal error occurred.
    ///
    /// Should only be used when there is no other error variant that describes the error, since
    /// the message is very vague and not very useful for debugging.
    #[error("{0}")]
    Internal(String),
}

impl BasicError {
    /// The trailing URI component for the error.
    pub fn uri_component(&self) -> &str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotAllowed(_) => "not_allowed",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Internal(_) => "internal",
        }
    }
}

/// An interaction error that occurs while processing a WAMP message.
///
/// Interaction errors are clearly defined in the WAMP standard and are reserved for errors that
/// peers must be able to parse easily.
#[derive(Debug, Error)]
pub enum InteractionError {
    /// The incoming message violates the WAMP protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// The procedure being called does not exist.
    #[error("no such procedure")]
    NoSuchProcedure,
    /// The realm being referenced does not exist.
    #[error("no such realm")]
    NoSuchRealm,
    /// The principal being authenticated does not exist.
    #[error("no such principal")]
    NoSuchPrincipal,
    /// The peer could not produce a response to an authentication challenge.
    #[error("{0}")]
    CannotAuthenticate(String),
    /// Authentication was attempted but failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    /// Authentication was denied by the other peer.
    #[error("authentication denied: {0}")]
    AuthenticationDenied(String),
    /// A requested option is disallowed by the other peer.
    #[error("option not allowed: {0}")]
    OptionNotAllowed(String),
    /// The call was canceled before a result was produced.
    #[error("canceled")]
    Canceled,
    /// The call did not produce a result in time.
    #[error("timeout")]
    Timeout,
}

impl InteractionError {
    /// The trailing URI component for the error.
    pub fn uri_component(&self) -> &str {
        match self {
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::NoSuchProcedure => "no_such_procedure",
            Self::NoSuchRealm => "no_such_realm",
            Self::NoSuchPrincipal => "no_such_principal",
            Self::CannotAuthenticate(_) => "cannot_authenticate",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::AuthenticationDenied(_) => "authentication_denied",
            Self::OptionNotAllowed(_) => "option_not_allowed",
            Self::Canceled => "canceled",
            Self::Timeout => "timeout",
        }
    }
}

/// An authentication failure that should be reported to the other peer in an ABORT message.
#[derive(Debug, Clone, Error)]
#[error("authentication failed: {reason}")]
pub struct AuthenticationError {
    /// Details to transmit in the ABORT message.
    pub details: Dictionary,
    /// The reason URI for the failure.
    pub reason: Uri,
}

impl AuthenticationError {
    /// Creates an error with the given reason and a human-readable message in its details.
    pub fn new<S>(reason: Uri, message: S) -> Self
    where
        S: Into<String>,
    {
        let mut details = Dictionary::default();
        details.insert("message".to_owned(), Value::String(message.into()));
        Self { details, reason }
    }
}

/// The error reason URI for an error.
///
/// Well-known error types map onto their standard WAMP URIs. Everything else is reported as an
/// internal error.
pub fn uri_for_error(error: &Error) -> Uri {
    if let Some(error) = error.downcast_ref::<InteractionError>() {
        Uri::from_known(format!("wamp.error.{}", error.uri_component()))
    } else if let Some(error) = error.downcast_ref::<BasicError>() {
        Uri::from_known(format!("wamp.error.{}", error.uri_component()))
    } else if let Some(error) = error.downcast_ref::<AuthenticationError>() {
        error.reason.clone()
    } else if let Some(error) = error.downcast_ref::<ConnectionBrokenError>() {
        error.reason()
    } else {
        Uri::from_known("wamp.error.internal")
    }
}

/// Creates an [`struct@Error`] from a URI error reason and message.
pub fn error_from_uri_reason_and_message(reason: Uri, message: String) -> Error {
    match reason.as_ref() {
        "wamp.error.not_found" => BasicError::NotFound(message).into(),
        "wamp.error.invalid_argument" => BasicError::InvalidArgument(message).into(),
        "wamp.error.not_allowed" => BasicError::NotAllowed(message).into(),
        "wamp.error.permission_denied" => BasicError::PermissionDenied(message).into(),
        "wamp.error.protocol_violation" => InteractionError::ProtocolViolation(message).into(),
        "wamp.error.no_such_procedure" => InteractionError::NoSuchProcedure.into(),
        "wamp.error.no_such_realm" => InteractionError::NoSuchRealm.into(),
        "wamp.error.no_such_principal" => InteractionError::NoSuchPrincipal.into(),
        "wamp.error.cannot_authenticate" => InteractionError::CannotAuthenticate(message).into(),
        "wamp.error.authentication_failed" => {
            InteractionError::AuthenticationFailed(message).into()
        }
        "wamp.error.authentication_denied" => {
            InteractionError::AuthenticationDenied(message).into()
        }
        "wamp.error.option_not_allowed" => InteractionError::OptionNotAllowed(message).into(),
        "wamp.error.canceled" => InteractionError::Canceled.into(),
        "wamp.error.timeout" => InteractionError::Timeout.into(),
        _ => BasicError::Internal(message).into(),
    }
}

/// Extracts a URI error reason and message from a WAMP message.
pub fn extract_error_uri_reason_and_message(message: &Message) -> Result<(&Uri, &str), Error> {
    let reason = match message.reason() {
        Some(reason) => reason,
        None => return Err(Error::msg("message does not contain a reason uri")),
    };
    let message = match message
        .details()
        .map(|details| details.get("message"))
        .flatten()
    {
        Some(Value::String(message)) => message.as_str(),
        _ => "unknown error",
    };
    Ok((reason, message))
}

/// An error that can be transmitted over channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelTransmittableError {
    pub reason: Uri,
    pub message: String,
    pub request_id: Option<Id>,
}

impl ChannelTransmittableError {
    /// Converts the error into a real Error object that can be returned out.
    pub fn into_error(self) -> anyhow::Error {
        error_from_uri_reason_and_message(self.reason, self.message)
    }
}

impl TryFrom<&Message> for ChannelTransmittableError {
    type Error = anyhow::Error;
    fn try_from(value: &Message) -> std::result::Result<Self, Self::Error> {
        let (reason, message) = extract_error_uri_reason_and_message(&value)?;
        Ok(Self {
            reason: reason.to_owned(),
            message: message.to_owned(),
            request_id: value.request_id(),
        })
    }
}

impl From<&anyhow::Error> for ChannelTransmittableError {
    fn from(value: &anyhow::Error) -> Self {
        Self {
            reason: uri_for_error(value),
            message: value.to_string(),
            request_id: None,
        }
    }
}

impl From<anyhow::Error> for ChannelTransmittableError {
    fn from(value: anyhow::Error) -> Self {
        Self::from(&value)
    }
}

/// Type alias for a channel-transmittable result.
///
/// Assumes `T` is channel-transmittable.
pub type ChannelTransmittableResult<T> = Result<T, ChannelTransmittableError>;
