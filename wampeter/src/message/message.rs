use crate::core::{
    id::Id,
    types::{
        Dictionary,
        Integer,
        List,
    },
    uri::Uri,
};

/// A HELLO message for a peer to initiate a WAMP session in a realm.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HelloMessage {
    pub realm: Uri,
    pub details: Dictionary,
}

impl HelloMessage {
    pub const TAG: Integer = 1;
}

/// A WELCOME message for a router to confirm a peer's WAMP session in a realm.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WelcomeMessage {
    pub session: Id,
    pub details: Dictionary,
}

impl WelcomeMessage {
    pub const TAG: Integer = 2;
}

/// An ABORT message for quickly terminating a WAMP session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AbortMessage {
    pub details: Dictionary,
    pub reason: Uri,
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

impl AbortMessage {
    pub const TAG: Integer = 3;
}

/// A CHALLENGE message for a router to request authentication from a peer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChallengeMessage {
    pub auth_method: String,
    pub extra: Dictionary,
}

impl ChallengeMessage {
    pub const TAG: Integer = 4;
}

/// An AUTHENTICATE message for a peer to answer a router's CHALLENGE.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuthenticateMessage {
    pub signature: String,
    pub extra: Dictionary,
}

impl AuthenticateMessage {
    pub const TAG: Integer = 5;
}

/// A GOODBYE message for ending a WAMP session with a two-way handshake.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GoodbyeMessage {
    pub details: Dictionary,
    pub reason: Uri,
}

impl GoodbyeMessage {
    pub const TAG: Integer = 6;
}

/// An ERROR message for communicating an error in response to a single request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub request_type: Integer,
    pub request: Id,
    pub details: Dictionary,
    pub error: Uri,
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

impl ErrorMessage {
    pub const TAG: Integer = 8;
}

/// A CALL message for invoking a procedure.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallMessage {
    pub request: Id,
    pub options: Dictionary,
    pub procedure: Uri,
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

impl CallMessage {
    pub const TAG: Integer = 48;
}

/// A CANCEL message for canceling a previously-issued CALL.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CancelMessage {
    pub call_request: Id,
    pub options: Dictionary,
}

impl CancelMessage {
    pub const TAG: Integer = 49;
}

/// A RESULT message for sending the result of a procedure invocation.
///
/// A result with `details.progress == true` is one element of a progressive result; the final
/// result omits the flag.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResultMessage {
    pub call_request: Id,
    pub details: Dictionary,
    pub yield_arguments: List,
    pub yield_arguments_keyword: Dictionary,
}

impl ResultMessage {
    pub const TAG: Integer = 50;
}

/// A WAMP message.
///
/// Only the client half of the protocol is modeled: messages a caller-role peer sends or
/// receives during session establishment, teardown, and procedure calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(HelloMessage),
    Welcome(WelcomeMessage),
    Abort(AbortMessage),
    Challenge(ChallengeMessage),
    Authenticate(AuthenticateMessage),
    Goodbye(GoodbyeMessage),
    Error(ErrorMessage),
    Call(CallMessage),
    Cancel(CancelMessage),
    Result(ResultMessage),
}

impl Message {
    /// The message name, mostly for logging.
    pub fn message_name(&self) -> &'static str {
        match self {
            Self::Hello(_) => "HELLO",
            Self::Welcome(_) => "WELCOME",
            Self::Abort(_) => "ABORT",
            Self::Challenge(_) => "CHALLENGE",
            Self::Authenticate(_) => "AUTHENTICATE",
            Self::Goodbye(_) => "GOODBYE",
            Self::Error(_) => "ERROR",
            Self::Call(_) => "CALL",
            Self::Cancel(_) => "CANCEL",
            Self::Result(_) => "RESULT",
        }
    }

    /// The numeric tag identifying the message type.
    pub fn tag(&self) -> Integer {
        match self {
            Self::Hello(_) => HelloMessage::TAG,
            Self::Welcome(_) => WelcomeMessage::TAG,
            Self::Abort(_) => AbortMessage::TAG,
            Self::Challenge(_) => ChallengeMessage::TAG,
            Self::Authenticate(_) => AuthenticateMessage::TAG,
            Self::Goodbye(_) => GoodbyeMessage::TAG,
            Self::Error(_) => ErrorMessage::TAG,
            Self::Call(_) => CallMessage::TAG,
            Self::Cancel(_) => CancelMessage::TAG,
            Self::Result(_) => ResultMessage::TAG,
        }
    }

    /// The request ID on the message.
    pub fn request_id(&self) -> Option<Id> {
        match self {
            Self::Error(message) => Some(message.request),
            Self::Call(message) => Some(message.request),
            Self::Cancel(message) => Some(message.call_request),
            Self::Result(message) => Some(message.call_request),
            _ => None,
        }
    }

    /// The details dictionary on the message.
    pub fn details(&self) -> Option<&Dictionary> {
        match self {
            Self::Hello(message) => Some(&message.details),
            Self::Welcome(message) => Some(&message.details),
            Self::Abort(message) => Some(&message.details),
            Self::Goodbye(message) => Some(&message.details),
            Self::Error(message) => Some(&message.details),
            Self::Result(message) => Some(&message.details),
            _ => None,
        }
    }

    /// The error reason on the message.
    pub fn reason(&self) -> Option<&Uri> {
        match self {
            Self::Abort(message) => Some(&message.reason),
            Self::Goodbye(message) => Some(&message.reason),
            Self::Error(message) => Some(&message.error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod message_test {
    use crate::{
        core::{
            id::Id,
            types::{
                Dictionary,
                Value,
            },
            uri::Uri,
        },
        message::message::{
            CallMessage,
            ErrorMessage,
            Message,
            ResultMessage,
            WelcomeMessage,
        },
    };

    #[test]
    fn exposes_request_ids() {
        let message = Message::Call(CallMessage {
            request: Id::try_from(12).unwrap(),
            procedure: Uri::try_from("com.example.add").unwrap(),
            ..Default::default()
        });
        assert_eq!(message.request_id(), Some(Id::try_from(12).unwrap()));

        let message = Message::Result(ResultMessage {
            call_request: Id::try_from(12).unwrap(),
            ..Default::default()
        });
        assert_eq!(message.request_id(), Some(Id::try_from(12).unwrap()));

        let message = Message::Welcome(WelcomeMessage {
            session: Id::try_from(100).unwrap(),
            ..Default::default()
        });
        assert_eq!(message.request_id(), None);
    }

    #[test]
    fn exposes_error_reason_and_details() {
        let message = Message::Error(ErrorMessage {
            request_type: CallMessage::TAG,
            request: Id::try_from(12).unwrap(),
            details: Dictionary::from_iter([(
                "message".to_owned(),
                Value::String("no such procedure".to_owned()),
            )]),
            error: Uri::try_from("wamp.error.no_such_procedure").unwrap(),
            ..Default::default()
        });
        assert_eq!(
            message.reason().map(|reason| reason.as_ref()),
            Some("wamp.error.no_such_procedure")
        );
        assert_matches::assert_matches!(
            message.details().and_then(|details| details.get("message")),
            Some(Value::String(text)) => {
                assert_eq!(text, "no such procedure");
            }
        );
    }
}
