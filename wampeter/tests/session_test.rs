use std::sync::Arc;

use anyhow::Result;
use assert_matches::assert_matches;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::{
    Mutex,
    mpsc,
    oneshot,
};
use wampeter::{
    auth::authenticator::{
        AuthenticationResponse,
        ClientAuthenticator,
        DefaultClientAuthenticator,
    },
    client::{
        Client,
        SessionConfig,
        SessionEvent,
        SessionState,
    },
    core::{
        close::SessionCloseCause,
        id::Id,
        types::{
            Dictionary,
            Value,
        },
        uri::Uri,
    },
    message::message::{
        AbortMessage,
        ChallengeMessage,
        GoodbyeMessage,
        Message,
        WelcomeMessage,
    },
    transport::sink::ChannelSink,
};

const REALM: &str = "com.wampeter.test";

fn uri(uri: &str) -> Uri {
    Uri::try_from(uri).unwrap()
}

fn id(id: u64) -> Id {
    Id::try_from(id).unwrap()
}

fn new_client() -> (Arc<Client>, mpsc::UnboundedReceiver<Message>) {
    test_utils::setup::setup_test_environment();
    let (sink, outbound_rx) = ChannelSink::new();
    let client = Client::new(
        SessionConfig::new(uri(REALM)),
        Box::new(DefaultClientAuthenticator::default()),
        Arc::new(sink),
    )
    .unwrap();
    (Arc::new(client), outbound_rx)
}

async fn establish(
    client: &Client,
    outbound_rx: &mut mpsc::UnboundedReceiver<Message>,
    session_id: u64,
) {
    client.on_connection_open().unwrap();
    assert_matches!(outbound_rx.try_recv(), Ok(Message::Hello(_)));
    client
        .handle_message(Message::Welcome(WelcomeMessage {
            session: id(session_id),
            details: Dictionary::default(),
        }))
        .await
        .unwrap();
    assert!(client.connected());
}

#[tokio::test]
async fn establishes_session_and_reports_details() {
    let (client, mut outbound_rx) = new_client();
    let mut event_rx = client.session_event_rx();

    client.on_connection_open().unwrap();
    assert_matches!(outbound_rx.try_recv(), Ok(Message::Hello(hello)) => {
        assert_eq!(hello.realm, uri(REALM));
        assert_matches!(hello.details.get("agent"), Some(Value::String(_)));
        assert_matches!(
            hello.details.get("roles").and_then(|roles| roles.dictionary()),
            Some(roles) => {
                assert!(roles.contains_key("caller"));
            }
        );
    });
    assert_eq!(client.session().state(), SessionState::HelloSent);
    assert!(!client.connected());

    client
        .handle_message(Message::Welcome(WelcomeMessage {
            session: id(42),
            details: Dictionary::from_iter([(
                "authrole".to_owned(),
                Value::String("anonymous".to_owned()),
            )]),
        }))
        .await
        .unwrap();

    assert!(client.connected());
    assert_eq!(client.session_id(), Some(id(42)));
    assert_eq!(client.session().state(), SessionState::Established);

    assert_matches!(client.established_rx().wait().await, Ok(Ok(established)) => {
        assert_eq!(established.session_id, id(42));
        assert_matches!(
            established.welcome.get("authrole"),
            Some(Value::String(role)) => {
                assert_eq!(role, "anonymous");
            }
        );
    });
    assert_matches!(event_rx.try_recv(), Ok(SessionEvent::Established(established)) => {
        assert_eq!(established.session_id, id(42));
    });
}

#[tokio::test]
async fn duplicate_welcome_fires_established_once() {
    let (client, mut outbound_rx) = new_client();
    let mut event_rx = client.session_event_rx();
    establish(&client, &mut outbound_rx, 42).await;

    client
        .handle_message(Message::Welcome(WelcomeMessage {
            session: id(43),
            details: Dictionary::default(),
        }))
        .await
        .unwrap();

    // The first WELCOME wins.
    assert_eq!(client.session_id(), Some(id(42)));
    assert_matches!(event_rx.try_recv(), Ok(SessionEvent::Established(_)));
    assert_matches!(
        event_rx.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    );
}

#[tokio::test]
async fn goodbye_handshake_resolves_close_signal() {
    let (client, mut outbound_rx) = new_client();
    establish(&client, &mut outbound_rx, 42).await;

    client.close(None).unwrap();
    assert_matches!(outbound_rx.try_recv(), Ok(Message::Goodbye(goodbye)) => {
        assert_eq!(goodbye.reason.as_ref(), "wamp.close.normal");
    });

    // A second close is an idempotent no-op.
    client.close(None).unwrap();
    assert_matches!(
        outbound_rx.try_recv(),
        Err(mpsc::error::TryRecvError::Empty)
    );

    let details = Dictionary::from_iter([(
        "message".to_owned(),
        Value::String("bye-back".to_owned()),
    )]);
    client
        .handle_message(Message::Goodbye(GoodbyeMessage {
            details: details.clone(),
            reason: uri("wamp.close.goodbye_and_out"),
        }))
        .await
        .unwrap();

    assert_matches!(client.closed_rx().wait().await, Ok(Ok(goodbye)) => {
        assert_eq!(goodbye.details, details);
        assert_eq!(goodbye.reason.as_ref(), "wamp.close.goodbye_and_out");
    });
    assert_eq!(client.session().state(), SessionState::Closed);
    assert_matches!(
        client.session().close_record(),
        Some(record) => {
            assert_eq!(record.cause, SessionCloseCause::Goodbye);
            assert_eq!(record.session_id, Some(id(42)));
        }
    );
}

#[tokio::test]
async fn router_initiated_goodbye_is_echoed() {
    let (client, mut outbound_rx) = new_client();
    establish(&client, &mut outbound_rx, 42).await;

    client
        .handle_message(Message::Goodbye(GoodbyeMessage {
            details: Dictionary::default(),
            reason: uri("wamp.close.system_shutdown"),
        }))
        .await
        .unwrap();

    assert_matches!(outbound_rx.try_recv(), Ok(Message::Goodbye(goodbye)) => {
        assert_eq!(goodbye.reason.as_ref(), "wamp.close.goodbye_and_out");
    });
    assert_eq!(client.session().state(), SessionState::Closed);
    assert_matches!(client.session().close_record(), Some(record) => {
        assert_eq!(record.cause, SessionCloseCause::Goodbye);
        assert_eq!(record.reason, Some(uri("wamp.close.system_shutdown")));
    });
}

#[tokio::test]
async fn first_terminal_cause_wins() {
    let (client, mut outbound_rx) = new_client();
    let mut event_rx = client.session_event_rx();
    establish(&client, &mut outbound_rx, 42).await;

    client
        .handle_message(Message::Abort(AbortMessage {
            details: Dictionary::default(),
            reason: uri("wamp.error.killed"),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_eq!(client.session().state(), SessionState::Closed);

    // Traffic after the terminal message is ignored, not an error.
    client
        .handle_message(Message::Goodbye(GoodbyeMessage {
            details: Dictionary::default(),
            reason: uri("wamp.close.normal"),
        }))
        .await
        .unwrap();

    // The disconnection that follows does not overwrite the recorded abort.
    client.on_connection_closed();
    assert_matches!(event_rx.try_recv(), Ok(SessionEvent::Established(_)));
    assert_matches!(event_rx.try_recv(), Ok(SessionEvent::Broken(record)) => {
        assert_eq!(record.cause, SessionCloseCause::Abort);
        assert_eq!(record.reason, Some(uri("wamp.error.killed")));
        assert_eq!(record.session_id, Some(id(42)));
    });
}

#[tokio::test]
async fn abort_during_handshake_fails_open_signal_with_reason() {
    let (client, mut outbound_rx) = new_client();
    client.on_connection_open().unwrap();
    assert_matches!(outbound_rx.try_recv(), Ok(Message::Hello(_)));
    let mut established_rx = client.established_rx();

    client
        .handle_message(Message::Abort(AbortMessage {
            details: Dictionary::from_iter([(
                "message".to_owned(),
                Value::String("no such realm".to_owned()),
            )]),
            reason: uri("wamp.error.no_such_realm"),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_eq!(client.session().state(), SessionState::Closed);

    client.on_connection_closed();
    assert_matches!(established_rx.wait().await, Ok(Err(err)) => {
        assert_eq!(err.reason.as_ref(), "wamp.error.no_such_realm");
    });
}

#[tokio::test]
async fn authentication_failure_sends_abort_before_error() {
    let (client, mut outbound_rx) = new_client();
    let mut event_rx = client.session_event_rx();
    client.on_connection_open().unwrap();
    assert_matches!(outbound_rx.try_recv(), Ok(Message::Hello(_)));

    let result = client
        .handle_message(Message::Challenge(ChallengeMessage {
            auth_method: "wampcra".to_owned(),
            extra: Dictionary::default(),
        }))
        .await;
    assert_matches!(result, Err(err) => {
        assert!(err.to_string().contains("no authenticator available"));
    });

    // The router is told why we gave up before observers hear about it.
    assert_matches!(outbound_rx.try_recv(), Ok(Message::Abort(abort)) => {
        assert_eq!(abort.reason.as_ref(), "wamp.error.cannot_authenticate");
        assert_matches!(abort.details.get("message"), Some(Value::String(_)));
    });
    assert_matches!(event_rx.try_recv(), Ok(SessionEvent::Error(err)) => {
        assert_eq!(err.reason.as_ref(), "wamp.error.cannot_authenticate");
    });
    assert_eq!(client.session().state(), SessionState::Broken);
    assert!(!client.connected());
}

/// Authenticator that answers challenges only after an external gate opens.
struct GatedAuthenticator {
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

#[async_trait]
impl ClientAuthenticator for GatedAuthenticator {
    fn authentication_id(&self) -> Option<String> {
        Some("user".to_owned())
    }

    fn authentication_methods(&self) -> Vec<String> {
        Vec::from_iter(["wampcra".to_owned()])
    }

    async fn authenticate(&self, _: &str, _: &Dictionary) -> Result<AuthenticationResponse> {
        if let Some(gate) = self.gate.lock().await.take() {
            gate.await.ok();
        }
        Ok(AuthenticationResponse {
            signature: "deadbeef".to_owned(),
            extra: Dictionary::default(),
        })
    }
}

#[tokio::test]
async fn welcome_during_authentication_skips_authenticate() {
    test_utils::setup::setup_test_environment();
    let (sink, mut outbound_rx) = ChannelSink::new();
    let (gate_tx, gate_rx) = oneshot::channel();
    let client = Arc::new(
        Client::new(
            SessionConfig::new(uri(REALM)),
            Box::new(GatedAuthenticator {
                gate: Mutex::new(Some(gate_rx)),
            }),
            Arc::new(sink),
        )
        .unwrap(),
    );

    client.on_connection_open().unwrap();
    assert_matches!(outbound_rx.try_recv(), Ok(Message::Hello(_)));

    let challenge_task = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .handle_message(Message::Challenge(ChallengeMessage {
                    auth_method: "wampcra".to_owned(),
                    extra: Dictionary::default(),
                }))
                .await
        }
    });
    // Let the challenge handler park on the gate before the router answers.
    tokio::task::yield_now().await;

    client
        .handle_message(Message::Welcome(WelcomeMessage {
            session: id(42),
            details: Dictionary::default(),
        }))
        .await
        .unwrap();
    assert!(client.connected());

    gate_tx.send(()).unwrap();
    assert_matches!(challenge_task.await, Ok(Ok(())));

    // The session was established while the challenge response was being computed, so no
    // AUTHENTICATE goes out.
    assert_matches!(
        outbound_rx.try_recv(),
        Err(mpsc::error::TryRecvError::Empty)
    );
    assert_eq!(client.session().state(), SessionState::Established);
}

#[tokio::test]
async fn goodbye_before_established_is_fatal() {
    let (client, mut outbound_rx) = new_client();
    client.on_connection_open().unwrap();
    assert_matches!(outbound_rx.try_recv(), Ok(Message::Hello(_)));

    let result = client
        .handle_message(Message::Goodbye(GoodbyeMessage {
            details: Dictionary::default(),
            reason: uri("wamp.close.normal"),
        }))
        .await;
    assert_matches!(result, Err(err) => {
        assert!(err.to_string().contains("protocol violation"));
    });
    assert_matches!(outbound_rx.try_recv(), Ok(Message::Abort(abort)) => {
        assert_eq!(abort.reason.as_ref(), "wamp.error.protocol_violation");
    });
    assert_eq!(client.session().state(), SessionState::Broken);
    assert!(!client.connected());
}

#[tokio::test]
async fn welcome_before_hello_is_fatal() {
    let (client, mut outbound_rx) = new_client();

    let result = client
        .handle_message(Message::Welcome(WelcomeMessage {
            session: id(42),
            details: Dictionary::default(),
        }))
        .await;
    assert_matches!(result, Err(err) => {
        assert!(err.to_string().contains("protocol violation"));
    });
    assert_matches!(outbound_rx.try_recv(), Ok(Message::Abort(abort)) => {
        assert_eq!(abort.reason.as_ref(), "wamp.error.protocol_violation");
    });
    assert!(!client.connected());
}

#[tokio::test]
async fn connection_loss_resets_for_reconnection() {
    let (client, mut outbound_rx) = new_client();
    let mut event_rx = client.session_event_rx();
    establish(&client, &mut outbound_rx, 42).await;

    let mut stale_closed_rx = client.closed_rx();
    client.on_connection_closed();

    assert!(!client.connected());
    assert_eq!(client.session_id(), None);
    assert_eq!(client.session().state(), SessionState::Disconnected);
    assert_matches!(event_rx.try_recv(), Ok(SessionEvent::Established(_)));
    assert_matches!(event_rx.try_recv(), Ok(SessionEvent::Broken(record)) => {
        assert_eq!(record.cause, SessionCloseCause::Disconnection);
    });

    // Waiters on the broken epoch resolve with the broken-connection error rather than hanging
    // into the next epoch.
    assert_matches!(stale_closed_rx.wait().await, Ok(Err(err)) => {
        assert_eq!(err.reason.as_ref(), "wamp.close.transport_lost");
    });

    // A full second handshake runs with fresh signals.
    establish(&client, &mut outbound_rx, 43).await;
    assert_eq!(client.session_id(), Some(id(43)));
    assert_matches!(client.established_rx().wait().await, Ok(Ok(established)) => {
        assert_eq!(established.session_id, id(43));
    });
    assert_matches!(event_rx.try_recv(), Ok(SessionEvent::Established(established)) => {
        assert_eq!(established.session_id, id(43));
    });
}
