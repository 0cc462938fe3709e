use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
    PoisonError,
    atomic::{
        AtomicBool,
        AtomicU64,
        Ordering,
    },
};

use anyhow::{
    Error,
    Result,
};
use log::{
    debug,
    info,
    trace,
    warn,
};
use tokio::sync::broadcast;

use crate::{
    auth::authenticator::ClientAuthenticator,
    client::client::NotConnectedError,
    core::{
        close::{
            CloseReason,
            ConnectionBrokenError,
            SessionCloseCause,
            SessionCloseRecord,
        },
        error::{
            AuthenticationError,
            BasicError,
            ChannelTransmittableError,
            ChannelTransmittableResult,
            InteractionError,
        },
        features::{
            PubSubFeatures,
            RpcFeatures,
        },
        hash::HashSet,
        id::Id,
        roles::{
            PeerRole,
            PeerRoles,
        },
        signal::{
            Signal,
            SignalReceiver,
        },
        types::{
            Dictionary,
            Value,
        },
        uri::Uri,
    },
    message::{
        common::{
            abort_message_for_error,
            goodbye_and_out,
        },
        message::{
            AbortMessage,
            AuthenticateMessage,
            ChallengeMessage,
            GoodbyeMessage,
            HelloMessage,
            Message,
            WelcomeMessage,
        },
    },
    transport::sink::MessageSink,
};

const DEFAULT_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configuration for a [`Session`].
#[derive(Debug)]
pub struct SessionConfig {
    /// Name of the session, mostly for logging.
    pub name: String,
    /// Agent name, communicated to the router.
    pub agent: String,
    /// The realm to establish sessions in.
    pub realm: Uri,
    /// Roles implemented by the client.
    pub roles: HashSet<PeerRole>,
}

impl SessionConfig {
    /// Creates a configuration for the given realm with default values.
    pub fn new(realm: Uri) -> Self {
        Self {
            name: DEFAULT_AGENT.to_owned(),
            agent: DEFAULT_AGENT.to_owned(),
            realm,
            roles: HashSet::from_iter([
                PeerRole::Callee,
                PeerRole::Caller,
                PeerRole::Publisher,
                PeerRole::Subscriber,
            ]),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.roles.is_empty() {
            return Err(Error::msg("at least one role is required"));
        }
        Ok(())
    }
}

/// The lifecycle state of a client session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection epoch is active.
    #[default]
    Disconnected,
    /// HELLO was sent; waiting for CHALLENGE or WELCOME.
    HelloSent,
    /// AUTHENTICATE was sent; waiting for WELCOME.
    Authenticating,
    /// The router welcomed the session.
    Established,
    /// A GOODBYE exchange is in flight.
    Closing,
    /// The session ended with a terminal message.
    Closed,
    /// The connection was lost abnormally; the epoch is being torn down.
    Broken,
}

impl SessionState {
    fn allowed_state_transition(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::Disconnected, Self::HelloSent) => true,
            (Self::HelloSent, Self::Authenticating) => true,
            (Self::HelloSent | Self::Authenticating, Self::Established) => true,
            (
                Self::HelloSent | Self::Authenticating | Self::Established,
                Self::Closing,
            ) => true,
            (Self::Closing, Self::Closed) => true,
            (Self::Disconnected, Self::Broken) => false,
            (_, Self::Broken) => true,
            (Self::Broken, Self::Disconnected) => true,
            _ => false,
        }
    }
}

/// The client's declared HELLO content, kept for the established notification.
#[derive(Debug, Clone)]
pub struct HelloDetails {
    /// Agent name.
    pub agent: String,
    /// Advertised roles with feature flags.
    pub roles: PeerRoles,
    /// Authentication ID (a.k.a., `authid`), if the client can authenticate.
    pub authentication_id: Option<String>,
    /// Authentication methods the client can answer, in order of preference.
    pub authentication_methods: Vec<String>,
}

impl HelloDetails {
    /// Renders the details into the HELLO `details` dictionary.
    pub fn to_dictionary(&self) -> Dictionary {
        let mut details = Dictionary::default();
        details.insert("agent".to_owned(), Value::String(self.agent.clone()));
        details.insert(
            "roles".to_owned(),
            Value::Dictionary(self.roles.to_dictionary()),
        );
        if let Some(authentication_id) = &self.authentication_id {
            details.insert(
                "authid".to_owned(),
                Value::String(authentication_id.clone()),
            );
        }
        if !self.authentication_methods.is_empty() {
            details.insert(
                "authmethods".to_owned(),
                Value::List(
                    self.authentication_methods
                        .iter()
                        .cloned()
                        .map(Value::String)
                        .collect(),
                ),
            );
        }
        details
    }
}

/// An established session: what we sent, and what the router answered.
#[derive(Debug, Clone)]
pub struct EstablishedSession {
    /// The session ID assigned by the router.
    pub session_id: Id,
    /// The HELLO details the client sent.
    pub hello: HelloDetails,
    /// The WELCOME details the router answered with.
    pub welcome: Dictionary,
}

/// A lifecycle event, broadcast in the order transitions occurred.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The router welcomed the session.
    Established(EstablishedSession),
    /// The connection broke; the record says why the session ended.
    Broken(SessionCloseRecord),
    /// A connection-level error occurred.
    Error(ChannelTransmittableError),
}

/// One connection epoch's completion signals.
///
/// A fresh pair is installed whenever the epoch resets, so waiters always hold the signals of
/// the epoch they observed.
#[derive(Default)]
struct Epoch {
    open: Signal<ChannelTransmittableResult<EstablishedSession>>,
    close: Signal<ChannelTransmittableResult<GoodbyeMessage>>,
}

/// The client half of the session lifecycle.
///
/// The engine is driven from two directions: the transport layer hands inbound session-control
/// messages to [`Self::handle_message`] and reports connection events, while the application
/// opens and closes sessions. All methods take `&self`; the engine is shared behind [`Arc`] and
/// safe under concurrent driving. Exactly-once guarantees (one established notification, one
/// close record, one resolution per signal) hold per epoch regardless of message races.
pub struct Session {
    config: SessionConfig,
    authenticator: Box<dyn ClientAuthenticator>,
    sink: Arc<dyn MessageSink>,

    state: Mutex<SessionState>,
    connected: AtomicBool,
    // Zero means no session.
    session_id: AtomicU64,
    goodbye_sent: AtomicBool,
    sent_hello: Mutex<Option<HelloDetails>>,
    close_record: Mutex<Option<SessionCloseRecord>>,
    epoch: Mutex<Epoch>,

    session_event_tx: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Creates a new session engine.
    pub fn new(
        config: SessionConfig,
        authenticator: Box<dyn ClientAuthenticator>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        let (session_event_tx, _) = broadcast::channel(16);
        Self {
            config,
            authenticator,
            sink,
            state: Mutex::new(SessionState::default()),
            connected: AtomicBool::new(false),
            session_id: AtomicU64::new(0),
            goodbye_sent: AtomicBool::new(false),
            sent_hello: Mutex::new(None),
            close_record: Mutex::new(None),
            epoch: Mutex::new(Epoch::default()),
            session_event_tx,
        }
    }

    /// The session name, mostly for logging.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Whether a session is established.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// The current session ID, as assigned by the router.
    pub fn session_id(&self) -> Option<Id> {
        Id::try_from(self.session_id.load(Ordering::Acquire)).ok()
    }

    /// Receiver for the current epoch's established signal.
    pub fn established_rx(&self) -> SignalReceiver<ChannelTransmittableResult<EstablishedSession>> {
        lock(&self.epoch).open.subscribe()
    }

    /// Receiver for the current epoch's closed signal, fulfilled with the router's GOODBYE
    /// acknowledgement.
    pub fn closed_rx(&self) -> SignalReceiver<ChannelTransmittableResult<GoodbyeMessage>> {
        lock(&self.epoch).close.subscribe()
    }

    /// Receiver channel for lifecycle events.
    pub fn session_event_rx(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_event_tx.subscribe()
    }

    fn transition_state(&self, next: SessionState) -> Result<()> {
        let mut state = lock(&self.state);
        if *state == next {
            return Ok(());
        }
        if !state.allowed_state_transition(&next) {
            return Err(BasicError::Internal(format!(
                "invalid state transition from {:?} to {next:?}",
                *state
            ))
            .into());
        }
        trace!(
            "Session {} transitioned from {:?} to {next:?}",
            self.config.name, *state
        );
        *state = next;
        Ok(())
    }

    /// Records the terminal cause for the epoch; the first cause wins.
    fn record_close(
        &self,
        cause: SessionCloseCause,
        details: Dictionary,
        reason: Option<Uri>,
    ) -> SessionCloseRecord {
        let mut close_record = lock(&self.close_record);
        match &*close_record {
            Some(record) => {
                debug!(
                    "Session {} already closed by {}; ignoring later {cause} cause",
                    self.config.name, record.cause
                );
                record.clone()
            }
            None => {
                let record = SessionCloseRecord {
                    cause,
                    session_id: self.session_id(),
                    details,
                    reason,
                };
                *close_record = Some(record.clone());
                record
            }
        }
    }

    /// The terminal cause recorded for the current epoch, if any.
    pub fn close_record(&self) -> Option<SessionCloseRecord> {
        lock(&self.close_record).clone()
    }

    fn fail_signals(&self, error: &ChannelTransmittableError) {
        let epoch = lock(&self.epoch);
        epoch.open.fulfill(Err(error.clone()));
        epoch.close.fulfill(Err(error.clone()));
    }

    /// The transport is ready to exchange messages: send HELLO.
    pub fn on_connection_open(&self) -> Result<()> {
        match self.state() {
            SessionState::Disconnected => (),
            state => {
                return Err(BasicError::NotAllowed(format!(
                    "cannot open a connection in the {state:?} state"
                ))
                .into());
            }
        }

        let hello = HelloDetails {
            agent: self.config.agent.clone(),
            roles: PeerRoles::new(
                self.config.roles.clone(),
                PubSubFeatures {},
                RpcFeatures {
                    call_canceling: true,
                    progressive_call_results: true,
                    call_timeout: false,
                    caller_identification: true,
                },
            ),
            authentication_id: self.authenticator.authentication_id(),
            authentication_methods: self.authenticator.authentication_methods(),
        };
        *lock(&self.sent_hello) = Some(hello.clone());

        info!(
            "Session {} connecting to realm {}",
            self.config.name, self.config.realm
        );
        self.sink.send(Message::Hello(HelloMessage {
            realm: self.config.realm.clone(),
            details: hello.to_dictionary(),
        }))?;
        self.transition_state(SessionState::HelloSent)
    }

    /// Handles an inbound session-control message.
    ///
    /// Handshake-sequence violations are fatal: the router is told why in an ABORT, the error is
    /// raised to observers, and the epoch ends in [`SessionState::Broken`]. Messages arriving
    /// after the epoch has already terminated are logged and ignored.
    pub async fn handle_message(&self, message: Message) -> Result<()> {
        trace!(
            "Session {} received message: {message:?}",
            self.config.name
        );
        if matches!(self.state(), SessionState::Broken | SessionState::Closed) {
            debug!(
                "Session {} ignoring {} message received after termination",
                self.config.name,
                message.message_name()
            );
            return Ok(());
        }
        if let Err(err) = self.handle_message_on_state_machine(message).await {
            // The router learns why we gave up before local observers do.
            self.sink.send(self.abort_message(&err)).ok();
            self.transition_state(SessionState::Broken).ok();
            self.on_connection_error(&err);
            return Err(err);
        }
        Ok(())
    }

    fn abort_message(&self, error: &Error) -> Message {
        match error.downcast_ref::<AuthenticationError>() {
            Some(error) => Message::Abort(AbortMessage {
                details: error.details.clone(),
                reason: error.reason.clone(),
                ..Default::default()
            }),
            None => abort_message_for_error(error),
        }
    }

    async fn handle_message_on_state_machine(&self, message: Message) -> Result<()> {
        match message {
            Message::Challenge(message) => self.on_challenge(message).await,
            Message::Welcome(message) => self.on_welcome(message),
            Message::Abort(message) => self.on_abort(message),
            Message::Goodbye(message) => self.on_goodbye(message),
            message => Err(InteractionError::ProtocolViolation(format!(
                "received unexpected {} message on a client session",
                message.message_name()
            ))
            .into()),
        }
    }

    async fn on_challenge(&self, message: ChallengeMessage) -> Result<()> {
        match self.state() {
            SessionState::HelloSent | SessionState::Authenticating => (),
            state => {
                return Err(InteractionError::ProtocolViolation(format!(
                    "received CHALLENGE message in the {state:?} state"
                ))
                .into());
            }
        }

        let response = self
            .authenticator
            .authenticate(&message.auth_method, &message.extra)
            .await?;

        // The router may have welcomed us while the challenge response was being computed.
        if self.state() == SessionState::Established {
            debug!(
                "Session {} skipping AUTHENTICATE: session established during authentication",
                self.config.name
            );
            return Ok(());
        }

        self.sink.send(Message::Authenticate(AuthenticateMessage {
            signature: response.signature,
            extra: response.extra,
        }))?;
        self.transition_state(SessionState::Authenticating)
    }

    fn on_welcome(&self, message: WelcomeMessage) -> Result<()> {
        match self.state() {
            SessionState::HelloSent | SessionState::Authenticating => (),
            SessionState::Established => {
                warn!(
                    "Session {} ignoring duplicate WELCOME for session {}",
                    self.config.name, message.session
                );
                return Ok(());
            }
            state => {
                return Err(InteractionError::ProtocolViolation(format!(
                    "received WELCOME message in the {state:?} state"
                ))
                .into());
            }
        }

        // Only the caller that flips the flag fires the established notification, so a racing
        // duplicate WELCOME cannot double-fire it.
        if self
            .connected
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(
                "Session {} ignoring duplicate WELCOME for session {}",
                self.config.name, message.session
            );
            return Ok(());
        }

        self.session_id
            .store(message.session.value(), Ordering::Release);
        self.transition_state(SessionState::Established)?;

        let hello = match lock(&self.sent_hello).clone() {
            Some(hello) => hello,
            None => {
                return Err(BasicError::Internal(
                    "no HELLO recorded for the established session".to_owned(),
                )
                .into());
            }
        };
        info!(
            "Session {} started session {} on realm {}",
            self.config.name, message.session, self.config.realm
        );
        let established = EstablishedSession {
            session_id: message.session,
            hello,
            welcome: message.details,
        };
        lock(&self.epoch).open.fulfill(Ok(established.clone()));
        self.session_event_tx
            .send(SessionEvent::Established(established))
            .ok();
        Ok(())
    }

    fn on_abort(&self, message: AbortMessage) -> Result<()> {
        match self.state() {
            SessionState::HelloSent
            | SessionState::Authenticating
            | SessionState::Established
            | SessionState::Closing => (),
            state => {
                return Err(InteractionError::ProtocolViolation(format!(
                    "received ABORT message in the {state:?} state"
                ))
                .into());
            }
        }

        warn!(
            "Session {} aborted by the router: {}",
            self.config.name, message.reason
        );
        self.record_close(
            SessionCloseCause::Abort,
            message.details,
            Some(message.reason),
        );
        self.transition_state(SessionState::Closing)?;
        self.transition_state(SessionState::Closed)?;
        self.sink.close();
        Ok(())
    }

    fn on_goodbye(&self, message: GoodbyeMessage) -> Result<()> {
        match self.state() {
            SessionState::Established | SessionState::Closing => (),
            state => {
                return Err(InteractionError::ProtocolViolation(format!(
                    "received GOODBYE message in the {state:?} state"
                ))
                .into());
            }
        }

        self.record_close(
            SessionCloseCause::Goodbye,
            message.details.clone(),
            Some(message.reason.clone()),
        );
        if self.goodbye_sent.load(Ordering::Acquire) {
            // The router acknowledged our GOODBYE.
            info!("Session {} closed", self.config.name);
            lock(&self.epoch).close.fulfill(Ok(message));
        } else {
            // The router is initiating the close; echo and leave.
            info!(
                "Session {} closing: GOODBYE received from the router ({})",
                self.config.name, message.reason
            );
            self.sink.send(goodbye_and_out())?;
        }
        self.transition_state(SessionState::Closing)?;
        self.transition_state(SessionState::Closed)?;
        self.sink.close();
        Ok(())
    }

    /// Leaves the realm gracefully by sending GOODBYE.
    ///
    /// The session is closed once the router acknowledges, which fulfills the closed signal. A
    /// second call is an idempotent no-op.
    pub fn close(&self, reason: Option<CloseReason>, details: Option<Dictionary>) -> Result<()> {
        if !self.connected() {
            return Err(NotConnectedError.into());
        }
        if self
            .goodbye_sent
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Session {} already sent GOODBYE", self.config.name);
            return Ok(());
        }

        info!("Session {} leaving the realm", self.config.name);
        self.sink.send(Message::Goodbye(GoodbyeMessage {
            details: details.unwrap_or_default(),
            reason: reason.unwrap_or(CloseReason::Normal).uri(),
        }))?;
        self.transition_state(SessionState::Closing)
    }

    /// The transport dropped, expectedly or not.
    ///
    /// Resolves the epoch's signals with the recorded terminal cause (a disconnection, if no
    /// terminal message was seen), resets all per-epoch state, and returns the record. The
    /// engine is ready for a fresh [`Self::on_connection_open`] afterwards.
    pub fn on_connection_closed(&self) -> SessionCloseRecord {
        if self.state() == SessionState::Disconnected {
            debug!(
                "Session {} reported a closed connection while disconnected",
                self.config.name
            );
            return SessionCloseRecord::disconnection(None);
        }

        self.transition_state(SessionState::Broken).ok();
        let record =
            self.record_close(SessionCloseCause::Disconnection, Dictionary::default(), None);
        let error = ChannelTransmittableError::from(&Error::new(ConnectionBrokenError::new(
            record.clone(),
        )));

        // Resolve the old epoch's signals before replacing them, so no waiter is stranded.
        {
            let mut epoch = lock(&self.epoch);
            epoch.open.fulfill(Err(error.clone()));
            epoch.close.fulfill(Err(error));
            *epoch = Epoch::default();
        }

        self.connected.store(false, Ordering::Release);
        self.session_id.store(0, Ordering::Release);
        self.goodbye_sent.store(false, Ordering::Release);
        lock(&self.sent_hello).take();
        lock(&self.close_record).take();
        self.transition_state(SessionState::Disconnected).ok();

        warn!(
            "Session {} connection closed ({})",
            self.config.name, record.cause
        );
        self.session_event_tx
            .send(SessionEvent::Broken(record.clone()))
            .ok();
        record
    }

    /// The transport reported an error not tied to a handshake step.
    ///
    /// Fails the epoch's signals if they are not yet fulfilled, without resetting epoch state; a
    /// connection-closed report is expected to follow from the transport.
    pub fn on_connection_error(&self, error: &Error) {
        warn!(
            "Connection error for session {}: {error:#}",
            self.config.name
        );
        let error = ChannelTransmittableError::from(error);
        self.fail_signals(&error);
        self.session_event_tx
            .send(SessionEvent::Error(error))
            .ok();
    }
}
