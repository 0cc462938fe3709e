use std::sync::Arc;

use anyhow::{
    Error,
    Result,
};
use thiserror::Error;
use tokio::sync::{
    broadcast,
    mpsc,
};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::authenticator::ClientAuthenticator,
    client::session::{
        EstablishedSession,
        Session,
        SessionConfig,
        SessionEvent,
    },
    core::{
        close::{
            CloseReason,
            ConnectionBrokenError,
        },
        error::{
            BasicError,
            ChannelTransmittableResult,
        },
        id::Id,
        signal::SignalReceiver,
        uri::Uri,
    },
    message::message::{
        CallMessage,
        GoodbyeMessage,
        Message,
    },
    rpc::{
        CallContext,
        CallDescriptor,
        CallOutcome,
        Caller,
        PendingCall,
        RpcCall,
        RpcResult,
        StreamingCall,
    },
    transport::sink::MessageSink,
};

/// Error for a client not being connected for some operation.
#[derive(Debug, Error)]
#[error("client is not connected")]
pub struct NotConnectedError;

/// A WAMP client: one session engine and one call dispatcher behind a single handle.
///
/// The transport driver feeds the client through [`Self::handle_message`] and the connection
/// event entry points; the application establishes sessions and issues calls through the same
/// handle. The client does not own a connection: outbound messages go through the
/// [`MessageSink`] it was constructed with.
pub struct Client {
    session: Arc<Session>,
    caller: Caller,
}

impl Client {
    /// Creates a new client sending over the given sink.
    pub fn new(
        config: SessionConfig,
        authenticator: Box<dyn ClientAuthenticator>,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self> {
        config.validate()?;
        let name = config.name.clone();
        Ok(Self {
            session: Arc::new(Session::new(config, authenticator, sink.clone())),
            caller: Caller::new(name, sink),
        })
    }

    /// The session engine.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Routes an inbound message: RPC responses to the dispatcher, session-control messages to
    /// the session engine.
    pub async fn handle_message(&self, message: Message) -> Result<()> {
        match message {
            message @ Message::Result(_) => self.caller.handle_message(message),
            Message::Error(message) if message.request_type == CallMessage::TAG => {
                self.caller.handle_message(Message::Error(message))
            }
            message => self.session.handle_message(message).await,
        }
    }

    /// The transport is ready: start the session handshake.
    pub fn on_connection_open(&self) -> Result<()> {
        self.session.on_connection_open()
    }

    /// The transport dropped: tear down the epoch and fail every outstanding call.
    pub fn on_connection_closed(&self) {
        let record = self.session.on_connection_closed();
        self.caller
            .fail_all(&Error::new(ConnectionBrokenError::new(record)));
    }

    /// The transport reported an error not tied to a handshake step.
    pub fn on_connection_error(&self, error: &Error) {
        self.session.on_connection_error(error);
    }

    /// Whether a session is established.
    pub fn connected(&self) -> bool {
        self.session.connected()
    }

    /// The current session ID, as assigned by the router.
    pub fn session_id(&self) -> Option<Id> {
        self.session.session_id()
    }

    /// Receiver for the current epoch's established signal.
    pub fn established_rx(&self) -> SignalReceiver<ChannelTransmittableResult<EstablishedSession>> {
        self.session.established_rx()
    }

    /// Receiver for the current epoch's closed signal.
    pub fn closed_rx(&self) -> SignalReceiver<ChannelTransmittableResult<GoodbyeMessage>> {
        self.session.closed_rx()
    }

    /// Receiver channel for lifecycle events.
    pub fn session_event_rx(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.session_event_rx()
    }

    /// Leaves the realm gracefully.
    pub fn close(&self, reason: Option<CloseReason>) -> Result<()> {
        self.session.close(reason, None)
    }

    /// The number of calls awaiting a response.
    pub fn outstanding_calls(&self) -> usize {
        self.caller.outstanding_calls()
    }

    /// Invokes a procedure according to its classified descriptor.
    ///
    /// Fails with [`NotConnectedError`] before any traffic if no session is established.
    pub async fn invoke(
        &self,
        descriptor: &CallDescriptor,
        call: RpcCall,
        context: CallContext,
    ) -> Result<CallOutcome> {
        if !self.session.connected() {
            return Err(NotConnectedError.into());
        }
        self.caller.invoke(descriptor, call, context).await
    }

    /// Calls a procedure and waits for its result.
    pub async fn call_and_wait(&self, procedure: Uri, call: RpcCall) -> Result<RpcResult> {
        match self
            .invoke(
                &CallDescriptor::synchronous(procedure),
                call,
                CallContext::default(),
            )
            .await?
        {
            CallOutcome::Value(result) => Ok(result),
            _ => Err(BasicError::Internal(
                "synchronous dispatch must produce a value".to_owned(),
            )
            .into()),
        }
    }

    /// Calls a procedure, expecting one result.
    ///
    /// The caller can choose what to do with the pending call.
    pub async fn call(
        &self,
        procedure: Uri,
        call: RpcCall,
        cancellation: Option<CancellationToken>,
    ) -> Result<PendingCall> {
        match self
            .invoke(
                &CallDescriptor::deferred(procedure),
                call,
                CallContext {
                    cancellation,
                    progress: None,
                },
            )
            .await?
        {
            CallOutcome::Pending(pending) => Ok(pending),
            _ => Err(BasicError::Internal(
                "deferred dispatch must produce a pending call".to_owned(),
            )
            .into()),
        }
    }

    /// Calls a procedure, delivering intermediate results to the given progress sender.
    pub async fn call_with_progress(
        &self,
        procedure: Uri,
        call: RpcCall,
        progress: mpsc::UnboundedSender<RpcResult>,
        cancellation: Option<CancellationToken>,
    ) -> Result<PendingCall> {
        match self
            .invoke(
                &CallDescriptor::progressive(procedure),
                call,
                CallContext {
                    cancellation,
                    progress: Some(progress),
                },
            )
            .await?
        {
            CallOutcome::Pending(pending) => Ok(pending),
            _ => Err(BasicError::Internal(
                "progressive dispatch must produce a pending call".to_owned(),
            )
            .into()),
        }
    }

    /// Calls a procedure whose results arrive as a push-based sequence.
    pub async fn call_streaming(
        &self,
        procedure: Uri,
        call: RpcCall,
        cancellation: Option<CancellationToken>,
    ) -> Result<StreamingCall> {
        match self
            .invoke(
                &CallDescriptor::streaming(procedure),
                call,
                CallContext {
                    cancellation,
                    progress: None,
                },
            )
            .await?
        {
            CallOutcome::Streaming(streaming) => Ok(streaming),
            _ => Err(BasicError::Internal(
                "streaming dispatch must produce a result sequence".to_owned(),
            )
            .into()),
        }
    }
}
