use std::{
    fmt,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Duration,
};

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Stream,
    StreamExt,
};
use log::{
    debug,
    trace,
    warn,
};
use tokio::sync::{
    broadcast,
    mpsc,
};
use tokio_util::sync::CancellationToken;

use crate::{
    core::{
        cancel::CallCancelMode,
        error::{
            BasicError,
            ChannelTransmittableError,
            ChannelTransmittableResult,
            InteractionError,
        },
        hash::HashMap,
        id::{
            Id,
            IdAllocator,
            SequentialIdAllocator,
        },
        types::{
            Dictionary,
            List,
            Value,
        },
        uri::Uri,
    },
    message::message::{
        CallMessage,
        CancelMessage,
        ErrorMessage,
        Message,
        ResultMessage,
    },
    rpc::shape::{
        CallDescriptor,
        DispatchKind,
    },
    transport::sink::MessageSink,
};

/// A procedure call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RpcCall {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
    pub timeout: Option<Duration>,
}

/// A result of a procedure call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RpcResult {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
    pub progress: bool,
}

/// Per-invocation extras supplied by the caller.
///
/// Progressive dispatch requires a progress sender; no other kind accepts one. A cancellation
/// token is honored only when the call's descriptor accepts cancellation.
#[derive(Debug, Default)]
pub struct CallContext {
    pub cancellation: Option<CancellationToken>,
    pub progress: Option<mpsc::UnboundedSender<RpcResult>>,
}

/// The caller-facing product of one invocation, shaped by the call's dispatch kind.
pub enum CallOutcome {
    /// The single result, already awaited (synchronous dispatch).
    Value(RpcResult),
    /// A handle that resolves to the single result (deferred and progressive dispatch).
    Pending(PendingCall),
    /// A sequence that yields each result as it arrives (streaming dispatch).
    Streaming(StreamingCall),
}

impl fmt::Debug for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(result) => f.debug_tuple("Value").field(result).finish(),
            Self::Pending(pending) => f.debug_tuple("Pending").field(pending).finish(),
            Self::Streaming(streaming) => f.debug_tuple("Streaming").field(streaming).finish(),
        }
    }
}

fn canceled_error(request_id: Id) -> ChannelTransmittableError {
    ChannelTransmittableError {
        reason: Uri::from_known("wamp.error.canceled"),
        message: InteractionError::Canceled.to_string(),
        request_id: Some(request_id),
    }
}

/// An in-flight call's entry in the pending-call registry.
struct CallRoute {
    kind: DispatchKind,
    result_tx: mpsc::UnboundedSender<ChannelTransmittableResult<RpcResult>>,
    progress_tx: Option<mpsc::UnboundedSender<RpcResult>>,
    done_tx: broadcast::Sender<()>,
}

struct CallerState {
    name: String,
    sink: Arc<dyn MessageSink>,
    id_allocator: SequentialIdAllocator,
    routes: Mutex<HashMap<Id, CallRoute>>,
}

impl CallerState {
    fn routes(&self) -> MutexGuard<'_, HashMap<Id, CallRoute>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, request_id: Id, route: CallRoute) {
        self.routes().insert(request_id, route);
    }

    /// Removes the route, stopping its cancellation watcher.
    fn deregister(&self, request_id: Id) -> Option<CallRoute> {
        let route = self.routes().remove(&request_id);
        if let Some(route) = &route {
            route.done_tx.send(()).ok();
        }
        route
    }

    fn send_cancel(&self, request_id: Id, mode: CallCancelMode) -> Result<()> {
        self.sink.send(Message::Cancel(CancelMessage {
            call_request: request_id,
            options: Dictionary::from_iter([(
                "mode".to_owned(),
                Value::String(mode.into()),
            )]),
        }))
    }

    /// Cancels the call locally: deregisters, then best-effort CANCEL, then resolves with a
    /// cancellation error. A late reply from the router lands on the unknown-ID path.
    fn cancel_call(&self, request_id: Id) {
        let route = match self.deregister(request_id) {
            Some(route) => route,
            None => return,
        };
        if let Err(err) = self.send_cancel(request_id, CallCancelMode::KillNoWait) {
            debug!(
                "Failed to send CANCEL for call {request_id} of {}: {err}",
                self.name
            );
        }
        route.result_tx.send(Err(canceled_error(request_id))).ok();
    }

    /// Interrupts the call but leaves it registered, so the router produces the terminal answer.
    fn kill_call(&self, request_id: Id) -> Result<()> {
        self.send_cancel(request_id, CallCancelMode::Kill)
    }

    /// The caller's handle was dropped without a resolution.
    fn abandon_call(&self, request_id: Id) {
        if self.deregister(request_id).is_some() {
            debug!("Abandoning call {request_id} of {}", self.name);
            self.send_cancel(request_id, CallCancelMode::KillNoWait).ok();
        }
    }
}

/// The call dispatcher.
///
/// One invocation entry point ([`Caller::invoke`]) serves all four dispatch kinds: the call's
/// [`CallDescriptor`] decides whether the caller gets the result directly, a pending handle, or
/// a result sequence. Routes are registered before the CALL is sent, so a response can never
/// race its own registration, and responses for unregistered request IDs (late replies for
/// canceled calls, duplicates) are discarded without error.
#[derive(Clone)]
pub struct Caller {
    state: Arc<CallerState>,
}

impl Caller {
    /// Creates a new caller sending over the given sink.
    pub fn new(name: String, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            state: Arc::new(CallerState {
                name,
                sink,
                id_allocator: SequentialIdAllocator::default(),
                routes: Mutex::new(HashMap::default()),
            }),
        }
    }

    /// The number of calls awaiting a response.
    pub fn outstanding_calls(&self) -> usize {
        self.state.routes().len()
    }

    /// Invokes a procedure according to its classified descriptor.
    pub async fn invoke(
        &self,
        descriptor: &CallDescriptor,
        call: RpcCall,
        context: CallContext,
    ) -> Result<CallOutcome> {
        let progress_tx = match (descriptor.kind, context.progress) {
            (DispatchKind::Progressive, Some(progress_tx)) => Some(progress_tx),
            (DispatchKind::Progressive, None) => {
                return Err(BasicError::InvalidArgument(
                    "progressive dispatch requires a progress sender".to_owned(),
                )
                .into());
            }
            (_, Some(_)) => {
                return Err(BasicError::InvalidArgument(
                    "only progressive dispatch accepts a progress sender".to_owned(),
                )
                .into());
            }
            (_, None) => None,
        };
        let cancellation = match context.cancellation {
            Some(_) if !descriptor.accepts_cancellation => {
                warn!(
                    "Ignoring cancellation token for {}: the call does not accept cancellation",
                    descriptor.procedure
                );
                None
            }
            cancellation => cancellation,
        };

        let request_id = self.state.id_allocator.generate_id().await;
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let (done_tx, _) = broadcast::channel(1);
        self.state.register(
            request_id,
            CallRoute {
                kind: descriptor.kind,
                result_tx,
                progress_tx,
                done_tx: done_tx.clone(),
            },
        );

        let mut options = Dictionary::default();
        if matches!(
            descriptor.kind,
            DispatchKind::Progressive | DispatchKind::Streaming
        ) {
            options.insert("receive_progress".to_owned(), Value::Bool(true));
        }
        if let Some(timeout) = call.timeout {
            options.insert(
                "timeout".to_owned(),
                Value::Integer(timeout.as_millis() as u64),
            );
        }

        trace!(
            "Caller {} issuing call {request_id} to {}",
            self.state.name, descriptor.procedure
        );
        if let Err(err) = self.state.sink.send(Message::Call(CallMessage {
            request: request_id,
            options,
            procedure: descriptor.procedure.clone(),
            arguments: call.arguments,
            arguments_keyword: call.arguments_keyword,
        })) {
            self.state.deregister(request_id);
            return Err(err);
        }

        if let Some(token) = cancellation {
            let state = self.state.clone();
            let mut done_rx = done_tx.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Canceling call {request_id}: cancellation token fired");
                        state.cancel_call(request_id);
                    }
                    _ = done_rx.recv() => (),
                }
            });
        }

        match descriptor.kind {
            DispatchKind::Sync => {
                let pending = PendingCall::new(request_id, self.state.clone(), result_rx);
                Ok(CallOutcome::Value(pending.result().await?))
            }
            DispatchKind::Deferred | DispatchKind::Progressive => Ok(CallOutcome::Pending(
                PendingCall::new(request_id, self.state.clone(), result_rx),
            )),
            DispatchKind::Streaming => Ok(CallOutcome::Streaming(StreamingCall::new(
                request_id,
                self.state.clone(),
                result_rx,
            ))),
        }
    }

    /// Handles an inbound RESULT or ERROR message, resolving the registered route.
    pub fn handle_message(&self, message: Message) -> Result<()> {
        match message {
            Message::Result(message) => self.handle_result(message),
            Message::Error(message) if message.request_type == CallMessage::TAG => {
                self.handle_error(message)
            }
            message => Err(InteractionError::ProtocolViolation(format!(
                "caller cannot handle {} message",
                message.message_name()
            ))
            .into()),
        }
    }

    fn handle_result(&self, message: ResultMessage) -> Result<()> {
        let request_id = message.call_request;
        let progress = message
            .details
            .get("progress")
            .and_then(|value| value.bool())
            .unwrap_or(false);
        let result = RpcResult {
            arguments: message.yield_arguments,
            arguments_keyword: message.yield_arguments_keyword,
            progress,
        };

        let mut routes = self.state.routes();
        let route = match routes.get(&request_id) {
            Some(route) => route,
            None => {
                debug!(
                    "Caller {} discarding RESULT for unknown call {request_id}",
                    self.state.name
                );
                return Ok(());
            }
        };

        let finished = match route.kind {
            // The stream interprets the progress flag itself; every frame flows through.
            DispatchKind::Streaming => {
                route.result_tx.send(Ok(result)).ok();
                !progress
            }
            DispatchKind::Progressive => {
                if progress {
                    match &route.progress_tx {
                        Some(progress_tx) => {
                            if progress_tx.send(result).is_err() {
                                debug!(
                                    "Progress sink for call {request_id} of {} was dropped",
                                    self.state.name
                                );
                            }
                        }
                        None => debug!(
                            "No progress sink registered for progressive call {request_id}"
                        ),
                    }
                    false
                } else {
                    route.result_tx.send(Ok(result)).ok();
                    true
                }
            }
            DispatchKind::Sync | DispatchKind::Deferred => {
                if progress {
                    warn!(
                        "Caller {} skipping unexpected progressive RESULT for call {request_id}",
                        self.state.name
                    );
                    false
                } else {
                    route.result_tx.send(Ok(result)).ok();
                    true
                }
            }
        };

        if finished {
            if let Some(route) = routes.remove(&request_id) {
                route.done_tx.send(()).ok();
            }
        }
        Ok(())
    }

    fn handle_error(&self, message: ErrorMessage) -> Result<()> {
        let request_id = message.request;
        let error = ChannelTransmittableError::try_from(&Message::Error(message))?;
        match self.state.deregister(request_id) {
            Some(route) => {
                route.result_tx.send(Err(error)).ok();
            }
            None => debug!(
                "Caller {} discarding ERROR for unknown call {request_id}",
                self.state.name
            ),
        }
        Ok(())
    }

    /// Fails every outstanding call, emptying the registry.
    ///
    /// Called when the connection breaks; late replies arriving afterward are discarded on the
    /// unknown-ID path.
    pub fn fail_all(&self, error: &Error) {
        let routes = std::mem::take(&mut *self.state.routes());
        if routes.is_empty() {
            return;
        }
        warn!(
            "Caller {} failing {} outstanding call(s): {error}",
            self.state.name,
            routes.len()
        );
        for (request_id, route) in routes {
            let mut error = ChannelTransmittableError::from(error);
            error.request_id = Some(request_id);
            route.result_tx.send(Err(error)).ok();
            route.done_tx.send(()).ok();
        }
    }
}

/// A pending call, expected to resolve to one result.
///
/// Dropping an unresolved handle abandons the call: the route is removed and a best-effort
/// CANCEL is sent.
pub struct PendingCall {
    request_id: Id,
    state: Arc<CallerState>,
    result_rx: mpsc::UnboundedReceiver<ChannelTransmittableResult<RpcResult>>,
    finished: bool,
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("request_id", &self.request_id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl PendingCall {
    fn new(
        request_id: Id,
        state: Arc<CallerState>,
        result_rx: mpsc::UnboundedReceiver<ChannelTransmittableResult<RpcResult>>,
    ) -> Self {
        Self {
            request_id,
            state,
            result_rx,
            finished: false,
        }
    }

    /// The call's request ID.
    pub fn request_id(&self) -> Id {
        self.request_id
    }

    /// Waits for the result of the procedure call.
    pub async fn result(mut self) -> Result<RpcResult> {
        loop {
            match self.result_rx.recv().await {
                Some(Ok(result)) if result.progress => {
                    debug!("Skipping progressive result for call {}", self.request_id);
                }
                Some(Ok(result)) => {
                    self.finished = true;
                    return Ok(result);
                }
                Some(Err(err)) => {
                    self.finished = true;
                    return Err(err.into_error());
                }
                None => {
                    self.finished = true;
                    return Err(Error::msg("call finished with no result"));
                }
            }
        }
    }

    /// Cancels the pending call.
    ///
    /// The call completes locally with a cancellation error; the router is told not to answer.
    pub fn cancel(&self) {
        self.state.cancel_call(self.request_id);
    }

    /// Kills the pending call.
    ///
    /// The router produces the terminal answer, which can still be read from [`Self::result`].
    pub fn kill(&self) -> Result<()> {
        self.state.kill_call(self.request_id)
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if !self.finished {
            self.state.abandon_call(self.request_id);
        }
    }
}

/// A streaming call: a push-based sequence of results.
///
/// Progress-flagged results are the elements; the final result terminates the sequence without
/// yielding. Dropping an unfinished sequence abandons the call.
pub struct StreamingCall {
    request_id: Id,
    state: Arc<CallerState>,
    result_rx: mpsc::UnboundedReceiver<ChannelTransmittableResult<RpcResult>>,
    done: bool,
}

impl fmt::Debug for StreamingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingCall")
            .field("request_id", &self.request_id)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl StreamingCall {
    fn new(
        request_id: Id,
        state: Arc<CallerState>,
        result_rx: mpsc::UnboundedReceiver<ChannelTransmittableResult<RpcResult>>,
    ) -> Self {
        Self {
            request_id,
            state,
            result_rx,
            done: false,
        }
    }

    /// The call's request ID.
    pub fn request_id(&self) -> Id {
        self.request_id
    }

    /// Whether the sequence has terminated.
    pub fn done(&self) -> bool {
        self.done
    }

    /// Waits for the next element of the sequence.
    ///
    /// Yields `Ok(None)` once the sequence terminates, and forever after. An error (a remote
    /// ERROR, a cancellation, or a broken connection) is surfaced once, then the sequence is
    /// terminated.
    pub async fn next(&mut self) -> Result<Option<RpcResult>> {
        if self.done {
            return Ok(None);
        }
        match self.result_rx.recv().await {
            Some(Ok(result)) if result.progress => Ok(Some(result)),
            Some(Ok(result)) => {
                self.done = true;
                if !result.arguments.is_empty() || !result.arguments_keyword.is_empty() {
                    debug!(
                        "Discarding payload on terminal RESULT for streaming call {}",
                        self.request_id
                    );
                }
                Ok(None)
            }
            Some(Err(err)) => {
                self.done = true;
                Err(err.into_error())
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    /// Cancels the call and stops further pushes.
    ///
    /// The sequence terminates with a cancellation error on its next element.
    pub fn cancel(&self) {
        self.state.cancel_call(self.request_id);
    }

    /// Kills the call, leaving it registered so the router produces the terminal answer.
    pub fn kill(&self) -> Result<()> {
        self.state.kill_call(self.request_id)
    }

    /// Wraps the sequence as a stream of results.
    ///
    /// An error is the stream's final item.
    pub fn into_stream(self) -> impl Stream<Item = Result<RpcResult>> {
        futures_util::stream::unfold(self, move |mut call| async {
            match call.next().await {
                Ok(Some(result)) => Some((Ok(result), call)),
                Ok(None) => None,
                Err(err) => Some((Err(err), call)),
            }
        })
        .boxed()
    }
}

impl Drop for StreamingCall {
    fn drop(&mut self) {
        if !self.done {
            self.state.abandon_call(self.request_id);
        }
    }
}
