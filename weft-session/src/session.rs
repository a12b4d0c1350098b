//! Session serving loop and its handle
//!
//! Each session owns one [`Tree`] and runs one task that is the only code
//! touching it. Everything else (HTTP handlers, background tasks, the
//! registry sweep) talks to the session through a [`SessionHandle`], which
//! ships commands and tree updates over a channel.
//!
//! ```text
//!          commands ─┐
//! transport.receive ─┼→ handle one step → flush: refresh → delta → outbox → tasks
//!       timer tick  ─┘
//! ```
//!
//! After an interruption the loop parks in `Disconnected`, applying updates
//! but sending nothing, until a new transport is reattached (full resync) or
//! the registry expires it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use weft_core::{
    ClientCallError, ClientEvent, CoreError, ErrorLog, ErrorSource, RecoveredError,
    RefreshConfig, SessionApi, Tree, TreeUpdate,
};
use weft_layout::{compare, LayoutReport, ShadowLayout};
use weft_types::wire::methods;
use weft_types::{ClientDescriptor, ComponentId, Envelope, LayoutMap, RpcError, Value, Viewport};

use crate::collaborators::{resolve_page, CurrentUrl, PageRouter};
use crate::error::{LayoutCheckError, NavigationError, TransportError};
use crate::host::Application;
use crate::lifecycle::{transition, LifecycleEvent, LifecycleState};
use crate::requests::RequestTracker;
use crate::transport::{CloseReason, Transport, CLOSE_NORMAL};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Period of the timer that drives component ticks.
    pub tick_interval: Duration,
    /// How long a correlated client request may stay unanswered.
    pub request_timeout: Duration,
    pub refresh: RefreshConfig,
    /// Tolerance for layout verification.
    pub layout_epsilon: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(30),
            refresh: RefreshConfig::default(),
            layout_epsilon: weft_layout::DEFAULT_EPSILON,
        }
    }
}

/// Opaque secret a client presents to resume its session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn generate() -> Self {
        SessionToken(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Loggable prefix; the full token never goes to logs.
    pub fn prefix(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl From<&str> for SessionToken {
    fn from(s: &str) -> Self {
        SessionToken(s.to_string())
    }
}

enum Command {
    Update(TreeUpdate),
    Send(Envelope),
    Navigate(String),
    Reattach(Arc<dyn Transport>),
    Close,
    Expire,
}

struct Shared {
    token: SessionToken,
    descriptor: ClientDescriptor,
    created_at: DateTime<Utc>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Sender<LifecycleState>,
    tracker: RequestTracker,
    errors: Mutex<ErrorLog>,
    disconnected_at: Mutex<Option<Instant>>,
    layout_epsilon: f64,
}

impl Shared {
    fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Apply `event` atomically; `None` if it is not allowed right now.
    fn apply(&self, event: LifecycleEvent) -> Option<LifecycleState> {
        let mut next = None;
        self.state.send_if_modified(|state| match transition(*state, event) {
            Some(to) => {
                let changed = to != *state;
                *state = to;
                next = Some(to);
                changed
            }
            None => false,
        });
        if let Some(to) = next {
            debug!(session = %self.token.prefix(), ?event, state = ?to, "lifecycle transition");
        }
        next
    }

    fn command(&self, command: Command) -> bool {
        !self.state().is_terminal() && self.commands.send(command).is_ok()
    }
}

/// Cheap, cloneable reference to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Start serving a session on `transport` for a client that completed
    /// its handshake.
    pub fn start(
        token: SessionToken,
        descriptor: ClientDescriptor,
        transport: Arc<dyn Transport>,
        app: &Application,
        config: &SessionConfig,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LifecycleState::Handshaking);
        let shared = Arc::new(Shared {
            token,
            descriptor: descriptor.clone(),
            created_at: Utc::now(),
            commands,
            state,
            tracker: RequestTracker::new(config.request_timeout),
            errors: Mutex::new(ErrorLog::new(config.refresh.error_log_capacity)),
            disconnected_at: Mutex::new(None),
            layout_epsilon: config.layout_epsilon,
        });
        shared.apply(LifecycleEvent::HandshakeCompleted);

        let mut tree = Tree::with_config(app.registry.clone(), config.refresh);
        tree.attach(descriptor.clone());
        tree.attach(app.services.clone());

        let session = SessionLoop {
            shared: shared.clone(),
            commands: command_rx,
            transport,
            tree,
            router: app.router.clone(),
            tasks: JoinSet::new(),
            tick_interval: config.tick_interval,
            errors_seen: 0,
        };
        info!(session = %shared.token.prefix(), url = %descriptor.url, "session started");
        tokio::spawn(session.run(descriptor.url));
        SessionHandle { shared }
    }

    pub fn token(&self) -> &SessionToken {
        &self.shared.token
    }

    pub fn descriptor(&self) -> &ClientDescriptor {
        &self.shared.descriptor
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.shared.created_at
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.shared.state.subscribe()
    }

    /// Wait until the session reaches `state`, or ends.
    pub async fn wait_for_state(&self, state: LifecycleState) -> LifecycleState {
        let mut rx = self.subscribe_state();
        let reached = rx
            .wait_for(|s| *s == state || s.is_terminal())
            .await
            .map(|current| *current);
        reached.unwrap_or_else(|_| self.state())
    }

    /// Wait until the session has ended.
    pub async fn closed(&self) -> LifecycleState {
        let mut rx = self.subscribe_state();
        let reached = rx.wait_for(|s| s.is_terminal()).await.map(|current| *current);
        reached.unwrap_or_else(|_| self.state())
    }

    /// When the transport was lost, if the session is disconnected.
    pub fn disconnected_since(&self) -> Option<Instant> {
        *self.shared.disconnected_at.lock()
    }

    /// Recovered errors, oldest first.
    pub fn errors(&self) -> Vec<RecoveredError> {
        self.shared.errors.lock().recent().cloned().collect()
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.tracker.pending()
    }

    pub fn send(&self, message: Envelope) -> bool {
        self.shared.command(Command::Send(message))
    }

    pub fn navigate(&self, url: impl Into<String>) -> bool {
        self.shared.command(Command::Navigate(url.into()))
    }

    /// Close the session from the server side.
    pub fn close(&self) -> bool {
        self.shared.command(Command::Close)
    }

    /// Run `f` against the tree between cycles and return its result.
    pub async fn inspect<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Tree) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let update: TreeUpdate = Box::new(move |tree: &mut Tree| {
            let _ = tx.send(f(tree));
        });
        if !self.shared.command(Command::Update(update)) {
            return None;
        }
        rx.await.ok()
    }

    /// Hand a fresh transport to a session whose client reconnected.
    pub(crate) fn reattach(&self, transport: Arc<dyn Transport>) -> bool {
        self.shared.state().is_resumable() && self.shared.command(Command::Reattach(transport))
    }

    /// Expire a disconnected session. Only succeeds from `Disconnected`.
    pub(crate) fn expire(&self) -> bool {
        if self.shared.apply(LifecycleEvent::LifetimeElapsed).is_none() {
            return false;
        }
        // the loop sees the state change; the command just wakes it
        let _ = self.shared.commands.send(Command::Expire);
        true
    }

    /// Send a correlated request and wait for the client's answer.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ClientCallError> {
        match self.state() {
            LifecycleState::Disconnected => return Err(ClientCallError::Disconnected),
            state if state.is_terminal() => return Err(ClientCallError::Closed),
            _ => {}
        }
        let tracker = &self.shared.tracker;
        let pending = tracker.register();
        let id = pending.id;
        if !self.send(Envelope::request(id, method, params)) {
            tracker.fail(id, ClientCallError::Closed);
        }
        tracker.wait(pending).await
    }

    /// Run code on the client and return its result.
    pub async fn evaluate_javascript(&self, code: &str) -> Result<Value, ClientCallError> {
        self.request(methods::EVALUATE_JAVASCRIPT, json!({ "code": code }))
            .await
    }

    /// Layout records as the client computed them.
    pub async fn client_layouts(&self) -> Result<LayoutMap, LayoutCheckError> {
        let value = self
            .request(methods::GET_COMPONENT_LAYOUTS, json!({}))
            .await?;
        serde_json::from_value(value).map_err(LayoutCheckError::Decode)
    }

    /// Compare the client's layout with the shadow layout of the same tree.
    pub async fn verify_layout(&self) -> Result<LayoutReport, LayoutCheckError> {
        let viewport = Viewport::new(
            self.shared.descriptor.window_width,
            self.shared.descriptor.window_height,
        );
        let shadow = self
            .inspect(move |tree| ShadowLayout::default().compute(tree, viewport))
            .await
            .ok_or(LayoutCheckError::Closed)?;
        let client = self.client_layouts().await?;
        let report = compare(&client, &shadow, self.shared.layout_epsilon);
        if !report.is_consistent() {
            warn!(
                session = %self.shared.token.prefix(),
                divergences = report.divergences.len(),
                "client layout diverges from shadow layout"
            );
        }
        Ok(report)
    }
}

impl SessionApi for SessionHandle {
    fn update(&self, update: TreeUpdate) -> bool {
        self.shared.command(Command::Update(update))
    }

    fn call_client(
        &self,
        method: &str,
        params: Value,
    ) -> BoxFuture<'static, Result<Value, ClientCallError>> {
        let handle = self.clone();
        let method = method.to_string();
        Box::pin(async move { handle.request(&method, params).await })
    }

    fn notify_client(&self, method: &str, params: Value) -> bool {
        self.send(Envelope::notification(method, params))
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("token", &self.shared.token.prefix())
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventParams {
    component_id: ComponentId,
    #[serde(alias = "name")]
    event_name: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateUpdateParams {
    component_id: ComponentId,
    delta_state: Map<String, Value>,
}

#[derive(Deserialize)]
struct NavigateParams {
    url: String,
}

struct SessionLoop {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    transport: Arc<dyn Transport>,
    tree: Tree,
    router: Arc<dyn PageRouter>,
    tasks: JoinSet<()>,
    tick_interval: Duration,
    errors_seen: u64,
}

impl SessionLoop {
    fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
        }
    }

    fn prefix(&self) -> &str {
        self.shared.token.prefix()
    }

    async fn run(mut self, initial_url: String) {
        let first = resolve_page(self.router.as_ref(), &initial_url, &self.shared.descriptor).await;
        apply_navigation(&mut self.tree, first);
        self.flush().await;

        loop {
            match self.shared.state() {
                LifecycleState::Active => self.serve().await,
                LifecycleState::Disconnected => self.wait_for_reattach().await,
                _ => break,
            }
        }
        self.teardown().await;
    }

    async fn serve(&mut self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.shared.state() == LifecycleState::Active {
            let transport = self.transport.clone();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shared.apply(LifecycleEvent::CloseRequested);
                    }
                },
                message = transport.receive() => match message {
                    Ok(message) => self.handle_incoming(message).await,
                    Err(TransportError::Closed(reason)) => self.transport_lost(reason),
                    Err(err) => {
                        self.tree.record_error(ErrorSource::Transport, None, err.to_string());
                        self.transport_lost(CloseReason::Interrupted);
                    }
                },
                _ = ticker.tick() => self.tree.tick(Instant::now().into_std()),
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => self.reap(joined),
            }
            if self.shared.state() == LifecycleState::Active {
                self.flush().await;
            }
        }
    }

    async fn wait_for_reattach(&mut self) {
        while self.shared.state() == LifecycleState::Disconnected {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Reattach(transport)) => self.resume(transport).await,
                    Some(Command::Send(Envelope::Request(request))) => {
                        if let weft_types::RequestId::Number(id) = request.id {
                            self.shared.tracker.fail(id, ClientCallError::Disconnected);
                        }
                    }
                    Some(Command::Send(message)) => {
                        debug!(session = %self.prefix(), method = ?message.method(), "dropping message while disconnected");
                    }
                    Some(Command::Update(update)) => {
                        self.apply_update(update);
                        self.refresh();
                    }
                    Some(Command::Navigate(url)) => self.start_navigation(url),
                    Some(Command::Close) | None => {
                        self.shared.apply(LifecycleEvent::CloseRequested);
                    }
                    Some(Command::Expire) => {}
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => self.reap(joined),
            }
            self.start_pending_work();
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Update(update) => self.apply_update(update),
            Command::Send(message) => self.send(&message).await,
            Command::Navigate(url) => self.start_navigation(url),
            Command::Reattach(transport) => self.resume(transport).await,
            Command::Close => {
                self.shared.apply(LifecycleEvent::CloseRequested);
            }
            Command::Expire => {}
        }
    }

    fn apply_update(&mut self, update: TreeUpdate) {
        let tree = &mut self.tree;
        if catch_unwind(AssertUnwindSafe(|| update(tree))).is_err() {
            self.tree
                .record_error(ErrorSource::Task, None, "tree update panicked");
        }
    }

    async fn resume(&mut self, transport: Arc<dyn Transport>) {
        if self.shared.apply(LifecycleEvent::Reattached).is_none() {
            transport.close(CLOSE_NORMAL, "session ended").await;
            return;
        }
        let previous = std::mem::replace(&mut self.transport, transport);
        if !previous.is_closed() {
            previous.close(CLOSE_NORMAL, "superseded by a new connection").await;
        }
        *self.shared.disconnected_at.lock() = None;
        info!(session = %self.prefix(), "client reattached; sending full state");

        if !self.refresh() {
            return;
        }
        let full = self.tree.full_state();
        self.send(&full.to_envelope()).await;
    }

    fn transport_lost(&mut self, reason: CloseReason) {
        match reason {
            CloseReason::Intentional => {
                info!(session = %self.prefix(), "client closed the session");
                self.shared.apply(LifecycleEvent::CloseRequested);
            }
            CloseReason::Interrupted => {
                if self.shared.apply(LifecycleEvent::TransportLost).is_some() {
                    info!(session = %self.prefix(), "transport interrupted; waiting for reconnect");
                    *self.shared.disconnected_at.lock() = Some(Instant::now());
                    self.shared.tracker.fail_all(ClientCallError::Disconnected);
                }
            }
        }
    }

    async fn send(&mut self, message: &Envelope) {
        let Err(err) = self.transport.send(message).await else {
            return;
        };
        if let Envelope::Request(request) = message {
            if let weft_types::RequestId::Number(id) = request.id {
                self.shared.tracker.fail(id, ClientCallError::Disconnected);
            }
        }
        match err {
            TransportError::Closed(reason) => self.transport_lost(reason),
            TransportError::Encode(err) => {
                error!(session = %self.prefix(), ?err, "failed to encode outgoing message");
                self.tree
                    .record_error(ErrorSource::Transport, None, err.to_string());
            }
            other => {
                self.tree
                    .record_error(ErrorSource::Transport, None, other.to_string());
                self.transport_lost(CloseReason::Interrupted);
            }
        }
    }

    /// Run a refresh cycle. Returns false if the session had to be closed.
    fn refresh(&mut self) -> bool {
        match self.tree.refresh() {
            Ok(stats) => {
                if stats.builds > 0 {
                    trace!(session = %self.prefix(), ?stats, "refresh complete");
                }
                true
            }
            Err(err @ CoreError::RefreshDiverged { .. }) => {
                error!(session = %self.prefix(), %err, "refresh diverged; closing session");
                self.tree
                    .record_error(ErrorSource::Build, None, err.to_string());
                self.shared.apply(LifecycleEvent::CloseRequested);
                false
            }
            Err(err) => {
                self.tree
                    .record_error(ErrorSource::Build, None, err.to_string());
                true
            }
        }
    }

    /// Refresh, then ship whatever the cycle produced.
    async fn flush(&mut self) {
        if !self.refresh() {
            self.sync_errors();
            return;
        }
        if let Some(delta) = self.tree.take_delta() {
            self.send(&delta.to_envelope()).await;
        }
        for message in self.tree.take_outbox() {
            self.send(&message).await;
        }
        self.start_pending_work();
    }

    /// Start navigations and background tasks queued by handlers.
    fn start_pending_work(&mut self) {
        for url in self.tree.take_navigations() {
            self.start_navigation(url);
        }
        for task in self.tree.take_tasks() {
            let api: Arc<dyn SessionApi> = Arc::new(self.handle());
            self.tasks.spawn(task(api));
        }
        self.sync_errors();
    }

    fn start_navigation(&mut self, url: String) {
        let router = self.router.clone();
        let handle = self.handle();
        let client = self.shared.descriptor.clone();
        self.tasks.spawn(async move {
            let result = resolve_page(router.as_ref(), &url, &client).await;
            handle.update(Box::new(move |tree: &mut Tree| apply_navigation(tree, result)));
        });
    }

    async fn handle_incoming(&mut self, message: Envelope) {
        match message {
            Envelope::Response(response) => {
                self.shared.tracker.resolve(response);
            }
            Envelope::Notification(notification) => {
                if let Err(err) = self.dispatch(&notification.method, notification.params) {
                    debug!(session = %self.prefix(), method = %notification.method, %err, "notification not handled");
                }
            }
            Envelope::Request(request) => {
                let reply = match self.dispatch(&request.method, request.params) {
                    Ok(result) => Envelope::response_ok(request.id, result),
                    Err(err) => Envelope::response_err(request.id, err),
                };
                self.send(&reply).await;
            }
        }
    }

    fn dispatch(&mut self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            methods::PING => Ok(json!("pong")),
            methods::COMPONENT_EVENT => {
                let params: EventParams = self.decode(method, params)?;
                let event = ClientEvent::new(params.component_id, params.event_name, params.payload);
                match self.tree.dispatch_event(&event) {
                    Ok(_) => Ok(Value::Null),
                    Err(err) => Err(self.client_error(Some(event.target), err)),
                }
            }
            methods::COMPONENT_STATE_UPDATE => {
                let params: StateUpdateParams = self.decode(method, params)?;
                match self
                    .tree
                    .apply_client_state(params.component_id, &params.delta_state)
                {
                    Ok(_) => Ok(Value::Null),
                    Err(err) => Err(self.client_error(Some(params.component_id), err)),
                }
            }
            methods::NAVIGATE => {
                let params: NavigateParams = self.decode(method, params)?;
                self.start_navigation(params.url);
                Ok(Value::Null)
            }
            methods::CLOSE_SESSION => {
                info!(session = %self.prefix(), "client requested close");
                self.shared.apply(LifecycleEvent::CloseRequested);
                Ok(Value::Null)
            }
            other => Err(RpcError::method_not_found(other)),
        }
    }

    fn decode<T: DeserializeOwned>(&mut self, method: &str, params: Value) -> Result<T, RpcError> {
        serde_json::from_value(params).map_err(|err| {
            let message = format!("malformed {method} params: {err}");
            self.tree
                .record_error(ErrorSource::ClientInput, None, message.clone());
            RpcError::new(RpcError::INVALID_PARAMS, message)
        })
    }

    fn client_error(&mut self, component: Option<ComponentId>, err: CoreError) -> RpcError {
        // stale ids are routine right after a rebuild
        self.tree
            .record_error(ErrorSource::ClientInput, component, err.to_string());
        RpcError::new(RpcError::INVALID_PARAMS, err.to_string())
    }

    fn reap(&mut self, joined: Result<(), JoinError>) {
        if let Err(err) = joined {
            if err.is_panic() {
                self.tree
                    .record_error(ErrorSource::Task, None, "background task panicked");
            }
        }
    }

    fn sync_errors(&mut self) {
        let total = self.tree.errors().total();
        if total != self.errors_seen {
            *self.shared.errors.lock() = self.tree.errors().clone();
            self.errors_seen = total;
        }
    }

    async fn teardown(mut self) {
        self.tasks.shutdown().await;
        self.tree.teardown();
        self.shared.tracker.fail_all(ClientCallError::Closed);
        if !self.transport.is_closed() {
            self.transport.close(CLOSE_NORMAL, "session closed").await;
        }
        self.sync_errors();
        info!(session = %self.prefix(), state = ?self.shared.state(), "session ended");
    }
}

fn apply_navigation(tree: &mut Tree, result: Result<(String, weft_core::Element), NavigationError>) {
    match result {
        Ok((url, page)) => {
            debug!(%url, "navigated");
            tree.set_page(page);
            tree.attach(CurrentUrl(url));
        }
        Err(err) => tree.record_error(ErrorSource::Navigation, None, err.to_string()),
    }
}
