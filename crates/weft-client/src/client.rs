//! Session orchestration.
//!
//! One [`Client`] owns one page and drives it through the full lifecycle:
//! preload installation, binding exposure, queue drain, credential flow,
//! store injection, listener attachment, and teardown. Events flow out of
//! the binding-call pump through the bridge dispatcher; navigations re-enter
//! the injection pipeline; the recovery supervisor repairs broken wiring in
//! the background. All re-entrant paths (inject, attach, destroy,
//! disconnect) are guarded so overlapping calls are no-ops rather than
//! duplicated work.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch, Mutex as AsyncMutex};
use uuid::Uuid;

use weft_bridge::preload::PLACEHOLDER_CALLBACKS;
use weft_bridge::{
    attach, preload, wait_for_function, BindingCall, BindingRegistry, BridgeDispatcher,
    BridgeMessage, ControlSignal, ListenerSet, Navigation, PageContext, Preloader, RecoveryHooks,
    RecoverySupervisor, TickReport, CALLBACK_NAMES,
};
use weft_types::{
    ClientConfig, ClientInfo, DisconnectReason, Event, RemoteState, SessionState,
};

use crate::auth::AuthStrategy;
use crate::driver::MessengerPage;
use crate::error::ClientError;
use crate::lifecycle::{Lifecycle, LifecycleAction};
use crate::scripts;
use crate::webcache::VersionCache;

/// How many 100ms beats [`Client::logout`] waits for the page to report the
/// logout before proceeding with host-side teardown.
const LOGOUT_GRACE_BEATS: u32 = 10;

/// One messenger session over one page.
pub struct Client<P: MessengerPage + 'static> {
    /// Self-reference for handing owned clones to the pump tasks.
    weak: Weak<Self>,
    session_id: Uuid,
    pub(crate) config: ClientConfig,
    pub(crate) page: Arc<P>,
    auth: AsyncMutex<Box<dyn AuthStrategy>>,
    cache: Box<dyn VersionCache>,
    registry: Arc<BindingRegistry>,
    preloader: Preloader,
    listeners: ListenerSet,
    lifecycle: std::sync::Mutex<Lifecycle>,
    /// In-progress guard for the injection pipeline.
    injecting: AtomicBool,
    store_injected: AtomicBool,
    credential_refreshes: AtomicU32,
    /// Set by [`logout`](Self::logout) so the navigation watcher attributes
    /// the resulting navigation to the logout.
    logging_out: AtomicBool,
    disconnect_emitted: AtomicBool,
    destroyed: AtomicBool,
    event_tx: mpsc::UnboundedSender<Event>,
    event_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    shutdown_tx: watch::Sender<bool>,
    info: std::sync::Mutex<Option<ClientInfo>>,
}

impl<P: MessengerPage + 'static> Client<P> {
    pub fn new(
        config: ClientConfig,
        auth: Box<dyn AuthStrategy>,
        page: Arc<P>,
        cache: Box<dyn VersionCache>,
    ) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            session_id: Uuid::new_v4(),
            lifecycle: std::sync::Mutex::new(Lifecycle::new(&config)),
            config,
            page,
            auth: AsyncMutex::new(auth),
            cache,
            registry: Arc::new(BindingRegistry::new()),
            preloader: Preloader::new(),
            listeners: ListenerSet::new(),
            injecting: AtomicBool::new(false),
            store_injected: AtomicBool::new(false),
            credential_refreshes: AtomicU32::new(0),
            logging_out: AtomicBool::new(false),
            disconnect_emitted: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            event_tx,
            event_rx: std::sync::Mutex::new(Some(event_rx)),
            shutdown_tx,
            info: std::sync::Mutex::new(None),
        })
    }

    /// Take the public event stream. Yields `Some` exactly once.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<Event>> {
        self.event_rx.lock().unwrap().take()
    }

    /// Current host-side lifecycle state.
    pub fn state(&self) -> SessionState {
        self.lifecycle.lock().unwrap().state()
    }

    /// The session's own connection info, available once ready.
    pub fn info(&self) -> Option<ClientInfo> {
        self.info.lock().unwrap().clone()
    }

    /// Set up the session: wire the pumps, navigate, inject.
    pub async fn initialize(&self) -> Result<(), ClientError> {
        self.config.validate().map_err(ClientError::InvalidConfig)?;
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ClientError::Destroyed);
        }
        tracing::info!(session = %self.session_id, client = %self.config.client_id, "initializing session");

        self.auth.lock().await.before_browser_initialized().await?;
        self.page.set_user_agent(&self.config.user_agent).await?;

        if let Some(version) = &self.config.web_version {
            match self.cache.resolve(version).await {
                Ok(Some(html)) => {
                    tracing::info!(session = %self.session_id, version = %version, "serving pinned page version");
                    self.page
                        .serve_document(&self.config.web_url, Some(html))
                        .await?;
                }
                Ok(None) => {
                    tracing::warn!(session = %self.session_id, version = %version, "pinned version not cached, running live");
                }
                Err(err) => {
                    tracing::warn!(session = %self.session_id, error = %err, "version cache lookup failed, running live");
                }
            }
        }

        self.auth.lock().await.after_browser_initialized().await?;

        if let Some(this) = self.weak.upgrade() {
            if let Some(calls) = self.page.take_binding_calls() {
                tokio::spawn(Arc::clone(&this).run_event_pump(calls));
            }
            tokio::spawn(this.run_navigation_watcher(self.page.navigations()));
        }
        self.spawn_recovery();

        let already_injected = matches!(
            self.page.evaluate(scripts::INJECTED_EXPR).await,
            Ok(Value::Bool(true))
        );
        if already_injected {
            // The page survived a host restart with the runtime intact.
            tracing::info!(session = %self.session_id, "page already injected, resuming");
            self.store_injected.store(true, Ordering::SeqCst);
            self.snapshot_client_info().await?;
            self.attach_event_listeners().await?;
            self.mark_ready().await;
        } else {
            self.page
                .navigate(&self.config.web_url, &self.config.referer)
                .await?;
            self.inject().await?;
        }
        Ok(())
    }

    /// Run the injection pipeline. Re-entrant calls while a pipeline is in
    /// progress return immediately.
    pub(crate) async fn inject(&self) -> Result<(), ClientError> {
        if self.injecting.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.inject_inner().await;
        self.injecting.store(false, Ordering::SeqCst);
        result
    }

    async fn inject_inner(&self) -> Result<(), ClientError> {
        let mut restarted = false;
        loop {
            if self.page.is_closed() {
                return Ok(());
            }

            self.preloader
                .install(self.page.as_ref(), &self.config.client_id)
                .await?;
            wait_for_function(
                self.page.as_ref(),
                scripts::PAGE_READY_EXPR,
                Some(self.config.auth_timeout),
            )
            .await?;
            self.page
                .evaluate(&scripts::set_client_id(&self.config.client_id))
                .await?;

            // Real handlers behind every lifecycle callback, then release
            // whatever queued up before they existed.
            for name in PLACEHOLDER_CALLBACKS {
                self.registry
                    .expose_if_absent(self.page.as_ref(), name)
                    .await?;
            }
            self.page.evaluate(&preload::drain_script()).await?;

            self.page.evaluate(scripts::EXPOSE_AUTH_STORE).await?;

            let needs_credential = matches!(
                self.page.evaluate(scripts::NEEDS_CREDENTIAL).await,
                Ok(Value::Bool(true))
            );
            if needs_credential {
                let decision = self.auth.lock().await.on_authentication_needed().await;
                if decision.failed {
                    let payload = decision.failure_payload.unwrap_or(Value::Null);
                    self.emit(Event::AuthFailure(payload));
                    if decision.restart && !restarted {
                        restarted = true;
                        tracing::warn!(session = %self.session_id, "authentication failed, retrying with a clean session");
                        let _ = self.page.evaluate(&preload::teardown_script()).await;
                        self.preloader.reset();
                        self.registry.invalidate_all();
                        self.listeners.reset();
                        self.store_injected.store(false, Ordering::SeqCst);
                        self.page
                            .navigate(&self.config.web_url, &self.config.referer)
                            .await?;
                        continue;
                    }
                    self.destroy().await?;
                    return Ok(());
                }
                self.lifecycle
                    .lock()
                    .unwrap()
                    .advance(SessionState::CredentialPending);
                self.page.evaluate(scripts::SUBSCRIBE_CREDENTIAL).await?;
            }

            self.page.evaluate(scripts::INSTALL_AUTH_HOOKS).await?;
            return Ok(());
        }
    }

    /// Expose the store callbacks and run the attachment script. One-shot
    /// until a reinjection resets the guard.
    pub(crate) async fn attach_event_listeners(&self) -> Result<(), ClientError> {
        if !self.listeners.begin() {
            return Ok(());
        }
        let result = self.attach_inner().await;
        if result.is_err() {
            // Allow the next injection cycle to retry.
            self.listeners.reset();
        }
        result
    }

    async fn attach_inner(&self) -> Result<(), ClientError> {
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::select! {
            result = wait_for_function(self.page.as_ref(), scripts::STORE_READY_EXPR, None) => result?,
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => return Ok(()),
        }
        for name in CALLBACK_NAMES {
            self.registry
                .expose_if_absent(self.page.as_ref(), name)
                .await?;
        }
        self.page.evaluate(&attach::script()).await?;
        Ok(())
    }

    /// Log the remote session out and tear down.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.logging_out.store(true, Ordering::SeqCst);
        if let Err(err) = self.page.evaluate(scripts::LOGOUT).await {
            tracing::warn!(session = %self.session_id, error = %err, "page-side logout failed");
        }

        // Give the page a moment to report the logout itself.
        for _ in 0..LOGOUT_GRACE_BEATS {
            if self.disconnect_emitted.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        self.auth.lock().await.logout().await;
        self.disconnect(DisconnectReason::Logout).await;
        Ok(())
    }

    /// Release every session resource. Idempotent; the page is closed
    /// exactly once.
    pub async fn destroy(&self) -> Result<(), ClientError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(session = %self.session_id, "destroying session");
        let _ = self.shutdown_tx.send(true);
        let _ = self.page.evaluate(&preload::teardown_script()).await;
        self.lifecycle
            .lock()
            .unwrap()
            .advance(SessionState::Destroyed);
        self.page.close().await?;
        self.auth.lock().await.destroy().await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pumps
    // -----------------------------------------------------------------------

    async fn run_event_pump(self: Arc<Self>, mut calls: mpsc::UnboundedReceiver<BindingCall>) {
        let mut dispatcher = BridgeDispatcher::new(&self.config.bridge, self.event_tx.clone());
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut sweep = tokio::time::interval(self.config.bridge.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        sweep.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = sweep.tick() => dispatcher.sweep(Instant::now()),
                call = calls.recv() => {
                    let Some(call) = call else { break };
                    match BridgeMessage::parse(&call.name, &call.payload) {
                        Ok(message) => {
                            if let Some(signal) = dispatcher.handle(message, Instant::now()) {
                                self.on_signal(signal).await;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(
                                session = %self.session_id,
                                callback = %call.name,
                                error = %err,
                                "dropping unusable bridge call"
                            );
                            dispatcher.record_failure(&call.name, Instant::now());
                        }
                    }
                }
            }
        }
        tracing::debug!(session = %self.session_id, "event pump stopped");
    }

    async fn on_signal(&self, signal: ControlSignal) {
        match signal {
            ControlSignal::AuthState(state) => {
                if state == RemoteState::UnpairedIdle {
                    // The phone unpaired itself; ask for a fresh credential.
                    if let Err(err) = self.page.evaluate(scripts::REFRESH_CREDENTIAL).await {
                        tracing::warn!(session = %self.session_id, error = %err, "credential refresh failed");
                    }
                }
            }
            ControlSignal::CredentialRefreshed => {
                let seen = self.credential_refreshes.fetch_add(1, Ordering::SeqCst) + 1;
                let budget = self.config.qr_max_retries;
                if budget > 0 && seen > budget {
                    tracing::warn!(session = %self.session_id, seen, budget, "credential refresh budget exhausted");
                    self.emit(Event::AuthFailure(serde_json::json!({
                        "message": "credential refresh budget exhausted",
                    })));
                    let _ = self.destroy().await;
                }
            }
            ControlSignal::Synced => {
                if let Err(err) = self.handle_synced().await {
                    tracing::error!(session = %self.session_id, error = %err, "sync completion handling failed");
                }
            }
            ControlSignal::RemoteState(state) => {
                let action = self.lifecycle.lock().unwrap().on_remote_state(&state);
                match action {
                    LifecycleAction::None => {}
                    LifecycleAction::ScheduleTakeover(delay) => {
                        tracing::info!(session = %self.session_id, ?delay, "session conflict, scheduling takeover");
                        let page = Arc::clone(&self.page);
                        let session = self.session_id;
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            if let Err(err) = page.evaluate(scripts::TAKEOVER).await {
                                tracing::warn!(session = %session, error = %err, "takeover command failed");
                            }
                        });
                    }
                    LifecycleAction::Disconnect(reason) => self.disconnect(reason).await,
                }
            }
            ControlSignal::LoggedOut => self.disconnect(DisconnectReason::Logout).await,
        }
    }

    /// The page finished its history sync: authenticate, inject the store,
    /// attach listeners, and only then report ready.
    async fn handle_synced(&self) -> Result<(), ClientError> {
        let payload = self.auth.lock().await.auth_event_payload().await;
        self.lifecycle
            .lock()
            .unwrap()
            .advance(SessionState::PendingSync);
        self.emit(Event::Authenticated(payload));

        if !self.store_injected.swap(true, Ordering::SeqCst) {
            let injected: Result<(), ClientError> = async {
                self.page.evaluate(scripts::EXPOSE_STORE).await?;
                self.page.evaluate(scripts::LOAD_UTILS).await?;
                self.snapshot_client_info().await?;
                self.attach_event_listeners().await?;
                Ok(())
            }
            .await;
            if let Err(err) = injected {
                self.store_injected.store(false, Ordering::SeqCst);
                return Err(err);
            }
            self.persist_web_version().await;
        }

        self.mark_ready().await;
        Ok(())
    }

    async fn mark_ready(&self) {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            if lifecycle.state() == SessionState::Unauthenticated {
                lifecycle.advance(SessionState::PendingSync);
            }
            lifecycle.advance(SessionState::Ready);
        }
        self.emit(Event::Ready);
        self.auth.lock().await.after_auth_ready().await;
    }

    async fn run_navigation_watcher(
        self: Arc<Self>,
        mut navigations: broadcast::Receiver<Navigation>,
    ) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                nav = navigations.recv() => match nav {
                    Ok(nav) => self.on_navigation(nav).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(session = %self.session_id, skipped, "navigation watcher lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        tracing::debug!(session = %self.session_id, "navigation watcher stopped");
    }

    async fn on_navigation(&self, nav: Navigation) {
        tracing::debug!(session = %self.session_id, url = %nav.url, "page navigated");

        if nav.url.contains(scripts::POST_LOGOUT_MARKER) || self.logging_out.load(Ordering::SeqCst)
        {
            self.logging_out.store(false, Ordering::SeqCst);
            self.auth.lock().await.logout().await;
            self.disconnect(DisconnectReason::Logout).await;
            return;
        }

        // The new document forgot every binding and listener; host state
        // must not outlive them.
        self.registry.invalidate_all();
        self.listeners.reset();
        self.store_injected.store(false, Ordering::SeqCst);

        if self.page.is_closed() {
            return;
        }
        let already_injected = matches!(
            self.page.evaluate(scripts::INJECTED_EXPR).await,
            Ok(Value::Bool(true))
        );
        if !already_injected && nav.url.starts_with(&self.config.web_url) {
            if let Err(err) = self.inject().await {
                tracing::error!(session = %self.session_id, error = %err, "reinjection after navigation failed");
            }
        }
    }

    async fn disconnect(&self, reason: DisconnectReason) {
        if self.disconnect_emitted.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(session = %self.session_id, %reason, "session disconnected");
        self.auth.lock().await.disconnect().await;
        if reason == DisconnectReason::Logout {
            self.lifecycle
                .lock()
                .unwrap()
                .advance(SessionState::LoggedOut);
        }
        self.emit(Event::Disconnected(reason));
        if let Err(err) = self.destroy().await {
            tracing::debug!(session = %self.session_id, error = %err, "teardown after disconnect failed");
        }
    }

    fn spawn_recovery(&self) {
        let hooks = RecoveryHooks {
            store_check: scripts::STORE_READY_EXPR.to_string(),
            store_repair: format!("{}\n{}", scripts::EXPOSE_STORE, scripts::LOAD_UTILS),
            auth_check: scripts::AUTH_READY_EXPR.to_string(),
            auth_repair: scripts::auth_repair(),
        };
        let (degraded_tx, mut degraded_rx) = mpsc::unbounded_channel::<TickReport>();
        RecoverySupervisor::spawn(
            Arc::clone(&self.page) as Arc<dyn PageContext>,
            Arc::clone(&self.registry),
            hooks,
            self.config.recovery_period,
            self.config.recovery_failure_budget,
            degraded_tx,
            self.shutdown_tx.subscribe(),
        );

        let Some(client) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            while let Some(report) = degraded_rx.recv().await {
                tracing::error!(
                    session = %client.session_id,
                    failed = ?report.repair_failed,
                    "bridge repairs keep failing, session degraded"
                );
                client
                    .lifecycle
                    .lock()
                    .unwrap()
                    .advance(SessionState::Degraded);
            }
        });
    }

    async fn snapshot_client_info(&self) -> Result<(), ClientError> {
        let value = self.page.evaluate(scripts::CLIENT_INFO).await?;
        let info: ClientInfo = serde_json::from_value(value)
            .map_err(|err| ClientError::BadResponse(format!("client info: {err}")))?;
        *self.info.lock().unwrap() = Some(info);
        Ok(())
    }

    /// Capture the live page version into the cache, best-effort.
    async fn persist_web_version(&self) {
        if self.config.web_version.is_some() {
            return;
        }
        let Ok(Value::String(version)) = self.page.evaluate("window.Debug.VERSION").await else {
            return;
        };
        let Ok(Value::String(html)) = self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await
        else {
            return;
        };
        if let Err(err) = self.cache.persist(&version, &html).await {
            tracing::warn!(session = %self.session_id, error = %err, "failed to persist page version");
        }
    }

    pub(crate) fn emit(&self, event: Event) {
        tracing::debug!(session = %self.session_id, event = event.name(), "emitting event");
        let _ = self.event_tx.send(event);
    }
}
