//! Playback session controller
//!
//! One [`SessionActor`] task owns every piece of session state. Callers talk
//! to it through a cloneable [`SessionHandle`]; engine callbacks, ticker
//! ticks, countdown ticks and cast callbacks all arrive as [`Command`]s on
//! the same queue, so state is only ever mutated from one place, one
//! command at a time.

pub mod bus;
mod handoff;
pub mod policy;
mod ticker;

pub use bus::{EventBus, SubscriptionToken};
pub use policy::{FailoverPolicy, RecoveryAction};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::models::{
    CastLinkState, ChromeState, ErrorDescriptor, MediaDescriptor, Output, RetryContext,
    SessionEvent, SessionId, SessionState,
};
use crate::stream::cast::{CastEvents, CastSession};
use crate::stream::engine::{
    EngineError, EngineEvents, EngineFactory, EngineRequest, EngineSignal, EngineState,
    PlaybackEngine,
};
use crate::stream::network::{NetworkMonitor, StaticNetwork};

use self::ticker::Ticker;

/// Errors from the session handle API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session has shut down")]
    Closed,
}

/// Device-level veto consulted on every `set_media`
pub trait DevicePolicy: Send + Sync {
    fn permits(&self, media: &MediaDescriptor) -> bool;
}

/// Policy that never vetoes
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllDevices;

impl DevicePolicy for AllowAllDevices {
    fn permits(&self, _media: &MediaDescriptor) -> bool {
        true
    }
}

/// Everything that can happen to a session, serialized through one queue
pub(crate) enum Command {
    SetMedia(MediaDescriptor),
    Play,
    Pause,
    Stop,
    Seek(f64),
    ChangeOutput(Output),
    ChangeCaption(usize),
    SetEnableControls(bool),
    SetFullscreen(bool),
    PluginsReady,
    Destroy(Option<ErrorDescriptor>),
    AttachCast(Arc<dyn CastSession>),
    DetachCast,
    CastConnected,
    CastDisconnected,
    CastMessage(String),
    Engine { generation: u64, signal: EngineSignal },
    ProgressTick(u64),
    CountdownTick(u64),
    Status(oneshot::Sender<SessionStatus>),
    Shutdown,
}

/// Point-in-time snapshot of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session: Option<SessionId>,
    pub state: SessionState,
    pub url: Option<String>,
    /// Seconds
    pub current_time: f64,
    /// Seconds
    pub duration: f64,
    pub is_playing: bool,
    pub has_started: bool,
    pub has_finished: bool,
    pub fullscreen: bool,
    pub pending_play: bool,
    pub plugins_ready: bool,
    pub engine_alive: bool,
    pub retry: RetryContext,
    pub cast: CastLinkState,
    pub chrome: ChromeState,
    /// Transient (non-critical) error currently shown
    pub overlay: Option<ErrorDescriptor>,
    /// Persistent error screen after a teardown
    pub error_surface: Option<ErrorDescriptor>,
}

// =============================================================================
// Builder
// =============================================================================

/// Wires collaborators together and spawns the session task
pub struct SessionBuilder {
    engines: Arc<dyn EngineFactory>,
    network: Arc<dyn NetworkMonitor>,
    devices: Arc<dyn DevicePolicy>,
    bus: EventBus,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new(engines: Arc<dyn EngineFactory>) -> Self {
        Self {
            engines,
            network: Arc::new(StaticNetwork::online()),
            devices: Arc::new(AllowAllDevices),
            bus: EventBus::new(),
            config: SessionConfig::default(),
        }
    }

    pub fn network(mut self, network: Arc<dyn NetworkMonitor>) -> Self {
        self.network = network;
        self
    }

    pub fn device_policy(mut self, devices: Arc<dyn DevicePolicy>) -> Self {
        self.devices = devices;
        self
    }

    /// Share an existing bus (e.g. one bus for several sessions)
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the session task. Must be called from within a Tokio runtime.
    pub fn spawn(self) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = SessionActor::new(self, tx.downgrade());
        let bus = actor.bus.clone();
        tokio::spawn(actor.run(rx));
        SessionHandle { tx, bus }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Caller-facing API of a running session
#[derive(Clone)]
pub struct SessionHandle {
    tx: UnboundedSender<Command>,
    bus: EventBus,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl SessionHandle {
    fn send(&self, cmd: Command) -> Result<(), SessionError> {
        self.tx.send(cmd).map_err(|_| SessionError::Closed)
    }

    /// Replace the current media, tearing down any previous session
    pub fn set_media(&self, media: MediaDescriptor) -> Result<(), SessionError> {
        self.send(Command::SetMedia(media))
    }

    pub fn play(&self) -> Result<(), SessionError> {
        self.send(Command::Play)
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        self.send(Command::Pause)
    }

    /// Stop and rewind to zero
    pub fn stop(&self) -> Result<(), SessionError> {
        self.send(Command::Stop)
    }

    /// Seek to a position in seconds
    pub fn seek(&self, seconds: f64) -> Result<(), SessionError> {
        self.send(Command::Seek(seconds))
    }

    pub fn change_output(&self, output: Output) -> Result<(), SessionError> {
        self.send(Command::ChangeOutput(output))
    }

    pub fn change_caption(&self, index: usize) -> Result<(), SessionError> {
        self.send(Command::ChangeCaption(index))
    }

    pub fn set_enable_controls(&self, enabled: bool) -> Result<(), SessionError> {
        self.send(Command::SetEnableControls(enabled))
    }

    pub fn set_fullscreen(&self, fullscreen: bool) -> Result<(), SessionError> {
        self.send(Command::SetFullscreen(fullscreen))
    }

    /// Signal that external loading plugins finished for the current media
    pub fn plugins_ready(&self) -> Result<(), SessionError> {
        self.send(Command::PluginsReady)
    }

    pub fn destroy(&self) -> Result<(), SessionError> {
        self.send(Command::Destroy(None))
    }

    /// Destroy and keep `error` on the error surface
    pub fn destroy_with_error(&self, error: ErrorDescriptor) -> Result<(), SessionError> {
        self.send(Command::Destroy(Some(error)))
    }

    /// Enable cast handoff through `cast`
    pub fn attach_cast(&self, cast: Arc<dyn CastSession>) -> Result<(), SessionError> {
        self.send(Command::AttachCast(cast))
    }

    pub fn detach_cast(&self) -> Result<(), SessionError> {
        self.send(Command::DetachCast)
    }

    /// Sink for connect/disconnect/message callbacks of the cast transport
    pub fn cast_events(&self) -> CastEvents {
        CastEvents::new(self.tx.downgrade())
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionToken
    where
        F: FnMut(SessionEvent) + Send + 'static,
    {
        self.bus.subscribe(handler)
    }

    pub fn subscribe_channel(&self) -> (SubscriptionToken, UnboundedReceiver<SessionEvent>) {
        self.bus.subscribe_channel()
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.bus.unsubscribe(token)
    }

    /// Snapshot answered after every previously sent command was processed
    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status(reply))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn current_time(&self) -> Result<f64, SessionError> {
        Ok(self.status().await?.current_time)
    }

    pub async fn duration(&self) -> Result<f64, SessionError> {
        Ok(self.status().await?.duration)
    }

    pub async fn is_playing(&self) -> Result<bool, SessionError> {
        Ok(self.status().await?.is_playing)
    }

    pub async fn has_started(&self) -> Result<bool, SessionError> {
        Ok(self.status().await?.has_started)
    }

    pub async fn has_finished(&self) -> Result<bool, SessionError> {
        Ok(self.status().await?.has_finished)
    }

    pub async fn state(&self) -> Result<SessionState, SessionError> {
        Ok(self.status().await?.state)
    }

    /// Tear down and stop the session task
    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.send(Command::Shutdown)
    }
}

// =============================================================================
// Actor
// =============================================================================

struct SessionActor {
    config: SessionConfig,
    engines: Arc<dyn EngineFactory>,
    network: Arc<dyn NetworkMonitor>,
    devices: Arc<dyn DevicePolicy>,
    bus: EventBus,
    policy: FailoverPolicy,
    tx: WeakUnboundedSender<Command>,

    session: Option<SessionId>,
    media: Option<MediaDescriptor>,
    state: SessionState,
    retry: RetryContext,
    engine: Option<Box<dyn PlaybackEngine>>,
    engine_generation: u64,

    play_intent: bool,
    has_started: bool,
    has_finished: bool,
    /// Set by critical errors and device vetoes until the next `set_media`
    disabled: bool,
    plugins_ready: bool,
    pending_play: bool,
    fullscreen: bool,
    chrome: ChromeState,
    overlay: Option<ErrorDescriptor>,
    error_surface: Option<ErrorDescriptor>,
    /// Play intent held before an engine rebuild; its first ready signal is silent
    quiet_resume: Option<bool>,

    progress: Ticker,
    countdown: Ticker,
    countdown_left: u32,
    countdown_cause: Option<EngineError>,

    cast: Option<Arc<dyn CastSession>>,
    link: CastLinkState,
    remote_playing: bool,
}

impl SessionActor {
    fn new(builder: SessionBuilder, tx: WeakUnboundedSender<Command>) -> Self {
        let policy = FailoverPolicy::new(builder.config.retry_countdown_secs);
        Self {
            config: builder.config,
            engines: builder.engines,
            network: builder.network,
            devices: builder.devices,
            bus: builder.bus,
            policy,
            tx,
            session: None,
            media: None,
            state: SessionState::Idle,
            retry: RetryContext::default(),
            engine: None,
            engine_generation: 0,
            play_intent: false,
            has_started: false,
            has_finished: false,
            disabled: false,
            plugins_ready: false,
            pending_play: false,
            fullscreen: false,
            chrome: ChromeState::default(),
            overlay: None,
            error_surface: None,
            quiet_resume: None,
            progress: Ticker::new(),
            countdown: Ticker::new(),
            countdown_left: 0,
            countdown_cause: None,
            cast: None,
            link: CastLinkState::default(),
            remote_playing: false,
        }
    }

    async fn run(mut self, mut rx: UnboundedReceiver<Command>) {
        debug!("session task started");
        while let Some(cmd) = rx.recv().await {
            if !self.handle(cmd) {
                break;
            }
        }
        self.shutdown();
        debug!("session task finished");
    }

    /// Process one command; returns false when the session should stop
    fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::SetMedia(media) => self.set_media(media),
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::Stop => self.stop(),
            Command::Seek(secs) => self.seek(secs),
            Command::ChangeOutput(output) => self.change_output(output),
            Command::ChangeCaption(index) => self.change_caption(index),
            Command::SetEnableControls(enabled) => self.set_enable_controls(enabled),
            Command::SetFullscreen(fullscreen) => self.set_fullscreen(fullscreen),
            Command::PluginsReady => self.on_plugins_ready(),
            Command::Destroy(error) => self.destroy(error),
            Command::AttachCast(cast) => self.attach_cast(cast),
            Command::DetachCast => self.detach_cast(),
            Command::CastConnected => self.on_cast_connected(),
            Command::CastDisconnected => self.on_cast_disconnected(),
            Command::CastMessage(raw) => self.on_cast_message(&raw),
            Command::Engine { generation, signal } => self.on_engine_signal(generation, signal),
            Command::ProgressTick(generation) => self.on_progress_tick(generation),
            Command::CountdownTick(generation) => self.on_countdown_tick(generation),
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown => return false,
        }
        true
    }

    // -------------------------------------------------------------------------
    // Caller operations
    // -------------------------------------------------------------------------

    fn set_media(&mut self, media: MediaDescriptor) {
        info!(media = %media, "set media");

        if !self.devices.permits(&media) {
            warn!(url = %media.url, "device policy vetoed media");
            self.media = Some(media);
            self.session = Some(SessionId::new());
            self.retry = RetryContext::default();
            self.dispatch_error(ErrorDescriptor::device_blocked());
            return;
        }

        if self.media.is_some() && self.state != SessionState::Destroyed {
            self.destroy_session(None);
        }
        self.cancel_countdown();

        self.session = Some(SessionId::new());
        self.retry = RetryContext::for_media(&media);
        self.media = Some(media);
        self.state = SessionState::Loading;
        self.has_started = false;
        self.has_finished = false;
        self.play_intent = false;
        self.pending_play = false;
        self.disabled = false;
        self.fullscreen = false;
        self.overlay = None;
        self.error_surface = None;
        self.quiet_resume = None;
        self.plugins_ready = !self.config.await_plugins;

        if self.plugins_ready {
            let autoplay = self.autoplay();
            self.create_engine(true, autoplay);
        }

        if self.link.connected {
            if self.cast_enabled() {
                self.load_remote();
            } else {
                self.release_intercept();
            }
        }
    }

    fn play(&mut self) {
        if self.disabled {
            debug!("play ignored: session disabled");
            return;
        }
        if self.link.intercept_active {
            self.remote_play();
            return;
        }
        if !self.plugins_ready {
            debug!("plugins not ready, deferring play");
            self.pending_play = true;
            return;
        }
        if self.countdown.is_running() {
            // the countdown recreates the engine with autoplay
            self.pending_play = true;
            return;
        }

        match self.engine.as_mut() {
            None => self.create_engine(true, true),
            Some(engine) => {
                engine.play();
                self.play_intent = true;
            }
        }
    }

    fn pause(&mut self) {
        if self.link.intercept_active {
            self.remote_pause();
            return;
        }
        self.pause_local();
    }

    fn pause_local(&mut self) {
        if self.has_started {
            self.pause_engine();
        } else {
            self.pending_play = false;
        }
    }

    /// Pause the engine whether or not playback has started yet
    fn pause_engine(&mut self) {
        self.pending_play = false;
        if let Some(engine) = self.engine.as_mut() {
            engine.pause();
            self.play_intent = false;
        }
    }

    fn stop(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        engine.stop();
        self.progress.stop();
        self.play_intent = false;
        if self.has_started && self.state != SessionState::Ended {
            self.state = SessionState::Paused;
        }
        self.bus.publish(SessionEvent::Stop);
    }

    fn seek(&mut self, secs: f64) {
        let position_ms = secs_to_ms(secs);
        if self.link.intercept_active {
            self.remote_seek(position_ms);
            return;
        }
        if let Some(engine) = self.engine.as_mut() {
            engine.seek(position_ms);
        }
    }

    fn change_output(&mut self, output: Output) {
        if output.url.trim().is_empty() {
            error!(label = %output.label, "URL not found for output");
            return;
        }
        let Some(media) = self.media.as_mut() else {
            return;
        };
        for o in media.outputs.iter_mut() {
            o.is_default = o.label == output.label;
        }
        info!(label = %output.label, url = %output.url, "changing output");
        media.url = output.url;
        self.rebuild_engine();
    }

    fn change_caption(&mut self, index: usize) {
        let Some(media) = self.media.as_mut() else {
            return;
        };
        if index >= media.captions.len() {
            warn!(index, available = media.captions.len(), "caption index out of range");
            return;
        }
        media.caption_index = Some(index);
        self.rebuild_engine();
    }

    fn set_enable_controls(&mut self, enabled: bool) {
        if self.media.as_ref().is_some_and(|m| m.is_audio_only) {
            return;
        }
        self.chrome.controls_enabled = enabled;
    }

    fn set_fullscreen(&mut self, fullscreen: bool) {
        if self.engine.is_none() || self.media.as_ref().is_some_and(|m| m.is_audio_only) {
            return;
        }
        if self.fullscreen == fullscreen {
            return;
        }
        self.fullscreen = fullscreen;
        self.bus.publish(if fullscreen {
            SessionEvent::Fullscreen
        } else {
            SessionEvent::FullscreenExit
        });
    }

    fn on_plugins_ready(&mut self) {
        if self.plugins_ready {
            return;
        }
        self.plugins_ready = true;
        if self.media.is_none() || self.disabled {
            return;
        }

        let replay = std::mem::take(&mut self.pending_play);
        if self.engine.is_none() && self.state == SessionState::Loading {
            let autoplay = self.autoplay() || replay;
            self.create_engine(true, autoplay);
        } else if replay {
            self.play();
        }
    }

    fn destroy(&mut self, error: Option<ErrorDescriptor>) {
        info!(with_error = error.is_some(), "destroy requested");
        self.destroy_session(error);
        self.has_started = false;
        self.has_finished = false;
    }

    // -------------------------------------------------------------------------
    // Engine lifecycle
    // -------------------------------------------------------------------------

    fn autoplay(&self) -> bool {
        self.config.autoplay && self.media.as_ref().map_or(true, |m| m.autoplay)
    }

    fn create_engine(&mut self, notify: bool, autoplay: bool) {
        if self.engine.is_some() {
            debug!("engine already created");
            return;
        }

        let url = self.media.as_ref().map(|m| m.url.trim().to_string());
        let Some(url) = url.filter(|u| !u.is_empty()) else {
            self.dispatch_error(ErrorDescriptor::empty_url());
            return;
        };
        if let Err(err) = Url::parse(&url) {
            warn!(%url, %err, "rejecting media URL");
            self.dispatch_error(ErrorDescriptor::invalid_url());
            return;
        }
        let Some(media) = self.media.as_ref() else {
            return;
        };

        let autoplay = autoplay && !self.link.connected;
        let request = EngineRequest::from_media(media, autoplay);
        self.engine_generation += 1;
        let events = EngineEvents::new(self.engine_generation, self.tx.clone());

        match self.engines.create(request, events) {
            Ok(engine) => {
                info!(%url, generation = self.engine_generation, autoplay, "engine created");
                self.engine = Some(engine);
                self.play_intent = autoplay;
                self.state = SessionState::Loading;
                if notify {
                    if let Some(session) = self.session {
                        self.bus.publish(SessionEvent::Load { session, url });
                    }
                }
            }
            Err(cause) => {
                warn!(%url, %cause, "engine creation failed");
                self.on_engine_error(cause);
            }
        }
    }

    /// Stop timers and release the engine; publishes nothing
    fn destroy_engine(&mut self) {
        self.progress.stop();
        if let Some(mut engine) = self.engine.take() {
            engine.stop();
            engine.release();
            debug!(generation = self.engine_generation, "engine released");
        }
        self.play_intent = false;
        self.quiet_resume = None;
    }

    /// Recreate the engine on the current media variant, keeping position.
    ///
    /// The caller sees no intermediate PLAY/PAUSE: the new engine's first
    /// ready signal only restores the state held before the rebuild.
    fn rebuild_engine(&mut self) {
        let Some(engine) = self.engine.as_ref() else {
            return;
        };
        let position_ms = engine.position_ms();
        let was_playing = self.play_intent;
        let prior_state = self.state;

        self.destroy_engine();
        self.create_engine(false, was_playing);

        if let Some(engine) = self.engine.as_mut() {
            engine.seek(position_ms);
            if matches!(prior_state, SessionState::Playing | SessionState::Paused) {
                self.state = prior_state;
                self.quiet_resume = Some(was_playing);
            }
        }
    }

    /// Full teardown: timers, engine, UNLOAD, error surface
    fn destroy_session(&mut self, error: Option<ErrorDescriptor>) {
        self.cancel_countdown();
        self.destroy_engine();
        self.pending_play = false;
        self.fullscreen = false;
        self.overlay = None;
        self.state = SessionState::Destroyed;
        self.bus.publish(SessionEvent::Unload);
        self.error_surface = error;
    }

    fn shutdown(&mut self) {
        if self.media.is_some() && self.state != SessionState::Destroyed {
            self.destroy_session(None);
        }
        self.cancel_countdown();
        self.destroy_engine();
    }

    // -------------------------------------------------------------------------
    // Engine callbacks
    // -------------------------------------------------------------------------

    fn on_engine_signal(&mut self, generation: u64, signal: EngineSignal) {
        if self.engine.is_none() || generation != self.engine_generation {
            debug!(generation, current = self.engine_generation, "dropping stale engine signal");
            return;
        }
        match signal {
            EngineSignal::StateChanged {
                play_when_ready,
                state,
            } => self.on_engine_state(play_when_ready, state),
            EngineSignal::Error(cause) => self.on_engine_error(cause),
            EngineSignal::VideoSizeChanged(size) => self.bus.publish(SessionEvent::Resize(size)),
        }
    }

    fn on_engine_state(&mut self, play_when_ready: bool, state: EngineState) {
        debug!(play_when_ready, ?state, session_state = %self.state, "engine state");
        match state {
            EngineState::Ready => self.on_engine_ready(play_when_ready),
            EngineState::Buffering => {
                if self.state == SessionState::Playing {
                    self.progress.stop();
                    self.state = SessionState::Buffering;
                }
            }
            EngineState::Ended => {
                // an end signal without play intent is not a finish
                if !play_when_ready {
                    return;
                }
                self.progress.stop();
                if let Some(engine) = self.engine.as_mut() {
                    engine.pause();
                    engine.seek(0);
                }
                self.play_intent = false;
                self.state = SessionState::Ended;
                self.bus.publish(SessionEvent::Finish);
                self.has_finished = true;
            }
            EngineState::Idle => {}
        }
    }

    fn on_engine_ready(&mut self, play_when_ready: bool) {
        self.overlay = None;

        // the receiver owns playback; a late local ready must not start output
        if self.link.intercept_active && play_when_ready {
            debug!("local engine ready while casting, holding it paused");
            self.pause_engine();
            return;
        }

        if play_when_ready && !self.has_started {
            self.has_started = true;
            self.retry.current_retry_index = 0;
            self.error_surface = None;
            self.bus.publish(SessionEvent::Start);
        }
        self.restore_pending_position();

        if let Some(expected) = self.quiet_resume.take() {
            if expected == play_when_ready {
                self.play_intent = play_when_ready;
                if play_when_ready {
                    self.state = SessionState::Playing;
                    self.start_progress();
                } else {
                    self.state = SessionState::Paused;
                }
                return;
            }
        }

        if play_when_ready {
            self.dispatch_play();
        } else if !matches!(self.state, SessionState::Ended | SessionState::Paused) {
            self.dispatch_pause();
        }
    }

    fn restore_pending_position(&mut self) {
        let is_live = self.media.as_ref().is_some_and(|m| m.is_live);
        let Some(position) = self.retry.take_pending_position() else {
            return;
        };
        if is_live {
            debug!(position, "live media, dropping resume point");
            return;
        }
        if let Some(engine) = self.engine.as_mut() {
            info!(position, "restoring playback position");
            engine.seek(secs_to_ms(position));
        }
    }

    fn on_engine_error(&mut self, cause: EngineError) {
        warn!(%cause, "engine error");
        let position = self.current_time();
        let online = self.network.is_available();
        let Some(media) = self.media.as_mut() else {
            return;
        };

        match self.policy.decide(&mut self.retry, media, &cause, online, position) {
            RecoveryAction::Failover { url } => {
                info!(%url, backup = self.retry.current_backup_index, "failing over to backup URL");
                self.destroy_engine();
                let autoplay = self.autoplay();
                self.create_engine(false, autoplay);
                if self.engine.is_some() {
                    self.dispatch_error(policy::failover_error(&cause));
                }
            }
            RecoveryAction::Countdown { seconds } => {
                info!(
                    seconds,
                    retry = self.retry.current_retry_index,
                    "offline, scheduling retry"
                );
                self.destroy_engine();
                self.start_countdown(seconds, cause);
            }
            RecoveryAction::Fatal(error) => self.dispatch_error(error),
        }
    }

    // -------------------------------------------------------------------------
    // Timers
    // -------------------------------------------------------------------------

    fn start_progress(&mut self) {
        self.progress.start(
            self.config.progress_interval(),
            self.tx.clone(),
            Command::ProgressTick,
        );
    }

    fn on_progress_tick(&mut self, generation: u64) {
        if !self.progress.accepts(generation) || self.engine.is_none() {
            return;
        }
        let position = self.current_time();
        let duration = self.duration();
        self.bus.publish(SessionEvent::Progress { position, duration });
    }

    fn start_countdown(&mut self, seconds: u32, cause: EngineError) {
        self.countdown.stop();
        self.countdown_left = seconds;
        self.countdown_cause = Some(cause);
        self.state = SessionState::Error { critical: false };
        self.countdown
            .start(Duration::from_secs(1), self.tx.clone(), Command::CountdownTick);
    }

    fn cancel_countdown(&mut self) {
        self.countdown.stop();
        self.countdown_left = 0;
        self.countdown_cause = None;
    }

    fn on_countdown_tick(&mut self, generation: u64) {
        if !self.countdown.accepts(generation) {
            return;
        }
        let seconds_left = self.countdown_left;
        let cause = self
            .countdown_cause
            .clone()
            .unwrap_or_else(|| EngineError::Source("connection lost".to_string()));

        if seconds_left == 0 {
            self.cancel_countdown();
            let autoplay = self.autoplay() || std::mem::take(&mut self.pending_play);
            self.create_engine(false, autoplay);
            if self.engine.is_none() {
                return;
            }
        } else {
            self.countdown_left -= 1;
        }
        self.dispatch_error(policy::countdown_error(&cause, seconds_left));
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    fn dispatch_play(&mut self) {
        self.play_intent = true;
        self.state = SessionState::Playing;
        self.bus.publish(SessionEvent::Play);
        self.start_progress();
    }

    fn dispatch_pause(&mut self) {
        self.progress.stop();
        self.play_intent = false;
        self.state = SessionState::Paused;
        self.bus.publish(SessionEvent::Pause);
    }

    fn dispatch_error(&mut self, error: ErrorDescriptor) {
        self.progress.stop();
        // observers see the error before any teardown it causes
        self.bus.publish(SessionEvent::Error(error.clone()));

        if error.critical {
            error!(code = error.code, message = %error.message, "critical session error");
            self.disabled = true;
            self.state = SessionState::Error { critical: true };
            self.destroy_session(Some(error));
        } else {
            warn!(code = error.code, message = %error.message, "recoverable session error");
            self.state = SessionState::Error { critical: false };
            self.overlay = Some(error);
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    fn current_time(&self) -> f64 {
        if self.link.intercept_active {
            return self.link.last_known_remote_position_ms as f64 / 1000.0;
        }
        self.engine
            .as_ref()
            .map_or(0.0, |e| e.position_ms() as f64 / 1000.0)
    }

    fn duration(&self) -> f64 {
        if self.link.intercept_active && self.link.remote_duration_ms > 0 {
            return self.link.remote_duration_ms as f64 / 1000.0;
        }
        let fallback = self.media.as_ref().map_or(0.0, |m| m.duration);
        self.engine
            .as_ref()
            .and_then(|e| e.duration_ms())
            .map_or(fallback, |ms| ms as f64 / 1000.0)
    }

    fn is_playing(&self) -> bool {
        if self.link.intercept_active {
            return self.remote_playing;
        }
        self.engine.is_some() && self.play_intent
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            session: self.session,
            state: self.state,
            url: self.media.as_ref().map(|m| m.url.clone()),
            current_time: self.current_time(),
            duration: self.duration(),
            is_playing: self.is_playing(),
            has_started: self.has_started,
            has_finished: self.has_finished,
            fullscreen: self.fullscreen,
            pending_play: self.pending_play,
            plugins_ready: self.plugins_ready,
            engine_alive: self.engine.is_some(),
            retry: self.retry,
            cast: self.link,
            chrome: self.chrome,
            overlay: self.overlay.clone(),
            error_surface: self.error_surface.clone(),
        }
    }
}

fn secs_to_ms(secs: f64) -> u64 {
    (secs.max(0.0) * 1000.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secs_to_ms() {
        assert_eq!(secs_to_ms(15.0), 15_000);
        assert_eq!(secs_to_ms(1.2345), 1_235);
        assert_eq!(secs_to_ms(-3.0), 0);
    }

    #[test]
    fn test_allow_all_devices() {
        assert!(AllowAllDevices.permits(&MediaDescriptor::new("http://cdn/a")));
    }
}
