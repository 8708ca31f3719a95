//! Simulated playback engine
//!
//! Deterministic engine used by the `simulate` command and by tests. The
//! position advances with the Tokio clock while playing, so paused-time
//! tests see exact values. A [`SimControl`] drives signals (ready,
//! buffering, end, errors) on the most recently created engine and exposes
//! what the session asked of it.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::Instant;
use tracing::debug;

use super::engine::{
    DrmError, EngineError, EngineEvents, EngineFactory, EngineRequest, EngineState,
    PlaybackEngine,
};

/// Behaviour of the engines a [`SimulatedEngineFactory`] creates
#[derive(Debug, Clone)]
pub struct SimScript {
    /// Report Ready as soon as an engine is created
    pub auto_ready: bool,
    /// Media duration reported once ready
    pub duration_ms: Option<u64>,
    /// Number of engines (in creation order) that fail right after creation
    pub failures: u32,
    /// Failures are DRM license denials instead of source errors
    pub drm_denied: bool,
    /// Refuse to create engines at all
    pub refuse_create: bool,
}

impl Default for SimScript {
    fn default() -> Self {
        Self {
            auto_ready: true,
            duration_ms: None,
            failures: 0,
            drm_denied: false,
            refuse_create: false,
        }
    }
}

impl SimScript {
    fn failure(&self, url: &str) -> EngineError {
        if self.drm_denied {
            EngineError::Drm(DrmError::LicenseDenied(url.to_string()))
        } else {
            EngineError::Source(format!("unreachable: {}", url))
        }
    }
}

#[derive(Debug, Default)]
struct Playback {
    id: u64,
    play_when_ready: bool,
    ready: bool,
    ended: bool,
    base_ms: u64,
    /// Set while the position is advancing
    anchor: Option<Instant>,
}

impl Playback {
    fn position_ms(&self, duration: Option<u64>) -> u64 {
        let elapsed = self
            .anchor
            .map_or(0, |a| a.elapsed().as_millis() as u64);
        let position = self.base_ms.saturating_add(elapsed);
        duration.map_or(position, |d| position.min(d))
    }

    fn freeze(&mut self, duration: Option<u64>) {
        self.base_ms = self.position_ms(duration);
        self.anchor = None;
    }

    fn resume(&mut self) {
        if self.ready && self.play_when_ready && !self.ended && self.anchor.is_none() {
            self.anchor = Some(Instant::now());
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    requests: Vec<EngineRequest>,
    seeks: Vec<u64>,
    releases: usize,
    live: usize,
    max_live: usize,
    created: u32,
    current: Playback,
    events: Option<EngineEvents>,
}

#[derive(Debug, Default)]
struct Shared {
    script: SimScript,
    state: Mutex<SimState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Factory handing out simulated engines
#[derive(Debug, Clone)]
pub struct SimulatedEngineFactory {
    shared: Arc<Shared>,
}

impl SimulatedEngineFactory {
    pub fn new(script: SimScript) -> Self {
        Self {
            shared: Arc::new(Shared {
                script,
                state: Mutex::new(SimState::default()),
            }),
        }
    }

    /// Control surface over engines created by this factory
    pub fn control(&self) -> SimControl {
        SimControl {
            shared: self.shared.clone(),
        }
    }
}

impl Default for SimulatedEngineFactory {
    fn default() -> Self {
        Self::new(SimScript::default())
    }
}

impl EngineFactory for SimulatedEngineFactory {
    fn create(
        &self,
        request: EngineRequest,
        events: EngineEvents,
    ) -> Result<Box<dyn PlaybackEngine>, EngineError> {
        let script = &self.shared.script;
        if script.refuse_create {
            return Err(EngineError::Renderer("no decoder available".to_string()));
        }

        let mut state = self.shared.lock();
        state.created += 1;
        state.live += 1;
        state.max_live = state.max_live.max(state.live);
        let id = u64::from(state.created);
        let fails = state.created <= script.failures;
        let url = request.url.clone();
        let play_when_ready = request.autoplay;
        state.requests.push(request);
        state.current = Playback {
            id,
            play_when_ready,
            ..Playback::default()
        };
        state.events = Some(events.clone());

        if fails {
            debug!(%url, id, "simulated engine failing");
            events.error(script.failure(&url));
        } else if script.auto_ready {
            state.current.ready = true;
            state.current.resume();
            events.state_changed(play_when_ready, EngineState::Ready);
        }

        Ok(Box::new(SimEngine {
            id,
            shared: self.shared.clone(),
            events,
            released: false,
        }))
    }
}

/// One simulated engine instance
#[derive(Debug)]
pub struct SimEngine {
    id: u64,
    shared: Arc<Shared>,
    events: EngineEvents,
    released: bool,
}

impl SimEngine {
    /// Run `f` on the playback state if this engine is still the current one
    fn with_current<R>(&self, f: impl FnOnce(&mut Playback, Option<u64>) -> R) -> Option<R> {
        if self.released {
            return None;
        }
        let duration = self.shared.script.duration_ms;
        let mut state = self.shared.lock();
        if state.current.id != self.id {
            return None;
        }
        Some(f(&mut state.current, duration))
    }
}

impl PlaybackEngine for SimEngine {
    fn play(&mut self) {
        let ready = self.with_current(|p, _| {
            p.play_when_ready = true;
            p.ended = false;
            p.resume();
            p.ready
        });
        if ready == Some(true) {
            self.events.state_changed(true, EngineState::Ready);
        }
    }

    fn pause(&mut self) {
        let ready = self.with_current(|p, duration| {
            p.freeze(duration);
            p.play_when_ready = false;
            p.ready
        });
        if ready == Some(true) {
            self.events.state_changed(false, EngineState::Ready);
        }
    }

    fn stop(&mut self) {
        self.with_current(|p, _| {
            p.anchor = None;
            p.play_when_ready = false;
            p.base_ms = 0;
        });
    }

    fn seek(&mut self, position_ms: u64) {
        let accepted = self.with_current(|p, duration| {
            p.base_ms = duration.map_or(position_ms, |d| position_ms.min(d));
            p.ended = false;
            if p.anchor.is_some() {
                p.anchor = Some(Instant::now());
            }
        });
        if accepted.is_some() {
            self.shared.lock().seeks.push(position_ms);
        }
    }

    fn position_ms(&self) -> u64 {
        self.with_current(|p, duration| p.position_ms(duration))
            .unwrap_or(0)
    }

    fn duration_ms(&self) -> Option<u64> {
        self.with_current(|p, duration| if p.ready { duration } else { None })
            .flatten()
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = self.shared.lock();
        state.live = state.live.saturating_sub(1);
        state.releases += 1;
        if state.current.id == self.id {
            state.current.anchor = None;
            state.events = None;
        }
    }
}

impl Drop for SimEngine {
    fn drop(&mut self) {
        self.release();
    }
}

/// Drives and inspects the current simulated engine
#[derive(Debug, Clone)]
pub struct SimControl {
    shared: Arc<Shared>,
}

impl SimControl {
    fn current_events(&self) -> Option<EngineEvents> {
        self.shared.lock().events.clone()
    }

    /// Report Ready, honouring the engine's play-when-ready flag
    pub fn ready(&self) {
        let pwr = {
            let mut state = self.shared.lock();
            if state.events.is_none() {
                return;
            }
            state.current.ready = true;
            state.current.resume();
            state.current.play_when_ready
        };
        if let Some(events) = self.current_events() {
            events.state_changed(pwr, EngineState::Ready);
        }
    }

    pub fn buffering(&self) {
        let duration = self.shared.script.duration_ms;
        let pwr = {
            let mut state = self.shared.lock();
            state.current.freeze(duration);
            state.current.play_when_ready
        };
        if let Some(events) = self.current_events() {
            events.state_changed(pwr, EngineState::Buffering);
        }
    }

    /// Report end of stream
    pub fn finish(&self) {
        let duration = self.shared.script.duration_ms;
        let pwr = {
            let mut state = self.shared.lock();
            state.current.freeze(duration);
            state.current.ended = true;
            if let Some(d) = duration {
                state.current.base_ms = d;
            }
            state.current.play_when_ready
        };
        if let Some(events) = self.current_events() {
            events.state_changed(pwr, EngineState::Ended);
        }
    }

    pub fn fail(&self, cause: EngineError) {
        if let Some(events) = self.current_events() {
            events.error(cause);
        }
    }

    pub fn resize(&self, width: u32, height: u32) {
        if let Some(events) = self.current_events() {
            events.video_size_changed(width, height, 0, 1.0);
        }
    }

    /// Jump the current engine's position without a session seek
    pub fn set_position(&self, position_ms: u64) {
        let mut state = self.shared.lock();
        state.current.base_ms = position_ms;
        if state.current.anchor.is_some() {
            state.current.anchor = Some(Instant::now());
        }
    }

    /// Whether a playing engine reached the scripted duration
    pub fn reached_end(&self) -> bool {
        let Some(duration) = self.shared.script.duration_ms else {
            return false;
        };
        let state = self.shared.lock();
        state.events.is_some()
            && !state.current.ended
            && state.current.anchor.is_some()
            && state.current.position_ms(Some(duration)) >= duration
    }

    pub fn requests(&self) -> Vec<EngineRequest> {
        self.shared.lock().requests.clone()
    }

    /// URLs of every engine created so far, in order
    pub fn urls(&self) -> Vec<String> {
        self.shared.lock().requests.iter().map(|r| r.url.clone()).collect()
    }

    pub fn seeks(&self) -> Vec<u64> {
        self.shared.lock().seeks.clone()
    }

    pub fn created(&self) -> u32 {
        self.shared.lock().created
    }

    pub fn releases(&self) -> usize {
        self.shared.lock().releases
    }

    pub fn live_engines(&self) -> usize {
        self.shared.lock().live
    }

    pub fn max_live_engines(&self) -> usize {
        self.shared.lock().max_live
    }

    pub fn play_when_ready(&self) -> bool {
        self.shared.lock().current.play_when_ready
    }

    pub fn position_ms(&self) -> u64 {
        let duration = self.shared.script.duration_ms;
        self.shared.lock().current.position_ms(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaDescriptor;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn request(url: &str, autoplay: bool) -> EngineRequest {
        EngineRequest::from_media(&MediaDescriptor::new(url), autoplay)
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_follows_clock_while_playing() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let factory = SimulatedEngineFactory::new(SimScript {
            duration_ms: Some(60_000),
            ..Default::default()
        });
        let control = factory.control();
        let mut engine = factory
            .create(request("http://cdn/a", true), EngineEvents::new(1, tx.downgrade()))
            .unwrap();

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(engine.position_ms(), 1500);

        engine.pause();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(engine.position_ms(), 1500);

        engine.seek(59_000);
        engine.play();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(engine.position_ms(), 60_000);
        assert!(control.reached_end());
        assert_eq!(control.seeks(), vec![59_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_far_seek_saturates_position() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let factory = SimulatedEngineFactory::new(SimScript {
            duration_ms: None,
            ..Default::default()
        });
        let mut engine = factory
            .create(request("http://cdn/a", true), EngineEvents::new(1, tx.downgrade()))
            .unwrap();

        engine.seek(u64::MAX);
        engine.play();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(engine.position_ms(), u64::MAX);
    }

    #[tokio::test]
    async fn test_release_tracks_live_engines() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let factory = SimulatedEngineFactory::default();
        let control = factory.control();

        let mut first = factory
            .create(request("http://cdn/a", false), EngineEvents::new(1, tx.downgrade()))
            .unwrap();
        assert_eq!(control.live_engines(), 1);
        first.release();
        drop(first);

        let _second = factory
            .create(request("http://cdn/b", false), EngineEvents::new(2, tx.downgrade()))
            .unwrap();
        assert_eq!(control.live_engines(), 1);
        assert_eq!(control.max_live_engines(), 1);
        assert_eq!(control.releases(), 1);
        assert_eq!(control.urls(), vec!["http://cdn/a", "http://cdn/b"]);
    }

    #[tokio::test]
    async fn test_stale_engine_cannot_touch_successor() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let factory = SimulatedEngineFactory::default();
        let control = factory.control();

        let mut old = factory
            .create(request("http://cdn/a", false), EngineEvents::new(1, tx.downgrade()))
            .unwrap();
        let _new = factory
            .create(request("http://cdn/b", false), EngineEvents::new(2, tx.downgrade()))
            .unwrap();

        old.seek(10_000);
        assert!(control.seeks().is_empty());
    }

    #[test]
    fn test_refuse_create() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let factory = SimulatedEngineFactory::new(SimScript {
            refuse_create: true,
            ..Default::default()
        });
        let result = factory.create(request("http://cdn/a", true), EngineEvents::new(1, tx.downgrade()));
        assert!(matches!(result, Err(EngineError::Renderer(_))));
    }
}
