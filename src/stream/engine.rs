//! Playback engine adapter
//!
//! Narrow contract with the external decode/render engine. The controller
//! creates one engine per attempt through an [`EngineFactory`] and receives
//! the engine's callbacks through an [`EngineEvents`] sink that funnels them
//! onto the session's command queue.

use thiserror::Error;
use tokio::sync::mpsc::WeakUnboundedSender;
use tracing::debug;

use crate::models::{Caption, DrmParams, MediaDescriptor, StreamType, VideoSize};
use crate::session::Command;

/// Playback state reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Buffering,
    Ready,
    Ended,
}

/// DRM failures reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrmError {
    #[error("unsupported DRM scheme: {0}")]
    Unsupported(String),
    #[error("license request denied: {0}")]
    LicenseDenied(String),
}

/// Errors reported by an engine, either from `create` or through `on_error`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("source unavailable: {0}")]
    Source(String),
    #[error("decoder failure: {0}")]
    Decoder(String),
    #[error("renderer failure: {0}")]
    Renderer(String),
    #[error("DRM failure")]
    Drm(#[from] DrmError),
}

impl EngineError {
    /// Whether the failure was caused by a DRM denial
    pub fn is_drm_denial(&self) -> bool {
        matches!(self, EngineError::Drm(_))
    }
}

/// Parameters for building one engine instance
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRequest {
    pub url: String,
    pub stream_type: StreamType,
    pub drm: Option<DrmParams>,
    pub caption: Option<Caption>,
    pub audio_only: bool,
    pub autoplay: bool,
}

impl EngineRequest {
    pub fn from_media(media: &MediaDescriptor, autoplay: bool) -> Self {
        Self {
            url: media.url.clone(),
            stream_type: media.stream_type,
            drm: media.drm.clone(),
            caption: media.selected_caption().cloned(),
            audio_only: media.is_audio_only,
            autoplay,
        }
    }
}

/// A live engine instance. Dropping it without `release` is a leak on most
/// real engines, so the controller always releases before dropping.
pub trait PlaybackEngine: Send {
    fn play(&mut self);
    fn pause(&mut self);
    /// Halt and rewind to zero, keeping the engine prepared
    fn stop(&mut self);
    fn seek(&mut self, position_ms: u64);
    fn position_ms(&self) -> u64;
    fn duration_ms(&self) -> Option<u64>;
    fn release(&mut self);
}

/// Builds engine instances for the controller
pub trait EngineFactory: Send + Sync {
    fn create(
        &self,
        request: EngineRequest,
        events: EngineEvents,
    ) -> Result<Box<dyn PlaybackEngine>, EngineError>;
}

/// Callback signal from an engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineSignal {
    StateChanged {
        play_when_ready: bool,
        state: EngineState,
    },
    Error(EngineError),
    VideoSizeChanged(VideoSize),
}

/// Callback sink handed to each engine instance.
///
/// Safe to call from any thread; signals are tagged with the engine's
/// generation so the controller can drop callbacks from released engines.
#[derive(Clone)]
pub struct EngineEvents {
    generation: u64,
    tx: WeakUnboundedSender<Command>,
}

impl std::fmt::Debug for EngineEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEvents")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl EngineEvents {
    pub(crate) fn new(generation: u64, tx: WeakUnboundedSender<Command>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state_changed(&self, play_when_ready: bool, state: EngineState) {
        self.send(EngineSignal::StateChanged {
            play_when_ready,
            state,
        });
    }

    pub fn error(&self, cause: EngineError) {
        self.send(EngineSignal::Error(cause));
    }

    pub fn video_size_changed(&self, width: u32, height: u32, rotation: i32, pixel_aspect: f32) {
        self.send(EngineSignal::VideoSizeChanged(VideoSize {
            width,
            height,
            rotation,
            pixel_aspect,
        }));
    }

    fn send(&self, signal: EngineSignal) {
        let Some(tx) = self.tx.upgrade() else {
            debug!(generation = self.generation, "session gone, dropping engine signal");
            return;
        };
        let _ = tx.send(Command::Engine {
            generation: self.generation,
            signal,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drm_denial_detection() {
        let drm = EngineError::from(DrmError::Unsupported("widevine".into()));
        assert!(drm.is_drm_denial());
        assert!(!EngineError::Source("timeout".into()).is_drm_denial());
    }

    #[test]
    fn test_request_from_media() {
        let mut media = MediaDescriptor::new("http://cdn/a.mpd");
        media.stream_type = StreamType::Dash;
        media.is_audio_only = true;

        let req = EngineRequest::from_media(&media, false);
        assert_eq!(req.url, "http://cdn/a.mpd");
        assert_eq!(req.stream_type, StreamType::Dash);
        assert!(req.audio_only);
        assert!(!req.autoplay);
        assert!(req.caption.is_none());
    }

    #[test]
    fn test_events_dropped_when_session_gone() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Command>();
        let events = EngineEvents::new(3, tx.downgrade());
        drop(tx);
        drop(rx);
        // Must not panic
        events.state_changed(true, EngineState::Ready);
        assert_eq!(events.generation(), 3);
    }
}
