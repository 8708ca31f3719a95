//! Data structures and types for playsession
//!
//! Contains all shared models used across the crate organized by domain:
//! - **Media**: what to play (descriptor, outputs, captions, DRM)
//! - **Session**: controller state and retry bookkeeping
//! - **Errors**: error descriptors published on the event bus
//! - **Cast**: remote link state
//! - **Events**: lifecycle events carried by the session bus

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::stream::engine::EngineError;

// =============================================================================
// Media Models
// =============================================================================

/// Streaming format, used only to pick engine construction parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Hls,
    Dash,
    #[default]
    Other,
}

impl StreamType {
    /// Parse a stream type from a loose string (e.g., "HLS", "dash", "mp4")
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "hls" | "m3u8" => StreamType::Hls,
            "dash" | "mpd" => StreamType::Dash,
            _ => StreamType::Other,
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamType::Hls => write!(f, "HLS"),
            StreamType::Dash => write!(f, "DASH"),
            StreamType::Other => write!(f, "OTHER"),
        }
    }
}

/// Selectable output (quality/source variant) of a media
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub label: String,
    pub url: String,
    #[serde(default)]
    pub is_default: bool,
}

impl Output {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            is_default: false,
        }
    }
}

/// Caption track of a media
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    pub label: String,
    pub language: String,
    pub url: String,
    #[serde(default)]
    pub is_default: bool,
}

/// Opaque DRM parameters handed to the engine and the cast receiver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrmParams {
    pub license_url: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl DrmParams {
    /// Look up a license parameter (e.g., "SessionId", "Ticket")
    pub fn license_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Everything the controller needs to know to play one media.
///
/// `url` is the active source and is replaced in place on failover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaDescriptor {
    pub id: String,
    pub title: String,
    pub url: String,
    pub backup_urls: Vec<String>,
    pub retries_total: u32,
    pub stream_type: StreamType,
    pub is_live: bool,
    pub is_audio_only: bool,
    /// Start position in seconds
    pub initial_time: f64,
    /// Fallback duration in seconds, used until the engine knows better
    pub duration: f64,
    pub drm: Option<DrmParams>,
    pub outputs: Vec<Output>,
    pub captions: Vec<Caption>,
    pub caption_index: Option<usize>,
    pub theme_color: Option<String>,
    pub project_hash: Option<String>,
    pub autoplay: bool,
}

impl Default for MediaDescriptor {
    fn default() -> Self {
        Self {
            id: String::new(),
            title: String::new(),
            url: String::new(),
            backup_urls: Vec::new(),
            retries_total: 0,
            stream_type: StreamType::Other,
            is_live: false,
            is_audio_only: false,
            initial_time: 0.0,
            duration: 0.0,
            drm: None,
            outputs: Vec::new(),
            captions: Vec::new(),
            caption_index: None,
            theme_color: None,
            project_hash: None,
            autoplay: true,
        }
    }
}

impl MediaDescriptor {
    /// Create a descriptor for a single URL with default settings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_backup_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.backup_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries_total = retries;
        self
    }

    pub fn with_initial_time(mut self, secs: f64) -> Self {
        self.initial_time = secs;
        self
    }

    pub fn with_stream_type(mut self, stream_type: StreamType) -> Self {
        self.stream_type = stream_type;
        self
    }

    /// Whether the media may be handed off to a cast receiver
    pub fn is_castable(&self) -> bool {
        !self.is_live && !self.is_audio_only
    }

    /// Caption currently selected (explicit index first, then the default track)
    pub fn selected_caption(&self) -> Option<&Caption> {
        match self.caption_index {
            Some(idx) => self.captions.get(idx),
            None => self.captions.iter().find(|c| c.is_default),
        }
    }
}

impl fmt::Display for MediaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = if self.title.is_empty() {
            "untitled"
        } else {
            &self.title
        };
        write!(f, "{} [{}] {}", title, self.stream_type, self.url)?;
        if !self.backup_urls.is_empty() {
            write!(f, " (+{} backups)", self.backup_urls.len())?;
        }
        Ok(())
    }
}

// =============================================================================
// Session Models
// =============================================================================

/// Unique id of one loaded session (changes on every `set_media`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of the playback session controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Buffering,
    Ended,
    Error {
        critical: bool,
    },
    Destroyed,
}

impl SessionState {
    /// Whether the engine is expected to be producing output
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Playing | SessionState::Buffering)
    }

    /// Whether further playback requires a fresh `set_media`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Destroyed | SessionState::Error { critical: true }
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Loading => write!(f, "Loading..."),
            SessionState::Playing => write!(f, "▶ Playing"),
            SessionState::Paused => write!(f, "⏸ Paused"),
            SessionState::Buffering => write!(f, "Buffering..."),
            SessionState::Ended => write!(f, "⏹ Ended"),
            SessionState::Error { critical: true } => write!(f, "Error (critical)"),
            SessionState::Error { critical: false } => write!(f, "Error (recovering)"),
            SessionState::Destroyed => write!(f, "Destroyed"),
        }
    }
}

/// Failover/retry bookkeeping for one `set_media` lifetime
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RetryContext {
    pub current_backup_index: usize,
    pub current_retry_index: u32,
    /// Position (seconds) to restore once the recreated engine is ready
    pub pending_initial_time: f64,
}

impl RetryContext {
    /// Context for a freshly set media
    pub fn for_media(media: &MediaDescriptor) -> Self {
        Self {
            pending_initial_time: media.initial_time,
            ..Default::default()
        }
    }

    /// Record the resume point for the current failure chain.
    ///
    /// First non-zero position wins; returns whether it was recorded.
    pub fn capture_position(&mut self, position: f64) -> bool {
        if self.pending_initial_time == 0.0 && position > 0.0 {
            self.pending_initial_time = position;
            return true;
        }
        false
    }

    /// Take the pending resume point, leaving zero behind
    pub fn take_pending_position(&mut self) -> Option<f64> {
        let pending = std::mem::take(&mut self.pending_initial_time);
        (pending > 0.0).then_some(pending)
    }
}

/// Visibility of local chrome, toggled by the cast synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChromeState {
    pub controls_enabled: bool,
    pub auto_hide: bool,
    pub output_menu_visible: bool,
    pub caption_menu_visible: bool,
}

impl Default for ChromeState {
    fn default() -> Self {
        Self {
            controls_enabled: true,
            auto_hide: true,
            output_menu_visible: true,
            caption_menu_visible: true,
        }
    }
}

// =============================================================================
// Error Models
// =============================================================================

/// Kind of a published session error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidUrl,
    EmptyUrl,
    DeviceBlocked,
    PlaybackFailure,
    DrmDenied,
    Unknown,
}

impl ErrorKind {
    /// Stable numeric code reported to API consumers
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::InvalidUrl => 0,
            ErrorKind::EmptyUrl => 1,
            ErrorKind::DeviceBlocked => 2,
            ErrorKind::Unknown => 3,
            ErrorKind::PlaybackFailure => 4,
            ErrorKind::DrmDenied => 5,
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "Invalid URL format",
            ErrorKind::EmptyUrl => "Missing URL for the specified media",
            ErrorKind::DeviceBlocked => "Specified media cannot play on this device",
            ErrorKind::PlaybackFailure => "Oops! Please try again later...",
            ErrorKind::DrmDenied => "You're not allowed to watch this video",
            ErrorKind::Unknown => "Unknown exception",
        }
    }
}

/// Icon rendered next to an error overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorIcon {
    NoSignal,
    Forbidden,
}

/// Error published on the bus; built fresh for every occurrence
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{message}")]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub code: i32,
    pub message: String,
    pub critical: bool,
    #[serde(skip)]
    #[source]
    pub cause: Option<EngineError>,
    pub icon: Option<ErrorIcon>,
}

impl ErrorDescriptor {
    /// Error of the given kind with its default message.
    ///
    /// Validation and policy errors are critical; the others start recoverable.
    pub fn new(kind: ErrorKind) -> Self {
        let critical = matches!(
            kind,
            ErrorKind::InvalidUrl
                | ErrorKind::EmptyUrl
                | ErrorKind::DeviceBlocked
                | ErrorKind::DrmDenied
        );
        Self {
            kind,
            code: kind.code(),
            message: kind.default_message().to_string(),
            critical,
            cause: None,
            icon: None,
        }
    }

    pub fn invalid_url() -> Self {
        Self::new(ErrorKind::InvalidUrl)
    }

    pub fn empty_url() -> Self {
        Self::new(ErrorKind::EmptyUrl)
    }

    pub fn device_blocked() -> Self {
        Self::new(ErrorKind::DeviceBlocked)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_cause(mut self, cause: EngineError) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_icon(mut self, icon: ErrorIcon) -> Self {
        self.icon = Some(icon);
        self
    }
}

// =============================================================================
// Cast Models
// =============================================================================

/// Link between the local session and a remote receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CastLinkState {
    pub connected: bool,
    pub last_known_remote_position_ms: u64,
    pub remote_duration_ms: u64,
    pub intercept_active: bool,
}

// =============================================================================
// Event Models
// =============================================================================

/// Rendered video geometry reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
    pub rotation: i32,
    pub pixel_aspect: f32,
}

/// Lifecycle tag of a session event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Load,
    Start,
    Play,
    Pause,
    Stop,
    Progress,
    Error,
    Finish,
    Unload,
    Fullscreen,
    FullscreenExit,
    Resize,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            EventKind::Load => "LOAD",
            EventKind::Start => "START",
            EventKind::Play => "PLAY",
            EventKind::Pause => "PAUSE",
            EventKind::Stop => "STOP",
            EventKind::Progress => "PROGRESS",
            EventKind::Error => "ERROR",
            EventKind::Finish => "FINISH",
            EventKind::Unload => "UNLOAD",
            EventKind::Fullscreen => "FULLSCREEN",
            EventKind::FullscreenExit => "FULLSCREEN_EXIT",
            EventKind::Resize => "RESIZE",
        };
        f.write_str(tag)
    }
}

/// Event posted on the session bus; immutable once posted
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEvent {
    Load { session: SessionId, url: String },
    Start,
    Play,
    Pause,
    Stop,
    /// Position and duration in seconds
    Progress { position: f64, duration: f64 },
    Error(ErrorDescriptor),
    Finish,
    Unload,
    Fullscreen,
    FullscreenExit,
    Resize(VideoSize),
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Load { .. } => EventKind::Load,
            SessionEvent::Start => EventKind::Start,
            SessionEvent::Play => EventKind::Play,
            SessionEvent::Pause => EventKind::Pause,
            SessionEvent::Stop => EventKind::Stop,
            SessionEvent::Progress { .. } => EventKind::Progress,
            SessionEvent::Error(_) => EventKind::Error,
            SessionEvent::Finish => EventKind::Finish,
            SessionEvent::Unload => EventKind::Unload,
            SessionEvent::Fullscreen => EventKind::Fullscreen,
            SessionEvent::FullscreenExit => EventKind::FullscreenExit,
            SessionEvent::Resize(_) => EventKind::Resize,
        }
    }

    /// Error payload, if this is an ERROR event
    pub fn as_error(&self) -> Option<&ErrorDescriptor> {
        match self {
            SessionEvent::Error(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::Load { url, .. } => write!(f, "LOAD {}", url),
            SessionEvent::Progress { position, duration } => write!(
                f,
                "PROGRESS {} / {}",
                format_duration(secs_to_duration(*position)),
                format_duration(secs_to_duration(*duration))
            ),
            SessionEvent::Error(err) => {
                let severity = if err.critical { "critical" } else { "recoverable" };
                write!(f, "ERROR [{}] {} ({})", err.code, err.message, severity)
            }
            SessionEvent::Resize(size) => write!(
                f,
                "RESIZE {}x{} rot={} par={:.2}",
                size.width, size.height, size.rotation, size.pixel_aspect
            ),
            other => write!(f, "{}", other.kind()),
        }
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_default()
}

/// Format a Duration as HH:MM:SS or MM:SS
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::engine::DrmError;

    // -------------------------------------------------------------------------
    // Media Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_stream_type_from_str_loose() {
        assert_eq!(StreamType::from_str_loose("HLS"), StreamType::Hls);
        assert_eq!(StreamType::from_str_loose("m3u8"), StreamType::Hls);
        assert_eq!(StreamType::from_str_loose(" dash "), StreamType::Dash);
        assert_eq!(StreamType::from_str_loose("mp4"), StreamType::Other);
        assert_eq!(StreamType::from_str_loose(""), StreamType::Other);
    }

    #[test]
    fn test_stream_type_serde() {
        let json = serde_json::to_string(&StreamType::Dash).unwrap();
        assert_eq!(json, "\"dash\"");

        let parsed: StreamType = serde_json::from_str("\"hls\"").unwrap();
        assert_eq!(parsed, StreamType::Hls);
    }

    #[test]
    fn test_descriptor_defaults_autoplay() {
        let media = MediaDescriptor::new("http://cdn/a.m3u8");
        assert!(media.autoplay);
        assert_eq!(media.retries_total, 0);
        assert!(media.backup_urls.is_empty());
    }

    #[test]
    fn test_descriptor_deserializes_partial_json() {
        let media: MediaDescriptor =
            serde_json::from_str(r#"{"url":"http://cdn/a","backup_urls":["http://cdn/b"]}"#)
                .unwrap();
        assert_eq!(media.url, "http://cdn/a");
        assert_eq!(media.backup_urls, vec!["http://cdn/b".to_string()]);
        assert!(media.autoplay);
    }

    #[test]
    fn test_descriptor_castable() {
        let mut media = MediaDescriptor::new("http://cdn/a");
        assert!(media.is_castable());
        media.is_live = true;
        assert!(!media.is_castable());
        media.is_live = false;
        media.is_audio_only = true;
        assert!(!media.is_castable());
    }

    #[test]
    fn test_selected_caption_prefers_index() {
        let mut media = MediaDescriptor::new("http://cdn/a");
        media.captions = vec![
            Caption {
                label: "English".into(),
                language: "en".into(),
                url: "http://cdn/en.vtt".into(),
                is_default: true,
            },
            Caption {
                label: "Português".into(),
                language: "pt-br".into(),
                url: "http://cdn/pt.vtt".into(),
                is_default: false,
            },
        ];
        assert_eq!(media.selected_caption().unwrap().language, "en");
        media.caption_index = Some(1);
        assert_eq!(media.selected_caption().unwrap().language, "pt-br");
        media.caption_index = Some(9);
        assert!(media.selected_caption().is_none());
    }

    #[test]
    fn test_drm_license_param() {
        let mut drm = DrmParams::default();
        drm.params.insert("SessionId".into(), "abc".into());
        assert_eq!(drm.license_param("SessionId"), Some("abc"));
        assert_eq!(drm.license_param("Ticket"), None);
    }

    // -------------------------------------------------------------------------
    // Session Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_retry_context_first_nonzero_capture_wins() {
        let mut ctx = RetryContext::default();
        assert!(!ctx.capture_position(0.0));
        assert!(ctx.capture_position(42.5));
        assert!(!ctx.capture_position(3.0));
        assert_eq!(ctx.pending_initial_time, 42.5);
        assert_eq!(ctx.take_pending_position(), Some(42.5));
        assert_eq!(ctx.take_pending_position(), None);
    }

    #[test]
    fn test_retry_context_for_media_uses_initial_time() {
        let media = MediaDescriptor::new("http://cdn/a").with_initial_time(15.0);
        let ctx = RetryContext::for_media(&media);
        assert_eq!(ctx.pending_initial_time, 15.0);
        assert_eq!(ctx.current_backup_index, 0);
        assert_eq!(ctx.current_retry_index, 0);
    }

    #[test]
    fn test_session_state_terminal() {
        assert!(SessionState::Destroyed.is_terminal());
        assert!(SessionState::Error { critical: true }.is_terminal());
        assert!(!SessionState::Error { critical: false }.is_terminal());
        assert!(!SessionState::Paused.is_terminal());
    }

    // -------------------------------------------------------------------------
    // Error Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_error_codes_and_criticality() {
        assert_eq!(ErrorDescriptor::invalid_url().code, 0);
        assert_eq!(ErrorDescriptor::empty_url().code, 1);
        assert!(ErrorDescriptor::device_blocked().critical);
        assert!(!ErrorDescriptor::new(ErrorKind::PlaybackFailure).critical);
        assert!(ErrorDescriptor::new(ErrorKind::DrmDenied).critical);
    }

    #[test]
    fn test_error_descriptor_source_chain() {
        use std::error::Error as _;

        let err = ErrorDescriptor::new(ErrorKind::DrmDenied)
            .with_cause(EngineError::Drm(DrmError::LicenseDenied("expired".into())));
        assert_eq!(err.to_string(), "You're not allowed to watch this video");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_descriptor_serializes_without_cause() {
        let err = ErrorDescriptor::new(ErrorKind::PlaybackFailure)
            .with_cause(EngineError::Source("404".into()))
            .with_icon(ErrorIcon::NoSignal);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "playback_failure");
        assert_eq!(json["icon"], "no_signal");
        assert!(json.get("cause").is_none());
    }

    // -------------------------------------------------------------------------
    // Event Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(SessionEvent::Start.kind(), EventKind::Start);
        assert_eq!(
            SessionEvent::Progress {
                position: 1.0,
                duration: 2.0
            }
            .kind(),
            EventKind::Progress
        );
        assert_eq!(EventKind::FullscreenExit.to_string(), "FULLSCREEN_EXIT");
    }

    #[test]
    fn test_event_serde_tagged() {
        let json = serde_json::to_value(SessionEvent::Progress {
            position: 37.0,
            duration: 120.0,
        })
        .unwrap();
        assert_eq!(json["type"], "PROGRESS");
        assert_eq!(json["position"], 37.0);

        let json = serde_json::to_value(SessionEvent::Unload).unwrap();
        assert_eq!(json["type"], "UNLOAD");
    }

    #[test]
    fn test_event_display() {
        let ev = SessionEvent::Progress {
            position: 75.0,
            duration: 3725.0,
        };
        assert_eq!(ev.to_string(), "PROGRESS 01:15 / 01:02:05");
        assert_eq!(SessionEvent::Play.to_string(), "PLAY");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "00:00");
        assert_eq!(format_duration(Duration::from_secs(59)), "00:59");
        assert_eq!(format_duration(Duration::from_secs(3600)), "01:00:00");
    }
}
