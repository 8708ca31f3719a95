//! Retry/failover policy
//!
//! Decides what to do with each engine error. The decision only touches the
//! retry bookkeeping and the descriptor's active URL; tearing down and
//! rebuilding the engine is left to the controller.

use crate::models::{ErrorDescriptor, ErrorIcon, ErrorKind, MediaDescriptor, RetryContext};
use crate::stream::engine::EngineError;

/// Outcome of one engine error
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Swap to the next backup URL and recreate the engine right away
    Failover { url: String },
    /// Tear down and retry the same URL after a countdown
    Countdown { seconds: u32 },
    /// Give up; the descriptor is the critical error to publish
    Fatal(ErrorDescriptor),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailoverPolicy {
    countdown_secs: u32,
}

impl FailoverPolicy {
    pub fn new(countdown_secs: u32) -> Self {
        Self { countdown_secs }
    }

    pub fn countdown_secs(&self) -> u32 {
        self.countdown_secs
    }

    /// Decide how to react to `cause`.
    ///
    /// `position` is the playback position (seconds) at the time of failure;
    /// it is captured as the resume point unless this chain already has one.
    pub fn decide(
        &self,
        ctx: &mut RetryContext,
        media: &mut MediaDescriptor,
        cause: &EngineError,
        network_available: bool,
        position: f64,
    ) -> RecoveryAction {
        if network_available {
            if let Some(url) = media.backup_urls.get(ctx.current_backup_index).cloned() {
                ctx.capture_position(position);
                ctx.current_backup_index += 1;
                media.url = url.clone();
                return RecoveryAction::Failover { url };
            }
        } else if ctx.current_retry_index < media.retries_total {
            ctx.capture_position(position);
            ctx.current_retry_index += 1;
            return RecoveryAction::Countdown {
                seconds: self.countdown_secs,
            };
        }

        RecoveryAction::Fatal(terminal_error(cause, media))
    }
}

/// Non-critical error published when a backup URL is tried
pub fn failover_error(cause: &EngineError) -> ErrorDescriptor {
    ErrorDescriptor::new(ErrorKind::PlaybackFailure)
        .with_message("Connecting...")
        .with_critical(false)
        .with_cause(cause.clone())
}

/// Non-critical error published on every countdown tick
pub fn countdown_error(cause: &EngineError, seconds_left: u32) -> ErrorDescriptor {
    let message = if seconds_left > 0 {
        format!("Reconnecting in {}s", seconds_left)
    } else {
        "Connecting...".to_string()
    };
    ErrorDescriptor::new(ErrorKind::PlaybackFailure)
        .with_message(message)
        .with_critical(false)
        .with_cause(cause.clone())
        .with_icon(ErrorIcon::NoSignal)
}

/// Critical error for a failure nothing can recover from
pub fn terminal_error(cause: &EngineError, media: &MediaDescriptor) -> ErrorDescriptor {
    if cause.is_drm_denial() {
        let what = if media.is_audio_only {
            "listen to this audio"
        } else {
            "watch this video"
        };
        ErrorDescriptor::new(ErrorKind::DrmDenied)
            .with_message(format!("You're not allowed to {}", what))
            .with_critical(true)
            .with_cause(cause.clone())
            .with_icon(ErrorIcon::Forbidden)
    } else {
        ErrorDescriptor::new(ErrorKind::Unknown)
            .with_message("Oops! Please try again later...")
            .with_critical(true)
            .with_cause(cause.clone())
    }
}
