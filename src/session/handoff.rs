//! Cast handoff
//!
//! While a receiver is connected the session intercepts play/pause/seek and
//! forwards them to the [`CastSession`]; the local engine stays paused and
//! time queries answer with the receiver's last reported position.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::SessionActor;
use crate::models::{CastLinkState, SessionEvent};
use crate::stream::cast::{CastPayload, CastSession, ReceiverMessage};

impl SessionActor {
    pub(super) fn attach_cast(&mut self, cast: Arc<dyn CastSession>) {
        debug!("cast session attached");
        self.cast = Some(cast);
    }

    pub(super) fn detach_cast(&mut self) {
        if self.link.connected {
            self.on_cast_disconnected();
        }
        self.cast = None;
    }

    /// Casting applies only with a collaborator and castable media
    pub(super) fn cast_enabled(&self) -> bool {
        self.cast.is_some() && self.media.as_ref().is_some_and(|m| m.is_castable())
    }

    pub(super) fn on_cast_connected(&mut self) {
        if !self.cast_enabled() {
            debug!("cast connect ignored for this media");
            return;
        }
        if self.link.connected {
            return;
        }

        self.progress.stop();
        self.pause_engine();

        self.link = CastLinkState {
            connected: true,
            intercept_active: true,
            ..CastLinkState::default()
        };
        self.chrome.auto_hide = false;
        self.chrome.output_menu_visible = false;
        self.chrome.caption_menu_visible = false;

        self.load_remote();
    }

    /// Send the current media to the receiver and subscribe to its progress
    pub(super) fn load_remote(&mut self) {
        let (Some(cast), Some(media)) = (self.cast.clone(), self.media.as_ref()) else {
            return;
        };

        // the local engine still holds the position to hand over
        let position = self
            .engine
            .as_ref()
            .map_or(0.0, |e| e.position_ms() as f64 / 1000.0);
        let duration = self
            .engine
            .as_ref()
            .and_then(|e| e.duration_ms())
            .map_or(media.duration, |ms| ms as f64 / 1000.0);

        let payload = CastPayload::from_media(media, &self.config.cast, position, duration);
        info!(title = %payload.title, position, "handing playback to cast receiver");

        let ack = cast.load_remote(payload);
        tokio::spawn(async move {
            match ack.await {
                Ok(()) => debug!("remote load acknowledged"),
                Err(err) => warn!(%err, "remote load failed"),
            }
        });

        cast.register_progress_updates(true);
        self.link.last_known_remote_position_ms = 0;
        self.link.remote_duration_ms = 0;
        self.remote_playing = true;
    }

    pub(super) fn on_cast_disconnected(&mut self) {
        if !self.link.connected {
            return;
        }
        let resume_ms = self.link.last_known_remote_position_ms;
        info!(resume_ms, "cast receiver disconnected, resuming locally");

        self.release_intercept();

        match self.engine.as_mut() {
            Some(engine) => engine.seek(resume_ms),
            None => self.retry.pending_initial_time = resume_ms as f64 / 1000.0,
        }
        self.play();
    }

    /// Drop the intercept and restore local chrome without resuming
    pub(super) fn release_intercept(&mut self) {
        self.link = CastLinkState::default();
        self.remote_playing = false;
        self.chrome.auto_hide = true;
        self.chrome.output_menu_visible = true;
        self.chrome.caption_menu_visible = true;
    }

    pub(super) fn on_cast_message(&mut self, raw: &str) {
        if !self.link.connected {
            debug!("cast message without a connected receiver");
            return;
        }
        match ReceiverMessage::parse(raw) {
            Some(ReceiverMessage::Progress { position, duration }) => {
                self.link.last_known_remote_position_ms = position.saturating_mul(1000);
                self.link.remote_duration_ms = duration.saturating_mul(1000);
                self.bus.publish(SessionEvent::Progress {
                    position: position as f64,
                    duration: duration as f64,
                });
            }
            Some(ReceiverMessage::Finished) => {
                info!("receiver finished playback");
                if let Some(cast) = &self.cast {
                    cast.stop_casting();
                }
            }
            None => debug!(raw, "ignoring receiver message"),
        }
    }

    pub(super) fn remote_play(&mut self) {
        self.bus.publish(SessionEvent::Play);
        self.remote_playing = true;
        if let Some(cast) = &self.cast {
            cast.play_remote();
        }
    }

    pub(super) fn remote_pause(&mut self) {
        self.bus.publish(SessionEvent::Pause);
        self.remote_playing = false;
        if let Some(cast) = &self.cast {
            cast.pause_remote();
        }
    }

    pub(super) fn remote_seek(&mut self, position_ms: u64) {
        if let Some(cast) = &self.cast {
            cast.seek_remote(position_ms);
        }
    }
}
