//! Remote cast receiver contract
//!
//! The session talks to a cast receiver through the [`CastSession`]
//! capability. This module also owns the wire shapes exchanged with the
//! receiver: the load payload sent on connect and the progress/finish
//! messages coming back on the custom namespace.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::WeakUnboundedSender;
use tracing::debug;

use crate::config::CastConfig;
use crate::models::MediaDescriptor;
use crate::session::Command;

/// Errors from the cast collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CastError {
    #[error("receiver rejected load: {0}")]
    LoadRejected(String),
    #[error("cast channel closed")]
    ChannelClosed,
    #[error("cast request timed out")]
    Timeout,
}

/// Outbound operations on a connected remote receiver
pub trait CastSession: Send + Sync {
    /// Ask the receiver to load a media; resolves with the receiver's ack
    fn load_remote(&self, payload: CastPayload) -> BoxFuture<'static, Result<(), CastError>>;
    fn play_remote(&self);
    fn pause_remote(&self);
    fn seek_remote(&self, position_ms: u64);
    fn register_progress_updates(&self, enabled: bool);
    fn stop_casting(&self);
}

// =============================================================================
// Load Payload
// =============================================================================

/// DRM ticket forwarded to the receiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastDrm {
    pub session_id: String,
    pub ticket: String,
}

/// Receiver player parameters, sent as a URL query string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastQuery {
    pub html5: bool,
    pub environment: String,
    pub app_id: String,
    /// Start position in whole seconds
    pub initial_time: u64,
    /// Caption selection, e.g. `[en,ffcc00,42]`
    pub captions: Option<String>,
}

impl CastQuery {
    /// Encode as `key=value&...` with values percent-encoded
    pub fn to_query_string(&self) -> String {
        let mut pairs = vec![
            ("html5", self.html5.to_string()),
            ("castApi", "true".to_string()),
            ("castAppId", self.app_id.clone()),
            ("env", self.environment.clone()),
            ("initialTime", self.initial_time.to_string()),
        ];
        if let Some(ref captions) = self.captions {
            pairs.push(("captionTheme", captions.clone()));
        }

        pairs
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(&v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Load payload understood by the receiver application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastPayload {
    pub title: String,
    #[serde(rename = "m")]
    pub media_id: String,
    /// Duration in whole seconds
    pub duration: u64,
    pub theme: Option<String>,
    #[serde(rename = "ph")]
    pub project_hash: Option<String>,
    #[serde(rename = "qs")]
    pub query: String,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drm: Option<CastDrm>,
}

impl CastPayload {
    /// Translate a media descriptor into the receiver's load payload
    pub fn from_media(
        media: &MediaDescriptor,
        config: &CastConfig,
        position_secs: f64,
        duration_secs: f64,
    ) -> Self {
        let captions = media
            .selected_caption()
            .map(|c| config.caption_theme(&c.language));
        let query = CastQuery {
            html5: true,
            environment: config.environment.clone(),
            app_id: config.app_id.clone(),
            initial_time: position_secs.max(0.0) as u64,
            captions,
        };
        let drm = media.drm.as_ref().and_then(|drm| {
            Some(CastDrm {
                session_id: drm.license_param("SessionId")?.to_string(),
                ticket: drm.license_param("Ticket")?.to_string(),
            })
        });

        Self {
            title: media.title.clone(),
            media_id: media.id.clone(),
            duration: duration_secs.max(0.0) as u64,
            theme: media.theme_color.clone(),
            project_hash: media.project_hash.clone(),
            query: query.to_query_string(),
            base_url: config.player_url.clone(),
            drm,
        }
    }
}

// =============================================================================
// Inbound Messages
// =============================================================================

/// Message received from the receiver on the custom namespace
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverMessage {
    /// Remote position and duration, whole seconds
    Progress { position: u64, duration: u64 },
    Finished,
}

impl ReceiverMessage {
    /// Parse a raw receiver message; anything unrecognised yields `None`
    pub fn parse(raw: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(raw).ok()?;
        let obj = value.as_object()?;

        if obj.contains_key("progress") && obj.contains_key("duration") {
            let position = obj.get("progress")?.as_f64()?;
            let duration = obj.get("duration")?.as_f64()?;
            if !in_ms_range(position) || !in_ms_range(duration) {
                return None;
            }
            return Some(ReceiverMessage::Progress {
                position: position as u64,
                duration: duration as u64,
            });
        }

        match obj.get("type")?.as_str()? {
            t if t.eq_ignore_ascii_case("finish") => Some(ReceiverMessage::Finished),
            _ => None,
        }
    }
}

/// Whole seconds that still fit in a millisecond `u64`
fn in_ms_range(secs: f64) -> bool {
    secs.is_finite() && secs >= 0.0 && secs <= (u64::MAX / 1000) as f64
}

// =============================================================================
// Cast Callback Sink
// =============================================================================

/// Inbound cast callbacks, safe to call from the cast transport's thread
#[derive(Clone)]
pub struct CastEvents {
    tx: WeakUnboundedSender<Command>,
}

impl std::fmt::Debug for CastEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CastEvents").finish_non_exhaustive()
    }
}

impl CastEvents {
    pub(crate) fn new(tx: WeakUnboundedSender<Command>) -> Self {
        Self { tx }
    }

    pub fn connected(&self) {
        self.send(Command::CastConnected);
    }

    pub fn disconnected(&self) {
        self.send(Command::CastDisconnected);
    }

    pub fn message(&self, raw: impl Into<String>) {
        self.send(Command::CastMessage(raw.into()));
    }

    fn send(&self, cmd: Command) {
        match self.tx.upgrade() {
            Some(tx) => {
                let _ = tx.send(cmd);
            }
            None => debug!("session gone, dropping cast callback"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Caption, DrmParams};

    fn cast_config() -> CastConfig {
        CastConfig {
            environment: "prod".into(),
            app_id: "A1B2C3".into(),
            player_url: "https://player.example.com/receiver".into(),
            caption_color: "ffcc00".into(),
            caption_size: 42,
        }
    }

    // -------------------------------------------------------------------------
    // Payload Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_query_string_encoding() {
        let qs = CastQuery {
            html5: true,
            environment: "prod".into(),
            app_id: "A1B2C3".into(),
            initial_time: 37,
            captions: Some("[en,ffcc00,42]".into()),
        }
        .to_query_string();

        assert_eq!(
            qs,
            "html5=true&castApi=true&castAppId=A1B2C3&env=prod&initialTime=37&captionTheme=%5Ben%2Cffcc00%2C42%5D"
        );
    }

    #[test]
    fn test_query_string_without_captions() {
        let qs = CastQuery {
            html5: true,
            environment: "staging".into(),
            app_id: "X".into(),
            initial_time: 0,
            captions: None,
        }
        .to_query_string();
        assert!(!qs.contains("captionTheme"));
        assert!(qs.contains("env=staging"));
    }

    #[test]
    fn test_payload_from_media() {
        let mut media = MediaDescriptor::new("http://cdn/a.m3u8");
        media.title = "Launch Keynote".into();
        media.id = "m-42".into();
        media.theme_color = Some("#ff6600".into());
        media.captions = vec![Caption {
            label: "English".into(),
            language: "en".into(),
            url: "http://cdn/en.vtt".into(),
            is_default: true,
        }];

        let payload = CastPayload::from_media(&media, &cast_config(), 12.7, 300.0);

        assert_eq!(payload.title, "Launch Keynote");
        assert_eq!(payload.media_id, "m-42");
        assert_eq!(payload.duration, 300);
        assert!(payload.query.contains("initialTime=12"));
        assert!(payload.query.contains("captionTheme=%5Ben%2Cffcc00%2C42%5D"));
        assert!(payload.drm.is_none());

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["m"], "m-42");
        assert_eq!(json["baseUrl"], "https://player.example.com/receiver");
        assert!(json.get("drm").is_none());
    }

    #[test]
    fn test_payload_includes_drm_ticket() {
        let mut media = MediaDescriptor::new("http://cdn/a.mpd");
        let mut drm = DrmParams::default();
        drm.params.insert("SessionId".into(), "sess-1".into());
        drm.params.insert("Ticket".into(), "tkt-9".into());
        media.drm = Some(drm);

        let payload = CastPayload::from_media(&media, &cast_config(), 0.0, 10.0);
        assert_eq!(
            payload.drm,
            Some(CastDrm {
                session_id: "sess-1".into(),
                ticket: "tkt-9".into()
            })
        );
    }

    #[test]
    fn test_payload_skips_incomplete_drm() {
        let mut media = MediaDescriptor::new("http://cdn/a.mpd");
        let mut drm = DrmParams::default();
        drm.params.insert("SessionId".into(), "sess-1".into());
        media.drm = Some(drm);

        let payload = CastPayload::from_media(&media, &cast_config(), 0.0, 10.0);
        assert!(payload.drm.is_none());
    }

    // -------------------------------------------------------------------------
    // Message Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_progress_message() {
        assert_eq!(
            ReceiverMessage::parse(r#"{"progress":37,"duration":120}"#),
            Some(ReceiverMessage::Progress {
                position: 37,
                duration: 120
            })
        );
        // fractional seconds are truncated
        assert_eq!(
            ReceiverMessage::parse(r#"{"progress":37.9,"duration":120.2}"#),
            Some(ReceiverMessage::Progress {
                position: 37,
                duration: 120
            })
        );
    }

    #[test]
    fn test_parse_finish_message() {
        assert_eq!(
            ReceiverMessage::parse(r#"{"type":"finish"}"#),
            Some(ReceiverMessage::Finished)
        );
        assert_eq!(
            ReceiverMessage::parse(r#"{"type":"FINISH"}"#),
            Some(ReceiverMessage::Finished)
        );
    }

    #[test]
    fn test_parse_malformed_messages() {
        let inputs = [
            "",
            "not json",
            "[1,2,3]",
            r#"{"progress":"ten","duration":120}"#,
            r#"{"progress":10}"#,
            r#"{"type":"pause"}"#,
            r#"{"type":42}"#,
            r#"{"progress":-1,"duration":120}"#,
            r#"{"progress":1e17,"duration":120}"#,
            r#"{"progress":10,"duration":1e300}"#,
        ];
        for input in inputs {
            assert_eq!(ReceiverMessage::parse(input), None, "input: {:?}", input);
        }
    }
}
