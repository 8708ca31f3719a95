//! CLI Command Handlers
//!
//! Each handler takes CLI args and Output, returns ExitCode.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::cli::{CastPayloadCmd, ConfigCmd, ExitCode, Output, SimulateCmd};
use crate::config::SessionConfig;
use crate::models::{Caption, DrmParams, MediaDescriptor, SessionEvent};
use crate::session::SessionBuilder;
use crate::stream::cast::CastPayload;
use crate::stream::network::StaticNetwork;
use crate::stream::sim::{SimScript, SimulatedEngineFactory};

// =============================================================================
// Simulate Command
// =============================================================================

/// Build the descriptor a `simulate` run plays
pub fn simulated_media(cmd: &SimulateCmd) -> MediaDescriptor {
    let mut media = MediaDescriptor::new(cmd.url.clone())
        .with_backup_urls(cmd.backups.iter().cloned())
        .with_retries(cmd.retries)
        .with_initial_time(cmd.start)
        .with_stream_type(cmd.stream_type.into());
    media.title = "simulation".to_string();
    media.duration = cmd.duration;
    media.is_live = cmd.live;
    media.is_audio_only = cmd.audio_only;
    media
}

pub async fn simulate_cmd(cmd: SimulateCmd, config: SessionConfig, output: &Output) -> ExitCode {
    if cmd.duration <= 0.0 {
        return output.error("Duration must be positive", ExitCode::InvalidArgs);
    }

    let media = simulated_media(&cmd);
    let factory = SimulatedEngineFactory::new(SimScript {
        duration_ms: Some((cmd.duration * 1000.0) as u64),
        failures: cmd.fail,
        drm_denied: cmd.drm_denied,
        ..Default::default()
    });
    let control = factory.control();

    let session = SessionBuilder::new(Arc::new(factory))
        .network(Arc::new(StaticNetwork::new(!cmd.offline)))
        .config(config)
        .spawn();
    let (_, mut events) = session.subscribe_channel();

    output.info(format!("Simulating: {}", media));
    if let Err(e) = session.set_media(media) {
        return output.error(format!("Session unavailable: {}", e), ExitCode::Error);
    }

    let deadline = tokio::time::sleep(Duration::from_secs(cmd.run_for));
    tokio::pin!(deadline);
    let mut end_check = tokio::time::interval(Duration::from_millis(100));
    let mut failed = false;

    loop {
        tokio::select! {
            _ = &mut deadline => {
                output.info("Run time elapsed");
                break;
            }
            _ = end_check.tick() => {
                if control.reached_end() {
                    debug!("simulated media reached its end");
                    control.finish();
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if let Err(e) = output.line(&event) {
                    return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
                }
                match event {
                    SessionEvent::Error(ref err) if err.critical => failed = true,
                    SessionEvent::Finish | SessionEvent::Unload => break,
                    _ => {}
                }
            }
        }
    }

    let _ = session.shutdown();
    if failed {
        ExitCode::PlaybackFailed
    } else {
        ExitCode::Success
    }
}

// =============================================================================
// Cast Payload Command
// =============================================================================

/// Build the descriptor described by `cast-payload` arguments
pub fn payload_media(cmd: &CastPayloadCmd) -> MediaDescriptor {
    let mut media = MediaDescriptor::new(cmd.url.clone());
    media.title = cmd.title.clone();
    media.id = cmd.id.clone();
    media.duration = cmd.duration;

    if let Some(ref language) = cmd.caption {
        media.captions.push(Caption {
            label: language.clone(),
            language: language.clone(),
            url: String::new(),
            is_default: true,
        });
    }

    if let (Some(session), Some(ticket)) = (&cmd.drm_session, &cmd.drm_ticket) {
        let mut params = BTreeMap::new();
        params.insert("SessionId".to_string(), session.clone());
        params.insert("Ticket".to_string(), ticket.clone());
        media.drm = Some(DrmParams {
            license_url: None,
            params,
        });
    }
    media
}

pub fn cast_payload_cmd(cmd: CastPayloadCmd, config: &SessionConfig, output: &Output) -> ExitCode {
    let media = payload_media(&cmd);
    if !media.is_castable() {
        return output.error("Media cannot be cast", ExitCode::InvalidArgs);
    }

    let payload = CastPayload::from_media(&media, &config.cast, cmd.position, cmd.duration);
    match output.print(&payload) {
        Ok(()) => ExitCode::Success,
        Err(e) => output.error(format!("Failed to serialize: {}", e), ExitCode::Error),
    }
}

// =============================================================================
// Config Command
// =============================================================================

#[derive(Debug, Serialize)]
struct ConfigReport<'a> {
    path: Option<PathBuf>,
    config: &'a SessionConfig,
}

pub fn config_cmd(
    cmd: ConfigCmd,
    config: &SessionConfig,
    path: Option<PathBuf>,
    output: &Output,
) -> ExitCode {
    let path = path.or_else(SessionConfig::path);

    if cmd.save {
        let Some(ref target) = path else {
            return output.error("Could not determine config path", ExitCode::Error);
        };
        if let Err(e) = config.save_to(target) {
            return output.error(format!("Failed to save config: {}", e), ExitCode::Error);
        }
        output.info(format!("Saved {}", target.display()));
    }

    match output.print(ConfigReport { path, config }) {
        Ok(()) => ExitCode::Success,
        Err(e) => output.error(format!("Failed to serialize: {}", e), ExitCode::Error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;

    #[test]
    fn test_simulated_media_from_args() {
        let cli = Cli::parse_from([
            "playsession",
            "simulate",
            "https://cdn-a/a.m3u8",
            "-b",
            "https://cdn-b/a.m3u8",
            "--retries",
            "3",
            "--live",
            "--duration",
            "12.5",
        ]);
        let Command::Simulate(cmd) = cli.command else {
            panic!("Expected Simulate command");
        };
        let media = simulated_media(&cmd);
        assert_eq!(media.backup_urls, vec!["https://cdn-b/a.m3u8"]);
        assert_eq!(media.retries_total, 3);
        assert!(media.is_live);
        assert_eq!(media.duration, 12.5);
    }

    #[test]
    fn test_payload_media_drm_and_caption() {
        let cli = Cli::parse_from([
            "playsession",
            "cast-payload",
            "https://cdn/a.mpd",
            "--caption",
            "es",
            "--drm-session",
            "s1",
            "--drm-ticket",
            "t1",
        ]);
        let Command::CastPayload(cmd) = cli.command else {
            panic!("Expected CastPayload command");
        };
        let media = payload_media(&cmd);
        assert_eq!(media.selected_caption().map(|c| c.language.as_str()), Some("es"));
        let drm = media.drm.as_ref().unwrap();
        assert_eq!(drm.license_param("SessionId"), Some("s1"));
        assert_eq!(drm.license_param("Ticket"), Some("t1"));
    }
}
