//! CLI - Command Line Interface for playsession
//!
//! Drives a real playback session against the simulated engine and inspects
//! the payloads a cast receiver would get. All output is JSON-parseable.
//!
//! # Examples
//!
//! ```bash
//! # Watch a session fail over to a backup
//! playsession simulate https://cdn-a/master.m3u8 --backup https://cdn-b/master.m3u8 --fail 1
//!
//! # Offline retry countdown, JSON lines
//! playsession simulate https://cdn-a/live.m3u8 --offline --retries 2 --fail 9 --json
//!
//! # Receiver load payload
//! playsession cast-payload https://cdn-a/vod.mpd --title "Trailer" --caption en
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::models::StreamType;

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit codes for CLI operations (semantic for scripting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// General error
    Error = 1,
    /// Invalid arguments
    InvalidArgs = 2,
    /// Session ended with a critical error
    PlaybackFailed = 3,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// playsession - media playback session controller
#[derive(Parser, Debug)]
#[command(
    name = "playsession",
    version,
    author = "Gorka & Hermes",
    about = "Media playback session controller",
    long_about = "Owns the lifecycle of a playback session: engine creation, \
                  failover to backup URLs, offline retry countdowns and cast handoff.\n\n\
                  Use `simulate` to run a session against the built-in simulated engine.",
    after_help = "EXAMPLES:\n\
                  playsession simulate https://cdn/a.m3u8 --backup https://cdn/b.m3u8 --fail 1\n\
                  playsession simulate https://cdn/a.m3u8 --offline --retries 2 --fail 9\n\
                  playsession cast-payload https://cdn/a.mpd --caption en\n\
                  playsession config --json"
)]
pub struct Cli {
    /// Output format as JSON (default for non-TTY)
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Check if JSON output should be used
    pub fn should_json(&self) -> bool {
        self.json || !std::io::stdout().is_terminal()
    }
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a session against the simulated engine and print its events
    #[command(visible_alias = "sim")]
    Simulate(SimulateCmd),

    /// Print the load payload a cast receiver would receive
    #[command(visible_alias = "cp")]
    CastPayload(CastPayloadCmd),

    /// Show the effective configuration
    Config(ConfigCmd),
}

/// Stream type argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamTypeArg {
    Hls,
    Dash,
    #[default]
    Other,
}

impl From<StreamTypeArg> for StreamType {
    fn from(arg: StreamTypeArg) -> Self {
        match arg {
            StreamTypeArg::Hls => StreamType::Hls,
            StreamTypeArg::Dash => StreamType::Dash,
            StreamTypeArg::Other => StreamType::Other,
        }
    }
}

// =============================================================================
// Simulate Command
// =============================================================================

/// Drive a session against the simulated engine
#[derive(Args, Debug)]
pub struct SimulateCmd {
    /// Primary media URL
    #[arg(required = true)]
    pub url: String,

    /// Backup URL, tried in order on failure (repeatable)
    #[arg(long = "backup", short = 'b')]
    pub backups: Vec<String>,

    /// Offline retry budget
    #[arg(long, short = 'r', default_value = "0")]
    pub retries: u32,

    /// Stream type
    #[arg(long = "type", short = 't', value_enum, default_value = "other")]
    pub stream_type: StreamTypeArg,

    /// Initial position in seconds
    #[arg(long, short = 's', default_value = "0")]
    pub start: f64,

    /// Media duration in seconds
    #[arg(long, short = 'd', default_value = "30")]
    pub duration: f64,

    /// Treat the media as live (no resume seeks)
    #[arg(long)]
    pub live: bool,

    /// Audio-only media
    #[arg(long)]
    pub audio_only: bool,

    /// Pretend the network is down
    #[arg(long)]
    pub offline: bool,

    /// Number of engine instances that fail right after creation
    #[arg(long, short = 'f', default_value = "0")]
    pub fail: u32,

    /// Failures are DRM license denials
    #[arg(long)]
    pub drm_denied: bool,

    /// Stop the simulation after this many seconds
    #[arg(long, default_value = "60")]
    pub run_for: u64,
}

// =============================================================================
// Cast Payload Command
// =============================================================================

/// Build the receiver load payload for a media
#[derive(Args, Debug)]
pub struct CastPayloadCmd {
    /// Media URL
    #[arg(required = true)]
    pub url: String,

    /// Media title
    #[arg(long, default_value = "")]
    pub title: String,

    /// Media id
    #[arg(long, default_value = "")]
    pub id: String,

    /// Duration in seconds
    #[arg(long, default_value = "0")]
    pub duration: f64,

    /// Position to hand over, in seconds
    #[arg(long, default_value = "0")]
    pub position: f64,

    /// Caption language to select on the receiver
    #[arg(long)]
    pub caption: Option<String>,

    /// DRM session id
    #[arg(long, requires = "drm_ticket")]
    pub drm_session: Option<String>,

    /// DRM ticket
    #[arg(long, requires = "drm_session")]
    pub drm_ticket: Option<String>,
}

// =============================================================================
// Config Command
// =============================================================================

/// Show the effective configuration
#[derive(Args, Debug)]
pub struct ConfigCmd {
    /// Write the effective configuration to the config path
    #[arg(long)]
    pub save: bool,
}

// =============================================================================
// JSON Output Types
// =============================================================================

/// Generic JSON output wrapper with status
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonOutput<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub exit_code: i32,
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

impl<T: Serialize> JsonOutput<T> {
    /// Create success output with data
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            exit_code: 0,
        }
    }

    /// Create error output (no data)
    pub fn error_msg(msg: impl Into<String>, code: ExitCode) -> JsonOutput<()> {
        JsonOutput::<()> {
            data: None,
            error: Some(msg.into()),
            exit_code: code.into(),
        }
    }
}

// =============================================================================
// Output Helpers
// =============================================================================

/// Output handler for consistent formatting
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(cli: &Cli) -> Self {
        Self {
            json: cli.should_json(),
            quiet: cli.quiet,
        }
    }

    /// Print success data
    pub fn print<T: Serialize>(&self, data: T) -> anyhow::Result<()> {
        if self.json {
            let output = JsonOutput::success(data);
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Ok(())
    }

    /// Print one record per line (JSON lines in JSON mode)
    pub fn line<T: Serialize + std::fmt::Display>(&self, data: &T) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(data)?);
        } else {
            println!("{}", data);
        }
        Ok(())
    }

    /// Print error and return exit code
    pub fn error(&self, msg: impl Into<String>, code: ExitCode) -> ExitCode {
        let msg = msg.into();
        if self.json {
            let output = JsonOutput::<()>::error_msg(&msg, code);
            if let Ok(json) = serde_json::to_string_pretty(&output) {
                eprintln!("{}", json);
            }
        } else if !self.quiet {
            eprintln!("Error: {}", msg);
        }
        code
    }

    /// Print info message (suppressed in quiet mode)
    pub fn info(&self, msg: impl std::fmt::Display) {
        if !self.quiet && !self.json {
            eprintln!("{}", msg);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_simulate_command() {
        let cli = Cli::parse_from([
            "playsession",
            "simulate",
            "https://cdn-a/master.m3u8",
            "--backup",
            "https://cdn-b/master.m3u8",
            "-b",
            "https://cdn-c/master.m3u8",
            "--type",
            "hls",
            "--fail",
            "2",
            "--start",
            "15",
        ]);
        if let Command::Simulate(cmd) = cli.command {
            assert_eq!(cmd.url, "https://cdn-a/master.m3u8");
            assert_eq!(cmd.backups.len(), 2);
            assert_eq!(cmd.stream_type, StreamTypeArg::Hls);
            assert_eq!(cmd.fail, 2);
            assert_eq!(cmd.start, 15.0);
            assert!(!cmd.offline);
            assert_eq!(cmd.run_for, 60);
        } else {
            panic!("Expected Simulate command");
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from([
            "playsession",
            "--json",
            "--quiet",
            "--config",
            "/tmp/ps.toml",
            "config",
        ]);
        assert!(cli.json);
        assert!(cli.quiet);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/ps.toml")));
        assert!(matches!(cli.command, Command::Config(_)));
    }

    #[test]
    fn test_cast_payload_drm_pair_required() {
        let result = Cli::try_parse_from([
            "playsession",
            "cast-payload",
            "https://cdn/a.mpd",
            "--drm-session",
            "abc",
        ]);
        assert!(result.is_err());

        let cli = Cli::parse_from([
            "playsession",
            "cp",
            "https://cdn/a.mpd",
            "--drm-session",
            "abc",
            "--drm-ticket",
            "t0k",
            "--caption",
            "en",
        ]);
        if let Command::CastPayload(cmd) = cli.command {
            assert_eq!(cmd.drm_session.as_deref(), Some("abc"));
            assert_eq!(cmd.drm_ticket.as_deref(), Some("t0k"));
            assert_eq!(cmd.caption.as_deref(), Some("en"));
        } else {
            panic!("Expected CastPayload command");
        }
    }

    #[test]
    fn test_stream_type_conversion() {
        assert_eq!(StreamType::from(StreamTypeArg::Dash), StreamType::Dash);
        assert_eq!(StreamType::from(StreamTypeArg::default()), StreamType::Other);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(i32::from(ExitCode::Success), 0);
        assert_eq!(i32::from(ExitCode::Error), 1);
        assert_eq!(i32::from(ExitCode::InvalidArgs), 2);
        assert_eq!(i32::from(ExitCode::PlaybackFailed), 3);
    }
}
