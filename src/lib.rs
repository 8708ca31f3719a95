//! playsession - media playback session controller
//!
//! Owns the lifecycle of "play this media": engine creation, failover to
//! backup URLs, offline retry countdowns, progress reporting and handoff to
//! a remote cast receiver, all published on an ordered event bus.
//!
//! # Modules
//!
//! - `models` - Media descriptors, session state, errors and events
//! - `config` - Session configuration
//! - `stream` - Engine, network and cast collaborator contracts
//! - `session` - The session controller, policy and event bus
//! - `cli`, `commands` - Command line surface
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use playsession::{MediaDescriptor, SessionBuilder, SessionState};
//! use playsession::stream::SimulatedEngineFactory;
//!
//! # tokio_test::block_on(async {
//! let session = SessionBuilder::new(Arc::new(SimulatedEngineFactory::default())).spawn();
//! session.subscribe(|event| println!("{}", event));
//!
//! session
//!     .set_media(MediaDescriptor::new("https://cdn.example.com/master.m3u8"))
//!     .unwrap();
//! let status = session.status().await.unwrap();
//! assert!(status.session.is_some());
//! assert_ne!(status.state, SessionState::Idle);
//! # });
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod models;
pub mod session;
pub mod stream;

// Re-export commonly used types
pub use config::{CastConfig, SessionConfig};
pub use models::{
    Caption, CastLinkState, ChromeState, DrmParams, ErrorDescriptor, ErrorIcon, ErrorKind,
    EventKind, MediaDescriptor, Output, RetryContext, SessionEvent, SessionId, SessionState,
    StreamType, VideoSize,
};
pub use session::{
    AllowAllDevices, DevicePolicy, EventBus, SessionBuilder, SessionError, SessionHandle,
    SessionStatus, SubscriptionToken,
};
