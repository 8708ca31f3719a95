//! Collaborator contracts of a playback session
//!
//! - `engine` - playback engine adapter and its callback sink
//! - `network` - connectivity monitor
//! - `cast` - remote receiver session and its wire shapes
//! - `sim` - simulated engine for the CLI and tests

pub mod cast;
pub mod engine;
pub mod network;
pub mod sim;

pub use cast::{CastError, CastEvents, CastPayload, CastSession, ReceiverMessage};
pub use engine::{
    DrmError, EngineError, EngineEvents, EngineFactory, EngineRequest, EngineState,
    PlaybackEngine,
};
pub use network::{NetworkMonitor, StaticNetwork};
pub use sim::{SimControl, SimScript, SimulatedEngineFactory};
