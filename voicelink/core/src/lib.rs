//! Voicelink Core - Client-Side Protocol Engine for Voice Edge Devices
//!
//! This crate turns the raw message stream of one persistent full-duplex
//! connection to the cloud voice service (binary audio frames + JSON control
//! frames) into a coherent device session lifecycle: connect, listen, stream
//! synthesized speech back, recover from errors and disconnects, and proxy
//! remote pin I/O requests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    Transport (host / daemon)                      │
//! │        Connected · Disconnected · Text · Binary · Error           │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ TransportEvent (one at a time)
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                             Engine                                │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────────────┐  │
//! │  │  Frame   │  │ Session  │  │ Capture  │  │  Deferred Queue  │  │
//! │  │Classifier│  │ Tracker  │  │  State   │  │ (drain / settle) │  │
//! │  └──────────┘  └──────────┘  └──────────┘  └──────────────────┘  │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────────────────────────────┐│
//! │  │  Audio   │  │ Remote   │  │        Command Dispatcher        ││
//! │  │  Cache   │  │   I/O    │  │                                  ││
//! │  └──────────┘  └──────────┘  └──────────────────────────────────┘│
//! └───────────────┬──────────────────────────────┬───────────────────┘
//!                 │ OutboundMessage              │ Device collaborators
//!                 ▼                              ▼
//!        mpsc channel → server      decoder · pins · store · wifi ·
//!                                   platform · notification sink
//! ```
//!
//! # Key Types
//!
//! - [`Engine`]: the protocol state machine and single event entry point
//! - [`TransportEvent`]: what the transport reports to the engine
//! - [`ServerCommand`] / [`OutboundMessage`]: the JSON control vocabulary
//! - [`BinaryTag`]: decoded 4-character binary frame prefix
//! - [`Device`]: the collaborator bundle injected at construction
//!
//! # Quick Start
//!
//! ```ignore
//! use std::time::Instant;
//! use tokio::sync::mpsc;
//! use voicelink_core::{Engine, EngineConfig, FallbackClips, SimulatedDevice, TransportEvent};
//!
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! let device = SimulatedDevice::new();
//! let mut engine = Engine::new(EngineConfig::default(), device.device(), FallbackClips::new(), tx);
//!
//! engine.handle_event(TransportEvent::Connected, Instant::now())?;
//! while let Ok(msg) = rx.try_recv() {
//!     // forward msg.to_text()? to the server
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`frame`]: inbound frame classification and binary tags
//! - [`messages`]: server commands and outbound replies
//! - [`events`]: transport events
//! - [`cache`]: prompt / greeting / sleep-reply audio caches
//! - [`session`]: session and TTS task tracking
//! - [`capture`]: local capture flags
//! - [`scheduler`]: cancellable deferred actions
//! - [`gpio`]: remote pin I/O proxy
//! - [`fallback`]: local fallback clips for service errors
//! - [`device`]: collaborator traits and the simulated device
//! - [`engine`] / [`dispatch`]: lifecycle handling and command routing
//! - [`config`]: TOML configuration with environment overrides

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod capture;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod fallback;
pub mod frame;
pub mod gpio;
pub mod messages;
pub mod scheduler;
pub mod session;

// Re-exports for convenience
pub use cache::{AudioCache, CacheSlot};
pub use capture::CaptureState;
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_env, ConfigError,
    ConfigOverrides, ConfigSource, EngineConfig, LinkConfig, VoicelinkConfig, VoicelinkToml,
};
pub use device::simulated::{DecoderCall, PinCall, SimulatedDevice, SimulatedState};
pub use device::{
    AudioDecoder, Device, DeviceError, ErrorReport, LocalStore, NetStatus, Notification,
    NotificationSink, PinDriver, Platform, WakeReason, WifiConfigurator,
};
pub use engine::{ConnectionState, Engine, EngineError, Epoch, Flow};
pub use events::TransportEvent;
pub use fallback::{FallbackClip, FallbackClips};
pub use frame::{classify_binary, classify_text, BinaryTag, FrameError, InboundFrame};
pub use gpio::{
    angle_to_duty, HardwareCommand, HardwareError, HardwareOp, Level, PendingPinReads, PinMode,
    PwmChannel, PwmConfig, RemoteIo,
};
pub use messages::{OutboundMessage, ServerCommand};
pub use scheduler::{DeferredAction, DeferredQueue};
pub use session::{SessionId, SessionStatus, SessionTracker, TtsTaskId};
