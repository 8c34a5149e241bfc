//! Falcon Main Server
//!
//! Airport surface-safety platform core: mediates detection events between
//! edge vision workers and operator clients.
//!
//! ## Architecture (10 Components)
//!
//! 1. FrameBus - UDP camera frame ingest, per-camera ring buffers
//! 2. DetectionBuffer - inference result time alignment (nearest prior)
//! 3. CoordTransform - homography, normalization, zone lookup
//! 4. ZoneEngine - per-zone state machines with clear hysteresis
//! 5. AccessControl - object classification + zone authority evaluation
//! 6. FanoutHub - controller/pilot session distribution
//! 7. Repository - persistence façade (events, access conditions, logs)
//! 8. Dispatcher - four inbound TCP channels, command routing
//! 9. VideoRelay - subscribed camera frame forwarding over UDP
//! 10. Pipeline - detection-event worker tying 1-7 together
//!
//! ## Design Principles
//!
//! - Single owner per mutable resource; cross-task mutation only through
//!   channels or the repository
//! - Zone status precedes detail messages for the same tick
//! - First detections are announced at most once per process lifetime

pub mod access_control;
pub mod coord_transform;
pub mod detection_buffer;
pub mod dispatcher;
pub mod error;
pub mod fanout_hub;
pub mod frame_bus;
pub mod models;
pub mod pipeline;
pub mod protocol;
pub mod repository;
pub mod state;
pub mod video_relay;
pub mod zone_engine;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
