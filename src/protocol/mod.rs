//! Wire protocol types and codecs
//!
//! ## Responsibilities
//!
//! - Inference channel JSON messages (tagged enums)
//! - Controller channel line grammar (parse + encode)
//! - Pilot channel JSON commands/responses/events
//! - Bird-risk channel JSON events

pub mod bird;
pub mod controller;
pub mod inference;
pub mod pilot;
