//! Bird-risk estimator channel messages (JSON lines)

use serde::Deserialize;

/// Inbound bird-risk message
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BirdMessage {
    Event { event: String, result: String },
}
