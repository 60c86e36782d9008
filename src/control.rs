//! Control-surface types
//!
//! Serializable values crossing the engine boundary: device descriptions
//! going out, slot identifiers coming in, and the pull-based state snapshot
//! a control surface renders from.

use serde::Serialize;

/// Identifier for a destination slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SlotId(pub u32);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a volume adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increase,
    Decrease,
}

/// Description of a render device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    /// Stable identifier from enumeration
    pub id: String,
    /// Human-readable device name
    pub name: String,
    /// Whether this is the platform's default render device
    pub is_default: bool,
}

/// State of one destination slot
#[derive(Debug, Clone, Serialize)]
pub struct SlotSnapshot {
    pub id: SlotId,
    pub device_id: String,
    pub device_name: String,
    pub volume: f32,
    /// Volume formatted for display, one decimal place
    pub volume_display: String,
    /// Whether this slot has a live output stream
    pub live: bool,
}

/// Engine state for rendering, pull-based
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub running: bool,
    pub source: Option<DeviceInfo>,
    pub slots: Vec<SlotSnapshot>,
    /// Whether a start command would pass validation right now
    pub can_start: bool,
    pub can_stop: bool,
}

/// Delivery counters for the current run
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub frames_captured: u64,
    pub samples_captured: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub per_slot: Vec<SlotStats>,
}

/// Queue health for one destination
#[derive(Debug, Clone)]
pub struct SlotStats {
    pub id: SlotId,
    /// Frames currently awaiting playback
    pub queued: usize,
    pub overflows: usize,
    pub underruns: usize,
}
