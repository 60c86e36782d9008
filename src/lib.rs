//! # Audio Duplicator
//!
//! Real-time duplication of one render device's output to several others.
//! The source is captured via loopback and fanned out to up to five
//! destination devices, each with its own volume.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Source Render Device (speakers, headset, virtual cable, ...)    │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │        Loopback Capture Thread (audio::capture)            │  │
//! │  └──────────────────────────┬─────────────────────────────────┘  │
//! │                             │ f32 frames                         │
//! │                             ▼                                    │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │            Fan-Out (audio::buffer::FanOut)                 │  │
//! │  │   clone per destination, drop-on-overflow per queue        │  │
//! │  └───┬──────────────┬──────────────┬──────────────┬───────────┘  │
//! │      ▼              ▼              ▼              ▼              │
//! │  ┌────────┐     ┌────────┐     ┌────────┐     ┌────────┐        │
//! │  │ Queue 0│     │ Queue 1│     │ Queue 2│     │  ...   │        │
//! │  └───┬────┘     └───┬────┘     └───┬────┘     └───┬────┘        │
//! │      ▼              ▼              ▼              ▼              │
//! │  ┌────────┐     ┌────────┐     ┌────────┐     ┌────────┐        │
//! │  │Playback│     │Playback│     │Playback│     │  ...   │        │
//! │  │Thread 0│     │Thread 1│     │Thread 2│     │        │        │
//! │  │ × gain │     │ × gain │     │ × gain │     │        │        │
//! │  └───┬────┘     └───┬────┘     └───┬────┘     └───┬────┘        │
//! │      ▼              ▼              ▼              ▼              │
//! │  Destination    Destination    Destination    Destination       │
//! │  Device 0       Device 1       Device 2       Device N          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Whether a render device can be opened for loopback capture depends on
//! the host; WASAPI exposes it natively, other hosts need a monitor or
//! virtual device.

pub mod audio;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod volume;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Maximum number of destination slots
    pub const MAX_DESTINATIONS: usize = 5;

    /// Single volume adjustment step
    pub const VOLUME_STEP: f32 = 1.0;

    /// Lower bound of the volume domain
    pub const MIN_VOLUME: f32 = 0.0;

    /// Upper bound of the volume domain
    pub const MAX_VOLUME: f32 = 100.0;

    /// Volume of a freshly added destination (unity gain)
    pub const DEFAULT_VOLUME: f32 = 1.0;

    /// Interval between held-volume repeat ticks, in milliseconds
    pub const HOLD_REPEAT_INTERVAL_MS: u64 = 100;

    /// Per-destination frame queue capacity (in frames)
    pub const FRAME_QUEUE_CAPACITY: usize = 32;

    /// Capacity of the per-stream fault channel
    pub const FAULT_CHANNEL_CAPACITY: usize = 16;

    /// How long to wait for a stream thread to come up
    pub const STREAM_START_TIMEOUT: Duration = Duration::from_secs(5);
}
