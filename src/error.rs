//! Error types for the audio duplication engine

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Device registry errors
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    #[error("Device unavailable: {0}")]
    Unavailable(String),
}

/// Audio stream errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Stream failed: {0}")]
    StreamError(String),

    #[error("Stream start timed out after {0:?}")]
    StartTimeout(std::time::Duration),

    #[error("Device lost: {0}")]
    DeviceLost(String),
}

/// Engine control errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No source device selected")]
    NoSource,

    #[error("No destinations configured")]
    NoDestinations,

    #[error("Device already assigned: {0}")]
    DuplicateAssignment(String),

    #[error("Destination capacity reached ({0} slots)")]
    AtCapacity(usize),

    #[error("No eligible destination device")]
    NoEligibleDevice,

    #[error("Unknown slot: {0}")]
    UnknownSlot(u32),

    #[error("Capture failed to start: {0}")]
    CaptureFailed(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
