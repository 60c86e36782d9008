//! Audio subsystem: capture, fan-out, playback, device access

pub mod buffer;
pub mod capture;
pub mod device;
pub mod mock;
pub mod playback;

pub use buffer::{create_shared_queue, AudioFrame, FanOut, FrameQueue, SharedFrameQueue};
pub use capture::{CaptureStream, LoopbackCapture};
pub use device::{eligible_destinations, AudioBackend, CpalBackend, RenderDevice, StreamFormat};
pub use mock::{MockBackend, MockChannelHandle};
pub use playback::{DestinationChannel, OutputChannel};
