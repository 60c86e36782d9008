//! Scriptable in-memory backend for tests
//!
//! Behaves like a host with a configurable set of render devices. Tests
//! drive capture by pumping sample blocks through the active sink and
//! inspect destination queues through the handles recorded on channel
//! open. Failure modes (enumeration errors, refused streams, runtime
//! faults) are switched on per scenario.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::buffer::{AudioFrame, FanOut, SharedFrameQueue};
use crate::audio::capture::CaptureStream;
use crate::audio::device::{AudioBackend, StreamFormat};
use crate::audio::playback::OutputChannel;
use crate::config::EngineConfig;
use crate::control::DeviceInfo;
use crate::error::{AudioError, DeviceError, Error};
use crate::volume::VolumeControl;

struct ActiveCapture {
    sink: FanOut,
    frames: Arc<AtomicU64>,
    samples: Arc<AtomicU64>,
}

struct MockState {
    devices: Vec<DeviceInfo>,
    format: StreamFormat,
    fail_enumeration: bool,
    fail_capture: bool,
    fail_channels: Vec<String>,
    active: Option<ActiveCapture>,
    capture_faults: Vec<AudioError>,
    channels: Vec<MockChannelHandle>,
    captures_opened: usize,
    sequence: u32,
}

/// Fake audio host holding whatever devices a test declares
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                devices: Vec::new(),
                format: StreamFormat {
                    sample_rate: 48_000,
                    channels: 2,
                },
                fail_enumeration: false,
                fail_capture: false,
                fail_channels: Vec::new(),
                active: None,
                capture_faults: Vec::new(),
                channels: Vec::new(),
                captures_opened: 0,
                sequence: 0,
            })),
        }
    }

    /// Backend pre-populated with named devices; the first is the default
    pub fn with_devices(names: &[&str]) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.state.lock();
            for (i, name) in names.iter().enumerate() {
                state.devices.push(DeviceInfo {
                    id: name.to_string(),
                    name: name.to_string(),
                    is_default: i == 0,
                });
            }
        }
        backend
    }

    pub fn add_device(&self, name: &str) {
        self.state.lock().devices.push(DeviceInfo {
            id: name.to_string(),
            name: name.to_string(),
            is_default: false,
        });
    }

    /// Simulate the device being unplugged
    pub fn remove_device(&self, name: &str) {
        self.state.lock().devices.retain(|d| d.id != name);
    }

    pub fn set_fail_enumeration(&self, fail: bool) {
        self.state.lock().fail_enumeration = fail;
    }

    pub fn set_fail_capture(&self, fail: bool) {
        self.state.lock().fail_capture = fail;
    }

    /// Make channel opens on this device fail
    pub fn fail_channel(&self, device_id: &str) {
        self.state.lock().fail_channels.push(device_id.to_string());
    }

    /// Queue a runtime fault for the active capture to report
    pub fn inject_capture_fault(&self, fault: AudioError) {
        self.state.lock().capture_faults.push(fault);
    }

    /// Push one block of samples through the active capture, as the
    /// device callback would; returns false when no capture is running
    pub fn pump(&self, samples: &[f32]) -> bool {
        let (sink, frames, samples_ctr, channels, seq) = {
            let mut state = self.state.lock();
            let parts = match state.active.as_ref() {
                Some(active) => (
                    active.sink.clone(),
                    Arc::clone(&active.frames),
                    Arc::clone(&active.samples),
                ),
                None => return false,
            };
            let seq = state.sequence;
            state.sequence = state.sequence.wrapping_add(1);
            (parts.0, parts.1, parts.2, state.format.channels, seq)
        };
        frames.fetch_add(1, Ordering::Relaxed);
        samples_ctr.fetch_add(samples.len() as u64, Ordering::Relaxed);
        sink.dispatch(AudioFrame::new(Arc::from(samples), channels, seq));
        true
    }

    /// Handles for every channel opened so far, including closed ones
    pub fn opened_channels(&self) -> Vec<MockChannelHandle> {
        self.state.lock().channels.clone()
    }

    /// Number of captures opened over the backend's lifetime
    pub fn captures_opened(&self) -> usize {
        self.state.lock().captures_opened
    }

    pub fn has_active_capture(&self) -> bool {
        self.state.lock().active.is_some()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for MockBackend {
    fn list_render_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let state = self.state.lock();
        if state.fail_enumeration {
            return Err(DeviceError::Enumeration("enumeration refused".to_string()));
        }
        Ok(state.devices.clone())
    }

    fn capture_format(&self, device_id: &str) -> Result<StreamFormat, DeviceError> {
        let state = self.state.lock();
        if state.devices.iter().any(|d| d.id == device_id) {
            Ok(state.format)
        } else {
            Err(DeviceError::Unavailable(device_id.to_string()))
        }
    }

    fn open_capture(
        &self,
        device_id: &str,
        _format: StreamFormat,
        sink: FanOut,
        _config: &EngineConfig,
    ) -> Result<Box<dyn CaptureStream>, Error> {
        let mut state = self.state.lock();
        if !state.devices.iter().any(|d| d.id == device_id) {
            return Err(Error::Device(DeviceError::Unavailable(
                device_id.to_string(),
            )));
        }
        if state.fail_capture {
            return Err(Error::Audio(AudioError::StreamError(
                "capture refused".to_string(),
            )));
        }

        let frames = Arc::new(AtomicU64::new(0));
        let samples = Arc::new(AtomicU64::new(0));
        state.active = Some(ActiveCapture {
            sink,
            frames: Arc::clone(&frames),
            samples: Arc::clone(&samples),
        });
        state.captures_opened += 1;
        state.sequence = 0;

        Ok(Box::new(MockCapture {
            state: Arc::clone(&self.state),
            frames,
            samples,
        }))
    }

    fn open_channel(
        &self,
        device_id: &str,
        format: StreamFormat,
        volume: VolumeControl,
        queue: SharedFrameQueue,
        _config: &EngineConfig,
    ) -> Result<Box<dyn OutputChannel>, Error> {
        let mut state = self.state.lock();
        if !state.devices.iter().any(|d| d.id == device_id) {
            return Err(Error::Device(DeviceError::Unavailable(
                device_id.to_string(),
            )));
        }
        if state.fail_channels.iter().any(|id| id == device_id) {
            return Err(Error::Audio(AudioError::StreamError(
                "channel refused".to_string(),
            )));
        }

        let open = Arc::new(AtomicBool::new(true));
        state.channels.push(MockChannelHandle {
            device_id: device_id.to_string(),
            format,
            queue,
            volume,
            open: Arc::clone(&open),
        });

        Ok(Box::new(MockChannel { open }))
    }
}

struct MockCapture {
    state: Arc<Mutex<MockState>>,
    frames: Arc<AtomicU64>,
    samples: Arc<AtomicU64>,
}

impl CaptureStream for MockCapture {
    fn stop(&mut self) {
        self.state.lock().active = None;
    }

    fn check_fault(&self) -> Option<AudioError> {
        let mut state = self.state.lock();
        if state.capture_faults.is_empty() {
            None
        } else {
            Some(state.capture_faults.remove(0))
        }
    }

    fn frames_captured(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    fn samples_captured(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

struct MockChannel {
    open: Arc<AtomicBool>,
}

impl OutputChannel for MockChannel {
    fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn check_fault(&self) -> Option<AudioError> {
        None
    }
}

/// Test-side view of a channel the engine opened
#[derive(Clone)]
pub struct MockChannelHandle {
    pub device_id: String,
    pub format: StreamFormat,
    pub queue: SharedFrameQueue,
    pub volume: VolumeControl,
    open: Arc<AtomicBool>,
}

impl MockChannelHandle {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::create_shared_queue;

    #[test]
    fn test_pump_without_capture_reports_idle() {
        let backend = MockBackend::with_devices(&["spk"]);
        assert!(!backend.pump(&[0.0; 4]));
    }

    #[test]
    fn test_pump_reaches_opened_channel_queue() {
        let backend = MockBackend::with_devices(&["spk", "hp"]);
        let config = EngineConfig::default();
        let format = backend.capture_format("spk").unwrap();

        let queue = create_shared_queue(8);
        let mut channel = backend
            .open_channel("hp", format, VolumeControl::default(), Arc::clone(&queue), &config)
            .unwrap();

        let sink = FanOut::new(vec![Arc::clone(&queue)]);
        let mut capture = backend.open_capture("spk", format, sink, &config).unwrap();

        assert!(backend.pump(&[0.5; 4]));
        let frame = queue.pop().unwrap();
        assert_eq!(frame.samples.len(), 4);
        assert_eq!(capture.frames_captured(), 1);

        capture.stop();
        assert!(!backend.has_active_capture());
        channel.close();
        assert!(!backend.opened_channels()[0].is_open());
    }
}
