//! Render-device enumeration and the platform seam
//!
//! The engine never talks to the audio host directly; everything goes
//! through [`AudioBackend`]. [`CpalBackend`] is the real implementation,
//! [`crate::audio::mock::MockBackend`] drives tests without hardware.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::audio::buffer::{FanOut, SharedFrameQueue};
use crate::audio::capture::{CaptureStream, LoopbackCapture};
use crate::audio::playback::{DestinationChannel, OutputChannel};
use crate::config::EngineConfig;
use crate::control::DeviceInfo;
use crate::error::{DeviceError, Error};
use crate::volume::VolumeControl;

/// Sample format shared by the capture stream and every destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Wrapper around a cpal render device
///
/// The device name doubles as the stable identifier; cpal exposes nothing
/// more durable across enumerations.
pub struct RenderDevice {
    inner: cpal::Device,
    pub id: String,
    pub name: String,
}

impl RenderDevice {
    pub fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            id: name.clone(),
            name,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Native format for loopback capture on this device
    ///
    /// The render mix format is what loopback delivers; hosts that expose
    /// the loopback path as an input config are covered by the fallback.
    pub fn capture_format(&self) -> Result<StreamFormat, DeviceError> {
        let config = self
            .inner
            .default_output_config()
            .or_else(|_| self.inner.default_input_config())
            .map_err(|e| DeviceError::Unavailable(format!("{}: {}", self.name, e)))?;

        Ok(StreamFormat {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        })
    }
}

/// Platform seam: device enumeration plus stream construction
pub trait AudioBackend: Send + Sync {
    /// Enumerate active render devices, in platform order
    fn list_render_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    /// Native capture format of the given render device
    fn capture_format(&self, device_id: &str) -> Result<StreamFormat, DeviceError>;

    /// Open a loopback capture stream; frames flow into `sink` until the
    /// returned handle is stopped
    fn open_capture(
        &self,
        device_id: &str,
        format: StreamFormat,
        sink: FanOut,
        config: &EngineConfig,
    ) -> Result<Box<dyn CaptureStream>, Error>;

    /// Open a playback channel draining `queue` at `format`
    fn open_channel(
        &self,
        device_id: &str,
        format: StreamFormat,
        volume: VolumeControl,
        queue: SharedFrameQueue,
        config: &EngineConfig,
    ) -> Result<Box<dyn OutputChannel>, Error>;
}

/// Devices eligible as a destination
///
/// Everything except the source and the devices other slots already hold.
/// The editing slot's own device stays in the list so an open selection can
/// keep its current choice.
pub fn eligible_destinations(
    devices: &[DeviceInfo],
    source_id: Option<&str>,
    assigned: &[String],
    editing: Option<&str>,
) -> Vec<DeviceInfo> {
    devices
        .iter()
        .filter(|device| {
            if Some(device.id.as_str()) == source_id {
                return false;
            }
            if Some(device.id.as_str()) == editing {
                return true;
            }
            !assigned.iter().any(|id| id == &device.id)
        })
        .cloned()
        .collect()
}

/// Registry backed by the platform's default audio host
#[derive(Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }

    fn find_device(&self, id: &str) -> Result<RenderDevice, DeviceError> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| DeviceError::Enumeration(e.to_string()))?;

        for device in devices {
            if let Ok(name) = device.name() {
                if name == id {
                    return Ok(RenderDevice::from_cpal(device));
                }
            }
        }

        Err(DeviceError::Unavailable(id.to_string()))
    }
}

impl AudioBackend for CpalBackend {
    fn list_render_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let devices = host
            .output_devices()
            .map_err(|e| DeviceError::Enumeration(e.to_string()))?;

        let mut out = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                out.push(DeviceInfo {
                    id: name.clone(),
                    is_default: default_name.as_ref() == Some(&name),
                    name,
                });
            }
        }

        Ok(out)
    }

    fn capture_format(&self, device_id: &str) -> Result<StreamFormat, DeviceError> {
        self.find_device(device_id)?.capture_format()
    }

    fn open_capture(
        &self,
        device_id: &str,
        format: StreamFormat,
        sink: FanOut,
        config: &EngineConfig,
    ) -> Result<Box<dyn CaptureStream>, Error> {
        let device = self.find_device(device_id)?;
        let capture = LoopbackCapture::open(device, format, sink, config)?;
        Ok(Box::new(capture))
    }

    fn open_channel(
        &self,
        device_id: &str,
        format: StreamFormat,
        volume: VolumeControl,
        queue: SharedFrameQueue,
        config: &EngineConfig,
    ) -> Result<Box<dyn OutputChannel>, Error> {
        let device = self.find_device(device_id)?;
        let channel = DestinationChannel::open(device, format, volume, queue, config)?;
        Ok(Box::new(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            name: id.to_string(),
            is_default: false,
        }
    }

    #[test]
    fn test_eligibility_excludes_source_and_assigned() {
        let devices = vec![device("a"), device("b"), device("c"), device("d")];
        let assigned = vec!["b".to_string()];

        let eligible = eligible_destinations(&devices, Some("a"), &assigned, None);
        let ids: Vec<_> = eligible.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
    }

    #[test]
    fn test_eligibility_keeps_the_edited_slots_device() {
        let devices = vec![device("a"), device("b"), device("c")];
        let assigned = vec!["b".to_string(), "c".to_string()];

        let eligible = eligible_destinations(&devices, Some("a"), &assigned, Some("b"));
        let ids: Vec<_> = eligible.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn test_eligibility_without_source_only_filters_assignments() {
        let devices = vec![device("a"), device("b")];
        let eligible = eligible_destinations(&devices, None, &[], None);
        assert_eq!(eligible.len(), 2);
    }

    #[test]
    fn test_cpal_backend_smoke() {
        // Environments without an audio host report an error or an empty
        // list; both are acceptable here.
        let backend = CpalBackend::new();
        if let Ok(devices) = backend.list_render_devices() {
            for device in &devices {
                assert!(!device.id.is_empty());
            }
        }
    }
}
