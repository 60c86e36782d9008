//! Destination slot state

use crate::audio::buffer::SharedFrameQueue;
use crate::audio::playback::OutputChannel;
use crate::control::{DeviceInfo, SlotId, SlotSnapshot};
use crate::volume::{format_volume, VolumeControl};

/// One configured destination
///
/// The slot owns its device assignment and volume permanently; the queue
/// and channel exist only while the engine is running.
pub struct DestinationSlot {
    pub id: SlotId,
    pub device_id: String,
    pub device_name: String,
    pub volume: VolumeControl,
    pub(crate) queue: Option<SharedFrameQueue>,
    pub(crate) channel: Option<Box<dyn OutputChannel>>,
}

impl DestinationSlot {
    pub fn new(id: SlotId, device: &DeviceInfo) -> Self {
        Self {
            id,
            device_id: device.id.clone(),
            device_name: device.name.clone(),
            volume: VolumeControl::default(),
            queue: None,
            channel: None,
        }
    }

    /// Whether this slot currently has a live output stream
    pub fn is_live(&self) -> bool {
        self.channel.as_ref().map(|c| c.is_open()).unwrap_or(false)
    }

    /// Close the channel and drop the queue
    pub(crate) fn release(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.queue = None;
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        let volume = self.volume.get();
        SlotSnapshot {
            id: self.id,
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            volume,
            volume_display: format_volume(volume),
            live: self.is_live(),
        }
    }
}
