//! Duplication engine: topology, lifecycle, reconfiguration
//!
//! The engine is either idle or running. While running it owns one
//! loopback capture and a fan-out into per-destination queues, each
//! drained by its own playback channel. Every topology mutation while
//! running goes through the same path: stop the pipeline, apply the
//! change, start again. Volume changes are the exception; they write an
//! atomic scalar the playback callbacks read live.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::audio::buffer::{create_shared_queue, FanOut, SharedFrameQueue};
use crate::audio::capture::CaptureStream;
use crate::audio::device::{eligible_destinations, AudioBackend};
use crate::config::EngineConfig;
use crate::constants::MAX_DESTINATIONS;
use crate::control::{DeviceInfo, Direction, EngineSnapshot, EngineStats, SlotId, SlotStats};
use crate::engine::slot::DestinationSlot;
use crate::error::{AudioError, DeviceError, EngineError, Error, Result};
use crate::volume::VolumeController;

/// Captures one render device and duplicates it to up to
/// [`MAX_DESTINATIONS`] others
pub struct DuplicationEngine {
    backend: Arc<dyn AudioBackend>,
    config: EngineConfig,
    source: Option<DeviceInfo>,
    slots: Vec<DestinationSlot>,
    next_slot: u32,
    capture: Option<Box<dyn CaptureStream>>,
    fanout: Option<FanOut>,
    volume_ctl: VolumeController,
    running: bool,
}

impl DuplicationEngine {
    pub fn new(backend: Arc<dyn AudioBackend>, config: EngineConfig) -> Self {
        let repeat = Duration::from_millis(config.hold_repeat_ms);
        Self {
            backend,
            config,
            source: None,
            slots: Vec::new(),
            next_slot: 0,
            capture: None,
            fanout: None,
            volume_ctl: VolumeController::new(repeat),
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Source plus at least one destination must be configured
    fn validate_topology(&self) -> Result<DeviceInfo> {
        let source = self
            .source
            .clone()
            .ok_or(Error::Engine(EngineError::NoSource))?;
        if self.slots.is_empty() {
            return Err(EngineError::NoDestinations.into());
        }
        Ok(source)
    }

    /// Start the pipeline
    ///
    /// Destinations whose channel fails to open are skipped and left
    /// not-live; a capture failure aborts the whole start and releases
    /// every channel already opened.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        let source = self.validate_topology()?;
        let format = self.backend.capture_format(&source.id)?;

        let capacity = self.config.frame_queue_capacity.max(1);
        for slot in &mut self.slots {
            let queue = create_shared_queue(capacity);
            match self.backend.open_channel(
                &slot.device_id,
                format,
                slot.volume.clone(),
                Arc::clone(&queue),
                &self.config,
            ) {
                Ok(channel) => {
                    slot.queue = Some(queue);
                    slot.channel = Some(channel);
                }
                Err(e) => {
                    warn!(slot = %slot.id, device = %slot.device_name, "Channel open failed: {}", e);
                    slot.queue = None;
                    slot.channel = None;
                }
            }
        }

        let queues: Vec<SharedFrameQueue> =
            self.slots.iter().filter_map(|s| s.queue.clone()).collect();
        if queues.is_empty() {
            warn!("No destination channel opened; capture will run unheard");
        }

        let fanout = FanOut::new(queues);
        match self
            .backend
            .open_capture(&source.id, format, fanout.clone(), &self.config)
        {
            Ok(capture) => {
                self.capture = Some(capture);
                self.fanout = Some(fanout);
                self.running = true;
                info!(
                    source = %source.name,
                    destinations = self.slots.len(),
                    sample_rate = format.sample_rate,
                    channels = format.channels,
                    "Duplication running"
                );
                Ok(())
            }
            Err(e) => {
                for slot in &mut self.slots {
                    slot.release();
                }
                Err(match e {
                    Error::Device(_) => e,
                    Error::Audio(audio) => EngineError::CaptureFailed(audio.to_string()).into(),
                    other => other,
                })
            }
        }
    }

    /// Stop the pipeline; no-op when idle
    ///
    /// Capture goes down first so nothing is dispatched while channels
    /// close. Configured topology and volumes survive.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        self.fanout = None;
        for slot in &mut self.slots {
            slot.release();
        }
        self.running = false;
        info!("Duplication stopped");
    }

    /// Apply a topology mutation, bouncing the pipeline when running
    ///
    /// Callers validate before calling; a restart failure leaves the
    /// mutation applied and the engine idle.
    fn restart_around(&mut self, mutate: impl FnOnce(&mut Self)) -> Result<()> {
        if !self.running {
            mutate(self);
            return Ok(());
        }
        self.stop();
        mutate(self);
        self.start()
    }

    fn slot_index(&self, id: SlotId) -> Result<usize> {
        self.slots
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| EngineError::UnknownSlot(id.0).into())
    }

    /// Look up a device by id, requiring it to be currently enumerable
    fn lookup_device(&self, device_id: &str) -> Result<DeviceInfo> {
        let devices = self.backend.list_render_devices()?;
        devices
            .into_iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| Error::Device(DeviceError::Unavailable(device_id.to_string())))
    }

    fn is_assigned(&self, device_id: &str) -> bool {
        self.source.as_ref().map(|s| s.id.as_str()) == Some(device_id)
            || self.slots.iter().any(|s| s.device_id == device_id)
    }

    /// Select the capture source
    ///
    /// Selecting the current source is a no-op; anything else bounces a
    /// running pipeline onto the new device.
    pub fn set_source(&mut self, device_id: &str) -> Result<()> {
        if self.source.as_ref().map(|s| s.id.as_str()) == Some(device_id) {
            return Ok(());
        }
        if self.slots.iter().any(|s| s.device_id == device_id) {
            return Err(EngineError::DuplicateAssignment(device_id.to_string()).into());
        }
        let device = self.lookup_device(device_id)?;
        self.restart_around(move |engine| {
            engine.source = Some(device);
        })
    }

    pub fn source(&self) -> Option<&DeviceInfo> {
        self.source.as_ref()
    }

    /// Add a destination on the named device
    pub fn add_destination(&mut self, device_id: &str) -> Result<SlotId> {
        if self.slots.len() >= MAX_DESTINATIONS {
            return Err(EngineError::AtCapacity(MAX_DESTINATIONS).into());
        }
        if self.is_assigned(device_id) {
            return Err(EngineError::DuplicateAssignment(device_id.to_string()).into());
        }
        let device = self.lookup_device(device_id)?;
        self.push_slot(device)
    }

    /// Add a destination on the first eligible device
    pub fn add_destination_auto(&mut self) -> Result<SlotId> {
        if self.slots.len() >= MAX_DESTINATIONS {
            return Err(EngineError::AtCapacity(MAX_DESTINATIONS).into());
        }
        let device = self
            .list_eligible_destinations(None)
            .into_iter()
            .next()
            .ok_or_else(|| Error::from(EngineError::NoEligibleDevice))?;
        self.push_slot(device)
    }

    /// Next slot id not held by a live slot
    ///
    /// The counter wraps; with at most [`MAX_DESTINATIONS`] live slots
    /// the skip loop terminates quickly.
    fn allocate_slot_id(&mut self) -> SlotId {
        loop {
            let id = SlotId(self.next_slot);
            self.next_slot = self.next_slot.wrapping_add(1);
            if !self.slots.iter().any(|s| s.id == id) {
                return id;
            }
        }
    }

    fn push_slot(&mut self, device: DeviceInfo) -> Result<SlotId> {
        let id = self.allocate_slot_id();
        self.restart_around(move |engine| {
            engine.slots.push(DestinationSlot::new(id, &device));
        })?;
        Ok(id)
    }

    /// Move an existing slot to a different device, keeping its volume
    pub fn assign_destination(&mut self, slot: SlotId, device_id: &str) -> Result<()> {
        let index = self.slot_index(slot)?;
        if self.slots[index].device_id == device_id {
            return Ok(());
        }
        if self.is_assigned(device_id) {
            return Err(EngineError::DuplicateAssignment(device_id.to_string()).into());
        }
        let device = self.lookup_device(device_id)?;
        self.restart_around(move |engine| {
            let slot = &mut engine.slots[index];
            slot.device_id = device.id;
            slot.device_name = device.name;
        })
    }

    /// Remove a destination slot
    ///
    /// An armed hold on the slot is released first. Removing the last
    /// destination of a running pipeline stops it; the engine stays idle.
    pub fn remove_destination(&mut self, slot: SlotId) -> Result<()> {
        let index = self.slot_index(slot)?;
        self.volume_ctl.end_hold_for(slot);

        if self.running && self.slots.len() == 1 {
            self.stop();
            self.slots.remove(index);
            return Ok(());
        }

        self.restart_around(move |engine| {
            let mut removed = engine.slots.remove(index);
            removed.release();
        })
    }

    /// Apply one volume step; takes effect live, no restart
    pub fn nudge_volume(&mut self, slot: SlotId, direction: Direction) -> Result<f32> {
        let index = self.slot_index(slot)?;
        Ok(self.slots[index].volume.nudge(direction))
    }

    /// Begin hold-to-adjust on a slot: one immediate step, then repeats
    pub fn begin_hold(&mut self, slot: SlotId, direction: Direction) -> Result<f32> {
        let index = self.slot_index(slot)?;
        let volume = self.slots[index].volume.clone();
        Ok(self.volume_ctl.begin_hold(slot, volume, direction))
    }

    /// Release the active hold, if any
    pub fn end_hold(&mut self) {
        self.volume_ctl.end_hold();
    }

    fn enumerate_or_empty(&self) -> Vec<DeviceInfo> {
        match self.backend.list_render_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Device enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Render devices that can serve as the source
    pub fn list_source_candidates(&self) -> Vec<DeviceInfo> {
        self.enumerate_or_empty()
    }

    /// Render devices eligible for a destination
    ///
    /// When `editing` names an existing slot, that slot's own device stays
    /// in the list.
    pub fn list_eligible_destinations(&self, editing: Option<SlotId>) -> Vec<DeviceInfo> {
        let devices = self.enumerate_or_empty();
        let assigned: Vec<String> = self.slots.iter().map(|s| s.device_id.clone()).collect();
        let editing_id = editing
            .and_then(|id| self.slots.iter().find(|s| s.id == id))
            .map(|s| s.device_id.clone());
        eligible_destinations(
            &devices,
            self.source.as_ref().map(|s| s.id.as_str()),
            &assigned,
            editing_id.as_deref(),
        )
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            running: self.running,
            source: self.source.clone(),
            slots: self.slots.iter().map(DestinationSlot::snapshot).collect(),
            can_start: !self.running && self.validate_topology().is_ok(),
            can_stop: self.running,
        }
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = EngineStats::default();
        if let Some(capture) = self.capture.as_ref() {
            stats.frames_captured = capture.frames_captured();
            stats.samples_captured = capture.samples_captured();
        }
        if let Some(fanout) = self.fanout.as_ref() {
            stats.frames_delivered = fanout.frames_delivered();
            stats.frames_dropped = fanout.frames_dropped();
        }
        for slot in &self.slots {
            let (queued, overflows, underruns) = match slot.queue.as_ref() {
                Some(queue) => (queue.len(), queue.overflow_count(), queue.underrun_count()),
                None => (0, 0, 0),
            };
            stats.per_slot.push(SlotStats {
                id: slot.id,
                queued,
                overflows,
                underruns,
            });
        }
        stats
    }

    /// Drain runtime faults from the capture and every open channel
    pub fn check_faults(&self) -> Vec<AudioError> {
        let mut faults = Vec::new();
        if let Some(capture) = self.capture.as_ref() {
            while let Some(fault) = capture.check_fault() {
                faults.push(fault);
            }
        }
        for slot in &self.slots {
            if let Some(channel) = slot.channel.as_ref() {
                while let Some(fault) = channel.check_fault() {
                    faults.push(fault);
                }
            }
        }
        faults
    }
}

impl Drop for DuplicationEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockBackend;

    fn engine_with(names: &[&str]) -> (DuplicationEngine, MockBackend) {
        let backend = MockBackend::with_devices(names);
        let engine = DuplicationEngine::new(Arc::new(backend.clone()), EngineConfig::default());
        (engine, backend)
    }

    #[test]
    fn test_start_without_source_is_rejected() {
        let (mut engine, _) = engine_with(&["spk", "hp"]);
        engine.add_destination("hp").unwrap();
        assert!(matches!(
            engine.start(),
            Err(Error::Engine(EngineError::NoSource))
        ));
        assert!(!engine.is_running());
    }

    #[test]
    fn test_start_without_destinations_is_rejected() {
        let (mut engine, _) = engine_with(&["spk"]);
        engine.set_source("spk").unwrap();
        assert!(matches!(
            engine.start(),
            Err(Error::Engine(EngineError::NoDestinations))
        ));
    }

    #[test]
    fn test_start_and_stop_toggle_running() {
        let (mut engine, backend) = engine_with(&["spk", "hp"]);
        engine.set_source("spk").unwrap();
        engine.add_destination("hp").unwrap();

        engine.start().unwrap();
        assert!(engine.is_running());
        assert!(backend.has_active_capture());

        engine.stop();
        assert!(!engine.is_running());
        assert!(!backend.has_active_capture());

        // Idempotent both ways
        engine.stop();
        engine.start().unwrap();
        engine.start().unwrap();
        assert_eq!(backend.captures_opened(), 2);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let names = ["src", "d1", "d2", "d3", "d4", "d5", "d6"];
        let (mut engine, _) = engine_with(&names);
        engine.set_source("src").unwrap();
        for name in &names[1..6] {
            engine.add_destination(name).unwrap();
        }
        assert!(matches!(
            engine.add_destination("d6"),
            Err(Error::Engine(EngineError::AtCapacity(n))) if n == MAX_DESTINATIONS
        ));
    }

    #[test]
    fn test_duplicate_assignments_are_rejected() {
        let (mut engine, _) = engine_with(&["spk", "hp", "mon"]);
        engine.set_source("spk").unwrap();
        engine.add_destination("hp").unwrap();

        assert!(matches!(
            engine.add_destination("hp"),
            Err(Error::Engine(EngineError::DuplicateAssignment(_)))
        ));
        assert!(matches!(
            engine.add_destination("spk"),
            Err(Error::Engine(EngineError::DuplicateAssignment(_)))
        ));
        assert!(matches!(
            engine.set_source("hp"),
            Err(Error::Engine(EngineError::DuplicateAssignment(_)))
        ));
    }

    #[test]
    fn test_unknown_devices_are_unavailable() {
        let (mut engine, _) = engine_with(&["spk"]);
        assert!(matches!(
            engine.set_source("ghost"),
            Err(Error::Device(DeviceError::Unavailable(_)))
        ));
        assert!(matches!(
            engine.add_destination("ghost"),
            Err(Error::Device(DeviceError::Unavailable(_)))
        ));
    }

    #[test]
    fn test_unknown_slots_are_rejected() {
        let (mut engine, _) = engine_with(&["spk"]);
        assert!(matches!(
            engine.nudge_volume(SlotId(9), Direction::Increase),
            Err(Error::Engine(EngineError::UnknownSlot(9)))
        ));
        assert!(matches!(
            engine.remove_destination(SlotId(9)),
            Err(Error::Engine(EngineError::UnknownSlot(9)))
        ));
        assert!(matches!(
            engine.assign_destination(SlotId(9), "spk"),
            Err(Error::Engine(EngineError::UnknownSlot(9)))
        ));
    }

    #[test]
    fn test_auto_add_walks_eligible_devices() {
        let (mut engine, _) = engine_with(&["spk", "hp", "mon"]);
        engine.set_source("spk").unwrap();

        let first = engine.add_destination_auto().unwrap();
        let second = engine.add_destination_auto().unwrap();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.slots[0].device_id, "hp");
        assert_eq!(snapshot.slots[1].device_id, "mon");
        assert_ne!(first, second);

        assert!(matches!(
            engine.add_destination_auto(),
            Err(Error::Engine(EngineError::NoEligibleDevice))
        ));
    }

    #[test]
    fn test_slot_ids_are_not_reused() {
        let (mut engine, _) = engine_with(&["spk", "hp", "mon"]);
        engine.set_source("spk").unwrap();
        let first = engine.add_destination("hp").unwrap();
        engine.remove_destination(first).unwrap();
        let second = engine.add_destination("hp").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_slot_ids_skip_live_slots_across_counter_wrap() {
        let (mut engine, _) = engine_with(&["spk", "keep", "churn"]);
        engine.set_source("spk").unwrap();
        let keeper = engine.add_destination("keep").unwrap();

        engine.next_slot = u32::MAX;
        let wrapped = engine.add_destination("churn").unwrap();
        engine.remove_destination(wrapped).unwrap();
        // The counter is now back at the keeper's id and must step past it
        let reissued = engine.add_destination("churn").unwrap();
        assert_ne!(reissued, keeper);

        engine.remove_destination(reissued).unwrap();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.slots.len(), 1);
        assert_eq!(snapshot.slots[0].device_id, "keep");
    }

    #[test]
    fn test_enumeration_failure_degrades_to_empty_lists() {
        let (mut engine, backend) = engine_with(&["spk", "hp"]);
        backend.set_fail_enumeration(true);

        assert!(engine.list_source_candidates().is_empty());
        assert!(engine.list_eligible_destinations(None).is_empty());
        assert!(matches!(
            engine.add_destination_auto(),
            Err(Error::Engine(EngineError::NoEligibleDevice))
        ));
    }

    #[test]
    fn test_eligibility_keeps_the_edited_slots_device() {
        let (mut engine, _) = engine_with(&["spk", "hp", "mon", "aux"]);
        engine.set_source("spk").unwrap();
        let hp = engine.add_destination("hp").unwrap();
        engine.add_destination("mon").unwrap();

        let ids: Vec<String> = engine
            .list_eligible_destinations(Some(hp))
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["hp".to_string(), "aux".to_string()]);
    }

    #[test]
    fn test_mutations_while_running_bounce_the_pipeline() {
        let (mut engine, backend) = engine_with(&["spk", "hp", "mon", "aux"]);
        engine.set_source("spk").unwrap();
        let hp = engine.add_destination("hp").unwrap();
        engine.start().unwrap();
        assert_eq!(backend.captures_opened(), 1);

        engine.add_destination("mon").unwrap();
        assert!(engine.is_running());
        assert_eq!(backend.captures_opened(), 2);

        engine.assign_destination(hp, "aux").unwrap();
        assert!(engine.is_running());
        assert_eq!(backend.captures_opened(), 3);
        assert_eq!(engine.snapshot().slots[0].device_id, "aux");
    }

    #[test]
    fn test_selecting_the_current_source_does_not_restart() {
        let (mut engine, backend) = engine_with(&["spk", "hp"]);
        engine.set_source("spk").unwrap();
        engine.add_destination("hp").unwrap();
        engine.start().unwrap();

        engine.set_source("spk").unwrap();
        assert_eq!(backend.captures_opened(), 1);
        assert!(engine.is_running());
    }

    #[test]
    fn test_removing_one_of_two_destinations_keeps_running() {
        let (mut engine, backend) = engine_with(&["spk", "hp", "mon"]);
        engine.set_source("spk").unwrap();
        let hp = engine.add_destination("hp").unwrap();
        engine.add_destination("mon").unwrap();
        engine.start().unwrap();

        engine.remove_destination(hp).unwrap();
        assert!(engine.is_running());
        assert_eq!(engine.snapshot().slots.len(), 1);
        assert_eq!(backend.captures_opened(), 2);
    }

    #[test]
    fn test_removing_the_last_destination_stops() {
        let (mut engine, backend) = engine_with(&["spk", "hp"]);
        engine.set_source("spk").unwrap();
        let hp = engine.add_destination("hp").unwrap();
        engine.start().unwrap();

        engine.remove_destination(hp).unwrap();
        assert!(!engine.is_running());
        assert!(!backend.has_active_capture());
        let snapshot = engine.snapshot();
        assert!(snapshot.slots.is_empty());
        assert!(snapshot.source.is_some());
        assert!(!snapshot.can_start);
    }

    #[test]
    fn test_failed_channel_leaves_slot_not_live() {
        let (mut engine, backend) = engine_with(&["spk", "hp", "mon"]);
        backend.fail_channel("hp");
        engine.set_source("spk").unwrap();
        engine.add_destination("hp").unwrap();
        engine.add_destination("mon").unwrap();

        engine.start().unwrap();
        let snapshot = engine.snapshot();
        assert!(engine.is_running());
        assert!(!snapshot.slots[0].live);
        assert!(snapshot.slots[1].live);
    }

    #[test]
    fn test_capture_failure_aborts_start_and_releases_channels() {
        let (mut engine, backend) = engine_with(&["spk", "hp"]);
        backend.set_fail_capture(true);
        engine.set_source("spk").unwrap();
        engine.add_destination("hp").unwrap();

        assert!(matches!(
            engine.start(),
            Err(Error::Engine(EngineError::CaptureFailed(_)))
        ));
        assert!(!engine.is_running());
        for handle in backend.opened_channels() {
            assert!(!handle.is_open());
        }

        // Recoverable once the backend cooperates again
        backend.set_fail_capture(false);
        engine.start().unwrap();
        assert!(engine.is_running());
    }

    #[test]
    fn test_vanished_source_fails_start_with_unavailable() {
        let (mut engine, backend) = engine_with(&["spk", "hp"]);
        engine.set_source("spk").unwrap();
        engine.add_destination("hp").unwrap();
        backend.remove_device("spk");

        assert!(matches!(
            engine.start(),
            Err(Error::Device(DeviceError::Unavailable(_)))
        ));
        assert!(!engine.is_running());
    }

    #[test]
    fn test_snapshot_capability_flags_follow_state() {
        let (mut engine, _) = engine_with(&["spk", "hp"]);
        let snapshot = engine.snapshot();
        assert!(!snapshot.can_start);
        assert!(!snapshot.can_stop);

        engine.set_source("spk").unwrap();
        engine.add_destination("hp").unwrap();
        let snapshot = engine.snapshot();
        assert!(snapshot.can_start);
        assert!(!snapshot.can_stop);

        engine.start().unwrap();
        let snapshot = engine.snapshot();
        assert!(!snapshot.can_start);
        assert!(snapshot.can_stop);
    }

    #[test]
    fn test_volumes_survive_stop_and_reassignment() {
        let (mut engine, _) = engine_with(&["spk", "hp", "mon"]);
        engine.set_source("spk").unwrap();
        let hp = engine.add_destination("hp").unwrap();

        engine.nudge_volume(hp, Direction::Increase).unwrap();
        engine.nudge_volume(hp, Direction::Increase).unwrap();
        assert_eq!(engine.snapshot().slots[0].volume, 3.0);

        engine.start().unwrap();
        engine.stop();
        assert_eq!(engine.snapshot().slots[0].volume, 3.0);

        engine.assign_destination(hp, "mon").unwrap();
        assert_eq!(engine.snapshot().slots[0].volume, 3.0);
    }
}
