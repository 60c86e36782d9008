//! Volume state and hold-to-adjust control
//!
//! The displayed volume value is the gain multiplier applied to samples,
//! clamped to [0, 100]; values above 1.0 amplify and the default of 1.0 is
//! unity gain. The scalar is stored as f32 bits in an `AtomicU32` so the
//! playback callback reads it with a single load per sample block and never
//! sees a torn value.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::constants::{DEFAULT_VOLUME, MAX_VOLUME, MIN_VOLUME, VOLUME_STEP};
use crate::control::{Direction, SlotId};

/// Shared volume scalar for one destination
///
/// Clones share the same underlying value; the control context writes, the
/// playback callback reads.
#[derive(Clone)]
pub struct VolumeControl {
    bits: Arc<AtomicU32>,
}

impl VolumeControl {
    pub fn new(initial: f32) -> Self {
        let clamped = initial.clamp(MIN_VOLUME, MAX_VOLUME);
        Self {
            bits: Arc::new(AtomicU32::new(clamped.to_bits())),
        }
    }

    /// Current gain value
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Set the gain, clamped to the volume domain
    ///
    /// Non-finite input keeps the current value.
    pub fn set(&self, value: f32) -> f32 {
        let clamped = if value.is_finite() {
            value.clamp(MIN_VOLUME, MAX_VOLUME)
        } else {
            self.get()
        };
        self.bits.store(clamped.to_bits(), Ordering::Relaxed);
        clamped
    }

    /// Apply one step in the given direction
    ///
    /// Hold ticks and manual nudges may race on the same slot, so the
    /// step is applied with a compare-exchange loop; no tick is lost.
    pub fn nudge(&self, direction: Direction) -> f32 {
        let step = match direction {
            Direction::Increase => VOLUME_STEP,
            Direction::Decrease => -VOLUME_STEP,
        };
        let stepped =
            |bits: u32| (f32::from_bits(bits) + step).clamp(MIN_VOLUME, MAX_VOLUME);
        let previous = self
            .bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some(stepped(bits).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        stepped(previous)
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME)
    }
}

/// Format a volume for display with one decimal place
pub fn format_volume(value: f32) -> String {
    format!("{:.1}", value)
}

struct ActiveHold {
    slot: SlotId,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Drives hold-to-adjust repeat for destination volumes
///
/// At most one hold is active at a time; beginning a new hold releases the
/// previous one first. Each tick applies the same single step a manual
/// nudge does.
pub struct VolumeController {
    repeat_interval: Duration,
    active: Option<ActiveHold>,
}

impl VolumeController {
    pub fn new(repeat_interval: Duration) -> Self {
        Self {
            repeat_interval,
            active: None,
        }
    }

    /// Apply one immediate step, then repeat every tick until released
    pub fn begin_hold(
        &mut self,
        slot: SlotId,
        volume: VolumeControl,
        direction: Direction,
    ) -> f32 {
        self.end_hold();

        let value = volume.nudge(direction);

        let running = Arc::new(AtomicBool::new(true));
        let ticker_running = running.clone();
        let interval = self.repeat_interval;
        let spawned = thread::Builder::new()
            .name(format!("volume-hold-{}", slot))
            .spawn(move || {
                while ticker_running.load(Ordering::Relaxed) {
                    thread::sleep(interval);
                    if !ticker_running.load(Ordering::Relaxed) {
                        break;
                    }
                    volume.nudge(direction);
                }
            });

        match spawned {
            Ok(handle) => {
                self.active = Some(ActiveHold {
                    slot,
                    running,
                    handle: Some(handle),
                });
            }
            Err(e) => {
                tracing::warn!("Failed to spawn hold ticker for slot {}: {}", slot, e);
            }
        }

        value
    }

    /// Release the active hold; no-op when none is armed
    ///
    /// Joins the ticker, so no further step is applied after this returns.
    pub fn end_hold(&mut self) {
        if let Some(mut hold) = self.active.take() {
            hold.running.store(false, Ordering::SeqCst);
            if let Some(handle) = hold.handle.take() {
                let _ = handle.join();
            }
        }
    }

    /// Release the hold only if it targets the given slot
    pub fn end_hold_for(&mut self, slot: SlotId) {
        if self.active.as_ref().map(|h| h.slot) == Some(slot) {
            self.end_hold();
        }
    }

    /// Slot currently being held, if any
    pub fn holding(&self) -> Option<SlotId> {
        self.active.as_ref().map(|h| h.slot)
    }
}

impl Drop for VolumeController {
    fn drop(&mut self) {
        self.end_hold();
    }
}
