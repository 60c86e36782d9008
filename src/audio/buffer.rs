//! Lock-free frame queues and fan-out
//!
//! Each destination owns one bounded queue written by the capture callback
//! and drained by that destination's playback callback. The producer never
//! blocks: a full queue discards the incoming frame and counts the loss, so
//! a slow device glitches alone instead of stalling the pipeline.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// One captured batch of interleaved samples
///
/// Samples are reference-counted so fanning a frame out to several queues
/// shares one allocation instead of copying per destination.
#[derive(Clone)]
pub struct AudioFrame {
    /// Interleaved f32 samples
    pub samples: Arc<[f32]>,
    /// Number of interleaved channels
    pub channels: u16,
    /// Capture sequence number
    pub sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Arc<[f32]>, channels: u16, sequence: u32) -> Self {
        Self {
            samples,
            channels,
            sequence,
        }
    }

    /// Number of samples per channel in this batch
    pub fn samples_per_channel(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Bounded frame queue for one destination
pub struct FrameQueue {
    queue: ArrayQueue<AudioFrame>,
    overflows: AtomicUsize,
    underruns: AtomicUsize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflows: AtomicUsize::new(0),
            underruns: AtomicUsize::new(0),
        }
    }

    /// Push a frame; a full queue drops the incoming frame
    ///
    /// Returns false when the frame was discarded.
    pub fn push(&self, frame: AudioFrame) -> bool {
        match self.queue.push(frame) {
            Ok(()) => true,
            Err(_) => {
                self.overflows.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop the oldest pending frame
    ///
    /// Returns None and counts an underrun when the queue is empty.
    pub fn pop(&self) -> Option<AudioFrame> {
        match self.queue.pop() {
            Some(frame) => Some(frame),
            None => {
                self.underruns.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Pop without counting an underrun
    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflows.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a frame queue
pub type SharedFrameQueue = Arc<FrameQueue>;

/// Create a new shared frame queue
pub fn create_shared_queue(capacity: usize) -> SharedFrameQueue {
    Arc::new(FrameQueue::new(capacity))
}

/// Fans one captured frame out to every destination queue
///
/// Built once per run from the queues of the successfully opened channels;
/// the capture callback holds a clone for the lifetime of the run, so the
/// queue set never changes under a live callback.
#[derive(Clone)]
pub struct FanOut {
    queues: Arc<[SharedFrameQueue]>,
    delivered: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl FanOut {
    pub fn new(queues: Vec<SharedFrameQueue>) -> Self {
        Self {
            queues: queues.into(),
            delivered: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Deliver the frame to every queue
    ///
    /// Each queue receives a clone sharing the same sample allocation. A
    /// full queue drops the frame for that destination only.
    pub fn dispatch(&self, frame: AudioFrame) {
        for queue in self.queues.iter() {
            if queue.push(frame.clone()) {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            } else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn frames_delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
