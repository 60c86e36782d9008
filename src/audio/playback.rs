//! Playback channel for one destination device
//!
//! Each channel drains its own frame queue from an output callback,
//! applying the slot's gain on the way out. The queue may run dry when
//! the source stalls; the remainder of the block is filled with silence
//! rather than stale samples.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, warn};

use crate::audio::buffer::{AudioFrame, FrameQueue, SharedFrameQueue};
use crate::audio::device::{RenderDevice, StreamFormat};
use crate::config::EngineConfig;
use crate::constants::{FAULT_CHANNEL_CAPACITY, STREAM_START_TIMEOUT};
use crate::error::{AudioError, DeviceError, Error};
use crate::volume::VolumeControl;

/// Live playback handle for one destination
pub trait OutputChannel: Send {
    /// Close the channel; idempotent
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn check_fault(&self) -> Option<AudioError>;
}

/// Read position within a partially consumed frame
///
/// Output blocks and captured frames rarely share a size, so a frame can
/// span several callbacks.
#[derive(Default)]
struct FrameCursor {
    frame: Option<AudioFrame>,
    offset: usize,
}

/// Fill `out` from the queue, scaling by `gain`; zero-fill whatever the
/// queue cannot cover
fn render_block(queue: &FrameQueue, cursor: &mut FrameCursor, out: &mut [f32], gain: f32) {
    let mut written = 0;
    while written < out.len() {
        if cursor.frame.is_none() {
            match queue.pop() {
                Some(frame) => {
                    cursor.frame = Some(frame);
                    cursor.offset = 0;
                }
                None => break,
            }
        }
        if let Some(frame) = cursor.frame.as_ref() {
            let remaining = &frame.samples[cursor.offset..];
            let n = remaining.len().min(out.len() - written);
            for (dst, src) in out[written..written + n].iter_mut().zip(remaining.iter()) {
                *dst = src * gain;
            }
            written += n;
            cursor.offset += n;
            if cursor.offset >= frame.samples.len() {
                cursor.frame = None;
            }
        }
    }
    out[written..].fill(0.0);
}

/// Playback stream bound to one destination device
pub struct DestinationChannel {
    running: Arc<AtomicBool>,
    thread_handle: Option<thread::JoinHandle<()>>,
    fault_rx: Receiver<AudioError>,
}

impl DestinationChannel {
    /// Open an output stream on `device`, draining `queue` at `volume`
    pub fn open(
        device: RenderDevice,
        format: StreamFormat,
        volume: VolumeControl,
        queue: SharedFrameQueue,
        config: &EngineConfig,
    ) -> Result<Self, Error> {
        let stream_config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: match config.stream_buffer_size {
                Some(frames) => BufferSize::Fixed(frames),
                None => BufferSize::Default,
            },
        };

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<(), Error>>(1);
        let (fault_tx, fault_rx) = bounded::<AudioError>(FAULT_CHANNEL_CAPACITY);

        let device_name = device.name.clone();
        let thread_running = Arc::clone(&running);

        let thread_handle = thread::Builder::new()
            .name(format!("playback-{}", device_name))
            .spawn(move || {
                let callback_running = Arc::clone(&thread_running);
                let mut cursor = FrameCursor::default();

                let data_callback = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !callback_running.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }
                    let gain = volume.get();
                    render_block(&queue, &mut cursor, data, gain);
                };

                let fault_name = device.name.clone();
                let error_callback = move |err: cpal::StreamError| {
                    let fault = match err {
                        cpal::StreamError::DeviceNotAvailable => {
                            AudioError::DeviceLost(fault_name.clone())
                        }
                        other => AudioError::StreamError(other.to_string()),
                    };
                    let _ = fault_tx.try_send(fault);
                };

                let stream = match device.inner().build_output_stream(
                    &stream_config,
                    data_callback,
                    error_callback,
                    None,
                ) {
                    Ok(stream) => stream,
                    Err(cpal::BuildStreamError::DeviceNotAvailable) => {
                        let _ = ready_tx.send(Err(Error::Device(DeviceError::Unavailable(
                            device.name.clone(),
                        ))));
                        return;
                    }
                    Err(e) => {
                        let _ = ready_tx
                            .send(Err(Error::Audio(AudioError::StreamError(e.to_string()))));
                        return;
                    }
                };

                match stream.play() {
                    Ok(()) => {
                        let _ = ready_tx.send(Ok(()));
                    }
                    Err(cpal::PlayStreamError::DeviceNotAvailable) => {
                        let _ = ready_tx.send(Err(Error::Device(DeviceError::Unavailable(
                            device.name.clone(),
                        ))));
                        return;
                    }
                    Err(e) => {
                        let _ = ready_tx
                            .send(Err(Error::Audio(AudioError::StreamError(e.to_string()))));
                        return;
                    }
                }

                while thread_running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| Error::Audio(AudioError::StreamError(e.to_string())))?;

        match ready_rx.recv_timeout(STREAM_START_TIMEOUT) {
            Ok(Ok(())) => {
                debug!(device = %device_name, "playback channel open");
                Ok(Self {
                    running,
                    thread_handle: Some(thread_handle),
                    fault_rx,
                })
            }
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                Err(e)
            }
            Err(_) => {
                warn!(device = %device_name, "playback channel did not start in time");
                running.store(false, Ordering::SeqCst);
                let _ = thread_handle.join();
                Err(Error::Audio(AudioError::StartTimeout(STREAM_START_TIMEOUT)))
            }
        }
    }
}

impl OutputChannel for DestinationChannel {
    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    fn is_open(&self) -> bool {
        self.thread_handle.is_some()
    }

    fn check_fault(&self) -> Option<AudioError> {
        self.fault_rx.try_recv().ok()
    }
}

impl Drop for DestinationChannel {
    fn drop(&mut self) {
        self.close();
    }
}
