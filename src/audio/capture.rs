//! Loopback capture from a render device
//!
//! cpal streams are not Send, so the stream lives on a dedicated thread
//! for its whole life. The opener blocks on a one-shot channel until the
//! thread reports whether the stream actually started, which keeps
//! device failures synchronous instead of surfacing later as silence.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, warn};

use crate::audio::buffer::{AudioFrame, FanOut};
use crate::audio::device::{RenderDevice, StreamFormat};
use crate::config::EngineConfig;
use crate::constants::{FAULT_CHANNEL_CAPACITY, STREAM_START_TIMEOUT};
use crate::error::{AudioError, DeviceError, Error};

/// Live capture handle
///
/// Stopping joins the stream thread, so no frame reaches the sink after
/// `stop` returns.
pub trait CaptureStream: Send {
    fn stop(&mut self);
    fn check_fault(&self) -> Option<AudioError>;
    fn frames_captured(&self) -> u64;
    fn samples_captured(&self) -> u64;
}

/// Loopback capture bound to one render device
pub struct LoopbackCapture {
    running: Arc<AtomicBool>,
    thread_handle: Option<thread::JoinHandle<()>>,
    fault_rx: Receiver<AudioError>,
    frames: Arc<AtomicU64>,
    samples: Arc<AtomicU64>,
}

impl LoopbackCapture {
    /// Open a loopback stream on `device` and pump frames into `sink`
    pub fn open(
        device: RenderDevice,
        format: StreamFormat,
        sink: FanOut,
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
        let frames = Arc::new(AtomicU64::new(0));
        let samples = Arc::new(AtomicU64::new(0));

        let (ready_tx, ready_rx) = bounded::<Result<(), Error>>(1);
        let (fault_tx, fault_rx) = bounded::<AudioError>(FAULT_CHANNEL_CAPACITY);

        let device_name = device.name.clone();
        let thread_running = Arc::clone(&running);
        let thread_frames = Arc::clone(&frames);
        let thread_samples = Arc::clone(&samples);

        let thread_handle = thread::Builder::new()
            .name(format!("loopback-{}", device_name))
            .spawn(move || {
                let callback_running = Arc::clone(&thread_running);
                let channels = format.channels;
                let mut sequence: u32 = 0;

                let data_callback = move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !callback_running.load(Ordering::Relaxed) {
                        return;
                    }
                    let seq = sequence;
                    sequence = sequence.wrapping_add(1);
                    thread_frames.fetch_add(1, Ordering::Relaxed);
                    thread_samples.fetch_add(data.len() as u64, Ordering::Relaxed);
                    sink.dispatch(AudioFrame::new(Arc::from(data), channels, seq));
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

                let stream = match device.inner().build_input_stream(
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

                // The stream is dropped, and therefore closed, when this
                // loop exits.
                while thread_running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| Error::Audio(AudioError::StreamError(e.to_string())))?;

        match ready_rx.recv_timeout(STREAM_START_TIMEOUT) {
            Ok(Ok(())) => {
                debug!(
                    device = %device_name,
                    sample_rate = format.sample_rate,
                    channels = format.channels,
                    "loopback capture started"
                );
                Ok(Self {
                    running,
                    thread_handle: Some(thread_handle),
                    fault_rx,
                    frames,
                    samples,
                })
            }
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                Err(e)
            }
            Err(_) => {
                warn!(device = %device_name, "loopback capture did not start in time");
                running.store(false, Ordering::SeqCst);
                let _ = thread_handle.join();
                Err(Error::Audio(AudioError::StartTimeout(STREAM_START_TIMEOUT)))
            }
        }
    }
}

impl CaptureStream for LoopbackCapture {
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    fn check_fault(&self) -> Option<AudioError> {
        self.fault_rx.try_recv().ok()
    }

    fn frames_captured(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    fn samples_captured(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

impl Drop for LoopbackCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
