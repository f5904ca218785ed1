//! Microphone input via cpal.
//!
//! The cpal stream lives on its own thread (streams are not `Send` on every
//! platform); captured samples land in a shared ring that the envelope
//! driver reads from.

use super::source::{AudioSource, SourceKind, SourceStatus, to_mono};
use crate::error::{LipSyncError, Result};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use tracing::{error, info};

/// Live microphone tap.
pub struct MicSource {
    ring: Arc<Mutex<VecDeque<f32>>>,
    alive: Arc<AtomicBool>,
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicSource {
    /// Open `device` (system default when `None`) keeping the last
    /// `capacity` samples.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Audio`] if no input device is available or
    /// the stream cannot be started.
    pub fn open(device: Option<&str>, capacity: usize) -> Result<Self> {
        let ring = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
        let alive = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<String>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let device = device.map(str::to_owned);
        let thread_ring = Arc::clone(&ring);
        let thread_alive = Arc::clone(&alive);
        let thread = std::thread::Builder::new()
            .name("lipsync-mic".into())
            .spawn(move || {
                let stream =
                    match build_stream(device.as_deref(), capacity, thread_ring, &thread_alive) {
                        Ok((stream, name)) => {
                            let _ = ready_tx.send(Ok(name));
                            stream
                        }
                        Err(e) => {
                            thread_alive.store(false, Ordering::Relaxed);
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                // Hold the stream until asked to stop (or the source is dropped).
                let _ = stop_rx.recv();
                drop(stream);
                thread_alive.store(false, Ordering::Relaxed);
                info!("microphone capture stopped");
            })?;

        let name = ready_rx
            .recv()
            .map_err(|_| LipSyncError::Audio("capture thread exited during startup".into()))??;
        info!(device = %name, "microphone capture started");

        Ok(Self {
            ring,
            alive,
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

impl AudioSource for MicSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Microphone
    }

    fn read_time_domain(&mut self, out: &mut [f32]) -> SourceStatus {
        if !self.alive.load(Ordering::Relaxed) {
            out.fill(0.0);
            return SourceStatus::Disconnected;
        }
        let ring = self
            .ring
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let take = ring.len().min(out.len());
        let pad = out.len() - take;
        out[..pad].fill(0.0);
        for (dst, src) in out[pad..].iter_mut().zip(ring.iter().skip(ring.len() - take)) {
            *dst = *src;
        }
        SourceStatus::Connected
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn build_stream(
    name: Option<&str>,
    capacity: usize,
    ring: Arc<Mutex<VecDeque<f32>>>,
    alive: &Arc<AtomicBool>,
) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = if let Some(name) = name {
        host.input_devices()
            .map_err(|e| LipSyncError::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| LipSyncError::Audio(format!("input device '{name}' not found")))?
    } else {
        host.default_input_device()
            .ok_or_else(|| LipSyncError::Audio("no default input device".into()))?
    };

    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());

    let default_config = device
        .default_input_config()
        .map_err(|e| LipSyncError::Audio(format!("no default input config: {e}")))?;
    let channels = default_config.channels();
    let stream_config = StreamConfig {
        channels,
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_alive = Arc::clone(alive);
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = to_mono(data, channels);
                let mut ring = ring.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                ring.extend(mono);
                let excess = ring.len().saturating_sub(capacity);
                ring.drain(..excess);
            },
            move |err| {
                error!("microphone stream error: {err}");
                err_alive.store(false, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| LipSyncError::Audio(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| LipSyncError::Audio(format!("failed to start input stream: {e}")))?;

    Ok((stream, device_name))
}
