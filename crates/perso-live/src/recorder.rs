//! **Audio Capture Subsystem** — microphone recording via CPAL.
//!
//! Single-producer / single-consumer: one background worker thread owns the
//! capture stream (cpal `Stream` is `!Send` on some platforms) and appends
//! fixed-size frames while a run-flag is set; the controller reads the buffer
//! only after clearing the flag and joining the worker, so the hand-off needs
//! no lock. The final in-flight frame is drained after the stream is torn
//! down, so no frame is lost between flag-clear and join.

use crate::error::{PersoError, PersoResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// Capture sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16_000;
/// Mono capture.
pub const CHANNELS: u16 = 1;
/// Frame size in samples. Frames are always exactly this long.
pub const CHUNK_SAMPLES: usize = 1024;

/// Microphone recorder producing a WAV-encoded byte blob.
///
/// Exactly one capture worker may be armed per instance; a re-entrant
/// `start` is rejected with `AlreadyRecording`.
pub struct Recorder {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<Vec<Vec<f32>>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.worker.is_some()
    }

    /// Arm the run-flag and spawn the capture worker.
    ///
    /// Fails fast with `AudioUnavailable` when no input device is present and
    /// with `AlreadyRecording` when a capture is already armed. Returns once
    /// the input stream is confirmed running.
    pub fn start(&mut self) -> PersoResult<()> {
        if self.worker.is_some() {
            return Err(PersoError::AlreadyRecording);
        }

        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| PersoError::AudioUnavailable("no input device available".into()))?;
        info!(
            "Recording from input device: {}",
            device.name().unwrap_or_else(|_| "unknown".into())
        );

        let stream_config = StreamConfig {
            channels: CHANNELS,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let worker = thread::spawn(move || {
            capture_loop(device, stream_config, running, ready_tx)
        });

        // The stream is built inside the worker; wait for it to come up so
        // backend failures surface here rather than as a silent empty take.
        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(worker);
                info!("Recording started");
                Ok(())
            }
            Ok(Err(reason)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = worker.join();
                Err(PersoError::AudioUnavailable(reason))
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = worker.join();
                Err(PersoError::AudioUnavailable(
                    "capture worker exited before the stream started".into(),
                ))
            }
        }
    }

    /// Clear the run-flag, join the worker, and return the capture as a
    /// WAV-framed byte blob.
    ///
    /// Calling without a prior `start` is a no-op returning an empty blob —
    /// no error, no thread join.
    pub fn stop(&mut self) -> PersoResult<Vec<u8>> {
        let Some(worker) = self.worker.take() else {
            return Ok(Vec::new());
        };

        self.running.store(false, Ordering::SeqCst);
        let frames = worker
            .join()
            .map_err(|_| PersoError::AudioUnavailable("capture worker panicked".into()))?;

        let samples: Vec<f32> = frames.into_iter().flatten().collect();
        info!(
            "Recording stopped ({} frames of {} samples)",
            samples.len() / CHUNK_SAMPLES,
            CHUNK_SAMPLES
        );
        samples_to_wav(&samples)
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker body: owns the cpal stream, appends exact-size frames while the
/// run-flag is set, then tears the stream down and drains the channel.
fn capture_loop(
    device: cpal::Device,
    stream_config: StreamConfig,
    running: Arc<AtomicBool>,
    ready_tx: mpsc::Sender<Result<(), String>>,
) -> Vec<Vec<f32>> {
    let (frame_tx, frame_rx) = mpsc::channel::<Vec<f32>>();
    let mut pending: Vec<f32> = Vec::with_capacity(CHUNK_SAMPLES);

    let stream = match device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            frame_samples(&mut pending, data, |frame| {
                let _ = frame_tx.send(frame);
            });
        },
        |err| warn!("Audio stream error: {}", err),
        None,
    ) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return Vec::new();
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(e.to_string()));
        return Vec::new();
    }
    let _ = ready_tx.send(Ok(()));

    let mut frames: Vec<Vec<f32>> = Vec::new();
    while running.load(Ordering::SeqCst) {
        match frame_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(frame) => frames.push(frame),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Stop the callback, then collect whatever it emitted before teardown.
    drop(stream);
    while let Ok(frame) = frame_rx.try_recv() {
        frames.push(frame);
    }
    frames
}

/// Accumulate raw callback data into frames of exactly `CHUNK_SAMPLES`.
/// A trailing partial frame stays pending (and is dropped at teardown), so
/// emitted audio is always a whole number of frames.
fn frame_samples<F: FnMut(Vec<f32>)>(pending: &mut Vec<f32>, data: &[f32], mut emit: F) {
    for &sample in data {
        pending.push(sample);
        if pending.len() == CHUNK_SAMPLES {
            emit(std::mem::take(pending));
            pending.reserve(CHUNK_SAMPLES);
        }
    }
}

/// Encode f32 PCM (mono, 16 kHz) into a 16-bit WAV byte blob.
pub fn samples_to_wav(samples: &[f32]) -> PersoResult<Vec<u8>> {
    let spec = WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut buffer, spec)?;
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            writer.write_sample(value)?;
        }
        writer.finalize()?;
    }
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_without_start_is_a_noop() {
        let mut rec = Recorder::new();
        let blob = rec.stop().unwrap();
        assert!(blob.is_empty());
        assert!(!rec.is_recording());
    }

    #[test]
    fn frames_are_exactly_chunk_sized() {
        let mut pending = Vec::new();
        let mut emitted = Vec::new();
        // Three and a half chunks worth of samples, fed in odd-sized slices.
        let data = vec![0.25f32; CHUNK_SAMPLES * 3 + CHUNK_SAMPLES / 2];
        for piece in data.chunks(300) {
            frame_samples(&mut pending, piece, |f| emitted.push(f));
        }
        assert_eq!(emitted.len(), 3);
        assert!(emitted.iter().all(|f| f.len() == CHUNK_SAMPLES));
        assert_eq!(pending.len(), CHUNK_SAMPLES / 2);
    }

    #[test]
    fn wav_data_is_a_multiple_of_the_frame_stride() {
        let samples = vec![0.0f32; CHUNK_SAMPLES * 2];
        let wav = samples_to_wav(&samples).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        // 44-byte canonical header, then 16-bit PCM data.
        assert_eq!((wav.len() - 44) % (CHUNK_SAMPLES * 2), 0);
        assert_eq!(wav.len(), 44 + CHUNK_SAMPLES * 2 * 2);
    }

    #[test]
    fn wav_encoding_clamps_out_of_range_samples() {
        let wav = samples_to_wav(&[2.0, -2.0]).unwrap();
        let data = &wav[44..];
        let first = i16::from_le_bytes([data[0], data[1]]);
        let second = i16::from_le_bytes([data[2], data[3]]);
        assert_eq!(first, 32767);
        assert_eq!(second, -32767);
    }

    #[test]
    #[ignore] // Requires audio hardware.
    fn reentrant_start_is_rejected() {
        let mut rec = Recorder::new();
        rec.start().expect("start capture");
        assert!(matches!(rec.start(), Err(PersoError::AlreadyRecording)));
        let blob = rec.stop().expect("stop capture");
        assert_eq!(&blob[..4], b"RIFF");
    }
}
