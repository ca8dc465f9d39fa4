//! Audio playback of synthesized speech via rodio.

use crate::error::{PersoError, PersoResult};
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use std::path::Path;

/// Plays WAV/MP3 bytes on the default output device.
pub struct Playback {
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
    sink: Sink,
}

impl Playback {
    pub fn new() -> PersoResult<Self> {
        let (stream, stream_handle) =
            OutputStream::try_default().map_err(|e| PersoError::Playback(e.to_string()))?;
        let sink = Sink::try_new(&stream_handle).map_err(|e| PersoError::Playback(e.to_string()))?;
        Ok(Self {
            _stream: stream,
            _stream_handle: stream_handle,
            sink,
        })
    }

    /// Queue decoded audio bytes. No-op when empty.
    pub fn play_bytes(&self, bytes: &[u8]) -> PersoResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let source = rodio::Decoder::new(Cursor::new(bytes.to_vec()))
            .map_err(|e| PersoError::Playback(format!("decode failed: {}", e)))?;
        self.sink.append(source.convert_samples::<f32>());
        Ok(())
    }

    /// Play an audio file and block until it finishes.
    pub fn play_file(&self, path: &Path) -> PersoResult<()> {
        let bytes = std::fs::read(path)?;
        self.play_bytes(&bytes)?;
        self.sink.sleep_until_end();
        Ok(())
    }

    /// Block until all queued audio has finished.
    pub fn wait(&self) {
        self.sink.sleep_until_end();
    }
}
