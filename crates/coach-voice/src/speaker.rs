//! Speaker output on the default device via rodio.
//!
//! `rodio::OutputStream` is not `Send`, so it lives on a dedicated thread for
//! the lifetime of the sink; only the `Send` handle crosses into async code.

use crate::error::{VoiceError, VoiceResult};
use crate::player::AudioSink;
use async_trait::async_trait;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use tracing::{debug, info};

pub struct RodioSink {
    handle: OutputStreamHandle,
    current: Mutex<Option<Arc<Sink>>>,
    // Dropping this sender lets the stream thread exit.
    _keepalive: std_mpsc::Sender<()>,
}

impl RodioSink {
    /// Open the default output device.
    pub fn new() -> VoiceResult<Self> {
        let (handle_tx, handle_rx) = std_mpsc::channel();
        let (keepalive_tx, keepalive_rx) = std_mpsc::channel::<()>();

        thread::Builder::new()
            .name("coach-voice-speaker".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((_stream, handle)) => {
                    let _ = handle_tx.send(Ok(handle));
                    // Block until the sink is dropped; keeps `_stream` alive.
                    let _ = keepalive_rx.recv();
                }
                Err(e) => {
                    let _ = handle_tx.send(Err(VoiceError::Playback(e.to_string())));
                }
            })
            .map_err(|e| VoiceError::Playback(e.to_string()))?;

        let handle = handle_rx
            .recv()
            .map_err(|_| VoiceError::Playback("speaker thread exited".to_string()))??;
        info!("RodioSink: default output device ready");
        Ok(Self {
            handle,
            current: Mutex::new(None),
            _keepalive: keepalive_tx,
        })
    }
}

#[async_trait]
impl AudioSink for RodioSink {
    async fn play(&self, audio: Vec<u8>) -> VoiceResult<()> {
        let source = rodio::Decoder::new(Cursor::new(audio))
            .map_err(|e| VoiceError::Playback(format!("Decode failed: {}", e)))?;
        let sink = Arc::new(Sink::try_new(&self.handle).map_err(|e| VoiceError::Playback(e.to_string()))?);
        sink.append(source.convert_samples::<f32>());
        if let Ok(mut current) = self.current.lock() {
            *current = Some(Arc::clone(&sink));
        }
        debug!("RodioSink: playing");

        let waiting = Arc::clone(&sink);
        tokio::task::spawn_blocking(move || waiting.sleep_until_end())
            .await
            .map_err(|e| VoiceError::Playback(e.to_string()))?;

        if let Ok(mut current) = self.current.lock() {
            if current.as_ref().map(|s| Arc::ptr_eq(s, &sink)).unwrap_or(false) {
                *current = None;
            }
        }
        Ok(())
    }

    fn stop(&self) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(sink) = current.take() {
                sink.stop();
                info!("RodioSink: stopped");
            }
        }
    }
}
