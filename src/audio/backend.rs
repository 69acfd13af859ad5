//! Audio-Backend - native Gain-Ketten
//!
//! Eine Kette ist der Signalpfad Source → Gain → Output für genau einen
//! Remote-Track. Die Bindung an den nativen Track ist unveränderlich:
//! bei einer Renegotiation wird die Kette abgebaut und neu erzeugt,
//! nie umgebunden.
//!
//! Verwendet cpal für Cross-Platform Audio-Output; pro Kette wird ein
//! eigener Output-Stream aufgebaut (der "Processing-Context").

use crate::transport::RemoteTrackHandle;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate der Remote-Tracks (48kHz, mono)
pub const SOURCE_SAMPLE_RATE: u32 = 48000;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio output device found")]
    NoOutputDevice,

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    #[error("Failed to start audio stream: {0}")]
    StreamStart(String),
}

// ============================================================================
// BACKEND TRAITS
// ============================================================================

/// Eine laufende Gain-Kette
///
/// `close` ist idempotent; der Router ruft es genau einmal auf, bevor die
/// Kette aus der Map entfernt wird.
pub trait AudioChainHandle: Send {
    /// Setzt den Gain-Multiplikator (unbeschränkt nach oben, 0 = stumm)
    fn set_gain(&mut self, gain: f32);

    /// Aktuell gesetzter Gain
    fn gain(&self) -> f32;

    /// Baut die Kette ab und gibt den nativen Context frei
    fn close(&mut self);
}

/// Erzeugt Gain-Ketten für Remote-Tracks
pub trait AudioBackend: Send + Sync {
    fn open_chain(
        &self,
        track: Arc<dyn RemoteTrackHandle>,
    ) -> Result<Box<dyn AudioChainHandle>, AudioError>;
}

// ============================================================================
// CPAL BACKEND
// ============================================================================

/// Produktions-Backend auf Basis von cpal
pub struct CpalBackend {
    output_device: Option<Device>,
}

impl CpalBackend {
    pub fn new() -> Self {
        let host = cpal::default_host();
        let output_device = host.default_output_device();

        if output_device.is_none() {
            tracing::warn!("No audio output device found");
        }

        Self { output_device }
    }

    /// Findet die beste Output-Konfiguration
    fn find_best_output_config(device: &Device) -> Result<StreamConfig, AudioError> {
        let configs = device
            .supported_output_configs()
            .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;

        Self::select_best_config(configs.collect())
    }

    /// Wählt die beste Konfiguration aus einer Liste
    fn select_best_config(
        configs: Vec<SupportedStreamConfigRange>,
    ) -> Result<StreamConfig, AudioError> {
        // Priorität: 48kHz > andere Raten, F32 > andere Formate
        let target_rate = cpal::SampleRate(SOURCE_SAMPLE_RATE);

        for config in &configs {
            if config.min_sample_rate() <= target_rate
                && config.max_sample_rate() >= target_rate
                && config.sample_format() == SampleFormat::F32
            {
                return Ok(config.with_sample_rate(target_rate).into());
            }
        }

        for config in &configs {
            if config.sample_format() == SampleFormat::F32 {
                let rate = if config.min_sample_rate() <= target_rate
                    && config.max_sample_rate() >= target_rate
                {
                    target_rate
                } else {
                    config.max_sample_rate()
                };
                return Ok(config.with_sample_rate(rate).into());
            }
        }

        if let Some(config) = configs.first() {
            return Ok(config.with_max_sample_rate().into());
        }

        Err(AudioError::UnsupportedConfig(
            "No suitable audio configuration found".to_string(),
        ))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn open_chain(
        &self,
        track: Arc<dyn RemoteTrackHandle>,
    ) -> Result<Box<dyn AudioChainHandle>, AudioError> {
        let device = self
            .output_device
            .as_ref()
            .ok_or(AudioError::NoOutputDevice)?;

        let config = Self::find_best_output_config(device)?;
        let channels = config.channels as usize;
        let target_sample_rate = config.sample_rate.0;

        tracing::debug!(
            "Opening audio chain for track {}: {} Hz, {} channels",
            track.track_id(),
            target_sample_rate,
            channels
        );

        let gain = Arc::new(Mutex::new(1.0f32));
        let gain_clone = Arc::clone(&gain);
        let track_id = track.track_id();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let gain = *gain_clone.lock();

                    // Source-Samples bei 48kHz anfordern und auf die
                    // Device-Rate resamplen (linear, mono auf alle Kanäle)
                    let samples_needed = data.len() / channels;
                    let ratio = SOURCE_SAMPLE_RATE as f32 / target_sample_rate as f32;
                    let source_needed = ((samples_needed as f32 * ratio) as usize).max(1);

                    let mut source = vec![0.0f32; source_needed];
                    let available = track.read_samples(&mut source);

                    for i in 0..samples_needed {
                        let src_idx = (i as f32 * ratio) as usize;
                        let sample = if src_idx < available {
                            source[src_idx] * gain
                        } else {
                            0.0
                        };

                        for c in 0..channels {
                            if let Some(slot) = data.get_mut(i * channels + c) {
                                *slot = sample;
                            }
                        }
                    }
                },
                |err| {
                    tracing::error!("Audio chain output error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

        // Streams können suspendiert starten (Autoplay-Guard); play()
        // entspricht dem Resume und muss vor dem ersten Callback passieren
        stream
            .play()
            .map_err(|e| AudioError::StreamStart(e.to_string()))?;

        Ok(Box::new(CpalChain {
            track_id,
            stream: Some(stream),
            gain,
        }))
    }
}

// ============================================================================
// CPAL CHAIN
// ============================================================================

struct CpalChain {
    track_id: String,
    stream: Option<Stream>,
    gain: Arc<Mutex<f32>>,
}

// cpal::Stream ist nicht Send; der Stream wird aber nur aus close()/Drop
// heraus angefasst, der Callback läuft im Audio-Thread von cpal
unsafe impl Send for CpalChain {}

impl AudioChainHandle for CpalChain {
    fn set_gain(&mut self, gain: f32) {
        *self.gain.lock() = gain;
    }

    fn gain(&self) -> f32 {
        *self.gain.lock()
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Closed audio chain for track {}", self.track_id);
        }
    }
}
