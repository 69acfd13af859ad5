//! Media-Transport Abstraktion
//!
//! Der eigentliche Medien-Provider (WebRTC-Session, Subscription-Handling,
//! Reconnect/ICE) ist ein externer Kollaborateur. Dieses Modul definiert nur
//! die Schnittstelle, die Coordinator und AudioRouter benötigen:
//! - Credential-Anfrage und Connect/Disconnect-Lifecycle
//! - Aufzählung der aktuell abonnierten Remote-Audio-Tracks
//! - Lifecycle-Events als Broadcast (Connected/Disconnected/TracksChanged)

use async_trait::async_trait;
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Credential request failed: {0}")]
    CredentialFailed(String),

    #[error("Transport connect failed: {0}")]
    ConnectFailed(String),

    #[error("Transport not connected")]
    NotConnected,
}

// ============================================================================
// CREDENTIALS
// ============================================================================

/// Zugangsdaten für eine Media-Session
///
/// Werden von einem externen Token-Issuer pro Channel ausgestellt und sind
/// transienter Verbindungszustand: sie werden verworfen, sobald die Session
/// wieder Idle ist.
#[derive(Debug, Clone)]
pub struct MediaCredential {
    pub token: String,
    pub endpoint_url: String,
}

// ============================================================================
// REMOTE TRACKS
// ============================================================================

/// Quelle eines Remote-Tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Microphone,
    ScreenShareAudio,
    Unknown,
}

/// Handle auf den nativen Media-Track eines Remote-Teilnehmers
///
/// Die `track_id` identifiziert den darunterliegenden nativen Track. Bei
/// einer Renegotiation liefert der Transport ein neues Handle mit neuer ID;
/// ein bestehendes Handle wird nie auf einen anderen Track umgebunden.
pub trait RemoteTrackHandle: Send + Sync {
    /// Eindeutige ID des nativen Tracks
    fn track_id(&self) -> String;

    /// true wenn der native Track beendet wurde und keine Daten mehr liefert
    fn is_ended(&self) -> bool;

    /// Liest bis zu `buf.len()` PCM-Samples (48kHz, mono), non-blocking.
    /// Gibt die Anzahl der geschriebenen Samples zurück.
    fn read_samples(&self, buf: &mut [f32]) -> usize;
}

/// Ein aktuell abonnierter Remote-Audio-Track
#[derive(Clone)]
pub struct RemoteAudioTrack {
    pub participant_identity: String,
    pub source: TrackSource,
    pub track: Arc<dyn RemoteTrackHandle>,
}

impl std::fmt::Debug for RemoteAudioTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAudioTrack")
            .field("participant_identity", &self.participant_identity)
            .field("source", &self.source)
            .field("track_id", &self.track.track_id())
            .finish()
    }
}

// ============================================================================
// TRANSPORT EVENTS
// ============================================================================

/// Lifecycle-Events des Media-Transports
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Media-Session steht
    Connected,

    /// Media-Session wurde getrennt (Netzwerkfehler, Remote-Close, ...)
    Disconnected { reason: Option<String> },

    /// Die Menge der abonnierten Tracks hat sich geändert
    TracksChanged,
}

// ============================================================================
// MEDIA TRANSPORT TRAIT
// ============================================================================

/// Schnittstelle zum externen Media-Provider
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Fordert ein Media-Session-Credential für einen Channel an
    async fn request_credential(&self, channel_id: &str)
        -> Result<MediaCredential, TransportError>;

    /// Verbindet die Media-Session
    async fn connect(
        &self,
        endpoint_url: &str,
        token: &str,
        audio_enabled: bool,
        video_enabled: bool,
    ) -> Result<(), TransportError>;

    /// Trennt die Media-Session. `NotConnected` wird vom Aufrufer toleriert.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Aktuell abonnierte Remote-Audio-Tracks (inklusive lokalem Teilnehmer,
    /// der Aufrufer filtert über `local_identity`)
    fn subscribed_audio_tracks(&self) -> Vec<RemoteAudioTrack>;

    /// Identity des lokalen Teilnehmers in der Media-Session
    fn local_identity(&self) -> String;

    /// Gibt einen Event-Receiver für Lifecycle-Events zurück
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

// ============================================================================
// PCM TRACK BUFFER
// ============================================================================

/// Puffer-Größe pro Track (ca. 200ms @ 48kHz mono)
const TRACK_BUFFER_SIZE: usize = 48000 / 5;

/// Ring-Buffer-basiertes `RemoteTrackHandle`
///
/// Transport-Implementierungen schreiben dekodiertes PCM mit `push_samples`
/// hinein, die Audio-Kette liest es über `read_samples` wieder heraus.
/// Die Track-ID wird beim Erzeugen fest vergeben; eine Renegotiation
/// erzeugt einen neuen Buffer mit neuer ID.
pub struct PcmTrackBuffer {
    track_id: String,
    ring: Mutex<HeapRb<f32>>,
    ended: AtomicBool,
}

impl PcmTrackBuffer {
    /// Erzeugt einen neuen Track-Buffer mit frischer ID
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// Erzeugt einen Track-Buffer mit vorgegebener ID
    pub fn with_id(track_id: String) -> Self {
        Self {
            track_id,
            ring: Mutex::new(HeapRb::new(TRACK_BUFFER_SIZE)),
            ended: AtomicBool::new(false),
        }
    }

    /// Schreibt dekodierte PCM-Samples; bei vollem Buffer werden die
    /// ältesten Samples überschrieben (Latenz vor Vollständigkeit)
    pub fn push_samples(&self, samples: &[f32]) {
        let mut ring = self.ring.lock();
        for &sample in samples {
            if ring.try_push(sample).is_err() {
                let _ = ring.try_pop();
                let _ = ring.try_push(sample);
            }
        }
    }

    /// Markiert den Track als beendet
    pub fn mark_ended(&self) {
        self.ended.store(true, Ordering::Release);
    }
}

impl Default for PcmTrackBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteTrackHandle for PcmTrackBuffer {
    fn track_id(&self) -> String {
        self.track_id.clone()
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn read_samples(&self, buf: &mut [f32]) -> usize {
        let mut ring = self.ring.lock();
        let mut written = 0;
        for slot in buf.iter_mut() {
            match ring.try_pop() {
                Some(sample) => {
                    *slot = sample;
                    written += 1;
                }
                None => break,
            }
        }
        written
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_buffer_roundtrip() {
        let buffer = PcmTrackBuffer::new();
        buffer.push_samples(&[0.1, 0.2, 0.3]);

        let mut out = [0.0f32; 8];
        let n = buffer.read_samples(&mut out);
        assert_eq!(n, 3);
        assert_eq!(&out[..3], &[0.1, 0.2, 0.3]);

        // Buffer ist jetzt leer
        assert_eq!(buffer.read_samples(&mut out), 0);
    }

    #[test]
    fn test_track_buffer_overflow_drops_oldest() {
        let buffer = PcmTrackBuffer::with_id("t1".to_string());
        let chunk = vec![1.0f32; TRACK_BUFFER_SIZE];
        buffer.push_samples(&chunk);
        buffer.push_samples(&[2.0]);

        let mut out = vec![0.0f32; TRACK_BUFFER_SIZE];
        let n = buffer.read_samples(&mut out);
        assert_eq!(n, TRACK_BUFFER_SIZE);
        // Das neueste Sample ist noch da, das älteste wurde verworfen
        assert_eq!(out[n - 1], 2.0);
    }

    #[test]
    fn test_track_buffer_ended_flag() {
        let buffer = PcmTrackBuffer::new();
        assert!(!buffer.is_ended());
        buffer.mark_ended();
        assert!(buffer.is_ended());
    }

    #[test]
    fn test_fresh_buffers_have_distinct_ids() {
        let a = PcmTrackBuffer::new();
        let b = PcmTrackBuffer::new();
        assert_ne!(a.track_id(), b.track_id());
    }
}
