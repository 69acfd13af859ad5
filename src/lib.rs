//! Ripple Voice - Voice-Call-Subsystem des Ripple Chat-Clients
//!
//! Baut Zwei-Parteien-Calls auf und verwaltet sie:
//! - Call-Signaling (invite/end) über den Message-Transport
//! - Session-State-Machine (Idle/Ringing/Active)
//! - Pro-Teilnehmer Audio-Routing mit unabhängigem Gain (inklusive
//!   Boost über 100%), das vom Volume-Handling des Media-Transports
//!   nicht zurückgesetzt wird
//! - Persistente Volume-Einstellungen und globales Deafen
//!
//! Media-Session (WebRTC), Authentifizierung und UI sind externe
//! Kollaborateure und hier nur als Traits modelliert.

pub mod audio;
pub mod call;
pub mod prefs;
pub mod quality;
pub mod signaling;
pub mod transport;

pub use audio::{AudioBackend, AudioRouter, ChainKey, CpalBackend};
pub use call::{CallCoordinator, CallError, CallEvent, CallInfo, CallState};
pub use prefs::{PreferencesStore, VolumePreferences};
pub use quality::{classify, QualityThresholds, QualityTier};
pub use signaling::{CallSignal, SignalingChannel, WsSignalingChannel};
pub use transport::{MediaTransport, PcmTrackBuffer, RemoteAudioTrack, TrackSource};

/// Initialisiert das Logging für die einbettende Applikation
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ripple_voice=debug".parse().expect("static directive"))
                .add_directive("tungstenite=warn".parse().expect("static directive")),
        )
        .init();
}
