//! Signaling Module - Call-Events über den Message-Transport
//!
//! Dieses Modul verwaltet die Signalisierung von Call-Zuständen:
//! - Wire-Payloads für `invite` und `end` Signale
//! - `SignalingChannel` Schnittstelle (opakes Send/Receive)
//! - WebSocket-Implementierung für den Signaling-Server

mod messages;
mod ws;

pub use messages::{CallSignal, CallSignalBody};
pub use ws::WsSignalingChannel;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send signal: {0}")]
    SendFailed(String),
}

// ============================================================================
// SIGNALING CHANNEL TRAIT
// ============================================================================

/// Opaker Send/Receive-Kanal für Call-Signale
///
/// Ein fehlgeschlagener Send blockiert die lokale State-Transition nicht;
/// der Aufrufer macht den Fehler sichtbar und verlässt sich für verlorene
/// `end` Signale auf das Disconnect-Safety-Net.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Sendet ein Signal an den adressierten Remote-User
    async fn send(&self, signal: CallSignal) -> Result<(), SignalingError>;

    /// Gibt einen Receiver für eingehende Signale zurück
    fn subscribe(&self) -> broadcast::Receiver<CallSignal>;
}
