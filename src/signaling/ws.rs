//! WebSocket-Implementierung des Signaling-Kanals
//!
//! Hält die Verbindung zum Signaling-Server:
//! - Getrennte Read/Write-Tasks über die gesplittete Socket-Hälften
//! - Ausgehende Signale über eine mpsc-Queue
//! - Periodischer Ping als Keepalive
//! - Eingehende Signale werden dekodiert und per Broadcast verteilt

use super::messages::CallSignal;
use super::{SignalingChannel, SignalingError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

/// Keepalive-Intervall für WebSocket-Pings
const PING_INTERVAL_SECS: u64 = 30;

// ============================================================================
// WS SIGNALING CHANNEL
// ============================================================================

/// WebSocket-Client für den Signaling-Server
pub struct WsSignalingChannel {
    server_url: String,
    local_user_id: String,
    tx: RwLock<Option<mpsc::Sender<Message>>>,
    event_tx: broadcast::Sender<CallSignal>,
    connected: Arc<RwLock<bool>>,
}

impl WsSignalingChannel {
    /// Erstellt einen neuen, noch nicht verbundenen Kanal
    pub fn new(server_url: String, local_user_id: String) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            server_url,
            local_user_id,
            tx: RwLock::new(None),
            event_tx,
            connected: Arc::new(RwLock::new(false)),
        }
    }

    /// Prüft ob verbunden
    pub fn is_connected(&self) -> bool {
        *self.connected.read()
    }

    /// Leitet die WebSocket-URL aus der Server-URL ab
    ///
    /// Nur das Schema-Präfix wird ersetzt (http → ws, https → wss),
    /// der Pfad bleibt unangetastet.
    fn ws_url(server_url: &str) -> String {
        let base = match server_url.strip_prefix("http") {
            Some(rest) => format!("ws{}", rest),
            None => server_url.to_string(),
        };
        format!("{}/ws", base)
    }

    /// Verbindet mit dem Signaling-Server und startet Read/Write-Tasks
    pub async fn connect(&self) -> Result<(), SignalingError> {
        let ws_url = Self::ws_url(&self.server_url);
        url::Url::parse(&ws_url).map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        // Connection-ID nur für Log-Korrelation
        let conn_id = Uuid::new_v4();
        tracing::info!("[{}] Connecting to signaling server: {}", conn_id, ws_url);

        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel::<Message>(100);
        *self.tx.write() = Some(tx.clone());
        *self.connected.write() = true;

        // Read-Task: eingehende Signale dekodieren und verteilen
        let event_tx = self.event_tx.clone();
        let connected = Arc::clone(&self.connected);
        let local_user_id = self.local_user_id.clone();
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<CallSignal>(&text) {
                        Ok(signal) => {
                            if signal.body().to_user_id != local_user_id {
                                tracing::debug!(
                                    "[{}] Dropping signal addressed to {}",
                                    conn_id,
                                    signal.body().to_user_id
                                );
                                continue;
                            }
                            let _ = event_tx.send(signal);
                        }
                        Err(e) => {
                            tracing::warn!("[{}] Unparseable signaling message: {}", conn_id, e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("[{}] WebSocket closed by server", conn_id);
                        break;
                    }
                    Err(e) => {
                        tracing::error!("[{}] WebSocket error: {}", conn_id, e);
                        break;
                    }
                    _ => {}
                }
            }

            *connected.write() = false;
        });

        // Write-Task: Queue in die Socket-Hälfte pumpen
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    tracing::error!("[{}] Failed to send WebSocket message: {}", conn_id, e);
                    break;
                }
            }
        });

        // Keepalive-Task
        let ping_tx = tx;
        let connected = Arc::clone(&self.connected);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(PING_INTERVAL_SECS));
            loop {
                interval.tick().await;
                if !*connected.read() {
                    break;
                }
                if ping_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        });

        Ok(())
    }
}

#[async_trait]
impl SignalingChannel for WsSignalingChannel {
    async fn send(&self, signal: CallSignal) -> Result<(), SignalingError> {
        let tx = self
            .tx
            .read()
            .clone()
            .ok_or(SignalingError::NotConnected)?;

        let json = serde_json::to_string(&signal)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        tx.send(Message::Text(json))
            .await
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<CallSignal> {
        self.event_tx.subscribe()
    }
}

impl std::fmt::Debug for WsSignalingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSignalingChannel")
            .field("server_url", &self.server_url)
            .field("local_user_id", &self.local_user_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
