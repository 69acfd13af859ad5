//! Call-Coordinator
//!
//! Verklebt Session-State-Machine, Signaling-Kanal, Media-Transport und
//! AudioRouter:
//! - Lokale Aktionen (start/accept/hangup) treiben die Session und senden
//!   die passenden Signale (optimistisch: ein Send-Fehler blockiert die
//!   lokale Transition nicht)
//! - Credential-Fetch und Connect laufen als abbrechbare Tasks; ein spät
//!   eintreffendes Credential wird verworfen und ein spät fertiggestellter
//!   Connect sofort wieder getrennt, wenn die Session inzwischen Idle ist
//!   (Epoch-Guard)
//! - Disconnect-Safety-Net: meldet der Transport einen unerwarteten
//!   Disconnect ohne vorheriges `end` Signal, geht die Session trotzdem
//!   nach Idle und alle Gain-Ketten werden freigegeben

use super::session::{CallError, CallInfo, CallSession, CallState};
use crate::audio::{AudioBackend, AudioRouter, ChainKey};
use crate::prefs::VolumePreferences;
use crate::signaling::{CallSignal, SignalingChannel};
use crate::transport::{MediaTransport, TransportError, TransportEvent};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Intervall des periodischen Reconciliation-Ticks
const RECONCILE_INTERVAL_MS: u64 = 500;

// ============================================================================
// CALL EVENTS
// ============================================================================

/// Events für die einbettende Applikation
#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged(CallState),
    /// Eingehendes Invite wurde angenommen (Zustand RingingIncoming)
    IncomingCall(CallInfo),
    /// User-sichtbarer Fehler (Signaling/Transport); kein Crash, die
    /// Session bleibt in ihrem aktuellen Zustand
    Error(String),
}

// ============================================================================
// CALL COORDINATOR
// ============================================================================

pub struct CallCoordinator {
    local_user_id: String,
    local_display_name: Option<String>,
    session: Mutex<CallSession>,
    signaling: Arc<dyn SignalingChannel>,
    transport: Arc<dyn MediaTransport>,
    router: Mutex<AudioRouter>,
    event_tx: broadcast::Sender<CallEvent>,
    /// Wird bei jedem Übergang nach Idle erhöht; laufende
    /// Credential-Fetches vergleichen und verwerfen ihr Ergebnis
    connect_epoch: AtomicU64,
    /// Transienter Verbindungszustand, existiert nur während eines Calls
    credential: Mutex<Option<crate::transport::MediaCredential>>,
}

impl CallCoordinator {
    /// Erstellt den Coordinator und startet seine Event-Loops
    pub fn new(
        local_user_id: String,
        local_display_name: Option<String>,
        signaling: Arc<dyn SignalingChannel>,
        transport: Arc<dyn MediaTransport>,
        backend: Arc<dyn AudioBackend>,
        prefs: VolumePreferences,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(100);

        let coordinator = Arc::new(Self {
            local_user_id,
            local_display_name,
            session: Mutex::new(CallSession::new()),
            signaling,
            transport,
            router: Mutex::new(AudioRouter::new(backend, prefs)),
            event_tx,
            connect_epoch: AtomicU64::new(0),
            credential: Mutex::new(None),
        });

        coordinator.spawn_event_loops();
        coordinator
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> CallState {
        self.session.lock().state()
    }

    pub fn call_info(&self) -> Option<CallInfo> {
        self.session.lock().info().cloned()
    }

    /// Anzahl aktiver Gain-Ketten (für Anzeige/Diagnose)
    pub fn active_chain_count(&self) -> usize {
        self.router.lock().chain_count()
    }

    /// Aktive Ketten-Keys (für Anzeige)
    pub fn active_chain_keys(&self) -> HashSet<ChainKey> {
        self.router.lock().active_keys()
    }

    // ========================================================================
    // LOCAL ACTIONS
    // ========================================================================

    /// Startet einen ausgehenden Call
    pub async fn start_call(
        self: &Arc<Self>,
        channel_id: &str,
        remote_user_id: &str,
        remote_display_name: Option<String>,
    ) -> Result<(), CallError> {
        let info = CallInfo::new(
            &self.local_user_id,
            remote_user_id,
            channel_id,
            remote_display_name,
        );

        self.session.lock().start_call(info.clone())?;
        tracing::info!("Starting call to {} in room {}", remote_user_id, info.room_id);
        self.emit(CallEvent::StateChanged(CallState::RingingOutgoing));

        let invite = CallSignal::invite(
            info.room_id.clone(),
            info.channel_id.clone(),
            self.local_user_id.clone(),
            info.remote_user_id.clone(),
            self.local_display_name.clone(),
        );
        if let Err(e) = self.signaling.send(invite).await {
            // Optimistisch: die lokale Transition bleibt bestehen
            tracing::error!("Failed to send invite: {}", e);
            self.emit(CallEvent::Error(format!("Failed to send invite: {}", e)));
        }

        self.spawn_connect(info.channel_id);
        Ok(())
    }

    /// Nimmt den eingehenden Call an
    pub async fn accept_call(self: &Arc<Self>) {
        let (became_active, channel_id) = {
            let mut session = self.session.lock();
            let before = session.state();
            let after = session.accept_call();
            let channel_id = session.info().map(|i| i.channel_id.clone());
            (
                before == CallState::RingingIncoming && after == CallState::Active,
                channel_id,
            )
        };

        if !became_active {
            return;
        }

        tracing::info!("Call accepted");
        self.emit(CallEvent::StateChanged(CallState::Active));
        if let Some(channel_id) = channel_id {
            self.spawn_connect(channel_id);
        }
    }

    /// Beendet den laufenden Call; No-op wenn Idle
    pub async fn hang_up(&self) {
        let info = self.session.lock().end_call();
        let Some(info) = info else {
            return;
        };

        tracing::info!("Hanging up call in room {}", info.room_id);

        let end = CallSignal::end(
            info.room_id.clone(),
            info.channel_id.clone(),
            self.local_user_id.clone(),
            info.remote_user_id.clone(),
        );
        if let Err(e) = self.signaling.send(end).await {
            // Verlorene end Signale kompensiert das Safety-Net der
            // Gegenseite, nicht ein Retry
            tracing::error!("Failed to send end signal: {}", e);
            self.emit(CallEvent::Error(format!(
                "Failed to send end signal: {}",
                e
            )));
        }

        self.disconnect_media().await;
        self.finish_teardown();
    }

    // ========================================================================
    // EVENT LOOPS
    // ========================================================================

    fn spawn_event_loops(self: &Arc<Self>) {
        // Eingehende Signale
        let this = Arc::clone(self);
        let mut signal_rx = self.signaling.subscribe();
        tokio::spawn(async move {
            while let Ok(signal) = signal_rx.recv().await {
                this.handle_signal(signal).await;
            }
        });

        // Transport-Lifecycle
        let this = Arc::clone(self);
        let mut transport_rx = self.transport.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = transport_rx.recv().await {
                this.handle_transport_event(event).await;
            }
        });

        // Periodischer Reconciliation-Tick; das Reconcile selbst ist
        // idempotent, der Tick fängt verpasste Änderungen ein
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(
                RECONCILE_INTERVAL_MS,
            ));
            loop {
                interval.tick().await;
                if this.state() == CallState::Active {
                    this.reconcile();
                }
            }
        });
    }

    async fn handle_signal(&self, signal: CallSignal) {
        match signal {
            CallSignal::Invite(body) => {
                let info = CallInfo {
                    room_id: body.room_id,
                    channel_id: body.channel_id,
                    remote_user_id: body.from_user_id,
                    remote_display_name: body.from_display_name,
                };

                // Während eines laufenden Calls wird das Invite
                // unterdrückt; Ablehnen oder Queuen ist Sache der
                // einbettenden Applikation
                let accepted = self.session.lock().receive_invite(info.clone());
                if accepted {
                    self.emit(CallEvent::StateChanged(CallState::RingingIncoming));
                    self.emit(CallEvent::IncomingCall(info));
                }
            }

            CallSignal::End(body) => {
                let ended = {
                    let mut session = self.session.lock();
                    if session.is_current_room(&body.room_id) {
                        session.end_call().is_some()
                    } else {
                        tracing::debug!("Ignoring stale end signal for room {}", body.room_id);
                        false
                    }
                };

                if ended {
                    tracing::info!("Call ended by remote");
                    self.disconnect_media().await;
                    self.finish_teardown();
                }
            }
        }
    }

    async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                // Auf der Anruferseite gibt es kein Answer-Signal: der
                // Call wird Active, sobald die Media-Session ihn trägt
                let became_active = {
                    let mut session = self.session.lock();
                    session.state() == CallState::RingingOutgoing
                        && session.media_connected() == CallState::Active
                };
                if became_active {
                    self.emit(CallEvent::StateChanged(CallState::Active));
                }

                // Ein Connected nach dem Auflegen (verspäteter Connect)
                // darf keine Gain-Ketten mehr anlegen
                let idle = self.session.lock().is_idle();
                if !idle {
                    self.reconcile();
                }
            }

            TransportEvent::TracksChanged => {
                let idle = self.session.lock().is_idle();
                if !idle {
                    self.reconcile();
                }
            }

            TransportEvent::Disconnected { reason } => {
                // Safety-Net: auch ohne beobachtetes `end` Signal darf
                // die Session nicht in Active hängen bleiben
                let was_in_call = self.session.lock().end_call().is_some();
                if was_in_call {
                    tracing::warn!(
                        "Transport disconnected unexpectedly ({}), ending call",
                        reason.as_deref().unwrap_or("no reason")
                    );
                    self.finish_teardown();
                }
            }
        }
    }

    // ========================================================================
    // MEDIA LIFECYCLE
    // ========================================================================

    fn spawn_connect(self: &Arc<Self>, channel_id: String) {
        let this = Arc::clone(self);
        let epoch = self.connect_epoch.load(Ordering::Acquire);
        tokio::spawn(async move {
            this.connect_media(channel_id, epoch).await;
        });
    }

    async fn connect_media(&self, channel_id: String, epoch: u64) {
        let credential = match self.transport.request_credential(&channel_id).await {
            Ok(credential) => credential,
            Err(e) => {
                tracing::error!("Credential request failed: {}", e);
                self.emit(CallEvent::Error(format!(
                    "Credential request failed: {}",
                    e
                )));
                return;
            }
        };

        // Die Session kann während des Fetches beendet worden sein;
        // ein spätes Credential wird verworfen, nie verwendet
        if self.connect_epoch.load(Ordering::Acquire) != epoch || self.session.lock().is_idle() {
            tracing::info!("Discarding stale media credential for channel {}", channel_id);
            return;
        }

        *self.credential.lock() = Some(credential.clone());

        if let Err(e) = self
            .transport
            .connect(&credential.endpoint_url, &credential.token, true, false)
            .await
        {
            tracing::error!("Media connect failed: {}", e);
            self.emit(CallEvent::Error(format!("Media connect failed: {}", e)));
            return;
        }

        // Auch der Connect selbst kann vom Auflegen überholt werden; die
        // dann schon aufgebaute Media-Session wird sofort wieder getrennt
        if self.connect_epoch.load(Ordering::Acquire) != epoch || self.session.lock().is_idle() {
            tracing::info!(
                "Tearing down stale media connection for channel {}",
                channel_id
            );
            self.disconnect_media().await;
        }
    }

    async fn disconnect_media(&self) {
        match self.transport.disconnect().await {
            Ok(()) => {}
            // Nicht verbunden ist beim Auflegen kein Fehler
            Err(TransportError::NotConnected) => {}
            Err(e) => tracing::warn!("Transport disconnect failed: {}", e),
        }
    }

    /// Räumt transienten Verbindungszustand auf; läuft bei jedem
    /// Übergang nach Idle, egal über welchen Pfad
    fn finish_teardown(&self) {
        self.connect_epoch.fetch_add(1, Ordering::AcqRel);
        *self.credential.lock() = None;
        self.router.lock().teardown_all();
        self.emit(CallEvent::StateChanged(CallState::Idle));
    }

    fn reconcile(&self) {
        let local_identity = self.transport.local_identity();
        let tracks = self.transport.subscribed_audio_tracks();
        self.router.lock().reconcile(&local_identity, &tracks);
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl std::fmt::Debug for CallCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCoordinator")
            .field("local_user_id", &self.local_user_id)
            .field("state", &self.state())
            .field("chains", &self.active_chain_count())
            .finish()
    }
}
