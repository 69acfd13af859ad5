//! Call-Session State Machine
//!
//! Verwaltet den Lebenszyklus genau eines Calls zwischen zwei Usern.
//! Reiner, synchroner Zustand ohne I/O; Signaling-Sends und
//! Media-Lifecycle passieren im Coordinator.
//!
//! Invariante: `CallInfo` ist genau dann vorhanden, wenn der Zustand
//! nicht Idle ist. Prozessweit existiert höchstens eine nicht-Idle
//! Session; ein zweites eingehendes Invite wird unterdrückt und
//! überschreibt nie die laufende Session.

use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Already in a call")]
    AlreadyInCall,
}

// ============================================================================
// CALL INFO
// ============================================================================

/// Identifiziert einen Call; unveränderlich nach Erzeugung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    /// Deterministische Room-ID aus dem ungeordneten User-Paar
    pub room_id: String,
    /// Channel, an dem der Call logisch hängt
    pub channel_id: String,
    pub remote_user_id: String,
    pub remote_display_name: Option<String>,
}

impl CallInfo {
    /// Baut eine CallInfo und leitet die Room-ID aus dem User-Paar ab
    pub fn new(
        local_user_id: &str,
        remote_user_id: &str,
        channel_id: &str,
        remote_display_name: Option<String>,
    ) -> Self {
        Self {
            room_id: room_id_for(local_user_id, remote_user_id),
            channel_id: channel_id.to_string(),
            remote_user_id: remote_user_id.to_string(),
            remote_display_name,
        }
    }
}

/// Deterministische Room-ID: beide Seiten berechnen aus dem ungeordneten
/// Paar denselben Wert
pub fn room_id_for(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("call:{}:{}", lo, hi)
}

// ============================================================================
// CALL STATE
// ============================================================================

/// Aktueller Zustand der Session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Kein Call
    Idle,
    /// Ausgehender Call klingelt beim Remote
    RingingOutgoing,
    /// Eingehender Call wartet auf Annahme
    RingingIncoming,
    /// Call läuft, Media wird geroutet
    Active,
}

// ============================================================================
// CALL SESSION
// ============================================================================

/// Die Session-State-Machine
#[derive(Debug)]
pub struct CallSession {
    state: CallState,
    info: Option<CallInfo>,
}

impl CallSession {
    pub fn new() -> Self {
        Self {
            state: CallState::Idle,
            info: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn info(&self) -> Option<&CallInfo> {
        self.info.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.state == CallState::Idle
    }

    /// true wenn `room_id` zur laufenden Session gehört; Signale für
    /// fremde/alte Rooms werden darüber als stale verworfen
    pub fn is_current_room(&self, room_id: &str) -> bool {
        self.info
            .as_ref()
            .map(|info| info.room_id == room_id)
            .unwrap_or(false)
    }

    /// Lokale Aktion: Call starten (Idle → RingingOutgoing)
    pub fn start_call(&mut self, info: CallInfo) -> Result<(), CallError> {
        if self.state != CallState::Idle {
            return Err(CallError::AlreadyInCall);
        }
        self.info = Some(info);
        self.state = CallState::RingingOutgoing;
        self.assert_invariant();
        Ok(())
    }

    /// Eingehendes Invite (Idle → RingingIncoming)
    ///
    /// Gibt false zurück, wenn das Invite unterdrückt wurde: die laufende
    /// Session wird nie stillschweigend ersetzt.
    pub fn receive_invite(&mut self, info: CallInfo) -> bool {
        if self.state != CallState::Idle {
            tracing::info!(
                "Suppressing invite for room {} while {:?}",
                info.room_id,
                self.state
            );
            return false;
        }
        self.info = Some(info);
        self.state = CallState::RingingIncoming;
        self.assert_invariant();
        true
    }

    /// Lokale Aktion: Call annehmen (RingingIncoming → Active)
    ///
    /// No-op ohne CallInfo - annehmen ist nur sinnvoll, wenn ein Invite
    /// existiert.
    pub fn accept_call(&mut self) -> CallState {
        if self.state == CallState::RingingIncoming && self.info.is_some() {
            self.state = CallState::Active;
        }
        self.assert_invariant();
        self.state
    }

    /// Die Media-Session trägt den Call (RingingOutgoing → Active);
    /// auf der Anruferseite gibt es kein explizites Answer-Event
    pub fn media_connected(&mut self) -> CallState {
        if self.state == CallState::RingingOutgoing {
            self.state = CallState::Active;
        }
        self.assert_invariant();
        self.state
    }

    /// Call beenden (jeder Zustand → Idle)
    ///
    /// Gibt die CallInfo des beendeten Calls zurück; `None` wenn schon
    /// Idle (harmloser No-op).
    pub fn end_call(&mut self) -> Option<CallInfo> {
        self.state = CallState::Idle;
        let info = self.info.take();
        self.assert_invariant();
        info
    }

    fn assert_invariant(&self) {
        debug_assert_eq!(self.info.is_some(), self.state != CallState::Idle);
    }
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
