//! Message Types für das Call-Signaling
//!
//! Die Feldnamen entsprechen dem camelCase-Wire-Format des
//! Signaling-Servers und ermöglichen typsichere Kommunikation.

use chrono::Utc;
use serde::{Deserialize, Serialize};

// ============================================================================
// SIGNAL BODY
// ============================================================================

/// Gemeinsamer Payload von `invite` und `end`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSignalBody {
    /// Deterministische Room-ID, von beiden Seiten identisch berechnet
    #[serde(rename = "roomId")]
    pub room_id: String,

    /// Channel, an dem der Call logisch hängt
    #[serde(rename = "channelId")]
    pub channel_id: String,

    #[serde(rename = "fromUserId")]
    pub from_user_id: String,

    #[serde(rename = "toUserId")]
    pub to_user_id: String,

    /// Anzeigename des Absenders (nur für invite interessant)
    #[serde(rename = "fromDisplayName", skip_serializing_if = "Option::is_none")]
    pub from_display_name: Option<String>,

    pub timestamp: i64,
}

// ============================================================================
// CALL SIGNALS
// ============================================================================

/// Ein Call-Signal auf dem Signaling-Kanal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallSignal {
    /// Einladung zu einem Call
    Invite(CallSignalBody),

    /// Call wurde beendet
    End(CallSignalBody),
}

impl CallSignal {
    /// Baut ein `invite` Signal mit aktuellem Timestamp
    pub fn invite(
        room_id: String,
        channel_id: String,
        from_user_id: String,
        to_user_id: String,
        from_display_name: Option<String>,
    ) -> Self {
        CallSignal::Invite(CallSignalBody {
            room_id,
            channel_id,
            from_user_id,
            to_user_id,
            from_display_name,
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    /// Baut ein `end` Signal mit aktuellem Timestamp
    pub fn end(
        room_id: String,
        channel_id: String,
        from_user_id: String,
        to_user_id: String,
    ) -> Self {
        CallSignal::End(CallSignalBody {
            room_id,
            channel_id,
            from_user_id,
            to_user_id,
            from_display_name: None,
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    /// Gemeinsamer Zugriff auf den Payload
    pub fn body(&self) -> &CallSignalBody {
        match self {
            CallSignal::Invite(body) | CallSignal::End(body) => body,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
