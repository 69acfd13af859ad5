//! Call Module - Session und Coordinator
//!
//! Dieses Modul verwaltet:
//! - Die Call-Session State-Machine (Idle/Ringing/Active)
//! - Den Coordinator, der Signaling, Media-Transport und Audio-Routing
//!   zusammenhält

mod coordinator;
mod session;

pub use coordinator::{CallCoordinator, CallEvent};
pub use session::{room_id_for, CallError, CallInfo, CallSession, CallState};
