//! Volume-Einstellungen
//!
//! Prozessweiter, geteilter Zustand: pro-User Gain-Overrides und das
//! globale Deafen-Flag. Gelesen vom AudioRouter bei jedem
//! Reconciliation-Durchlauf, geschrieben nur durch explizite User-Aktionen.

mod store;

pub use store::{PreferencesStore, StoreError};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PrefsError {
    #[error("Volume must not be negative: {0}")]
    NegativeVolume(f32),
}

// ============================================================================
// VOLUME PREFERENCES
// ============================================================================

/// Default-Gain wenn kein Override gespeichert ist
pub const DEFAULT_GAIN: f32 = 1.0;

#[derive(Debug, Default)]
struct PrefsInner {
    /// user_id -> Gain-Multiplikator (>= 0, Werte > 1.0 sind Boost)
    volumes: HashMap<String, f32>,
    /// Globales Deafen-Flag; überschreibt alle Gains mit 0,
    /// ohne die Map zu verändern
    deafened: bool,
}

/// Geteilte Volume-Einstellungen (Clone teilt den Zustand)
#[derive(Debug, Clone, Default)]
pub struct VolumePreferences {
    inner: Arc<RwLock<PrefsInner>>,
}

impl VolumePreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gespeicherter Override oder 1.0 Default
    pub fn volume(&self, user_id: &str) -> f32 {
        self.inner
            .read()
            .volumes
            .get(user_id)
            .copied()
            .unwrap_or(DEFAULT_GAIN)
    }

    /// Setzt einen Gain-Override. Werte > 1.0 sind Boost und werden
    /// unverändert gespeichert; an dieser Stelle wird nie geclampt.
    pub fn set_volume(&self, user_id: &str, value: f32) -> Result<(), PrefsError> {
        if value < 0.0 {
            return Err(PrefsError::NegativeVolume(value));
        }
        self.inner
            .write()
            .volumes
            .insert(user_id.to_string(), value);
        Ok(())
    }

    /// Entfernt den Override (idempotent)
    pub fn reset_volume(&self, user_id: &str) {
        self.inner.write().volumes.remove(user_id);
    }

    /// true wenn kein Override gespeichert ist
    pub fn is_default(&self, user_id: &str) -> bool {
        !self.inner.read().volumes.contains_key(user_id)
    }

    /// Setzt das globale Deafen-Flag
    pub fn set_deafened(&self, deafened: bool) {
        self.inner.write().deafened = deafened;
        tracing::debug!("Deafened: {}", deafened);
    }

    pub fn is_deafened(&self) -> bool {
        self.inner.read().deafened
    }

    /// Effektiver Gain für die Audio-Kette: 0 bei Deafen, sonst der
    /// gespeicherte Wert (unbeschränkt nach oben)
    pub fn effective_volume(&self, user_id: &str) -> f32 {
        let inner = self.inner.read();
        if inner.deafened {
            0.0
        } else {
            inner.volumes.get(user_id).copied().unwrap_or(DEFAULT_GAIN)
        }
    }

    /// Alle gespeicherten Overrides (für Persistenz)
    pub fn overrides(&self) -> Vec<(String, f32)> {
        self.inner
            .read()
            .volumes
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Lädt Overrides und Deafen-Flag aus dem Store
    pub fn load_from(&self, store: &PreferencesStore) -> Result<(), StoreError> {
        let (overrides, deafened) = store.load()?;
        let mut inner = self.inner.write();
        inner.volumes = overrides.into_iter().collect();
        inner.deafened = deafened;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
