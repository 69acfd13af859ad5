//! Connection-Quality Klassifikation
//!
//! Bildet eine rohe Round-Trip-Time-Messung auf eine diskrete
//! Qualitätsstufe ab. Reine Funktion ohne Zustand; die Schwellwerte sind
//! Konfiguration und an genau einer Stelle dokumentiert.

// ============================================================================
// THRESHOLDS
// ============================================================================

/// Schwellwerte für die Klassifikation (alle in Millisekunden)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityThresholds {
    /// Latenz bis einschließlich dieses Werts gilt als Excellent
    pub excellent_max_ms: f64,
    /// Latenz bis einschließlich dieses Werts gilt als Good
    pub good_max_ms: f64,
    /// Ab dieser Latenz wird Poor in der Darstellung hervorgehoben
    pub severe_ms: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            excellent_max_ms: 80.0,
            good_max_ms: 200.0,
            severe_ms: 250.0,
        }
    }
}

// ============================================================================
// QUALITY TIER
// ============================================================================

/// Diskrete Qualitätsstufe einer Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTier {
    Excellent,
    Good,
    Poor,
    /// Keine Messung vorhanden
    Unknown,
}

impl QualityTier {
    /// Anzahl gefüllter Balken für die Anzeige
    pub fn bars(self) -> u8 {
        match self {
            QualityTier::Excellent => 4,
            QualityTier::Good => 3,
            QualityTier::Poor => 2,
            QualityTier::Unknown => 0,
        }
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Klassifiziert eine Latenz-Messung
///
/// `None` (keine Messung) ergibt `Unknown`, sonst entscheiden die
/// aufsteigenden Schwellwerte.
pub fn classify(latency_ms: Option<f64>, thresholds: QualityThresholds) -> QualityTier {
    match latency_ms {
        None => QualityTier::Unknown,
        Some(ms) if ms <= thresholds.excellent_max_ms => QualityTier::Excellent,
        Some(ms) if ms <= thresholds.good_max_ms => QualityTier::Good,
        Some(_) => QualityTier::Poor,
    }
}

/// Darstellungsregel, keine eigene Stufe: Poor wird ab `severe_ms`
/// in der UI nochmal strenger hervorgehoben
pub fn is_severe(latency_ms: Option<f64>, thresholds: QualityThresholds) -> bool {
    match latency_ms {
        Some(ms) => {
            classify(latency_ms, thresholds) == QualityTier::Poor && ms >= thresholds.severe_ms
        }
        None => false,
    }
}

// ============================================================================
// TESTS
// ============================================================================
