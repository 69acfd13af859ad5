//! Audio-Router - Reconciliation der Gain-Ketten
//!
//! Hält pro (Teilnehmer-Identity, Track-Source) genau eine Gain-Kette und
//! gleicht die Menge der Ketten bei jedem Durchlauf mit den aktuell
//! abonnierten Tracks ab. Der Gain wird bei jedem Durchlauf neu gesetzt:
//! dieser Pfad ist die einzige Quelle der Wahrheit und wird - anders als
//! die Volume-APIs des Transports - nie von außen zurückgesetzt.

use super::backend::{AudioBackend, AudioChainHandle};
use crate::prefs::VolumePreferences;
use crate::transport::{RemoteAudioTrack, TrackSource};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// ============================================================================
// CHAIN KEY
// ============================================================================

/// Schlüssel einer Gain-Kette
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainKey {
    pub identity: String,
    pub source: TrackSource,
}

impl ChainKey {
    pub fn new(identity: &str, source: TrackSource) -> Self {
        Self {
            identity: identity.to_string(),
            source,
        }
    }
}

// ============================================================================
// AUDIO ROUTER
// ============================================================================

struct RoutedChain {
    /// ID des nativen Tracks, an den die Kette gebunden ist. Weicht sie
    /// von der Live-ID ab, wurde renegotiiert und die Kette muss neu
    /// aufgebaut werden.
    track_id: String,
    handle: Box<dyn AudioChainHandle>,
}

/// Mixing-Engine: eine Gain-Kette pro abonniertem Remote-Audio-Track
pub struct AudioRouter {
    backend: Arc<dyn AudioBackend>,
    prefs: VolumePreferences,
    chains: HashMap<ChainKey, RoutedChain>,
}

impl AudioRouter {
    pub fn new(backend: Arc<dyn AudioBackend>, prefs: VolumePreferences) -> Self {
        Self {
            backend,
            prefs,
            chains: HashMap::new(),
        }
    }

    /// Ein Reconciliation-Durchlauf
    ///
    /// Idempotent; läuft nach jeder relevanten Änderung (Track-Menge,
    /// Volume, Deafen) und zusätzlich periodisch.
    pub fn reconcile(&mut self, local_identity: &str, tracks: &[RemoteAudioTrack]) {
        // 1. Aktive Key-Menge bestimmen: lokale und beendete Tracks
        //    überspringen
        let mut active: HashMap<ChainKey, &RemoteAudioTrack> = HashMap::new();
        for track in tracks {
            if track.participant_identity == local_identity {
                continue;
            }
            if track.track.is_ended() {
                continue;
            }
            let key = ChainKey::new(&track.participant_identity, track.source);
            active.insert(key, track);
        }

        // 2. Ketten abbauen, deren Key nicht mehr aktiv ist
        let stale: Vec<ChainKey> = self
            .chains
            .keys()
            .filter(|key| !active.contains_key(key))
            .cloned()
            .collect();
        for key in stale {
            self.remove_chain(&key);
        }

        // 3. Fehlende Ketten anlegen, renegotiierte neu aufbauen,
        //    Gain jedes Mal neu setzen
        for (key, track) in active {
            let live_track_id = track.track.track_id();

            let rebound = self
                .chains
                .get(&key)
                .map(|chain| chain.track_id != live_track_id)
                .unwrap_or(false);
            if rebound {
                // Die native Source lässt sich nur einmal binden; bei
                // Renegotiation immer Abbau + Neuaufbau
                tracing::debug!(
                    "Track for {:?} renegotiated ({} -> {}), rebuilding chain",
                    key,
                    self.chains[&key].track_id,
                    live_track_id
                );
                self.remove_chain(&key);
            }

            if !self.chains.contains_key(&key) {
                match self.backend.open_chain(Arc::clone(&track.track)) {
                    Ok(handle) => {
                        tracing::debug!("Opened audio chain for {:?}", key);
                        self.chains.insert(
                            key.clone(),
                            RoutedChain {
                                track_id: live_track_id,
                                handle,
                            },
                        );
                    }
                    Err(e) => {
                        // Nicht fatal: nächster Durchlauf versucht es erneut
                        tracing::warn!("Failed to open audio chain for {:?}: {}", key, e);
                        continue;
                    }
                }
            }

            let gain = self.prefs.effective_volume(&key.identity);
            if let Some(chain) = self.chains.get_mut(&key) {
                chain.handle.set_gain(gain);
            }
        }
    }

    /// Baut alle Ketten bedingungslos ab (Call-Ende)
    pub fn teardown_all(&mut self) {
        if self.chains.is_empty() {
            return;
        }
        tracing::info!("Tearing down {} audio chain(s)", self.chains.len());
        for (_, mut chain) in self.chains.drain() {
            chain.handle.close();
        }
    }

    /// Anzahl der aktiven Ketten
    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Aktueller Gain einer Kette (für Anzeige)
    pub fn chain_gain(&self, key: &ChainKey) -> Option<f32> {
        self.chains.get(key).map(|chain| chain.handle.gain())
    }

    /// Aktive Keys (für Anzeige)
    pub fn active_keys(&self) -> HashSet<ChainKey> {
        self.chains.keys().cloned().collect()
    }

    fn remove_chain(&mut self, key: &ChainKey) {
        if let Some(mut chain) = self.chains.remove(key) {
            chain.handle.close();
            tracing::debug!("Removed audio chain for {:?}", key);
        }
    }
}

impl Drop for AudioRouter {
    fn drop(&mut self) {
        self.teardown_all();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::AudioError;
    use crate::transport::{PcmTrackBuffer, RemoteTrackHandle};
    use parking_lot::Mutex;

    /// Beobachtbarer Zustand einer Mock-Kette
    struct ChainProbe {
        track_id: String,
        gain: Mutex<f32>,
        closes: Mutex<u32>,
    }

    struct MockChain {
        probe: Arc<ChainProbe>,
    }

    impl AudioChainHandle for MockChain {
        fn set_gain(&mut self, gain: f32) {
            *self.probe.gain.lock() = gain;
        }

        fn gain(&self) -> f32 {
            *self.probe.gain.lock()
        }

        fn close(&mut self) {
            *self.probe.closes.lock() += 1;
        }
    }

    #[derive(Default)]
    struct MockBackend {
        probes: Mutex<Vec<Arc<ChainProbe>>>,
        fail_next: Mutex<bool>,
    }

    impl MockBackend {
        fn probes(&self) -> Vec<Arc<ChainProbe>> {
            self.probes.lock().clone()
        }

        fn fail_next(&self) {
            *self.fail_next.lock() = true;
        }
    }

    impl AudioBackend for MockBackend {
        fn open_chain(
            &self,
            track: Arc<dyn RemoteTrackHandle>,
        ) -> Result<Box<dyn AudioChainHandle>, AudioError> {
            if std::mem::take(&mut *self.fail_next.lock()) {
                return Err(AudioError::NoOutputDevice);
            }
            let probe = Arc::new(ChainProbe {
                track_id: track.track_id(),
                gain: Mutex::new(1.0),
                closes: Mutex::new(0),
            });
            self.probes.lock().push(Arc::clone(&probe));
            Ok(Box::new(MockChain { probe }))
        }
    }

    fn track(identity: &str, source: TrackSource, track_id: &str) -> RemoteAudioTrack {
        RemoteAudioTrack {
            participant_identity: identity.to_string(),
            source,
            track: Arc::new(PcmTrackBuffer::with_id(track_id.to_string())),
        }
    }

    fn setup() -> (AudioRouter, Arc<MockBackend>, VolumePreferences) {
        let backend = Arc::new(MockBackend::default());
        let prefs = VolumePreferences::new();
        let router = AudioRouter::new(Arc::clone(&backend) as Arc<dyn AudioBackend>, prefs.clone());
        (router, backend, prefs)
    }

    #[test]
    fn test_creates_one_chain_per_key() {
        let (mut router, backend, _) = setup();

        let tracks = vec![
            track("alice", TrackSource::Microphone, "t1"),
            track("alice", TrackSource::ScreenShareAudio, "t2"),
            track("bob", TrackSource::Microphone, "t3"),
        ];
        router.reconcile("me", &tracks);
        assert_eq!(router.chain_count(), 3);

        // Wiederholter Durchlauf ändert nichts
        router.reconcile("me", &tracks);
        assert_eq!(router.chain_count(), 3);
        assert_eq!(backend.probes().len(), 3);
    }

    #[test]
    fn test_skips_local_and_ended_tracks() {
        let (mut router, _, _) = setup();

        let ended = PcmTrackBuffer::with_id("t2".to_string());
        ended.mark_ended();

        let tracks = vec![
            track("me", TrackSource::Microphone, "t1"),
            RemoteAudioTrack {
                participant_identity: "alice".to_string(),
                source: TrackSource::Microphone,
                track: Arc::new(ended),
            },
        ];
        router.reconcile("me", &tracks);
        assert_eq!(router.chain_count(), 0);
    }

    #[test]
    fn test_gain_follows_preferences_every_pass() {
        let (mut router, _, prefs) = setup();
        let tracks = vec![track("alice", TrackSource::Microphone, "t1")];
        let key = ChainKey::new("alice", TrackSource::Microphone);

        router.reconcile("me", &tracks);
        assert_eq!(router.chain_gain(&key), Some(1.0));

        // Boost über 1.0 wird nicht geclampt
        prefs.set_volume("alice", 2.5).unwrap();
        router.reconcile("me", &tracks);
        assert_eq!(router.chain_gain(&key), Some(2.5));
    }

    #[test]
    fn test_deafen_zeroes_and_restores() {
        let (mut router, _, prefs) = setup();
        let tracks = vec![
            track("alice", TrackSource::Microphone, "t1"),
            track("bob", TrackSource::Microphone, "t2"),
        ];
        prefs.set_volume("alice", 1.7).unwrap();

        router.reconcile("me", &tracks);

        prefs.set_deafened(true);
        router.reconcile("me", &tracks);
        assert_eq!(
            router.chain_gain(&ChainKey::new("alice", TrackSource::Microphone)),
            Some(0.0)
        );
        assert_eq!(
            router.chain_gain(&ChainKey::new("bob", TrackSource::Microphone)),
            Some(0.0)
        );

        // Un-Deafen stellt die gespeicherten Werte exakt wieder her
        prefs.set_deafened(false);
        router.reconcile("me", &tracks);
        assert_eq!(
            router.chain_gain(&ChainKey::new("alice", TrackSource::Microphone)),
            Some(1.7)
        );
        assert_eq!(
            router.chain_gain(&ChainKey::new("bob", TrackSource::Microphone)),
            Some(1.0)
        );
    }

    #[test]
    fn test_renegotiation_rebuilds_chain_exactly_once() {
        let (mut router, backend, _) = setup();

        router.reconcile("me", &[track("alice", TrackSource::Microphone, "old")]);
        assert_eq!(backend.probes().len(), 1);

        // Gleicher Key, neue native Track-ID
        router.reconcile("me", &[track("alice", TrackSource::Microphone, "new")]);

        let probes = backend.probes();
        assert_eq!(probes.len(), 2);
        assert_eq!(probes[0].track_id, "old");
        assert_eq!(*probes[0].closes.lock(), 1);
        assert_eq!(probes[1].track_id, "new");
        assert_eq!(*probes[1].closes.lock(), 0);
        assert_eq!(router.chain_count(), 1);
    }

    #[test]
    fn test_removes_chain_when_track_disappears() {
        let (mut router, backend, _) = setup();

        router.reconcile(
            "me",
            &[
                track("alice", TrackSource::Microphone, "t1"),
                track("bob", TrackSource::Microphone, "t2"),
            ],
        );
        assert_eq!(router.chain_count(), 2);

        router.reconcile("me", &[track("alice", TrackSource::Microphone, "t1")]);
        assert_eq!(router.chain_count(), 1);

        let bob_probe = backend
            .probes()
            .into_iter()
            .find(|p| p.track_id == "t2")
            .unwrap();
        assert_eq!(*bob_probe.closes.lock(), 1);
    }

    #[test]
    fn test_teardown_all_closes_each_chain_exactly_once() {
        let (mut router, backend, _) = setup();

        router.reconcile(
            "me",
            &[
                track("alice", TrackSource::Microphone, "t1"),
                track("bob", TrackSource::Microphone, "t2"),
            ],
        );

        router.teardown_all();
        assert_eq!(router.chain_count(), 0);
        for probe in backend.probes() {
            assert_eq!(*probe.closes.lock(), 1);
        }

        // Zweiter Aufruf ist ein No-op
        router.teardown_all();
        for probe in backend.probes() {
            assert_eq!(*probe.closes.lock(), 1);
        }
    }

    #[test]
    fn test_allocation_failure_is_retried_next_pass() {
        let (mut router, backend, _) = setup();
        let tracks = vec![track("alice", TrackSource::Microphone, "t1")];

        backend.fail_next();
        router.reconcile("me", &tracks);
        assert_eq!(router.chain_count(), 0);

        router.reconcile("me", &tracks);
        assert_eq!(router.chain_count(), 1);
    }
}
