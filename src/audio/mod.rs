//! Audio Module - Routing und Gain-Ketten
//!
//! Dieses Modul verwaltet:
//! - Den AudioRouter (eine Gain-Kette pro Remote-Track)
//! - Das Audio-Backend (cpal Output-Streams als native Contexts)

mod backend;
mod router;

pub use backend::{AudioBackend, AudioChainHandle, AudioError, CpalBackend, SOURCE_SAMPLE_RATE};
pub use router::{AudioRouter, ChainKey};
