//! roguetalk-core – Gemeinsame Typen und Ereignisse
//!
//! Dieses Crate stellt die Bausteine bereit, die von allen anderen
//! RogueTalk-Crates gemeinsam genutzt werden.

pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use event::MitgliedschaftsEreignis;
pub use types::{LevelId, ParticipantId, Position, RoomId, SchluesselMaterial, TrackHandle};
