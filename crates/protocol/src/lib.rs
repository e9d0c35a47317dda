//! roguetalk-protocol – Protokoll-Definitionen
//!
//! Wire-Format der Voice-Frames, Codec-Konfiguration und die
//! Nachrichten des Schluessel-Protokolls.

pub mod codec;
pub mod control;
pub mod frame;

pub use codec::{AudioPreset, OpusConfig, FRAME_DAUER_MS};
pub use control::SchluesselNachricht;
pub use frame::VoiceFrame;
