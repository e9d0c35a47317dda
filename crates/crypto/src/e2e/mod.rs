//! E2E Verschluesselung (End-to-End)
//!
//! Teilnehmer <-> Teilnehmer Verschluesselung. Das Relais leitet Frames
//! blind weiter und kann den Audio-Inhalt nicht entschluesseln.
//!
//! ## Ablauf
//! 1. Jeder Teilnehmer hat eine `Identity` (Ed25519 Langzeit-Key)
//! 2. Erstes gegenseitiges Hoeren: signierter X25519 Handshake (Paar-Schluessel)
//! 3. Der Paar-Schluessel verpackt den Epoch-Schluessel des Senders
//! 4. Audio-Frames werden mit dem abgeleiteten Frame-Schluessel verschluesselt
//! 5. Bei Join/Leave: Key Rotation (neue Epoch)

pub mod aead;
pub mod handshake;
pub mod key_manager;
pub mod replay;

pub use aead::{frame_entschluesseln, frame_schluessel_ableiten, frame_verschluesseln};
pub use handshake::{hkdf_derive, EphemeresPaar};
pub use key_manager::{KeyManager, KeyManagerConfig, SchluesselEreignis, Verarbeitung};
pub use replay::ReplayFenster;
