//! # roguetalk-crypto
//!
//! Schluesselplan und Frame-Verschluesselung fuer RogueTalk.
//!
//! ## Module
//! - `e2e` - Ende-zu-Ende Verschluesselung (Teilnehmer <-> Teilnehmer)
//! - `identity` - Ed25519 Langzeit-Identitaetsschluessel
//! - `types` - Gemeinsame Typen (Nonce, SecretBytes, AeadAlgorithmus)
//! - `error` - Fehlertypen

pub mod e2e;
pub mod error;
pub mod identity;
pub mod types;

// Bequeme Re-Exports
pub use error::{CryptoError, CryptoResult, DecryptError};
pub use identity::Identity;
pub use types::{AeadAlgorithmus, Nonce, SecretBytes, VerschluesselterFrame};

pub use e2e::{KeyManager, KeyManagerConfig, ReplayFenster, SchluesselEreignis, Verarbeitung};
