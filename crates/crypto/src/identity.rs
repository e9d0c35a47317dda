//! Langzeit-Identitaetsschluessel (Ed25519)
//!
//! Jeder Teilnehmer (Mensch oder Bot) besitzt ein Ed25519-Schluessel-Paar.
//! Der oeffentliche Teil wird mit dem Beitritt verteilt und authentifiziert
//! die Handshake-Nachrichten gegenueber dem unvertrauenswuerdigen Relais.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use roguetalk_core::types::SchluesselMaterial;

/// Langzeit-Identitaet eines Teilnehmers (Ed25519)
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generiert ein neues Ed25519-Schluessel-Paar
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Erstellt eine Identity aus einem privaten Schluessel (32 Bytes)
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Gibt den oeffentlichen Schluessel als Bytes zurueck
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Oeffentliches Schluesselmaterial fuer das Beitritts-Ereignis
    pub fn schluessel_material(&self) -> SchluesselMaterial {
        SchluesselMaterial {
            signatur: self.public_key_bytes(),
        }
    }

    /// Signiert Daten mit dem privaten Schluessel
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing_key.sign(data).to_bytes().to_vec()
    }

    /// Verifiziert eine Signatur mit einem oeffentlichen Schluessel
    pub fn verify(data: &[u8], signature_bytes: &[u8], public_key_bytes: &[u8; 32]) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(public_key_bytes) else {
            return false;
        };
        let Ok(sig_array) = signature_bytes.try_into() else {
            return false;
        };
        let signature = Signature::from_bytes(sig_array);
        verifying_key.verify(data, &signature).is_ok()
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identity {{ public_key: [Ed25519 VerifyingKey] }}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
