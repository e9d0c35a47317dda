//! Paar-Handshake (signiertes ephemeres X25519)
//!
//! Zwei Teilnehmer, die sich zum ersten Mal gegenseitig hoeren, tauschen
//! ephemere X25519-Schluessel aus. Jede Haelfte ist mit der Ed25519-Identitaet
//! des Absenders signiert, das Relais kann also nichts unterschieben.
//!
//! Aus dem DH-Ergebnis entsteht per HKDF der Paar-Schluessel. Er verpackt
//! den Epoch-Schluessel des jeweiligen Senders fuer die Gegenseite.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use roguetalk_core::types::{ParticipantId, RoomId};
use sha2::Sha256;
use std::time::Instant;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};

use crate::e2e::aead::{oeffnen, versiegeln};
use crate::error::{CryptoError, CryptoResult};
use crate::types::{AeadAlgorithmus, Nonce, SecretBytes};

/// Label fuer die Signatur einer Handshake-Initiierung
pub const LABEL_INIT: &[u8] = b"roguetalk-hs-init-v1";
/// Label fuer die Signatur einer Handshake-Antwort
pub const LABEL_ANTWORT: &[u8] = b"roguetalk-hs-antwort-v1";

/// HKDF-SHA256 Schluesselableitung
pub fn hkdf_derive(ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> CryptoResult<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

/// Bytes, die eine Handshake-Haelfte signiert
///
/// ```text
/// [label] [raum(16)] [von(16)] [an(16)] [ephemeral(32)]
/// ```
pub fn transkript(
    label: &[u8],
    raum: &RoomId,
    von: &ParticipantId,
    an: &ParticipantId,
    ephemeral: &[u8; 32],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(label.len() + 16 * 3 + 32);
    out.extend_from_slice(label);
    out.extend_from_slice(raum.as_bytes());
    out.extend_from_slice(von.as_bytes());
    out.extend_from_slice(an.as_bytes());
    out.extend_from_slice(ephemeral);
    out
}

/// Eine lokale Handshake-Haelfte, die auf die Gegenseite wartet
pub struct EphemeresPaar {
    geheimnis: Option<EphemeralSecret>,
    /// Oeffentlicher ephemerer Schluessel
    pub oeffentlich: [u8; 32],
    /// Startzeitpunkt (fuer Zeitueberschreitung)
    pub gestartet: Instant,
}

impl EphemeresPaar {
    /// Erstellt frische ephemere Schluessel
    pub fn neu(jetzt: Instant) -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public_key = X25519PublicKey::from(&secret);
        Self {
            geheimnis: Some(secret),
            oeffentlich: public_key.to_bytes(),
            gestartet: jetzt,
        }
    }

    /// Fuehrt den DH-Austausch durch und leitet den Paar-Schluessel ab
    ///
    /// Das ephemere Geheimnis wird dabei verbraucht.
    pub fn abschliessen(
        &mut self,
        gegenseite: &[u8; 32],
        raum: &RoomId,
        a: &ParticipantId,
        b: &ParticipantId,
    ) -> CryptoResult<SecretBytes> {
        let secret = self
            .geheimnis
            .take()
            .ok_or_else(|| CryptoError::KeyExchange("Secret bereits verwendet".to_string()))?;

        let peer_pk = X25519PublicKey::from(*gegenseite);
        let dh_output = secret.diffie_hellman(&peer_pk);
        if !dh_output.was_contributory() {
            return Err(CryptoError::KeyExchange(
                "Nicht-beitragender DH-Schluessel".to_string(),
            ));
        }

        paar_schluessel_ableiten(dh_output.as_bytes(), raum, a, b)
    }
}

impl std::fmt::Debug for EphemeresPaar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeresPaar")
            .field("verbraucht", &self.geheimnis.is_none())
            .finish()
    }
}

/// Paar-Schluessel aus dem DH-Ergebnis
///
/// Salt = Raum-ID + beide IDs in sortierter Reihenfolge, damit beide
/// Seiten denselben Schluessel erhalten.
pub fn paar_schluessel_ableiten(
    dh: &[u8],
    raum: &RoomId,
    a: &ParticipantId,
    b: &ParticipantId,
) -> CryptoResult<SecretBytes> {
    let (erster, zweiter) = if a <= b { (a, b) } else { (b, a) };
    let mut salt = Vec::with_capacity(48);
    salt.extend_from_slice(raum.as_bytes());
    salt.extend_from_slice(erster.as_bytes());
    salt.extend_from_slice(zweiter.as_bytes());

    let okm = hkdf_derive(dh, &salt, b"roguetalk-pair-v1", 32)?;
    Ok(SecretBytes::new(okm))
}

fn verpackungs_aad(raum: &RoomId, von: &ParticipantId, an: &ParticipantId, epoche: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(52);
    aad.extend_from_slice(raum.as_bytes());
    aad.extend_from_slice(von.as_bytes());
    aad.extend_from_slice(an.as_bytes());
    aad.extend_from_slice(&epoche.to_be_bytes());
    aad
}

/// Verpackt einen Epoch-Schluessel mit dem Paar-Schluessel
///
/// Output: `[nonce(12)] [ciphertext + tag]`
pub fn epoch_schluessel_verpacken(
    algorithmus: AeadAlgorithmus,
    paar_key: &SecretBytes,
    raum: &RoomId,
    von: &ParticipantId,
    an: &ParticipantId,
    epoche: u32,
    epoch_key: &SecretBytes,
) -> CryptoResult<Vec<u8>> {
    let nonce = Nonce::zufaellig();
    let aad = verpackungs_aad(raum, von, an, epoche);
    let ciphertext = versiegeln(
        algorithmus,
        paar_key.as_bytes(),
        &nonce,
        &aad,
        epoch_key.as_bytes(),
    )?;

    let mut out = Vec::with_capacity(12 + ciphertext.len());
    out.extend_from_slice(nonce.as_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Entpackt einen mit dem Paar-Schluessel verpackten Epoch-Schluessel
pub fn epoch_schluessel_entpacken(
    algorithmus: AeadAlgorithmus,
    paar_key: &SecretBytes,
    raum: &RoomId,
    von: &ParticipantId,
    an: &ParticipantId,
    epoche: u32,
    verpackt: &[u8],
) -> CryptoResult<SecretBytes> {
    if verpackt.len() < 12 + 16 {
        return Err(CryptoError::UngueltigeDaten(
            "Zu kurzer verpackter Schluessel".to_string(),
        ));
    }
    let mut nonce_bytes = [0u8; 12];
    nonce_bytes.copy_from_slice(&verpackt[0..12]);
    let nonce = Nonce { bytes: nonce_bytes };
    let aad = verpackungs_aad(raum, von, an, epoche);

    let klartext = oeffnen(algorithmus, paar_key.as_bytes(), &nonce, &aad, &verpackt[12..])?;
    if klartext.len() != 32 {
        return Err(CryptoError::UngueltigeSchluesselLaenge {
            erwartet: 32,
            erhalten: klartext.len(),
        });
    }
    Ok(SecretBytes::new(klartext))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
