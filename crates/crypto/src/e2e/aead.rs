//! AEAD-Primitiven fuer Frames und Schluessel-Verpackung
//!
//! ## Frame-Format nach `wrap_frame`
//! ```text
//! [ciphertext] [auth_tag(16)]
//! ```
//! Nonce und AAD werden nicht uebertragen, beide Seiten leiten sie aus
//! (Epoch, Sender, Sequenz, Raum) ab.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce as AesNonce,
};
use chacha20poly1305::{ChaCha20Poly1305, Key as ChaChaKey, Nonce as ChaChaNonce};
use roguetalk_core::types::{ParticipantId, RoomId};

use crate::e2e::handshake::hkdf_derive;
use crate::error::{CryptoError, CryptoResult, DecryptError};
use crate::types::{frame_aad, AeadAlgorithmus, Nonce, SecretBytes, VerschluesselterFrame};

/// Laenge des Auth-Tags beider Algorithmen
pub const TAG_LAENGE: usize = 16;

/// Verschluesselt `klartext` und gibt Ciphertext mit angehaengtem Tag zurueck
pub fn versiegeln(
    algorithmus: AeadAlgorithmus,
    key_bytes: &[u8],
    nonce: &Nonce,
    aad: &[u8],
    klartext: &[u8],
) -> CryptoResult<Vec<u8>> {
    schluessel_laenge_pruefen(key_bytes)?;
    let payload = Payload { msg: klartext, aad };

    let ergebnis = match algorithmus {
        AeadAlgorithmus::Aes256Gcm => {
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key_bytes));
            cipher.encrypt(AesNonce::from_slice(nonce.as_bytes()), payload)
        }
        AeadAlgorithmus::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new(ChaChaKey::from_slice(key_bytes));
            cipher.encrypt(ChaChaNonce::from_slice(nonce.as_bytes()), payload)
        }
    };
    ergebnis.map_err(|e| CryptoError::Verschluesselung(e.to_string()))
}

/// Entschluesselt Ciphertext mit angehaengtem Tag
pub fn oeffnen(
    algorithmus: AeadAlgorithmus,
    key_bytes: &[u8],
    nonce: &Nonce,
    aad: &[u8],
    ciphertext: &[u8],
) -> CryptoResult<Vec<u8>> {
    schluessel_laenge_pruefen(key_bytes)?;
    let payload = Payload { msg: ciphertext, aad };

    let ergebnis = match algorithmus {
        AeadAlgorithmus::Aes256Gcm => {
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key_bytes));
            cipher.decrypt(AesNonce::from_slice(nonce.as_bytes()), payload)
        }
        AeadAlgorithmus::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new(ChaChaKey::from_slice(key_bytes));
            cipher.decrypt(ChaChaNonce::from_slice(nonce.as_bytes()), payload)
        }
    };
    ergebnis.map_err(|e| CryptoError::Entschluesselung(e.to_string()))
}

fn schluessel_laenge_pruefen(key_bytes: &[u8]) -> CryptoResult<()> {
    if key_bytes.len() != 32 {
        return Err(CryptoError::UngueltigeSchluesselLaenge {
            erwartet: 32,
            erhalten: key_bytes.len(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Frame-Ebene
// ---------------------------------------------------------------------------

/// Leitet den Frame-Schluessel eines Senders fuer eine Epoch ab
///
/// HKDF-SHA256 mit Salt = Raum-ID und Info = Label + Sender + Epoch.
pub fn frame_schluessel_ableiten(
    epoch_key: &SecretBytes,
    raum: &RoomId,
    sender: &ParticipantId,
    epoche: u32,
) -> CryptoResult<SecretBytes> {
    let mut info = Vec::with_capacity(18 + 16 + 4);
    info.extend_from_slice(b"roguetalk-frame-v1");
    info.extend_from_slice(sender.as_bytes());
    info.extend_from_slice(&epoche.to_be_bytes());

    let okm = hkdf_derive(epoch_key.as_bytes(), raum.as_bytes(), &info, 32)?;
    Ok(SecretBytes::new(okm))
}

/// Verschluesselt einen Opus-Frame
pub fn frame_verschluesseln(
    algorithmus: AeadAlgorithmus,
    frame_key: &SecretBytes,
    raum: &RoomId,
    sender: &ParticipantId,
    epoche: u32,
    sequenz: u32,
    klartext: &[u8],
) -> CryptoResult<VerschluesselterFrame> {
    let nonce = Nonce::ableiten(epoche, sender, sequenz);
    let aad = frame_aad(sender, epoche, raum);

    let mut ciphertext = versiegeln(algorithmus, frame_key.as_bytes(), &nonce, &aad, klartext)?;
    let tag_start = ciphertext.len() - TAG_LAENGE;

    let mut tag = [0u8; TAG_LAENGE];
    tag.copy_from_slice(&ciphertext[tag_start..]);
    ciphertext.truncate(tag_start);

    Ok(VerschluesselterFrame {
        epoche,
        sequenz,
        ciphertext,
        tag,
    })
}

/// Entschluesselt einen Opus-Frame
///
/// Jeder Fehler (Tag, Schluessel, AAD) wird zu `DecryptError::TagUngueltig`.
#[allow(clippy::too_many_arguments)]
pub fn frame_entschluesseln(
    algorithmus: AeadAlgorithmus,
    frame_key: &SecretBytes,
    raum: &RoomId,
    sender: &ParticipantId,
    epoche: u32,
    sequenz: u32,
    ciphertext: &[u8],
    tag: &[u8; TAG_LAENGE],
) -> Result<Vec<u8>, DecryptError> {
    let nonce = Nonce::ableiten(epoche, sender, sequenz);
    let aad = frame_aad(sender, epoche, raum);

    let mut mit_tag = Vec::with_capacity(ciphertext.len() + TAG_LAENGE);
    mit_tag.extend_from_slice(ciphertext);
    mit_tag.extend_from_slice(tag);

    oeffnen(algorithmus, frame_key.as_bytes(), &nonce, &aad, &mit_tag)
        .map_err(|_| DecryptError::TagUngueltig)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
