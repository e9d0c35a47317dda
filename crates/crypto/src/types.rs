//! Gemeinsame Typen fuer das Kryptografie-Subsystem

use rand::rngs::OsRng;
use rand::RngCore;
use roguetalk_core::types::{ParticipantId, RoomId};
use serde::{Deserialize, Serialize};

/// Eine deterministisch abgeleitete AEAD-Nonce
///
/// ```text
/// [epoch(4)] [sequence(4)] [sender(4)]
/// ```
///
/// Die letzten 4 Bytes sind die ersten 4 Bytes der Sender-UUID. Da jeder
/// Sender pro Epoch einen eigenen Schluessel hat und Sequenzen streng
/// steigen, wiederholt sich ein (Schluessel, Nonce)-Paar nie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce {
    pub bytes: [u8; 12],
}

impl Nonce {
    /// Leitet die Nonce aus (Epoch, Sender, Sequenz) ab
    pub fn ableiten(epoche: u32, sender: &ParticipantId, sequenz: u32) -> Self {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&epoche.to_be_bytes());
        bytes[4..8].copy_from_slice(&sequenz.to_be_bytes());
        bytes[8..12].copy_from_slice(&sender.as_bytes()[0..4]);
        Self { bytes }
    }

    /// Zufaellige Nonce fuer Kontroll-Nachrichten
    pub fn zufaellig() -> Self {
        let mut bytes = [0u8; 12];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.bytes
    }

    /// Liest die Epoch aus der Nonce
    pub fn epoche(&self) -> u32 {
        u32::from_be_bytes([self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]])
    }

    /// Liest die Sequenz-Nummer aus der Nonce
    pub fn sequenz(&self) -> u32 {
        u32::from_be_bytes([self.bytes[4], self.bytes[5], self.bytes[6], self.bytes[7]])
    }
}

/// Associated Data eines Voice-Frames
///
/// ```text
/// [sender(16)] [epoch(4)] [raum(16)]
/// ```
pub fn frame_aad(sender: &ParticipantId, epoche: u32, raum: &RoomId) -> [u8; 36] {
    let mut aad = [0u8; 36];
    aad[0..16].copy_from_slice(sender.as_bytes());
    aad[16..20].copy_from_slice(&epoche.to_be_bytes());
    aad[20..36].copy_from_slice(raum.as_bytes());
    aad
}

/// Sicherer Schluessel-Container (wird beim Drop genullt)
#[derive(Clone)]
pub struct SecretBytes(Vec<u8>);

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED] {} bytes)", self.0.len())
    }
}

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Frischer Zufallsschluessel mit `laenge` Bytes
    pub fn zufaellig(laenge: usize) -> Self {
        let mut bytes = vec![0u8; laenge];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// AEAD-Algorithmus fuer Frames und Schluessel-Verpackung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AeadAlgorithmus {
    #[default]
    ChaCha20Poly1305,
    Aes256Gcm,
}

/// Ergebnis von `wrap_frame`: Ciphertext und abgetrennter Tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerschluesselterFrame {
    pub epoche: u32,
    pub sequenz: u32,
    pub ciphertext: Vec<u8>,
    pub tag: [u8; 16],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_enthaelt_epoch_und_sequenz() {
        let sender = ParticipantId::new();
        let nonce = Nonce::ableiten(5, &sender, 1234);
        assert_eq!(nonce.epoche(), 5);
        assert_eq!(nonce.sequenz(), 1234);
        assert_eq!(&nonce.bytes[8..12], &sender.as_bytes()[0..4]);
    }

    #[test]
    fn nonce_ist_deterministisch() {
        let sender = ParticipantId::new();
        assert_eq!(Nonce::ableiten(1, &sender, 9), Nonce::ableiten(1, &sender, 9));
        assert_ne!(Nonce::ableiten(1, &sender, 9), Nonce::ableiten(1, &sender, 10));
        assert_ne!(Nonce::ableiten(1, &sender, 9), Nonce::ableiten(2, &sender, 9));
    }

    #[test]
    fn aad_bindet_sender_epoch_und_raum() {
        let sender = ParticipantId::new();
        let raum = RoomId::new();
        let aad = frame_aad(&sender, 3, &raum);
        assert_eq!(&aad[0..16], sender.as_bytes());
        assert_eq!(&aad[16..20], &3u32.to_be_bytes());
        assert_eq!(&aad[20..36], raum.as_bytes());
    }

    #[test]
    fn secret_bytes_debug_ist_geschwaerzt() {
        let s = SecretBytes::zufaellig(32);
        let debug = format!("{:?}", s);
        assert!(debug.contains("REDACTED"));
        assert_eq!(s.len(), 32);
    }
}
