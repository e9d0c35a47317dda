//! Schluessel-Nachrichten fuer den Kontroll-Kanal
//!
//! Handshake und Schluesselverteilung laufen als JSON ueber den
//! authentifizierten Kontroll-Kanal des Transports (nicht zeitkritisch).
//!
//! ## Ablauf pro Teilnehmer-Paar
//! 1. `HandshakeInit`      – ephemerer X25519-Schluessel, Ed25519-signiert
//! 2. `HandshakeAntwort`   – ephemerer X25519-Schluessel der Gegenseite
//! 3. `SenderSchluessel`   – aktueller Epoch-Schluessel, mit dem Paar-Schluessel verpackt
//! 4. `SchluesselBestaetigt` – Empfaenger hat den Epoch-Schluessel installiert

use roguetalk_core::types::{ParticipantId, RoomId};
use serde::{Deserialize, Serialize};

/// Alle Nachrichten des Schluessel-Protokolls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "typ", rename_all = "snake_case")]
pub enum SchluesselNachricht {
    HandshakeInit {
        raum: RoomId,
        von: ParticipantId,
        an: ParticipantId,
        ephemeral: [u8; 32],
        signatur: Vec<u8>,
    },
    HandshakeAntwort {
        raum: RoomId,
        von: ParticipantId,
        an: ParticipantId,
        ephemeral: [u8; 32],
        signatur: Vec<u8>,
    },
    SenderSchluessel {
        raum: RoomId,
        von: ParticipantId,
        an: ParticipantId,
        epoche: u32,
        /// [nonce(12)] + [ciphertext + tag]
        verpackt: Vec<u8>,
    },
    SchluesselBestaetigt {
        raum: RoomId,
        von: ParticipantId,
        an: ParticipantId,
        epoche: u32,
    },
}

impl SchluesselNachricht {
    /// Absender der Nachricht
    pub fn von(&self) -> ParticipantId {
        match self {
            Self::HandshakeInit { von, .. }
            | Self::HandshakeAntwort { von, .. }
            | Self::SenderSchluessel { von, .. }
            | Self::SchluesselBestaetigt { von, .. } => *von,
        }
    }

    /// Empfaenger der Nachricht
    pub fn an(&self) -> ParticipantId {
        match self {
            Self::HandshakeInit { an, .. }
            | Self::HandshakeAntwort { an, .. }
            | Self::SenderSchluessel { an, .. }
            | Self::SchluesselBestaetigt { an, .. } => *an,
        }
    }

    /// Raum, fuer den die Nachricht gilt
    pub fn raum(&self) -> RoomId {
        match self {
            Self::HandshakeInit { raum, .. }
            | Self::HandshakeAntwort { raum, .. }
            | Self::SenderSchluessel { raum, .. }
            | Self::SchluesselBestaetigt { raum, .. } => *raum,
        }
    }

    /// Serialisiert als JSON
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Deserialisiert aus JSON
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
