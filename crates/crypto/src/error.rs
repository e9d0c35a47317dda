//! Fehlertypen fuer das Kryptografie-Subsystem

use roguetalk_core::types::ParticipantId;
use thiserror::Error;

/// Fehler im Kryptografie-Subsystem
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key-Exchange fehlgeschlagen: {0}")]
    KeyExchange(String),

    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),

    #[error("Entschluesselung fehlgeschlagen: {0}")]
    Entschluesselung(String),

    #[error("Signatur-Verifikation fehlgeschlagen: {0}")]
    SignaturVerifikation(String),

    #[error("Ungueltige Schluessel-Laenge: erwartet {erwartet}, erhalten {erhalten}")]
    UngueltigeSchluesselLaenge { erwartet: usize, erhalten: usize },

    #[error("Ungueltige Daten: {0}")]
    UngueltigeDaten(String),

    #[error("Key Derivation fehlgeschlagen: {0}")]
    KeyDerivation(String),

    #[error("Sequenz {sequenz} nicht groesser als {letzte} (Epoch {epoche})")]
    SequenzNichtMonoton { epoche: u32, letzte: u32, sequenz: u32 },

    #[error("Sender {0} ist nicht der lokale Teilnehmer")]
    FremderSender(ParticipantId),

    #[error("Keine Paar-Sitzung mit {0}")]
    KeinePaarSitzung(ParticipantId),

    #[error("Nachricht gehoert zu einem anderen Raum oder Empfaenger")]
    FalscherKontext,

    #[error("Schluesselmaterial wurde verworfen")]
    Verworfen,
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Ein einzelner Frame konnte nicht entschluesselt werden
///
/// Auf einem verlustbehafteten Kanal erwartbar: der Frame wird verworfen
/// und gezaehlt, der Empfangspfad laeuft weiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptError {
    #[error("Kein Schluessel fuer {sender} in Epoch {epoche}")]
    UnbekannteEpoche { sender: ParticipantId, epoche: u32 },

    #[error("Schluessel fuer {sender} in Epoch {epoche} ist abgelaufen")]
    EpocheAbgelaufen { sender: ParticipantId, epoche: u32 },

    #[error("Sequenz {sequenz} wiederholt oder ausserhalb des Fensters")]
    Wiederholung { sequenz: u32 },

    #[error("Frame fehlerhaft: {0}")]
    UngueltigerFrame(String),

    #[error("Auth-Tag ungueltig")]
    TagUngueltig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypt_error_anzeige() {
        let e = DecryptError::Wiederholung { sequenz: 7 };
        assert_eq!(e.to_string(), "Sequenz 7 wiederholt oder ausserhalb des Fensters");
    }

    #[test]
    fn sequenz_fehler_anzeige() {
        let e = CryptoError::SequenzNichtMonoton {
            epoche: 2,
            letzte: 10,
            sequenz: 10,
        };
        assert!(e.to_string().contains("Epoch 2"));
    }
}
