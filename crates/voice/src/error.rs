//! Fehlertypen fuer die Voice-Schicht

use roguetalk_audio::AudioError;
use roguetalk_core::types::ParticipantId;
use roguetalk_crypto::CryptoError;
use thiserror::Error;

use crate::transport::TransportFehler;

/// Fehler der Raum-Sitzung und der Audio-Pipeline
#[derive(Debug, Error)]
pub enum VoiceError {
    /// Kein Handshake-Abschluss innerhalb der Frist (nicht fatal)
    #[error("Handshake mit {0} nicht rechtzeitig abgeschlossen")]
    HandshakeTimeout(ParticipantId),

    #[error("Transport: {0}")]
    Transport(#[from] TransportFehler),

    #[error("Kryptografie: {0}")]
    Krypto(#[from] CryptoError),

    #[error("Audio: {0}")]
    Audio(#[from] AudioError),

    #[error("Konfiguration: {0}")]
    Konfiguration(String),

    #[error("Unbekannter Teilnehmer: {0}")]
    UnbekannterTeilnehmer(ParticipantId),

    #[error("Raum-Sitzung beendet")]
    Beendet,

    /// Alle Sequenznummern der eigenen Frames verbraucht
    #[error("Sequenzraum der eigenen Frames erschoepft")]
    SequenzErschoepft,
}

impl VoiceError {
    /// true wenn die betroffene Instanz neu gestartet werden muss
    ///
    /// Geraeteausfall und Transport-Trennung sind fatal, ein einzelner
    /// Handshake-Timeout nicht.
    pub fn ist_fatal(&self) -> bool {
        match self {
            VoiceError::Audio(e) => e.ist_geraetefehler(),
            VoiceError::Transport(TransportFehler::Getrennt(_)) => true,
            VoiceError::Beendet | VoiceError::SequenzErschoepft => true,
            _ => false,
        }
    }
}

pub type VoiceResult<T> = Result<T, VoiceError>;
