//! Fehlertypen fuer die Audio-Seite

use thiserror::Error;

/// Alle moeglichen Fehler der Audio-Seite
#[derive(Debug, Error)]
pub enum AudioError {
    /// Capture- oder Playback-Geraet ausgefallen (fatal fuer die Pipeline)
    #[error("Geraete-Fehler: {0}")]
    Geraet(String),

    #[error("Audio-Geraet nicht gefunden: {0}")]
    GeraetNichtGefunden(String),

    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Ungueltiger Frame: {0}")]
    UngueltigerFrame(String),

    #[error("Unbekannter Bot: {0}")]
    UnbekannterBot(String),

    #[error("Bot-Quelle geschlossen")]
    QuelleGeschlossen,

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unerwarteter Fehler: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl AudioError {
    /// Geraete-Fehler beenden die Pipeline-Instanz
    pub fn ist_geraetefehler(&self) -> bool {
        matches!(
            self,
            AudioError::Geraet(_) | AudioError::GeraetNichtGefunden(_) | AudioError::Io(_)
        )
    }
}

pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geraetefehler_erkennen() {
        assert!(AudioError::Geraet("weg".into()).ist_geraetefehler());
        assert!(!AudioError::CodecFehler("x".into()).ist_geraetefehler());
    }
}
