//! Transport-Kollaborateur
//!
//! Der Transport (SFU/Relais) ist nicht vertrauenswuerdig: er sieht nur
//! verschluesselte Frames und leitet sie an Abonnenten weiter. Ueber den
//! Kontroll-Kanal laufen die Schluessel-Nachrichten.

use async_trait::async_trait;
use bytes::Bytes;
use roguetalk_core::event::MitgliedschaftsEreignis;
use roguetalk_core::types::{ParticipantId, RoomId, SchluesselMaterial};
use thiserror::Error;
use tokio::sync::mpsc;

/// Fehler des Transports
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFehler {
    /// Verbindung verloren (TransportDisconnect)
    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    #[error("Noch keinem Raum beigetreten")]
    NichtBeigetreten,

    #[error("Unbekannter Teilnehmer: {0}")]
    UnbekannterTeilnehmer(ParticipantId),

    #[error("Warteschlange voll")]
    Ueberlastet,
}

/// Ereignisse, die der Transport nach dem Beitritt liefert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEreignis {
    Mitgliedschaft(MitgliedschaftsEreignis),
    /// Nachricht auf dem authentifizierten Kontroll-Kanal
    Kontrolle { von: ParticipantId, daten: Vec<u8> },
    /// Verbindung zum Raum verloren
    Getrennt { grund: String },
}

/// Senke fuer die eigenen Frames
///
/// `senden` blockiert nie; ist die Leitung voll, wird verworfen.
pub trait FrameSenke: Send {
    fn senden(&self, frame: Bytes) -> Result<(), TransportFehler>;
}

/// Transport-Kollaborateur einer Raum-Sitzung
#[async_trait]
pub trait Transport: Send + Sync {
    /// Tritt dem Raum bei und liefert den Ereignisstrom
    async fn join(
        &self,
        raum: RoomId,
        schluessel: SchluesselMaterial,
    ) -> Result<mpsc::Receiver<TransportEreignis>, TransportFehler>;

    /// Veroeffentlicht den eigenen Track
    async fn publish(
        &self,
        teilnehmer: ParticipantId,
    ) -> Result<Box<dyn FrameSenke>, TransportFehler>;

    /// Abonniert den Track eines anderen Teilnehmers
    async fn subscribe(
        &self,
        teilnehmer: ParticipantId,
    ) -> Result<mpsc::Receiver<Bytes>, TransportFehler>;

    async fn unsubscribe(&self, teilnehmer: ParticipantId) -> Result<(), TransportFehler>;

    /// Sendet eine Kontroll-Nachricht an genau einen Teilnehmer
    async fn control_senden(
        &self,
        an: ParticipantId,
        daten: Vec<u8>,
    ) -> Result<(), TransportFehler>;

    async fn leave(&self) -> Result<(), TransportFehler>;
}
