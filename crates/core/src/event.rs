//! Mitgliedschafts-Ereignisse
//!
//! Der Transport meldet Beitritte, Track-Registrierungen und Austritte
//! eines Raums als Strom dieser Ereignisse. Die Raum-Sitzung uebersetzt
//! sie in Zustandsuebergaenge der Teilnehmer.

use crate::types::{ParticipantId, SchluesselMaterial, TrackHandle};
use serde::{Deserialize, Serialize};

/// Ereignisse ueber die Zusammensetzung eines Raums
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MitgliedschaftsEreignis {
    /// Ein Teilnehmer ist dem Raum beigetreten
    Beigetreten {
        teilnehmer: ParticipantId,
        schluessel: SchluesselMaterial,
    },
    /// Ein Teilnehmer hat seinen Audio-Track registriert
    TrackRegistriert {
        teilnehmer: ParticipantId,
        track: TrackHandle,
    },
    /// Ein Teilnehmer hat den Raum verlassen
    Verlassen { teilnehmer: ParticipantId },
    /// Der Transport hat einen Teilnehmer wegen Zeitueberschreitung entfernt
    Zeitueberschreitung { teilnehmer: ParticipantId },
}

impl MitgliedschaftsEreignis {
    /// Der betroffene Teilnehmer
    pub fn teilnehmer(&self) -> ParticipantId {
        match self {
            Self::Beigetreten { teilnehmer, .. }
            | Self::TrackRegistriert { teilnehmer, .. }
            | Self::Verlassen { teilnehmer }
            | Self::Zeitueberschreitung { teilnehmer } => *teilnehmer,
        }
    }

    /// true fuer Ereignisse, die die Mitgliedermenge aendern
    pub fn aendert_mitgliedschaft(&self) -> bool {
        !matches!(self, Self::TrackRegistriert { .. })
    }
}
