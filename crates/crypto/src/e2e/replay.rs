//! Gleitendes Replay-Fenster pro (Sender, Epoch)
//!
//! Ein 64-Bit-Bitmap relativ zur hoechsten gesehenen Sequenz. Spaete Frames
//! innerhalb des Fensters sind erlaubt (der Jitter Buffer sortiert sie),
//! Duplikate und Frames vor dem Fenster werden abgelehnt.
//!
//! `pruefen` und `markieren` sind getrennt: markiert wird erst nach
//! erfolgreicher Authentifizierung, damit gefaelschte Frames das Fenster
//! nicht verschieben koennen.

/// Maximale Fenstergroesse in Frames
pub const MAX_FENSTER: u32 = 64;

/// Replay-Fenster fuer einen Empfangs-Schluessel
#[derive(Debug, Clone)]
pub struct ReplayFenster {
    groesse: u32,
    hoechste: Option<u32>,
    /// Bit i gesetzt = Sequenz (hoechste - i) bereits gesehen
    bitmap: u64,
}

impl ReplayFenster {
    /// Erstellt ein Fenster; `groesse` wird auf 1..=64 begrenzt
    pub fn neu(groesse: u32) -> Self {
        Self {
            groesse: groesse.clamp(1, MAX_FENSTER),
            hoechste: None,
            bitmap: 0,
        }
    }

    /// Prueft ob `sequenz` akzeptiert wuerde, ohne sie zu vermerken
    pub fn pruefen(&self, sequenz: u32) -> bool {
        let Some(hoechste) = self.hoechste else {
            return true;
        };
        if sequenz > hoechste {
            return true;
        }
        let abstand = hoechste - sequenz;
        if abstand >= self.groesse {
            return false;
        }
        self.bitmap & (1u64 << abstand) == 0
    }

    /// Vermerkt `sequenz` als gesehen
    pub fn markieren(&mut self, sequenz: u32) {
        match self.hoechste {
            None => {
                self.hoechste = Some(sequenz);
                self.bitmap = 1;
            }
            Some(hoechste) if sequenz > hoechste => {
                let vorschub = sequenz - hoechste;
                self.bitmap = if vorschub >= 64 {
                    0
                } else {
                    self.bitmap << vorschub
                };
                self.bitmap |= 1;
                self.hoechste = Some(sequenz);
            }
            Some(hoechste) => {
                let abstand = hoechste - sequenz;
                if abstand < 64 {
                    self.bitmap |= 1u64 << abstand;
                }
            }
        }
    }

    /// Hoechste bisher akzeptierte Sequenz
    pub fn hoechste(&self) -> Option<u32> {
        self.hoechste
    }
}

impl Default for ReplayFenster {
    fn default() -> Self {
        Self::neu(MAX_FENSTER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annehmen(fenster: &mut ReplayFenster, seq: u32) -> bool {
        if fenster.pruefen(seq) {
            fenster.markieren(seq);
            true
        } else {
            false
        }
    }

    #[test]
    fn aufsteigende_sequenzen_werden_akzeptiert() {
        let mut fenster = ReplayFenster::default();
        for seq in 0..200 {
            assert!(annehmen(&mut fenster, seq));
        }
        assert_eq!(fenster.hoechste(), Some(199));
    }

    #[test]
    fn duplikat_wird_abgelehnt() {
        let mut fenster = ReplayFenster::default();
        assert!(annehmen(&mut fenster, 10));
        assert!(!annehmen(&mut fenster, 10));
    }

    #[test]
    fn spaeter_frame_im_fenster_wird_akzeptiert() {
        let mut fenster = ReplayFenster::default();
        assert!(annehmen(&mut fenster, 10));
        assert!(annehmen(&mut fenster, 12));
        assert!(annehmen(&mut fenster, 11));
        assert!(!annehmen(&mut fenster, 11));
    }

    #[test]
    fn zu_alter_frame_wird_abgelehnt() {
        let mut fenster = ReplayFenster::neu(8);
        assert!(annehmen(&mut fenster, 100));
        assert!(annehmen(&mut fenster, 93));
        assert!(!annehmen(&mut fenster, 92));
    }

    #[test]
    fn grosser_sprung_leert_bitmap() {
        let mut fenster = ReplayFenster::default();
        assert!(annehmen(&mut fenster, 1));
        assert!(annehmen(&mut fenster, 1000));
        assert!(annehmen(&mut fenster, 999));
        assert!(!annehmen(&mut fenster, 1));
    }

    #[test]
    fn pruefen_veraendert_nichts() {
        let mut fenster = ReplayFenster::default();
        fenster.markieren(5);
        assert!(fenster.pruefen(6));
        assert!(fenster.pruefen(6));
        assert_eq!(fenster.hoechste(), Some(5));
    }
}
