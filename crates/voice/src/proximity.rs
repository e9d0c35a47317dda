//! Hoerbarkeit pro Tick (Proximity Engine)
//!
//! Berechnet in jedem Tick die komplette Matrix Zuhoerer -> Sender neu,
//! gibt aber nur die Aenderung gegenueber dem Vortick als Diff heraus.
//! Nur der Diff loest Abonnements und Handshakes aus.
//!
//! ## Hysterese
//! Ein noch nicht hoerbares Paar wird bei Abstand <= `d_in` hoerbar, ein
//! hoerbares Paar bleibt es bis Abstand > `d_out`. Beide Grenzen sind
//! inklusiv. Verglichen wird auf quadrierten Ganzzahl-Abstaenden.

use roguetalk_core::types::{ParticipantId, Position};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::config::NaeheConfig;
use crate::level::Sichtbarkeitskarte;

/// Ob Waende den Schall blockieren
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OkklusionsPolitik {
    /// Nur bei freier Sichtlinie hoerbar
    #[default]
    Sichtlinie,
    /// Nur der Abstand zaehlt
    Aus,
}

/// Ein Teilnehmer wie ihn die Engine sieht
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kandidat {
    pub id: ParticipantId,
    /// `None`: nicht im Level, hoert und wird nicht gehoert
    pub position: Option<Position>,
    pub stumm: bool,
}

/// Unveraenderlicher Stand der Hoerbarkeit nach einem Tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudibilitySnapshot {
    pub tick: u64,
    /// Zuhoerer -> (Sender -> Lautstaerke 0.0..=1.0)
    pub hoerbar: HashMap<ParticipantId, HashMap<ParticipantId, f32>>,
}

impl AudibilitySnapshot {
    /// Alle Sender, die `zuhoerer` gerade hoert
    pub fn audible_set(&self, zuhoerer: &ParticipantId) -> HashSet<ParticipantId> {
        self.hoerbar
            .get(zuhoerer)
            .map(|s| s.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Lautstaerke fuer (Zuhoerer, Sender), 0.0 wenn nicht hoerbar
    pub fn lautstaerke(&self, zuhoerer: &ParticipantId, sender: &ParticipantId) -> f32 {
        self.hoerbar
            .get(zuhoerer)
            .and_then(|s| s.get(sender))
            .copied()
            .unwrap_or(0.0)
    }

    /// true wenn irgendjemand `sender` hoert
    pub fn hat_zuhoerer(&self, sender: &ParticipantId) -> bool {
        self.hoerbar.values().any(|s| s.contains_key(sender))
    }

    pub fn ist_hoerbar(&self, zuhoerer: &ParticipantId, sender: &ParticipantId) -> bool {
        self.hoerbar
            .get(zuhoerer)
            .is_some_and(|s| s.contains_key(sender))
    }

    /// Entfernt das Paar in beiden Richtungen
    pub fn paar_entfernen(&mut self, a: &ParticipantId, b: &ParticipantId) {
        for (zuhoerer, sender) in [(a, b), (b, a)] {
            if let Some(sender_map) = self.hoerbar.get_mut(zuhoerer) {
                sender_map.remove(sender);
                if sender_map.is_empty() {
                    self.hoerbar.remove(zuhoerer);
                }
            }
        }
    }
}

/// Aenderung gegenueber dem Vortick, Paare als (Zuhoerer, Sender)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HoerbarkeitsDiff {
    pub neu_hoerbar: Vec<(ParticipantId, ParticipantId)>,
    pub nicht_mehr_hoerbar: Vec<(ParticipantId, ParticipantId)>,
}

impl HoerbarkeitsDiff {
    pub fn ist_leer(&self) -> bool {
        self.neu_hoerbar.is_empty() && self.nicht_mehr_hoerbar.is_empty()
    }
}

/// Ergebnis von `compute_audible`
#[derive(Debug, Clone)]
pub struct HoerbarkeitsUpdate {
    pub snapshot: AudibilitySnapshot,
    pub diff: HoerbarkeitsDiff,
}

/// Proximity Engine eines Raums
#[derive(Debug)]
pub struct ProximityEngine {
    config: NaeheConfig,
    vorher: HashSet<(ParticipantId, ParticipantId)>,
}

impl ProximityEngine {
    pub fn new(config: NaeheConfig) -> Self {
        Self {
            config,
            vorher: HashSet::new(),
        }
    }

    pub fn config(&self) -> &NaeheConfig {
        &self.config
    }

    /// Berechnet die Hoerbarkeit aller geordneten Paare
    ///
    /// `karte` wird nur bei `OkklusionsPolitik::Sichtlinie` befragt; ohne
    /// Karte zaehlt nur der Abstand.
    pub fn compute_audible(
        &mut self,
        kandidaten: &[Kandidat],
        karte: Option<&dyn Sichtbarkeitskarte>,
        tick: u64,
    ) -> HoerbarkeitsUpdate {
        let d_in = self.config.d_in as u64;
        let d_out = self.config.d_out as u64;
        let karte = match self.config.okklusion {
            OkklusionsPolitik::Sichtlinie => karte,
            OkklusionsPolitik::Aus => None,
        };

        let mut jetzt = HashSet::new();
        let mut hoerbar: HashMap<ParticipantId, HashMap<ParticipantId, f32>> = HashMap::new();

        for zuhoerer in kandidaten {
            let Some(pos_z) = zuhoerer.position else {
                continue;
            };
            for sender in kandidaten {
                if sender.id == zuhoerer.id || sender.stumm {
                    continue;
                }
                let Some(pos_s) = sender.position else {
                    continue;
                };

                let paar = (zuhoerer.id, sender.id);
                let abstand_q = pos_z.abstand_quadrat(&pos_s);
                let schwelle = if self.vorher.contains(&paar) { d_out } else { d_in };
                if abstand_q > schwelle * schwelle {
                    continue;
                }
                if let Some(karte) = karte {
                    if !karte.sichtlinie_frei(pos_s, pos_z) {
                        continue;
                    }
                }

                jetzt.insert(paar);
                hoerbar
                    .entry(zuhoerer.id)
                    .or_default()
                    .insert(sender.id, self.gain(abstand_q));
            }
        }

        let mut diff = HoerbarkeitsDiff {
            neu_hoerbar: jetzt.difference(&self.vorher).copied().collect(),
            nicht_mehr_hoerbar: self.vorher.difference(&jetzt).copied().collect(),
        };
        // Deterministische Reihenfolge fuer Logs und Tests
        diff.neu_hoerbar.sort();
        diff.nicht_mehr_hoerbar.sort();

        if !diff.ist_leer() {
            tracing::debug!(
                tick,
                neu = diff.neu_hoerbar.len(),
                weg = diff.nicht_mehr_hoerbar.len(),
                "Hoerbarkeit geaendert"
            );
        }

        self.vorher = jetzt;
        HoerbarkeitsUpdate {
            snapshot: AudibilitySnapshot { tick, hoerbar },
            diff,
        }
    }

    /// Volle Lautstaerke bis `voll_lautstaerke_distanz`, dann linear bis 0 bei `d_out`
    fn gain(&self, abstand_quadrat: u64) -> f32 {
        let abstand = (abstand_quadrat as f64).sqrt() as f32;
        let voll = self.config.voll_lautstaerke_distanz as f32;
        let d_out = self.config.d_out as f32;
        if abstand <= voll {
            return 1.0;
        }
        if d_out <= voll {
            return 1.0;
        }
        ((d_out - abstand) / (d_out - voll)).clamp(0.0, 1.0)
    }

    /// Vergisst ein Paar, der naechste Tick behandelt es wie neu
    pub fn vergessen(&mut self, zuhoerer: &ParticipantId, sender: &ParticipantId) {
        self.vorher.remove(&(*zuhoerer, *sender));
    }

    /// Entfernt alle Paare mit diesem Teilnehmer
    pub fn entfernen(&mut self, teilnehmer: &ParticipantId) {
        self.vorher
            .retain(|(z, s)| z != teilnehmer && s != teilnehmer);
    }

    pub fn zuruecksetzen(&mut self) {
        self.vorher.clear();
    }

    pub fn ist_hoerbar(&self, zuhoerer: &ParticipantId, sender: &ParticipantId) -> bool {
        self.vorher.contains(&(*zuhoerer, *sender))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::RasterKarte;

    fn kandidat(id: ParticipantId, x: i32, y: i32) -> Kandidat {
        Kandidat {
            id,
            position: Some(Position::new(x, y)),
            stumm: false,
        }
    }

    fn engine() -> ProximityEngine {
        ProximityEngine::new(NaeheConfig::default())
    }

    #[test]
    fn hysterese_mit_inklusiven_grenzen() {
        let mut e = engine();
        let a = ParticipantId::new();
        let b = ParticipantId::new();

        let u = e.compute_audible(&[kandidat(a, 0, 0), kandidat(b, 11, 0)], None, 1);
        assert!(u.diff.neu_hoerbar.is_empty(), "11 > d_in");

        let u = e.compute_audible(&[kandidat(a, 0, 0), kandidat(b, 10, 0)], None, 2);
        assert_eq!(u.diff.neu_hoerbar.len(), 2, "10 == d_in ist hoerbar");

        let u = e.compute_audible(&[kandidat(a, 0, 0), kandidat(b, 12, 0)], None, 3);
        assert!(u.diff.ist_leer(), "12 == d_out bleibt hoerbar");
        assert!(u.snapshot.ist_hoerbar(&a, &b));

        let u = e.compute_audible(&[kandidat(a, 0, 0), kandidat(b, 13, 0)], None, 4);
        assert_eq!(u.diff.nicht_mehr_hoerbar.len(), 2);
        assert!(u.snapshot.audible_set(&a).is_empty());
    }

    #[test]
    fn gleiche_eingabe_ergibt_leeren_diff() {
        let mut e = engine();
        let a = ParticipantId::new();
        let b = ParticipantId::new();
        let kandidaten = [kandidat(a, 0, 0), kandidat(b, 3, 4)];
        let erst = e.compute_audible(&kandidaten, None, 1);
        assert_eq!(erst.diff.neu_hoerbar.len(), 2);
        for tick in 2..10 {
            let u = e.compute_audible(&kandidaten, None, tick);
            assert!(u.diff.ist_leer());
            assert_eq!(u.snapshot.hoerbar, erst.snapshot.hoerbar);
        }
    }

    #[test]
    fn stumm_wird_von_niemandem_gehoert() {
        let mut e = engine();
        let a = ParticipantId::new();
        let b = ParticipantId::new();
        let mut stumm = kandidat(a, 0, 0);
        stumm.stumm = true;
        let u = e.compute_audible(&[stumm, kandidat(b, 1, 0)], None, 1);
        assert!(u.snapshot.ist_hoerbar(&a, &b), "Stumme hoeren weiter zu");
        assert!(!u.snapshot.ist_hoerbar(&b, &a));
        assert!(!u.snapshot.hat_zuhoerer(&a));
    }

    #[test]
    fn ohne_position_nicht_hoerbar() {
        let mut e = engine();
        let a = ParticipantId::new();
        let b = ParticipantId::new();
        let weg = Kandidat {
            id: b,
            position: None,
            stumm: false,
        };
        let u = e.compute_audible(&[kandidat(a, 0, 0), weg], None, 1);
        assert!(u.snapshot.hoerbar.is_empty());
    }

    #[test]
    fn wand_blockiert_nur_mit_sichtlinien_politik() {
        let karte = RasterKarte::aus_text(
            "
.....
..#..
.....
",
        );
        let a = ParticipantId::new();
        let b = ParticipantId::new();
        let kandidaten = [kandidat(a, 0, 1), kandidat(b, 4, 1)];

        let mut e = engine();
        let u = e.compute_audible(&kandidaten, Some(&karte), 1);
        assert!(u.snapshot.hoerbar.is_empty());

        let mut e = ProximityEngine::new(NaeheConfig {
            okklusion: OkklusionsPolitik::Aus,
            ..NaeheConfig::default()
        });
        let u = e.compute_audible(&kandidaten, Some(&karte), 1);
        assert!(u.snapshot.ist_hoerbar(&a, &b));
    }

    #[test]
    fn verdeckte_paare_hoeren_sich_gegenseitig() {
        let mut karte = RasterKarte::new(8, 8);
        karte.blockieren(Position::new(1, 1));
        karte.blockieren(Position::new(4, 3));
        let ids: Vec<ParticipantId> = (0..6).map(|_| ParticipantId::new()).collect();
        let kandidaten = [
            kandidat(ids[0], 0, 0),
            kandidat(ids[1], 2, 1),
            kandidat(ids[2], 3, 2),
            kandidat(ids[3], 5, 4),
            kandidat(ids[4], 1, 3),
            kandidat(ids[5], 6, 2),
        ];

        let mut e = engine();
        let u = e.compute_audible(&kandidaten, Some(&karte), 1);
        for a in &ids {
            for b in &ids {
                assert_eq!(u.snapshot.ist_hoerbar(a, b), u.snapshot.ist_hoerbar(b, a));
            }
        }
    }

    #[test]
    fn lautstaerke_faellt_linear_ab() {
        let mut e = engine();
        let a = ParticipantId::new();
        let nah = ParticipantId::new();
        let mittel = ParticipantId::new();
        let u = e.compute_audible(
            &[kandidat(a, 0, 0), kandidat(nah, 2, 0), kandidat(mittel, 7, 0)],
            None,
            1,
        );
        assert_eq!(u.snapshot.lautstaerke(&a, &nah), 1.0);
        assert!((u.snapshot.lautstaerke(&a, &mittel) - 0.5).abs() < 1e-6);
        assert_eq!(u.snapshot.lautstaerke(&nah, &ParticipantId::new()), 0.0);
    }

    #[test]
    fn vergessen_meldet_paar_erneut() {
        let mut e = engine();
        let a = ParticipantId::new();
        let b = ParticipantId::new();
        let kandidaten = [kandidat(a, 0, 0), kandidat(b, 11, 0)];
        e.compute_audible(&[kandidat(a, 0, 0), kandidat(b, 5, 0)], None, 1);
        e.compute_audible(&kandidaten, None, 2);
        assert!(e.ist_hoerbar(&a, &b));

        // Vergessen: 11 liegt ausserhalb d_in, das Paar faellt heraus
        e.vergessen(&a, &b);
        let u = e.compute_audible(&kandidaten, None, 3);
        assert!(!u.snapshot.ist_hoerbar(&a, &b));
        assert!(u.snapshot.ist_hoerbar(&b, &a));
        assert!(u.diff.ist_leer());
    }

    #[test]
    fn entfernen_loescht_alle_paare_eines_teilnehmers() {
        let mut e = engine();
        let a = ParticipantId::new();
        let b = ParticipantId::new();
        e.compute_audible(&[kandidat(a, 0, 0), kandidat(b, 1, 0)], None, 1);
        e.entfernen(&b);
        assert!(!e.ist_hoerbar(&a, &b));
        assert!(!e.ist_hoerbar(&b, &a));
    }
}
