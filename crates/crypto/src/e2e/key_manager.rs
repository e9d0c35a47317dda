//! Schluesselplan eines Teilnehmers in einem Raum (Key Manager)
//!
//! Verwaltet:
//! - den eigenen Sende-Schluessel der aktuellen Raum-Epoch
//! - Paar-Sitzungen, lazy per Handshake aufgebaut sobald zwei Teilnehmer
//!   sich gegenseitig hoeren
//! - die Empfangs-Schluessel anderer Sender pro (Sender, Epoch), inkl.
//!   Kulanzfenster nach einer Rotation und Replay-Fenster
//!
//! Jede Mitgliedschaftsaenderung erhoeht die Epoch und erzeugt einen neuen
//! Sende-Schluessel. Der neue Schluessel geht nur an Teilnehmer mit
//! bestehender Paar-Sitzung, alle anderen erhalten ihn beim Handshake.
//!
//! Der Key Manager fuehrt keine I/O aus. Er erzeugt und verarbeitet
//! `SchluesselNachricht`en, das Versenden uebernimmt die Raum-Sitzung.

use roguetalk_core::types::{ParticipantId, RoomId, SchluesselMaterial};
use roguetalk_protocol::control::SchluesselNachricht;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::e2e::aead::{frame_entschluesseln, frame_schluessel_ableiten, frame_verschluesseln};
use crate::e2e::handshake::{
    epoch_schluessel_entpacken, epoch_schluessel_verpacken, transkript, EphemeresPaar,
    LABEL_ANTWORT, LABEL_INIT,
};
use crate::e2e::replay::ReplayFenster;
use crate::error::{CryptoError, CryptoResult, DecryptError};
use crate::identity::Identity;
use crate::types::{AeadAlgorithmus, SecretBytes, VerschluesselterFrame};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration des Schluesselplans
#[derive(Debug, Clone)]
pub struct KeyManagerConfig {
    /// AEAD fuer Frames und Schluessel-Verpackung
    pub algorithmus: AeadAlgorithmus,
    /// Wie lange abgeloeste Schluessel noch entschluesseln
    pub kulanz: Duration,
    /// Wie lange auf eine Handshake-Antwort gewartet wird
    pub handshake_timeout: Duration,
    /// Groesse des Replay-Fensters in Frames
    pub replay_fenster: u32,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            algorithmus: AeadAlgorithmus::default(),
            kulanz: Duration::from_millis(2000),
            handshake_timeout: Duration::from_millis(5000),
            replay_fenster: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// Interne Eintraege
// ---------------------------------------------------------------------------

struct SendeSchluessel {
    epoche: u32,
    epoch_key: SecretBytes,
    frame_key: SecretBytes,
    letzte_sequenz: Option<u32>,
}

struct EmpfangsSchluessel {
    frame_key: SecretBytes,
    abgeloest: Option<Instant>,
    fenster: ReplayFenster,
}

struct PaarSitzung {
    paar_key: SecretBytes,
    unhoerbar_seit: Option<Instant>,
}

/// Was eine verarbeitete Schluessel-Nachricht bewirkt hat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchluesselEreignis {
    /// Paar-Sitzung mit dem Teilnehmer steht
    PaarEtabliert(ParticipantId),
    /// Epoch-Schluessel des Teilnehmers installiert
    SchluesselInstalliert { teilnehmer: ParticipantId, epoche: u32 },
    /// Teilnehmer hat unseren Epoch-Schluessel bestaetigt
    Bestaetigt { teilnehmer: ParticipantId, epoche: u32 },
}

/// Ergebnis von `nachricht_verarbeiten`
#[derive(Debug, Default)]
pub struct Verarbeitung {
    /// Zu versendende Antworten
    pub antworten: Vec<SchluesselNachricht>,
    /// Ausgeloeste Ereignisse
    pub ereignisse: Vec<SchluesselEreignis>,
}

// ---------------------------------------------------------------------------
// KeyManager
// ---------------------------------------------------------------------------

/// Schluesselplan des lokalen Teilnehmers fuer genau einen Raum
pub struct KeyManager {
    raum: RoomId,
    lokal: ParticipantId,
    identitaet: Identity,
    config: KeyManagerConfig,
    sende: Option<SendeSchluessel>,
    paare: HashMap<ParticipantId, PaarSitzung>,
    ausstehend: HashMap<ParticipantId, EphemeresPaar>,
    empfang: HashMap<(ParticipantId, u32), EmpfangsSchluessel>,
}

impl KeyManager {
    /// Erstellt den Schluesselplan mit einem frischen Schluessel fuer Epoch 0
    pub fn new(
        raum: RoomId,
        lokal: ParticipantId,
        identitaet: Identity,
        config: KeyManagerConfig,
    ) -> CryptoResult<Self> {
        let sende = sende_schluessel_erzeugen(&raum, &lokal, 0)?;
        Ok(Self {
            raum,
            lokal,
            identitaet,
            config,
            sende: Some(sende),
            paare: HashMap::new(),
            ausstehend: HashMap::new(),
            empfang: HashMap::new(),
        })
    }

    pub fn raum(&self) -> RoomId {
        self.raum
    }

    pub fn lokal(&self) -> ParticipantId {
        self.lokal
    }

    pub fn config(&self) -> &KeyManagerConfig {
        &self.config
    }

    /// Oeffentliches Schluesselmaterial des lokalen Teilnehmers
    pub fn schluessel_material(&self) -> SchluesselMaterial {
        self.identitaet.schluessel_material()
    }

    /// Aktuelle Raum-Epoch (None nach `alles_loeschen`)
    pub fn aktuelle_epoche(&self) -> Option<u32> {
        self.sende.as_ref().map(|s| s.epoche)
    }

    /// true nachdem das gesamte Schluesselmaterial verworfen wurde
    pub fn ist_verworfen(&self) -> bool {
        self.sende.is_none()
    }

    // -----------------------------------------------------------------------
    // Rotation
    // -----------------------------------------------------------------------

    /// Erhoeht die Epoch und erzeugt einen neuen Sende-Schluessel
    ///
    /// Der alte Sende-Schluessel wird sofort verworfen. Gibt die neue Epoch zurueck.
    pub fn rotieren(&mut self) -> CryptoResult<u32> {
        let alt = self.sende.as_ref().ok_or(CryptoError::Verworfen)?.epoche;
        let neu = alt
            .checked_add(1)
            .ok_or_else(|| CryptoError::KeyDerivation("Epoch-Zaehler erschoepft".to_string()))?;

        self.sende = Some(sende_schluessel_erzeugen(&self.raum, &self.lokal, neu)?);
        info!(raum = %self.raum, alt, neu, "Schluessel rotiert");
        Ok(neu)
    }

    // -----------------------------------------------------------------------
    // Frames
    // -----------------------------------------------------------------------

    /// Verschluesselt einen Opus-Frame des lokalen Teilnehmers
    ///
    /// Die Sequenz muss pro Epoch streng steigen, sonst wird der Aufruf
    /// abgelehnt. So wird keine Nonce zweimal verwendet.
    pub fn wrap_frame(
        &mut self,
        klartext: &[u8],
        sender: &ParticipantId,
        sequenz: u32,
    ) -> CryptoResult<VerschluesselterFrame> {
        if *sender != self.lokal {
            return Err(CryptoError::FremderSender(*sender));
        }
        let algorithmus = self.config.algorithmus;
        let sende = self.sende.as_mut().ok_or(CryptoError::Verworfen)?;

        if let Some(letzte) = sende.letzte_sequenz {
            if sequenz <= letzte {
                return Err(CryptoError::SequenzNichtMonoton {
                    epoche: sende.epoche,
                    letzte,
                    sequenz,
                });
            }
        }

        let frame = frame_verschluesseln(
            algorithmus,
            &sende.frame_key,
            &self.raum,
            sender,
            sende.epoche,
            sequenz,
            klartext,
        )?;
        sende.letzte_sequenz = Some(sequenz);
        Ok(frame)
    }

    /// Entschluesselt einen Frame eines anderen Senders
    pub fn unwrap_frame(
        &mut self,
        ciphertext: &[u8],
        tag: &[u8; 16],
        sender: &ParticipantId,
        epoche: u32,
        sequenz: u32,
    ) -> Result<Vec<u8>, DecryptError> {
        self.unwrap_frame_zum(ciphertext, tag, sender, epoche, sequenz, Instant::now())
    }

    /// Wie `unwrap_frame`, mit explizitem Zeitpunkt fuer die Kulanzpruefung
    pub fn unwrap_frame_zum(
        &mut self,
        ciphertext: &[u8],
        tag: &[u8; 16],
        sender: &ParticipantId,
        epoche: u32,
        sequenz: u32,
        jetzt: Instant,
    ) -> Result<Vec<u8>, DecryptError> {
        let algorithmus = self.config.algorithmus;
        let kulanz = self.config.kulanz;
        let eintrag = self
            .empfang
            .get_mut(&(*sender, epoche))
            .ok_or(DecryptError::UnbekannteEpoche {
                sender: *sender,
                epoche,
            })?;

        if let Some(abgeloest) = eintrag.abgeloest {
            if jetzt >= abgeloest + kulanz {
                return Err(DecryptError::EpocheAbgelaufen {
                    sender: *sender,
                    epoche,
                });
            }
        }

        if !eintrag.fenster.pruefen(sequenz) {
            return Err(DecryptError::Wiederholung { sequenz });
        }

        let klartext = frame_entschluesseln(
            algorithmus,
            &eintrag.frame_key,
            &self.raum,
            sender,
            epoche,
            sequenz,
            ciphertext,
            tag,
        )?;
        eintrag.fenster.markieren(sequenz);
        Ok(klartext)
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Startet einen Handshake mit `peer`
    ///
    /// Gibt `None` zurueck wenn bereits eine Sitzung besteht oder ein
    /// Handshake laeuft.
    pub fn handshake_starten(
        &mut self,
        peer: ParticipantId,
        jetzt: Instant,
    ) -> CryptoResult<Option<SchluesselNachricht>> {
        if self.ist_verworfen() {
            return Err(CryptoError::Verworfen);
        }
        if self.paare.contains_key(&peer) || self.ausstehend.contains_key(&peer) {
            return Ok(None);
        }

        let paar = EphemeresPaar::neu(jetzt);
        let signatur = self.identitaet.sign(&transkript(
            LABEL_INIT,
            &self.raum,
            &self.lokal,
            &peer,
            &paar.oeffentlich,
        ));
        let nachricht = SchluesselNachricht::HandshakeInit {
            raum: self.raum,
            von: self.lokal,
            an: peer,
            ephemeral: paar.oeffentlich,
            signatur,
        };
        self.ausstehend.insert(peer, paar);
        debug!(peer = %peer, "Handshake gestartet");
        Ok(Some(nachricht))
    }

    /// Verarbeitet eine eingehende Schluessel-Nachricht
    ///
    /// `peer_schluessel` ist das Schluesselmaterial des Absenders aus dem
    /// Beitritts-Ereignis.
    pub fn nachricht_verarbeiten(
        &mut self,
        nachricht: &SchluesselNachricht,
        peer_schluessel: &SchluesselMaterial,
        jetzt: Instant,
    ) -> CryptoResult<Verarbeitung> {
        if self.ist_verworfen() {
            return Err(CryptoError::Verworfen);
        }
        if nachricht.raum() != self.raum || nachricht.an() != self.lokal {
            return Err(CryptoError::FalscherKontext);
        }

        let mut ergebnis = Verarbeitung::default();
        match nachricht {
            SchluesselNachricht::HandshakeInit {
                von,
                ephemeral,
                signatur,
                ..
            } => {
                let t = transkript(LABEL_INIT, &self.raum, von, &self.lokal, ephemeral);
                if !Identity::verify(&t, signatur, &peer_schluessel.signatur) {
                    return Err(CryptoError::SignaturVerifikation(format!(
                        "HandshakeInit von {}",
                        von
                    )));
                }

                // Gleichzeitige Initiierung: die kleinere ID gewinnt
                if self.ausstehend.contains_key(von) && self.lokal < *von {
                    debug!(peer = %von, "Gleichzeitiger Handshake, eigene Initiierung gewinnt");
                    return Ok(ergebnis);
                }
                self.ausstehend.remove(von);

                let mut eigenes = EphemeresPaar::neu(jetzt);
                let paar_key = eigenes.abschliessen(ephemeral, &self.raum, &self.lokal, von)?;

                let mut t = transkript(
                    LABEL_ANTWORT,
                    &self.raum,
                    &self.lokal,
                    von,
                    &eigenes.oeffentlich,
                );
                t.extend_from_slice(ephemeral);
                let antwort_signatur = self.identitaet.sign(&t);

                self.paare.insert(
                    *von,
                    PaarSitzung {
                        paar_key,
                        unhoerbar_seit: None,
                    },
                );
                ergebnis.antworten.push(SchluesselNachricht::HandshakeAntwort {
                    raum: self.raum,
                    von: self.lokal,
                    an: *von,
                    ephemeral: eigenes.oeffentlich,
                    signatur: antwort_signatur,
                });
                ergebnis.antworten.push(self.sender_schluessel_fuer(von)?);
                ergebnis.ereignisse.push(SchluesselEreignis::PaarEtabliert(*von));
                info!(peer = %von, "Paar-Sitzung etabliert (Antwortender)");
            }

            SchluesselNachricht::HandshakeAntwort {
                von,
                ephemeral,
                signatur,
                ..
            } => {
                let Some(mut eigenes) = self.ausstehend.remove(von) else {
                    warn!(peer = %von, "Handshake-Antwort ohne ausstehenden Handshake");
                    return Ok(ergebnis);
                };

                let mut t = transkript(LABEL_ANTWORT, &self.raum, von, &self.lokal, ephemeral);
                t.extend_from_slice(&eigenes.oeffentlich);
                if !Identity::verify(&t, signatur, &peer_schluessel.signatur) {
                    return Err(CryptoError::SignaturVerifikation(format!(
                        "HandshakeAntwort von {}",
                        von
                    )));
                }

                let paar_key = eigenes.abschliessen(ephemeral, &self.raum, &self.lokal, von)?;
                self.paare.insert(
                    *von,
                    PaarSitzung {
                        paar_key,
                        unhoerbar_seit: None,
                    },
                );
                ergebnis.antworten.push(self.sender_schluessel_fuer(von)?);
                ergebnis.ereignisse.push(SchluesselEreignis::PaarEtabliert(*von));
                info!(peer = %von, "Paar-Sitzung etabliert (Initiator)");
            }

            SchluesselNachricht::SenderSchluessel {
                von,
                epoche,
                verpackt,
                ..
            } => {
                let sitzung = self
                    .paare
                    .get(von)
                    .ok_or(CryptoError::KeinePaarSitzung(*von))?;
                let epoch_key = epoch_schluessel_entpacken(
                    self.config.algorithmus,
                    &sitzung.paar_key,
                    &self.raum,
                    von,
                    &self.lokal,
                    *epoche,
                    verpackt,
                )?;

                if self.empfangs_schluessel_installieren(*von, *epoche, &epoch_key, jetzt)? {
                    ergebnis.ereignisse.push(SchluesselEreignis::SchluesselInstalliert {
                        teilnehmer: *von,
                        epoche: *epoche,
                    });
                }
                ergebnis.antworten.push(SchluesselNachricht::SchluesselBestaetigt {
                    raum: self.raum,
                    von: self.lokal,
                    an: *von,
                    epoche: *epoche,
                });
            }

            SchluesselNachricht::SchluesselBestaetigt { von, epoche, .. } => {
                trace!(peer = %von, epoche, "Schluessel bestaetigt");
                ergebnis.ereignisse.push(SchluesselEreignis::Bestaetigt {
                    teilnehmer: *von,
                    epoche: *epoche,
                });
            }
        }
        Ok(ergebnis)
    }

    /// Verpackt den aktuellen Sende-Schluessel fuer `peer`
    pub fn sender_schluessel_fuer(
        &self,
        peer: &ParticipantId,
    ) -> CryptoResult<SchluesselNachricht> {
        let sende = self.sende.as_ref().ok_or(CryptoError::Verworfen)?;
        let sitzung = self
            .paare
            .get(peer)
            .ok_or(CryptoError::KeinePaarSitzung(*peer))?;

        let verpackt = epoch_schluessel_verpacken(
            self.config.algorithmus,
            &sitzung.paar_key,
            &self.raum,
            &self.lokal,
            peer,
            sende.epoche,
            &sende.epoch_key,
        )?;

        Ok(SchluesselNachricht::SenderSchluessel {
            raum: self.raum,
            von: self.lokal,
            an: *peer,
            epoche: sende.epoche,
            verpackt,
        })
    }

    /// Installiert einen Empfangs-Schluessel; gibt false zurueck wenn er
    /// bereits bekannt oder veraltet ist
    fn empfangs_schluessel_installieren(
        &mut self,
        sender: ParticipantId,
        epoche: u32,
        epoch_key: &SecretBytes,
        jetzt: Instant,
    ) -> CryptoResult<bool> {
        if self.empfang.contains_key(&(sender, epoche)) {
            return Ok(false);
        }
        let neueste = self
            .empfang
            .keys()
            .filter(|(s, _)| *s == sender)
            .map(|(_, e)| *e)
            .max();
        if neueste.is_some_and(|n| n > epoche) {
            debug!(sender = %sender, epoche, "Veralteter Sender-Schluessel ignoriert");
            return Ok(false);
        }

        // Aeltere Epochen dieses Senders laufen ab jetzt im Kulanzfenster
        for ((s, _), eintrag) in self.empfang.iter_mut() {
            if *s == sender && eintrag.abgeloest.is_none() {
                eintrag.abgeloest = Some(jetzt);
            }
        }

        let frame_key = frame_schluessel_ableiten(epoch_key, &self.raum, &sender, epoche)?;
        self.empfang.insert(
            (sender, epoche),
            EmpfangsSchluessel {
                frame_key,
                abgeloest: None,
                fenster: ReplayFenster::neu(self.config.replay_fenster),
            },
        );
        debug!(sender = %sender, epoche, "Empfangs-Schluessel installiert");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Zustand und Aufraeumen
    // -----------------------------------------------------------------------

    pub fn hat_paar_sitzung(&self, peer: &ParticipantId) -> bool {
        self.paare.contains_key(peer)
    }

    pub fn handshake_ausstehend(&self, peer: &ParticipantId) -> bool {
        self.ausstehend.contains_key(peer)
    }

    /// true wenn ein gueltiger Empfangs-Schluessel fuer (peer, epoche) existiert
    pub fn hat_empfangs_schluessel(&self, peer: &ParticipantId, epoche: u32) -> bool {
        self.empfang.contains_key(&(*peer, epoche))
    }

    /// Alle Teilnehmer mit bestehender Paar-Sitzung
    pub fn etablierte_paare(&self) -> Vec<ParticipantId> {
        self.paare.keys().copied().collect()
    }

    /// Entfernt ausstehende Handshakes, deren Zeit abgelaufen ist
    pub fn handshake_timeouts(&mut self, jetzt: Instant) -> Vec<ParticipantId> {
        let timeout = self.config.handshake_timeout;
        let abgelaufen: Vec<ParticipantId> = self
            .ausstehend
            .iter()
            .filter(|(_, paar)| jetzt.duration_since(paar.gestartet) >= timeout)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in &abgelaufen {
            self.ausstehend.remove(peer);
            warn!(peer = %peer, "Handshake-Timeout");
        }
        abgelaufen
    }

    /// Markiert die Paar-Sitzung als loeschbar (Teilnehmer nicht mehr hoerbar)
    pub fn paar_unhoerbar(&mut self, peer: &ParticipantId, jetzt: Instant) {
        if let Some(sitzung) = self.paare.get_mut(peer) {
            sitzung.unhoerbar_seit.get_or_insert(jetzt);
        }
    }

    /// Hebt die Loeschmarkierung wieder auf
    pub fn paar_hoerbar(&mut self, peer: &ParticipantId) {
        if let Some(sitzung) = self.paare.get_mut(peer) {
            sitzung.unhoerbar_seit = None;
        }
    }

    /// true wenn die Paar-Sitzung zum Loeschen vorgemerkt ist
    pub fn paar_loeschbar(&self, peer: &ParticipantId) -> bool {
        self.paare
            .get(peer)
            .is_some_and(|s| s.unhoerbar_seit.is_some())
    }

    /// Verwirft sofort alles Schluesselmaterial zu `peer`
    pub fn paar_entfernen(&mut self, peer: &ParticipantId) {
        self.paare.remove(peer);
        self.ausstehend.remove(peer);
        self.empfang.retain(|(sender, _), _| sender != peer);
    }

    /// Entfernt abgelaufene Empfangs-Schluessel und loeschbare Paar-Sitzungen
    ///
    /// Gibt die Anzahl der entfernten Eintraege zurueck.
    pub fn abgelaufene_entfernen(&mut self, jetzt: Instant) -> usize {
        let kulanz = self.config.kulanz;

        let abgelaufene_paare: Vec<ParticipantId> = self
            .paare
            .iter()
            .filter(|(_, s)| s.unhoerbar_seit.is_some_and(|t| jetzt >= t + kulanz))
            .map(|(peer, _)| *peer)
            .collect();
        for peer in &abgelaufene_paare {
            self.paar_entfernen(peer);
            debug!(peer = %peer, "Paar-Sitzung verworfen");
        }

        let vorher = self.empfang.len();
        self.empfang
            .retain(|_, e| e.abgeloest.map_or(true, |t| jetzt < t + kulanz));
        abgelaufene_paare.len() + (vorher - self.empfang.len())
    }

    /// Verwirft das gesamte Schluesselmaterial dieses Raums
    ///
    /// Danach ist der Key Manager unbrauchbar; ein neuer Beitritt braucht
    /// einen neuen Key Manager.
    pub fn alles_loeschen(&mut self) {
        self.sende = None;
        self.paare.clear();
        self.ausstehend.clear();
        self.empfang.clear();
        info!(raum = %self.raum, "Schluesselmaterial verworfen");
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("raum", &self.raum)
            .field("lokal", &self.lokal)
            .field("epoche", &self.aktuelle_epoche())
            .field("paare", &self.paare.len())
            .field("empfangs_schluessel", &self.empfang.len())
            .finish()
    }
}

fn sende_schluessel_erzeugen(
    raum: &RoomId,
    lokal: &ParticipantId,
    epoche: u32,
) -> CryptoResult<SendeSchluessel> {
    let epoch_key = SecretBytes::zufaellig(32);
    let frame_key = frame_schluessel_ableiten(&epoch_key, raum, lokal, epoche)?;
    Ok(SendeSchluessel {
        epoche,
        epoch_key,
        frame_key,
        letzte_sequenz: None,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Paar {
        a: KeyManager,
        b: KeyManager,
        id_a: ParticipantId,
        id_b: ParticipantId,
        mat_a: SchluesselMaterial,
        mat_b: SchluesselMaterial,
    }

    fn manager_paar(config: KeyManagerConfig) -> Paar {
        let raum = RoomId::new();
        let id_a = ParticipantId::new();
        let id_b = ParticipantId::new();
        let a = KeyManager::new(raum, id_a, Identity::generate(), config.clone()).unwrap();
        let b = KeyManager::new(raum, id_b, Identity::generate(), config).unwrap();
        let mat_a = a.schluessel_material();
        let mat_b = b.schluessel_material();
        Paar {
            a,
            b,
            id_a,
            id_b,
            mat_a,
            mat_b,
        }
    }

    /// Stellt Nachrichten zwischen A und B zu, bis keine mehr anfallen
    fn zustellen(p: &mut Paar, offen: Vec<SchluesselNachricht>, jetzt: Instant) {
        let mut offen: std::collections::VecDeque<_> = offen.into();
        while let Some(msg) = offen.pop_front() {
            let ergebnis = if msg.an() == p.id_a {
                p.a.nachricht_verarbeiten(&msg, &p.mat_b, jetzt).unwrap()
            } else {
                p.b.nachricht_verarbeiten(&msg, &p.mat_a, jetzt).unwrap()
            };
            offen.extend(ergebnis.antworten);
        }
    }

    fn verbunden(config: KeyManagerConfig, jetzt: Instant) -> Paar {
        let mut p = manager_paar(config);
        let init = p.a.handshake_starten(p.id_b, jetzt).unwrap().unwrap();
        zustellen(&mut p, vec![init], jetzt);
        p
    }

    #[test]
    fn handshake_etabliert_beide_seiten() {
        let jetzt = Instant::now();
        let p = verbunden(KeyManagerConfig::default(), jetzt);
        assert!(p.a.hat_paar_sitzung(&p.id_b));
        assert!(p.b.hat_paar_sitzung(&p.id_a));
        assert!(p.a.hat_empfangs_schluessel(&p.id_b, 0));
        assert!(p.b.hat_empfangs_schluessel(&p.id_a, 0));
        assert!(!p.a.handshake_ausstehend(&p.id_b));
    }

    #[test]
    fn zweiter_handshake_start_ist_noop() {
        let jetzt = Instant::now();
        let mut p = manager_paar(KeyManagerConfig::default());
        assert!(p.a.handshake_starten(p.id_b, jetzt).unwrap().is_some());
        assert!(p.a.handshake_starten(p.id_b, jetzt).unwrap().is_none());
    }

    #[test]
    fn wrap_und_unwrap_ueber_paar_sitzung() {
        let jetzt = Instant::now();
        let mut p = verbunden(KeyManagerConfig::default(), jetzt);
        let id_a = p.id_a;

        let frame = p.a.wrap_frame(b"opus", &id_a, 0).unwrap();
        let klartext = p
            .b
            .unwrap_frame(&frame.ciphertext, &frame.tag, &id_a, frame.epoche, 0)
            .unwrap();
        assert_eq!(klartext, b"opus");
    }

    #[test]
    fn sequenz_muss_streng_steigen() {
        let mut p = manager_paar(KeyManagerConfig::default());
        let id_a = p.id_a;
        p.a.wrap_frame(b"x", &id_a, 5).unwrap();
        assert!(matches!(
            p.a.wrap_frame(b"y", &id_a, 5),
            Err(CryptoError::SequenzNichtMonoton { letzte: 5, sequenz: 5, .. })
        ));
        assert!(p.a.wrap_frame(b"y", &id_a, 4).is_err());
        assert!(p.a.wrap_frame(b"y", &id_a, 6).is_ok());
    }

    #[test]
    fn keine_nonce_wiederverwendung_ueber_viele_frames() {
        let mut p = manager_paar(KeyManagerConfig::default());
        let id_a = p.id_a;
        let mut gesehen = std::collections::HashSet::new();
        for seq in 0..500u32 {
            let frame = p.a.wrap_frame(&[0u8; 20], &id_a, seq).unwrap();
            assert!(gesehen.insert((frame.epoche, frame.sequenz)));
        }
        p.a.rotieren().unwrap();
        let frame = p.a.wrap_frame(&[0u8; 20], &id_a, 0).unwrap();
        assert!(gesehen.insert((frame.epoche, frame.sequenz)));
    }

    #[test]
    fn fremder_sender_darf_nicht_verschluesseln() {
        let mut p = manager_paar(KeyManagerConfig::default());
        let id_b = p.id_b;
        assert!(matches!(
            p.a.wrap_frame(b"x", &id_b, 0),
            Err(CryptoError::FremderSender(_))
        ));
    }

    #[test]
    fn rotation_erhoeht_epoch_streng() {
        let mut p = manager_paar(KeyManagerConfig::default());
        assert_eq!(p.a.aktuelle_epoche(), Some(0));
        assert_eq!(p.a.rotieren().unwrap(), 1);
        assert_eq!(p.a.rotieren().unwrap(), 2);
    }

    #[test]
    fn replay_wird_abgelehnt() {
        let jetzt = Instant::now();
        let mut p = verbunden(KeyManagerConfig::default(), jetzt);
        let id_a = p.id_a;
        let frame = p.a.wrap_frame(b"opus", &id_a, 3).unwrap();

        assert!(p
            .b
            .unwrap_frame_zum(&frame.ciphertext, &frame.tag, &id_a, 0, 3, jetzt)
            .is_ok());
        assert_eq!(
            p.b.unwrap_frame_zum(&frame.ciphertext, &frame.tag, &id_a, 0, 3, jetzt),
            Err(DecryptError::Wiederholung { sequenz: 3 })
        );
    }

    #[test]
    fn gefaelschter_frame_verschiebt_fenster_nicht() {
        let jetzt = Instant::now();
        let mut p = verbunden(KeyManagerConfig::default(), jetzt);
        let id_a = p.id_a;
        let frame = p.a.wrap_frame(b"opus", &id_a, 1).unwrap();

        let mut falsch = frame.tag;
        falsch[0] ^= 0xFF;
        assert_eq!(
            p.b.unwrap_frame_zum(&frame.ciphertext, &falsch, &id_a, 0, 1, jetzt),
            Err(DecryptError::TagUngueltig)
        );
        assert!(p
            .b
            .unwrap_frame_zum(&frame.ciphertext, &frame.tag, &id_a, 0, 1, jetzt)
            .is_ok());
    }

    #[test]
    fn unbekannte_epoch_ist_decrypt_error() {
        let jetzt = Instant::now();
        let mut p = verbunden(KeyManagerConfig::default(), jetzt);
        let id_a = p.id_a;
        let frame = p.a.wrap_frame(b"opus", &id_a, 0).unwrap();
        assert!(matches!(
            p.b.unwrap_frame_zum(&frame.ciphertext, &frame.tag, &id_a, 9, 0, jetzt),
            Err(DecryptError::UnbekannteEpoche { epoche: 9, .. })
        ));
    }

    #[test]
    fn alte_epoch_nur_im_kulanzfenster() {
        let kulanz = Duration::from_millis(500);
        let config = KeyManagerConfig {
            kulanz,
            ..KeyManagerConfig::default()
        };
        let t0 = Instant::now();
        let mut p = verbunden(config, t0);
        let id_a = p.id_a;

        // Frames unter Epoch 0, noch unterwegs
        let alt_1 = p.a.wrap_frame(b"alt-1", &id_a, 10).unwrap();
        let alt_2 = p.a.wrap_frame(b"alt-2", &id_a, 11).unwrap();

        // Rotation, neuer Schluessel geht an B
        p.a.rotieren().unwrap();
        let verteilung = p.a.sender_schluessel_fuer(&p.id_b).unwrap();
        zustellen(&mut p, vec![verteilung], t0);
        assert!(p.b.hat_empfangs_schluessel(&id_a, 1));

        // Innerhalb der Kulanz: alte Epoch entschluesselt noch
        let innerhalb = t0 + kulanz / 2;
        assert_eq!(
            p.b.unwrap_frame_zum(&alt_1.ciphertext, &alt_1.tag, &id_a, 0, 10, innerhalb)
                .unwrap(),
            b"alt-1"
        );

        // Nach der Kulanz: abgelehnt
        let danach = t0 + kulanz + Duration::from_millis(1);
        assert!(matches!(
            p.b.unwrap_frame_zum(&alt_2.ciphertext, &alt_2.tag, &id_a, 0, 11, danach),
            Err(DecryptError::EpocheAbgelaufen { epoche: 0, .. })
        ));

        // Nach dem Aufraeumen ist der Schluessel ganz weg
        assert!(p.b.abgelaufene_entfernen(danach) >= 1);
        assert!(!p.b.hat_empfangs_schluessel(&id_a, 0));
        assert!(matches!(
            p.b.unwrap_frame_zum(&alt_2.ciphertext, &alt_2.tag, &id_a, 0, 11, danach),
            Err(DecryptError::UnbekannteEpoche { epoche: 0, .. })
        ));

        // Neue Epoch funktioniert
        let neu = p.a.wrap_frame(b"neu", &id_a, 0).unwrap();
        assert_eq!(
            p.b.unwrap_frame_zum(&neu.ciphertext, &neu.tag, &id_a, 1, 0, danach)
                .unwrap(),
            b"neu"
        );
    }

    #[test]
    fn gleichzeitiger_handshake_konvergiert() {
        let jetzt = Instant::now();
        let mut p = manager_paar(KeyManagerConfig::default());
        let init_a = p.a.handshake_starten(p.id_b, jetzt).unwrap().unwrap();
        let init_b = p.b.handshake_starten(p.id_a, jetzt).unwrap().unwrap();
        zustellen(&mut p, vec![init_a, init_b], jetzt);

        assert!(p.a.hat_paar_sitzung(&p.id_b));
        assert!(p.b.hat_paar_sitzung(&p.id_a));

        let id_a = p.id_a;
        let frame = p.a.wrap_frame(b"hallo", &id_a, 0).unwrap();
        assert!(p
            .b
            .unwrap_frame_zum(&frame.ciphertext, &frame.tag, &id_a, 0, 0, jetzt)
            .is_ok());
    }

    #[test]
    fn falsche_signatur_wird_abgelehnt() {
        let jetzt = Instant::now();
        let mut p = manager_paar(KeyManagerConfig::default());
        let init = p.a.handshake_starten(p.id_b, jetzt).unwrap().unwrap();
        let fremd = Identity::generate().schluessel_material();
        assert!(matches!(
            p.b.nachricht_verarbeiten(&init, &fremd, jetzt),
            Err(CryptoError::SignaturVerifikation(_))
        ));
        assert!(!p.b.hat_paar_sitzung(&p.id_a));
    }

    #[test]
    fn nachricht_fuer_anderen_empfaenger_wird_abgelehnt() {
        let jetzt = Instant::now();
        let mut p = manager_paar(KeyManagerConfig::default());
        let init = p.a.handshake_starten(p.id_b, jetzt).unwrap().unwrap();
        let mat_b = p.mat_b;
        assert!(matches!(
            p.a.nachricht_verarbeiten(&init, &mat_b, jetzt),
            Err(CryptoError::FalscherKontext)
        ));
    }

    #[test]
    fn handshake_timeout_entfernt_ausstehenden() {
        let config = KeyManagerConfig {
            handshake_timeout: Duration::from_millis(100),
            ..KeyManagerConfig::default()
        };
        let t0 = Instant::now();
        let mut p = manager_paar(config);
        p.a.handshake_starten(p.id_b, t0).unwrap();

        assert!(p.a.handshake_timeouts(t0 + Duration::from_millis(50)).is_empty());
        assert_eq!(p.a.handshake_timeouts(t0 + Duration::from_millis(100)), vec![p.id_b]);
        assert!(!p.a.handshake_ausstehend(&p.id_b));
        // Neuer Versuch ist wieder moeglich
        assert!(p.a.handshake_starten(p.id_b, t0).unwrap().is_some());
    }

    #[test]
    fn unhoerbares_paar_wird_nach_kulanz_verworfen() {
        let kulanz = Duration::from_millis(200);
        let config = KeyManagerConfig {
            kulanz,
            ..KeyManagerConfig::default()
        };
        let t0 = Instant::now();
        let mut p = verbunden(config, t0);
        let id_b = p.id_b;

        p.a.paar_unhoerbar(&id_b, t0);
        assert!(p.a.paar_loeschbar(&id_b));
        assert_eq!(p.a.abgelaufene_entfernen(t0 + kulanz / 2), 0);
        assert!(p.a.hat_paar_sitzung(&id_b));

        p.a.abgelaufene_entfernen(t0 + kulanz);
        assert!(!p.a.hat_paar_sitzung(&id_b));
        assert!(!p.a.hat_empfangs_schluessel(&id_b, 0));
    }

    #[test]
    fn wieder_hoerbares_paar_bleibt() {
        let kulanz = Duration::from_millis(200);
        let config = KeyManagerConfig {
            kulanz,
            ..KeyManagerConfig::default()
        };
        let t0 = Instant::now();
        let mut p = verbunden(config, t0);
        let id_b = p.id_b;

        p.a.paar_unhoerbar(&id_b, t0);
        p.a.paar_hoerbar(&id_b);
        p.a.abgelaufene_entfernen(t0 + kulanz * 2);
        assert!(p.a.hat_paar_sitzung(&id_b));
    }

    #[test]
    fn alles_loeschen_verwirft_jeden_schluessel() {
        let jetzt = Instant::now();
        let mut p = verbunden(KeyManagerConfig::default(), jetzt);
        let id_a = p.id_a;
        let frame = p.a.wrap_frame(b"x", &id_a, 0).unwrap();

        p.b.alles_loeschen();
        assert!(p.b.ist_verworfen());
        assert!(p.b.etablierte_paare().is_empty());
        assert!(p
            .b
            .unwrap_frame_zum(&frame.ciphertext, &frame.tag, &id_a, 0, 0, jetzt)
            .is_err());
        assert!(matches!(p.b.rotieren(), Err(CryptoError::Verworfen)));
        let id_b = p.id_b;
        assert!(matches!(
            p.b.wrap_frame(b"x", &id_b, 0),
            Err(CryptoError::Verworfen)
        ));
    }

    #[test]
    fn bestaetigung_wird_gemeldet() {
        let jetzt = Instant::now();
        let mut p = verbunden(KeyManagerConfig::default(), jetzt);
        let verteilung = p.a.sender_schluessel_fuer(&p.id_b).unwrap();
        let mat_a = p.mat_a;
        let ergebnis = p.b.nachricht_verarbeiten(&verteilung, &mat_a, jetzt).unwrap();
        // Schluessel war schon bekannt, Bestaetigung geht trotzdem raus
        assert!(ergebnis.ereignisse.is_empty());
        let ack = ergebnis.antworten.into_iter().next().unwrap();

        let mat_b = p.mat_b;
        let ergebnis = p.a.nachricht_verarbeiten(&ack, &mat_b, jetzt).unwrap();
        assert_eq!(
            ergebnis.ereignisse,
            vec![SchluesselEreignis::Bestaetigt {
                teilnehmer: p.id_b,
                epoche: 0
            }]
        );
    }
}
