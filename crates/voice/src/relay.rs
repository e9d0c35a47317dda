//! In-Process-Relais (SFU-Stil)
//!
//! `LokalesRelais` steht fuer einen nicht vertrauenswuerdigen Media-Server:
//! es leitet verschluesselte Frames nur an ausdrueckliche Abonnenten
//! weiter, stellt Kontroll-Nachrichten zu und verteilt
//! Mitgliedschafts-Ereignisse. Jeder Teilnehmer spricht ueber eine eigene
//! `RelaisVerbindung` mit ihm.
//!
//! - DashMap fuer nebenlaeufigen Zugriff auf Mitglieder und Abonnements
//! - Tokio mpsc-Kanaele als Send-Queues, bei voller Queue wird verworfen
//! - Timeouts und Verbindungsabbrueche lassen sich simulieren

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use roguetalk_core::event::MitgliedschaftsEreignis;
use roguetalk_core::types::{ParticipantId, RoomId, SchluesselMaterial, TrackHandle};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::transport::{FrameSenke, Transport, TransportEreignis, TransportFehler};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Groesse der Frame-Queue pro Abonnement
pub const SEND_QUEUE_GROESSE: usize = 128;

/// Groesse der Ereignis-Queue pro Mitglied
pub const EREIGNIS_QUEUE_GROESSE: usize = 1024;

// ---------------------------------------------------------------------------
// Interne Eintraege
// ---------------------------------------------------------------------------

struct Mitglied {
    schluessel: SchluesselMaterial,
    ereignis_tx: mpsc::Sender<TransportEreignis>,
    track: Option<TrackHandle>,
}

/// Abo-Schluessel: (Raum, Sender, Zuhoerer)
type AboSchluessel = (RoomId, ParticipantId, ParticipantId);

struct RelaisInner {
    mitglieder: DashMap<(RoomId, ParticipantId), Mitglied>,
    abos: DashMap<AboSchluessel, mpsc::Sender<Bytes>>,
    weitergeleitet: AtomicU64,
    track_zaehler: AtomicU64,
}

// ---------------------------------------------------------------------------
// LokalesRelais
// ---------------------------------------------------------------------------

/// Zentrales Relais fuer alle Raeume eines Prozesses
///
/// Thread-safe und `Clone`-faehig (innerer Arc).
#[derive(Clone)]
pub struct LokalesRelais {
    inner: Arc<RelaisInner>,
}

impl LokalesRelais {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RelaisInner {
                mitglieder: DashMap::new(),
                abos: DashMap::new(),
                weitergeleitet: AtomicU64::new(0),
                track_zaehler: AtomicU64::new(0),
            }),
        }
    }

    /// Neue Verbindung fuer einen Teilnehmer
    pub fn verbinden(&self, teilnehmer: ParticipantId) -> Arc<RelaisVerbindung> {
        Arc::new(RelaisVerbindung {
            relais: self.clone(),
            teilnehmer,
            raum: Mutex::new(None),
            abonniert: AtomicUsize::new(0),
            abbestellt: AtomicUsize::new(0),
        })
    }

    pub fn teilnehmer_anzahl(&self, raum: &RoomId) -> usize {
        self.inner
            .mitglieder
            .iter()
            .filter(|e| e.key().0 == *raum)
            .count()
    }

    /// Anzahl aktiver Abonnements in einem Raum
    pub fn abo_anzahl(&self, raum: &RoomId) -> usize {
        self.inner
            .abos
            .iter()
            .filter(|e| e.key().0 == *raum)
            .count()
    }

    /// true wenn `zuhoerer` den Track von `sender` abonniert hat
    pub fn hat_abo(&self, raum: &RoomId, sender: &ParticipantId, zuhoerer: &ParticipantId) -> bool {
        self.inner.abos.contains_key(&(*raum, *sender, *zuhoerer))
    }

    /// Gesamtzahl weitergeleiteter Frames
    pub fn weitergeleitet(&self) -> u64 {
        self.inner.weitergeleitet.load(Ordering::Relaxed)
    }

    /// Entfernt einen Teilnehmer ohne ihn zu benachrichtigen
    ///
    /// Die uebrigen Mitglieder erhalten `Zeitueberschreitung`.
    pub fn zeitueberschreitung(&self, raum: RoomId, teilnehmer: ParticipantId) {
        if self.mitglied_entfernen(raum, teilnehmer).is_some() {
            tracing::info!(teilnehmer = %teilnehmer, raum = %raum, "Teilnehmer zeitueberschritten");
            self.verteilen(
                raum,
                Some(teilnehmer),
                TransportEreignis::Mitgliedschaft(MitgliedschaftsEreignis::Zeitueberschreitung {
                    teilnehmer,
                }),
            );
        }
    }

    /// Trennt einen Teilnehmer hart
    ///
    /// Der Teilnehmer erhaelt `Getrennt`, die uebrigen `Zeitueberschreitung`.
    pub fn trennen(&self, raum: RoomId, teilnehmer: ParticipantId, grund: &str) {
        if let Some(mitglied) = self.mitglied_entfernen(raum, teilnehmer) {
            let _ = mitglied.ereignis_tx.try_send(TransportEreignis::Getrennt {
                grund: grund.to_string(),
            });
            tracing::info!(teilnehmer = %teilnehmer, raum = %raum, grund, "Teilnehmer getrennt");
            self.verteilen(
                raum,
                Some(teilnehmer),
                TransportEreignis::Mitgliedschaft(MitgliedschaftsEreignis::Zeitueberschreitung {
                    teilnehmer,
                }),
            );
        }
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsfunktionen
    // -----------------------------------------------------------------------

    fn ist_mitglied(&self, raum: RoomId, teilnehmer: ParticipantId) -> bool {
        self.inner.mitglieder.contains_key(&(raum, teilnehmer))
    }

    fn mitglied_entfernen(&self, raum: RoomId, teilnehmer: ParticipantId) -> Option<Mitglied> {
        let (_, mitglied) = self.inner.mitglieder.remove(&(raum, teilnehmer))?;
        self.inner
            .abos
            .retain(|(r, s, z), _| !(*r == raum && (*s == teilnehmer || *z == teilnehmer)));
        Some(mitglied)
    }

    /// Stellt ein Ereignis allen Mitgliedern eines Raums zu
    fn verteilen(&self, raum: RoomId, ausser: Option<ParticipantId>, ereignis: TransportEreignis) {
        self.inner
            .mitglieder
            .iter()
            .filter(|e| e.key().0 == raum && Some(e.key().1) != ausser)
            .for_each(|e| zustellen(&e.ereignis_tx, e.key().1, ereignis.clone()));
    }

    /// Leitet einen Frame an alle Abonnenten des Senders weiter
    fn weiterleiten(&self, raum: RoomId, sender: ParticipantId, frame: Bytes) -> usize {
        let mut weitergeleitet = 0usize;

        self.inner
            .abos
            .iter()
            .filter(|e| e.key().0 == raum && e.key().1 == sender)
            .for_each(|e| match e.value().try_send(frame.clone()) {
                Ok(()) => weitergeleitet += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::trace!(
                        empfaenger = %e.key().2,
                        sender = %sender,
                        "Frame-Queue voll, Frame verworfen"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(empfaenger = %e.key().2, "Frame-Queue geschlossen");
                }
            });

        self.inner
            .weitergeleitet
            .fetch_add(weitergeleitet as u64, Ordering::Relaxed);
        weitergeleitet
    }
}

impl Default for LokalesRelais {
    fn default() -> Self {
        Self::new()
    }
}

fn zustellen(tx: &mpsc::Sender<TransportEreignis>, an: ParticipantId, ereignis: TransportEreignis) {
    match tx.try_send(ereignis) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(empfaenger = %an, "Ereignis-Queue voll, Ereignis verworfen");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(empfaenger = %an, "Ereignis-Queue geschlossen");
        }
    }
}

// ---------------------------------------------------------------------------
// RelaisVerbindung
// ---------------------------------------------------------------------------

/// Verbindung eines Teilnehmers zum Relais
///
/// Zaehlt Abonnier- und Abbestell-Aufrufe, damit Tests das Verhalten der
/// Raum-Sitzung von aussen pruefen koennen.
pub struct RelaisVerbindung {
    relais: LokalesRelais,
    teilnehmer: ParticipantId,
    raum: Mutex<Option<RoomId>>,
    abonniert: AtomicUsize,
    abbestellt: AtomicUsize,
}

impl RelaisVerbindung {
    pub fn teilnehmer(&self) -> ParticipantId {
        self.teilnehmer
    }

    /// Bisherige `subscribe`-Aufrufe
    pub fn abonnements(&self) -> usize {
        self.abonniert.load(Ordering::Relaxed)
    }

    /// Bisherige `unsubscribe`-Aufrufe
    pub fn abbestellungen(&self) -> usize {
        self.abbestellt.load(Ordering::Relaxed)
    }

    fn raum(&self) -> Result<RoomId, TransportFehler> {
        let raum = (*self.raum.lock()).ok_or(TransportFehler::NichtBeigetreten)?;
        if !self.relais.ist_mitglied(raum, self.teilnehmer) {
            return Err(TransportFehler::Getrennt("nicht mehr Mitglied".into()));
        }
        Ok(raum)
    }
}

impl std::fmt::Debug for RelaisVerbindung {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaisVerbindung")
            .field("teilnehmer", &self.teilnehmer)
            .field("raum", &*self.raum.lock())
            .finish()
    }
}

#[async_trait]
impl Transport for RelaisVerbindung {
    async fn join(
        &self,
        raum: RoomId,
        schluessel: SchluesselMaterial,
    ) -> Result<mpsc::Receiver<TransportEreignis>, TransportFehler> {
        let (tx, rx) = mpsc::channel(EREIGNIS_QUEUE_GROESSE);
        let inner = &self.relais.inner;

        // Bestehende Mitglieder zuerst sammeln, dann einfuegen
        let bestehende: Vec<(ParticipantId, SchluesselMaterial, Option<TrackHandle>)> = inner
            .mitglieder
            .iter()
            .filter(|e| e.key().0 == raum && e.key().1 != self.teilnehmer)
            .map(|e| (e.key().1, e.schluessel, e.track.clone()))
            .collect();

        for (teilnehmer, schluessel, track) in bestehende {
            zustellen(
                &tx,
                self.teilnehmer,
                TransportEreignis::Mitgliedschaft(MitgliedschaftsEreignis::Beigetreten {
                    teilnehmer,
                    schluessel,
                }),
            );
            if let Some(track) = track {
                zustellen(
                    &tx,
                    self.teilnehmer,
                    TransportEreignis::Mitgliedschaft(MitgliedschaftsEreignis::TrackRegistriert {
                        teilnehmer,
                        track,
                    }),
                );
            }
        }

        inner.mitglieder.insert(
            (raum, self.teilnehmer),
            Mitglied {
                schluessel,
                ereignis_tx: tx,
                track: None,
            },
        );
        *self.raum.lock() = Some(raum);

        self.relais.verteilen(
            raum,
            None,
            TransportEreignis::Mitgliedschaft(MitgliedschaftsEreignis::Beigetreten {
                teilnehmer: self.teilnehmer,
                schluessel,
            }),
        );
        tracing::info!(teilnehmer = %self.teilnehmer, raum = %raum, "Teilnehmer beigetreten");
        Ok(rx)
    }

    async fn publish(
        &self,
        teilnehmer: ParticipantId,
    ) -> Result<Box<dyn FrameSenke>, TransportFehler> {
        let raum = self.raum()?;
        let nummer = self.relais.inner.track_zaehler.fetch_add(1, Ordering::Relaxed);
        let track = TrackHandle(format!("audio-{nummer}"));

        match self.relais.inner.mitglieder.get_mut(&(raum, teilnehmer)) {
            Some(mut mitglied) => mitglied.track = Some(track.clone()),
            None => return Err(TransportFehler::UnbekannterTeilnehmer(teilnehmer)),
        }

        self.relais.verteilen(
            raum,
            None,
            TransportEreignis::Mitgliedschaft(MitgliedschaftsEreignis::TrackRegistriert {
                teilnehmer,
                track: track.clone(),
            }),
        );
        tracing::debug!(teilnehmer = %teilnehmer, track = %track, "Track veroeffentlicht");

        Ok(Box::new(RelaisSenke {
            relais: self.relais.clone(),
            raum,
            sender: teilnehmer,
        }))
    }

    async fn subscribe(
        &self,
        teilnehmer: ParticipantId,
    ) -> Result<mpsc::Receiver<Bytes>, TransportFehler> {
        let raum = self.raum()?;
        if !self.relais.ist_mitglied(raum, teilnehmer) {
            return Err(TransportFehler::UnbekannterTeilnehmer(teilnehmer));
        }
        let (tx, rx) = mpsc::channel(SEND_QUEUE_GROESSE);
        self.relais
            .inner
            .abos
            .insert((raum, teilnehmer, self.teilnehmer), tx);
        self.abonniert.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(zuhoerer = %self.teilnehmer, sender = %teilnehmer, "Abonniert");
        Ok(rx)
    }

    async fn unsubscribe(&self, teilnehmer: ParticipantId) -> Result<(), TransportFehler> {
        let raum = self.raum()?;
        self.relais
            .inner
            .abos
            .remove(&(raum, teilnehmer, self.teilnehmer));
        self.abbestellt.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(zuhoerer = %self.teilnehmer, sender = %teilnehmer, "Abbestellt");
        Ok(())
    }

    async fn control_senden(
        &self,
        an: ParticipantId,
        daten: Vec<u8>,
    ) -> Result<(), TransportFehler> {
        let raum = self.raum()?;
        let mitglied = self
            .relais
            .inner
            .mitglieder
            .get(&(raum, an))
            .ok_or(TransportFehler::UnbekannterTeilnehmer(an))?;
        mitglied
            .ereignis_tx
            .try_send(TransportEreignis::Kontrolle {
                von: self.teilnehmer,
                daten,
            })
            .map_err(|_| TransportFehler::Ueberlastet)
    }

    async fn leave(&self) -> Result<(), TransportFehler> {
        let Some(raum) = self.raum.lock().take() else {
            return Ok(());
        };
        if self.relais.mitglied_entfernen(raum, self.teilnehmer).is_some() {
            self.relais.verteilen(
                raum,
                None,
                TransportEreignis::Mitgliedschaft(MitgliedschaftsEreignis::Verlassen {
                    teilnehmer: self.teilnehmer,
                }),
            );
            tracing::info!(teilnehmer = %self.teilnehmer, raum = %raum, "Teilnehmer verlassen");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RelaisSenke
// ---------------------------------------------------------------------------

struct RelaisSenke {
    relais: LokalesRelais,
    raum: RoomId,
    sender: ParticipantId,
}

impl FrameSenke for RelaisSenke {
    fn senden(&self, frame: Bytes) -> Result<(), TransportFehler> {
        if !self.relais.ist_mitglied(self.raum, self.sender) {
            return Err(TransportFehler::Getrennt("Track nicht mehr registriert".into()));
        }
        let anzahl = self.relais.weiterleiten(self.raum, self.sender, frame);
        tracing::trace!(sender = %self.sender, empfaenger = anzahl, "Frame weitergeleitet");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
