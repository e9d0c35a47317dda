//! Raum-Sitzung (RoomSession)
//!
//! Besitzt die Naehe-/Mitgliedschafts-Schleife eines Raums und ist der
//! einzige Schreiber fuer Schluesselplan, Teilnehmerzustaende und den
//! Hoerbarkeits-Snapshot.
//!
//! ## Zustaende pro Teilnehmer
//! ```text
//! Joining -> Active <-> KeyRotating -> Leaving -> Gone
//! ```
//! - `Joining -> Active`: Track registriert
//! - `Active -> KeyRotating`: Epoch-Wechsel, neuer Schluessel an den Teilnehmer unterwegs
//! - `KeyRotating -> Active`: Teilnehmer hat die neue Epoch bestaetigt
//! - `-> Leaving -> Gone`: Verlassen oder Zeitueberschreitung
//!
//! Der Schluesselplan liegt hinter einem kurzen Lock, der nie ueber ein
//! `.await` gehalten wird.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use roguetalk_core::event::MitgliedschaftsEreignis;
use roguetalk_core::types::{LevelId, ParticipantId, RoomId, SchluesselMaterial, TrackHandle};
use roguetalk_crypto::{Identity, KeyManager, SchluesselEreignis};
use roguetalk_observability::VoiceMetrics;
use roguetalk_protocol::SchluesselNachricht;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::config::VoiceConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::level::LevelQuelle;
use crate::pipeline::MixerBefehl;
use crate::proximity::{AudibilitySnapshot, HoerbarkeitsDiff, Kandidat, ProximityEngine};
use crate::transport::{FrameSenke, Transport, TransportEreignis, TransportFehler};

// ---------------------------------------------------------------------------
// Oeffentliche Typen
// ---------------------------------------------------------------------------

/// Lebenszyklus eines Teilnehmers aus Sicht der lokalen Sitzung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeilnehmerZustand {
    Joining,
    Active,
    KeyRotating,
    Leaving,
    Gone,
}

impl TeilnehmerZustand {
    /// Zustand nach Verlassen oder Zeitueberschreitung. Wer nie aktiv war,
    /// geht direkt nach `Gone`; `None` wenn schon weg.
    pub fn beim_abgang(self) -> Option<Self> {
        match self {
            Self::Joining => Some(Self::Gone),
            Self::Active | Self::KeyRotating | Self::Leaving => Some(Self::Leaving),
            Self::Gone => None,
        }
    }
}

/// Lesezugriff auf den aktuellen Hoerbarkeits-Snapshot
///
/// Blockiert nie: der Schreiber tauscht nur den `Arc` aus.
#[derive(Debug, Clone)]
pub struct AudibilityLeser {
    rx: watch::Receiver<Arc<AudibilitySnapshot>>,
}

impl AudibilityLeser {
    pub fn aus_empfaenger(rx: watch::Receiver<Arc<AudibilitySnapshot>>) -> Self {
        Self { rx }
    }

    pub fn snapshot(&self) -> Arc<AudibilitySnapshot> {
        Arc::clone(&self.rx.borrow())
    }

    /// Alle Sender, die `zuhoerer` gerade hoert
    pub fn current_audible_set(&self, zuhoerer: &ParticipantId) -> HashSet<ParticipantId> {
        self.rx.borrow().audible_set(zuhoerer)
    }
}

/// Befehle an eine laufende Sitzung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionBefehl {
    Stumm { teilnehmer: ParticipantId, stumm: bool },
    Verlassen,
}

/// Alles, was fuer den Beitritt gebraucht wird
pub struct SitzungsParameter {
    pub raum: RoomId,
    pub lokal: ParticipantId,
    pub identitaet: Identity,
    pub config: VoiceConfig,
    pub transport: Arc<dyn Transport>,
    pub level: Arc<dyn LevelQuelle>,
    pub level_id: LevelId,
    pub metriken: VoiceMetrics,
    /// false fuer reine Sprecher (Bots): keine Abonnements
    pub empfang: bool,
}

/// Ergebnis von `RoomSession::beitreten`
pub struct Beitritt {
    pub sitzung: RoomSession,
    pub ereignisse: mpsc::Receiver<TransportEreignis>,
    /// Senke fuer den eigenen Track
    pub senke: Box<dyn FrameSenke>,
    /// Gegenstueck fuer die Mixer-Stufe
    pub mixer_befehle: Receiver<MixerBefehl>,
}

// ---------------------------------------------------------------------------
// RoomSession
// ---------------------------------------------------------------------------

struct Eintrag {
    schluessel: SchluesselMaterial,
    track: Option<TrackHandle>,
    zustand: TeilnehmerZustand,
    /// Epoch, deren Bestaetigung noch aussteht
    erwartete_epoche: Option<u32>,
}

/// Raum-Sitzung des lokalen Teilnehmers
pub struct RoomSession {
    raum: RoomId,
    lokal: ParticipantId,
    transport: Arc<dyn Transport>,
    schluessel: Arc<Mutex<KeyManager>>,
    engine: ProximityEngine,
    level: Arc<dyn LevelQuelle>,
    level_id: LevelId,
    teilnehmer: HashMap<ParticipantId, Eintrag>,
    abonniert: HashSet<ParticipantId>,
    stumm: HashSet<ParticipantId>,
    snapshot_tx: watch::Sender<Arc<AudibilitySnapshot>>,
    mixer_tx: Sender<MixerBefehl>,
    metriken: VoiceMetrics,
    takt: Duration,
    tick: u64,
    empfang: bool,
    /// Eigenes Beitritts-Ereignis gesehen
    beigetreten: bool,
    beendet: bool,
}

impl RoomSession {
    /// Tritt dem Raum bei und veroeffentlicht den eigenen Track
    pub async fn beitreten(p: SitzungsParameter) -> VoiceResult<Beitritt> {
        p.config.validieren()?;
        let material = p.identitaet.schluessel_material();
        let km = KeyManager::new(
            p.raum,
            p.lokal,
            p.identitaet,
            p.config.schluessel.key_manager_config(),
        )?;

        let ereignisse = p.transport.join(p.raum, material).await?;
        let senke = p.transport.publish(p.lokal).await?;

        let (snapshot_tx, _) = watch::channel(Arc::new(AudibilitySnapshot::default()));
        let (mixer_tx, mixer_befehle) = crossbeam_channel::unbounded();

        info!(teilnehmer = %p.lokal, raum = %p.raum, level = %p.level_id, "Raum-Sitzung gestartet");

        let sitzung = RoomSession {
            raum: p.raum,
            lokal: p.lokal,
            transport: p.transport,
            schluessel: Arc::new(Mutex::new(km)),
            engine: ProximityEngine::new(p.config.naehe.clone()),
            level: p.level,
            level_id: p.level_id,
            teilnehmer: HashMap::new(),
            abonniert: HashSet::new(),
            stumm: HashSet::new(),
            snapshot_tx,
            mixer_tx,
            metriken: p.metriken,
            takt: p.config.naehe_takt(),
            tick: 0,
            empfang: p.empfang,
            beigetreten: false,
            beendet: false,
        };

        Ok(Beitritt {
            sitzung,
            ereignisse,
            senke,
            mixer_befehle,
        })
    }

    pub fn raum(&self) -> RoomId {
        self.raum
    }

    pub fn lokal(&self) -> ParticipantId {
        self.lokal
    }

    /// Geteilter Schluesselplan fuer die Audio-Stufen
    pub fn schluessel(&self) -> Arc<Mutex<KeyManager>> {
        Arc::clone(&self.schluessel)
    }

    pub fn leser(&self) -> AudibilityLeser {
        AudibilityLeser {
            rx: self.snapshot_tx.subscribe(),
        }
    }

    pub fn metriken(&self) -> &VoiceMetrics {
        &self.metriken
    }

    pub fn zustand(&self, teilnehmer: &ParticipantId) -> Option<TeilnehmerZustand> {
        self.teilnehmer.get(teilnehmer).map(|e| e.zustand)
    }

    pub fn track(&self, teilnehmer: &ParticipantId) -> Option<&TrackHandle> {
        self.teilnehmer.get(teilnehmer).and_then(|e| e.track.as_ref())
    }

    pub fn ist_abonniert(&self, sender: &ParticipantId) -> bool {
        self.abonniert.contains(sender)
    }

    pub fn ist_beendet(&self) -> bool {
        self.beendet
    }

    /// Schaltet einen Teilnehmer stumm; wirkt ab dem naechsten Tick
    pub fn stumm_setzen(&mut self, teilnehmer: ParticipantId, stumm: bool) {
        if stumm {
            self.stumm.insert(teilnehmer);
        } else {
            self.stumm.remove(&teilnehmer);
        }
        debug!(teilnehmer = %teilnehmer, stumm, "Stummschaltung geaendert");
    }

    // -----------------------------------------------------------------------
    // Naehe-Tick
    // -----------------------------------------------------------------------

    /// Berechnet die Hoerbarkeit neu und setzt den Diff um
    pub async fn proximity_tick(&mut self, jetzt: Instant) -> VoiceResult<HoerbarkeitsDiff> {
        if self.beendet {
            return Err(VoiceError::Beendet);
        }
        self.tick += 1;

        let kandidaten: Vec<Kandidat> = self
            .teilnehmer
            .iter()
            .filter(|(_, e)| {
                e.track.is_some()
                    && matches!(
                        e.zustand,
                        TeilnehmerZustand::Active | TeilnehmerZustand::KeyRotating
                    )
            })
            .map(|(id, _)| Kandidat {
                id: *id,
                position: self.level.position(id),
                stumm: self.stumm.contains(id),
            })
            .collect();

        let karte = self.level.occlusion(&self.level_id);
        let update = self
            .engine
            .compute_audible(&kandidaten, karte.as_deref(), self.tick);
        self.snapshot_tx.send_replace(Arc::new(update.snapshot));
        let diff = update.diff;

        for (zuhoerer, sender) in &diff.neu_hoerbar {
            if *zuhoerer == self.lokal {
                self.abonnieren(*sender).await;
            }
            if let Some(peer) = self.gegenueber(zuhoerer, sender) {
                self.handshake_ausloesen(peer, jetzt).await?;
            }
        }

        for (zuhoerer, sender) in &diff.nicht_mehr_hoerbar {
            if *zuhoerer == self.lokal {
                self.abbestellen(*sender).await;
            }
            if let Some(peer) = self.gegenueber(zuhoerer, sender) {
                if !self.engine.ist_hoerbar(&self.lokal, &peer)
                    && !self.engine.ist_hoerbar(&peer, &self.lokal)
                {
                    self.schluessel.lock().paar_unhoerbar(&peer, jetzt);
                    debug!(peer = %peer, "Paar nicht mehr hoerbar, Sitzung zum Loeschen vorgemerkt");
                }
            }
        }

        let abgelaufen = self.schluessel.lock().handshake_timeouts(jetzt);
        for &peer in &abgelaufen {
            let fehler = VoiceError::HandshakeTimeout(peer);
            warn!(fehler = %fehler, "Peer gilt bis zum naechsten Versuch als unhoerbar");
            self.metriken.handshake_timeouts.inc();
            self.abbestellen(peer).await;
            self.engine.vergessen(&self.lokal, &peer);
            self.engine.vergessen(&peer, &self.lokal);
        }
        if !abgelaufen.is_empty() {
            let mut snapshot = (**self.snapshot_tx.borrow()).clone();
            for peer in &abgelaufen {
                snapshot.paar_entfernen(&self.lokal, peer);
            }
            self.snapshot_tx.send_replace(Arc::new(snapshot));
        }

        let entfernt = self.schluessel.lock().abgelaufene_entfernen(jetzt);
        if entfernt > 0 {
            debug!(entfernt, "Abgelaufenes Schluesselmaterial verworfen");
        }

        self.messwerte_aktualisieren();
        Ok(diff)
    }

    /// Der andere Teilnehmer eines Paars, wenn der lokale beteiligt ist
    fn gegenueber(&self, zuhoerer: &ParticipantId, sender: &ParticipantId) -> Option<ParticipantId> {
        if *zuhoerer == self.lokal {
            Some(*sender)
        } else if *sender == self.lokal {
            Some(*zuhoerer)
        } else {
            None
        }
    }

    async fn handshake_ausloesen(&mut self, peer: ParticipantId, jetzt: Instant) -> VoiceResult<()> {
        let nachricht = {
            let mut km = self.schluessel.lock();
            km.paar_hoerbar(&peer);
            km.handshake_starten(peer, jetzt)?
        };
        if let Some(nachricht) = nachricht {
            self.metriken.handshakes_gestartet.inc();
            self.senden(nachricht).await;
        }
        Ok(())
    }

    async fn abonnieren(&mut self, sender: ParticipantId) {
        if !self.empfang || self.abonniert.contains(&sender) {
            return;
        }
        match self.transport.subscribe(sender).await {
            Ok(quelle) => {
                self.abonniert.insert(sender);
                if self
                    .mixer_tx
                    .send(MixerBefehl::Abonniert { sender, quelle })
                    .is_err()
                {
                    debug!(sender = %sender, "Mixer nicht mehr aktiv");
                }
            }
            Err(e) => warn!(sender = %sender, fehler = %e, "Abonnieren fehlgeschlagen"),
        }
    }

    async fn abbestellen(&mut self, sender: ParticipantId) {
        if !self.abonniert.remove(&sender) {
            return;
        }
        if let Err(e) = self.transport.unsubscribe(sender).await {
            warn!(sender = %sender, fehler = %e, "Abbestellen fehlgeschlagen");
        }
        let _ = self.mixer_tx.send(MixerBefehl::Abbestellt(sender));
    }

    async fn senden(&self, nachricht: SchluesselNachricht) {
        let an = nachricht.an();
        let daten = match nachricht.encode() {
            Ok(d) => d,
            Err(e) => {
                error!(fehler = %e, "Schluessel-Nachricht nicht serialisierbar");
                return;
            }
        };
        if let Err(e) = self.transport.control_senden(an, daten).await {
            warn!(an = %an, fehler = %e, "Kontroll-Nachricht nicht zugestellt");
        }
    }

    fn messwerte_aktualisieren(&self) {
        self.metriken
            .abonnements_aktiv
            .set(self.abonniert.len() as i64);
        let aktiv = self
            .teilnehmer
            .values()
            .filter(|e| e.zustand != TeilnehmerZustand::Gone)
            .count();
        self.metriken.teilnehmer.set(aktiv as i64);
    }

    // -----------------------------------------------------------------------
    // Ereignisse
    // -----------------------------------------------------------------------

    /// Verarbeitet ein Transport-Ereignis
    ///
    /// `Getrennt` baut die Sitzung ab und wird als Fehler gemeldet.
    pub async fn ereignis_verarbeiten(
        &mut self,
        ereignis: TransportEreignis,
        jetzt: Instant,
    ) -> VoiceResult<()> {
        if self.beendet {
            return Err(VoiceError::Beendet);
        }
        match ereignis {
            TransportEreignis::Mitgliedschaft(m) => self.mitgliedschaft_verarbeiten(m).await,
            TransportEreignis::Kontrolle { von, daten } => {
                self.kontrolle_verarbeiten(von, &daten, jetzt).await;
                Ok(())
            }
            TransportEreignis::Getrennt { grund } => {
                error!(raum = %self.raum, grund = %grund, "Transport getrennt, baue Raum ab");
                self.abbauen();
                Err(TransportFehler::Getrennt(grund).into())
            }
        }
    }

    /// Verarbeitet alle sofort verfuegbaren Ereignisse
    pub async fn anstehende_verarbeiten(
        &mut self,
        ereignisse: &mut mpsc::Receiver<TransportEreignis>,
        jetzt: Instant,
    ) -> VoiceResult<usize> {
        let mut anzahl = 0;
        while !self.beendet {
            let Ok(ereignis) = ereignisse.try_recv() else {
                break;
            };
            self.ereignis_verarbeiten(ereignis, jetzt).await?;
            anzahl += 1;
        }
        Ok(anzahl)
    }

    async fn mitgliedschaft_verarbeiten(&mut self, ereignis: MitgliedschaftsEreignis) -> VoiceResult<()> {
        match ereignis {
            MitgliedschaftsEreignis::Beigetreten {
                teilnehmer,
                schluessel,
            } => {
                let bekannt = self
                    .teilnehmer
                    .get(&teilnehmer)
                    .is_some_and(|e| e.zustand != TeilnehmerZustand::Gone);
                if bekannt {
                    trace!(teilnehmer = %teilnehmer, "Beitritt bereits bekannt");
                    return Ok(());
                }
                self.teilnehmer.insert(
                    teilnehmer,
                    Eintrag {
                        schluessel,
                        track: None,
                        zustand: TeilnehmerZustand::Joining,
                        erwartete_epoche: None,
                    },
                );
                info!(teilnehmer = %teilnehmer, "Teilnehmer beigetreten");

                if teilnehmer == self.lokal {
                    self.beigetreten = true;
                } else if self.beigetreten {
                    self.rotieren().await?;
                }
            }

            MitgliedschaftsEreignis::TrackRegistriert { teilnehmer, track } => {
                let Some(eintrag) = self.teilnehmer.get_mut(&teilnehmer) else {
                    warn!(teilnehmer = %teilnehmer, "Track fuer unbekannten Teilnehmer");
                    return Ok(());
                };
                eintrag.track = Some(track);
                if eintrag.zustand == TeilnehmerZustand::Joining {
                    eintrag.zustand = TeilnehmerZustand::Active;
                    info!(teilnehmer = %teilnehmer, "Teilnehmer aktiv");
                }
            }

            MitgliedschaftsEreignis::Verlassen { teilnehmer } => {
                if teilnehmer == self.lokal {
                    self.abbauen();
                } else {
                    self.teilnehmer_entfernen(teilnehmer, "verlassen").await?;
                }
            }

            MitgliedschaftsEreignis::Zeitueberschreitung { teilnehmer } => {
                if teilnehmer == self.lokal {
                    self.abbauen();
                    return Err(TransportFehler::Getrennt("Zeitueberschreitung".into()).into());
                }
                self.teilnehmer_entfernen(teilnehmer, "Zeitueberschreitung").await?;
            }
        }
        self.messwerte_aktualisieren();
        Ok(())
    }

    /// (Leaving ->) Gone samt Abbau aller Ressourcen zu diesem Teilnehmer
    async fn teilnehmer_entfernen(&mut self, teilnehmer: ParticipantId, grund: &str) -> VoiceResult<()> {
        let Some(e) = self.teilnehmer.get_mut(&teilnehmer) else {
            return Ok(());
        };
        let Some(naechster) = e.zustand.beim_abgang() else {
            return Ok(());
        };
        e.zustand = naechster;
        info!(teilnehmer = %teilnehmer, grund, zustand = ?naechster, "Teilnehmer verlaesst den Raum");

        self.abbestellen(teilnehmer).await;
        self.schluessel.lock().paar_entfernen(&teilnehmer);
        self.engine.entfernen(&teilnehmer);
        self.stumm.remove(&teilnehmer);

        if let Some(e) = self.teilnehmer.get_mut(&teilnehmer) {
            e.zustand = TeilnehmerZustand::Gone;
            e.erwartete_epoche = None;
        }
        self.rotieren().await
    }

    /// Neue Epoch, neuer Schluessel an alle Paar-Sitzungen
    async fn rotieren(&mut self) -> VoiceResult<()> {
        let (epoche, nachrichten) = {
            let mut km = self.schluessel.lock();
            let epoche = km.rotieren()?;
            let mut nachrichten = Vec::new();
            for peer in km.etablierte_paare() {
                nachrichten.push((peer, km.sender_schluessel_fuer(&peer)?));
            }
            (epoche, nachrichten)
        };
        self.metriken.schluessel_rotationen.inc();
        info!(raum = %self.raum, epoche, empfaenger = nachrichten.len(), "Schluessel rotiert");

        for (peer, nachricht) in nachrichten {
            if let Some(e) = self.teilnehmer.get_mut(&peer) {
                if matches!(
                    e.zustand,
                    TeilnehmerZustand::Active | TeilnehmerZustand::KeyRotating
                ) {
                    e.zustand = TeilnehmerZustand::KeyRotating;
                    e.erwartete_epoche = Some(epoche);
                }
            }
            self.senden(nachricht).await;
        }
        Ok(())
    }

    async fn kontrolle_verarbeiten(&mut self, von: ParticipantId, daten: &[u8], jetzt: Instant) {
        let nachricht = match SchluesselNachricht::decode(daten) {
            Ok(n) => n,
            Err(e) => {
                warn!(von = %von, fehler = %e, "Unlesbare Kontroll-Nachricht");
                return;
            }
        };
        if nachricht.von() != von {
            warn!(von = %von, angegeben = %nachricht.von(), "Absender passt nicht zur Verbindung");
            return;
        }
        let material = match self.teilnehmer.get(&von) {
            Some(e) if e.zustand != TeilnehmerZustand::Gone => e.schluessel,
            _ => {
                debug!(von = %von, "Kontroll-Nachricht von unbekanntem Teilnehmer");
                return;
            }
        };

        let verarbeitung = {
            let mut km = self.schluessel.lock();
            km.nachricht_verarbeiten(&nachricht, &material, jetzt)
        };
        let verarbeitung = match verarbeitung {
            Ok(v) => v,
            Err(e) => {
                warn!(von = %von, fehler = %e, "Schluessel-Nachricht abgelehnt");
                return;
            }
        };

        for ereignis in verarbeitung.ereignisse {
            match ereignis {
                SchluesselEreignis::PaarEtabliert(peer) => {
                    self.metriken.handshakes_abgeschlossen.inc();
                    info!(peer = %peer, "Paar-Sitzung etabliert");
                }
                SchluesselEreignis::SchluesselInstalliert { teilnehmer, epoche } => {
                    debug!(teilnehmer = %teilnehmer, epoche, "Empfangs-Schluessel installiert");
                }
                SchluesselEreignis::Bestaetigt { teilnehmer, epoche } => {
                    if let Some(e) = self.teilnehmer.get_mut(&teilnehmer) {
                        if e.zustand == TeilnehmerZustand::KeyRotating
                            && e.erwartete_epoche == Some(epoche)
                        {
                            e.zustand = TeilnehmerZustand::Active;
                            e.erwartete_epoche = None;
                            debug!(teilnehmer = %teilnehmer, epoche, "Rotation bestaetigt");
                        }
                    }
                }
            }
        }

        for antwort in verarbeitung.antworten {
            self.senden(antwort).await;
        }
    }

    // -----------------------------------------------------------------------
    // Abbau
    // -----------------------------------------------------------------------

    /// Verlaesst den Raum geordnet
    pub async fn verlassen(&mut self) {
        if self.beendet {
            return;
        }
        if let Some(e) = self.teilnehmer.get_mut(&self.lokal) {
            e.zustand = TeilnehmerZustand::Leaving;
        }
        if let Err(e) = self.transport.leave().await {
            warn!(fehler = %e, "Verlassen beim Transport fehlgeschlagen");
        }
        self.abbauen();
    }

    /// Vollstaendiger Abbau: alle Teilnehmer Gone, alle Schluessel verworfen
    pub fn abbauen(&mut self) {
        if self.beendet {
            return;
        }
        for sender in self.abonniert.drain() {
            let _ = self.mixer_tx.send(MixerBefehl::Abbestellt(sender));
        }
        let _ = self.mixer_tx.send(MixerBefehl::Zuruecksetzen);

        for e in self.teilnehmer.values_mut() {
            e.zustand = TeilnehmerZustand::Gone;
            e.erwartete_epoche = None;
        }
        self.schluessel.lock().alles_loeschen();
        self.engine.zuruecksetzen();
        self.snapshot_tx.send_replace(Arc::new(AudibilitySnapshot {
            tick: self.tick,
            ..AudibilitySnapshot::default()
        }));
        self.beendet = true;
        self.messwerte_aktualisieren();
        info!(raum = %self.raum, teilnehmer = %self.lokal, "Raum-Sitzung abgebaut");
    }

    // -----------------------------------------------------------------------
    // Schleife
    // -----------------------------------------------------------------------

    /// Naehe-/Mitgliedschafts-Schleife
    ///
    /// Endet mit `Ok` nach `SessionBefehl::Verlassen` oder eigenem Austritt,
    /// mit `Err` bei Transport-Trennung.
    pub async fn ausfuehren(
        mut self,
        mut ereignisse: mpsc::Receiver<TransportEreignis>,
        mut befehle: mpsc::Receiver<SessionBefehl>,
    ) -> VoiceResult<()> {
        let mut takt = tokio::time::interval(self.takt);
        takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = takt.tick() => {
                    if let Err(e) = self.proximity_tick(Instant::now()).await {
                        if e.ist_fatal() {
                            return Err(e);
                        }
                        warn!(fehler = %e, "Naehe-Tick fehlgeschlagen");
                    }
                }
                ereignis = ereignisse.recv() => match ereignis {
                    Some(ereignis) => self.ereignis_verarbeiten(ereignis, Instant::now()).await?,
                    None => {
                        self.abbauen();
                        return Err(TransportFehler::Getrennt("Ereignisstrom beendet".into()).into());
                    }
                },
                befehl = befehle.recv() => match befehl {
                    Some(SessionBefehl::Stumm { teilnehmer, stumm }) => {
                        self.stumm_setzen(teilnehmer, stumm);
                    }
                    Some(SessionBefehl::Verlassen) | None => {
                        self.verlassen().await;
                        return Ok(());
                    }
                },
            }

            if self.beendet {
                return Ok(());
            }
        }
    }
}

impl std::fmt::Debug for RoomSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSession")
            .field("raum", &self.raum)
            .field("lokal", &self.lokal)
            .field("teilnehmer", &self.teilnehmer.len())
            .field("abonniert", &self.abonniert.len())
            .field("tick", &self.tick)
            .field("beendet", &self.beendet)
            .finish()
    }
}
