//! Audio-Pipeline: Aufnahme- und Mixer-Schleife im 20ms-Takt
//!
//! ## Aufnahme
//! `PcmQuelle` -> Opus-Encoder -> `wrap_frame` -> Leitungsrahmen -> Transport.
//! Mikrofon und Bots steigen an derselben Stelle ein.
//!
//! ## Empfang und Mischen
//! Pro abonniertem Sender: Rahmen lesen -> `unwrap_frame` -> Opus-Decoder ->
//! Jitter Buffer. Pro Takt wird aus jedem Puffer ein Frame entnommen (oder
//! per PLC verschleiert), mit der Lautstaerke skaliert, summiert, begrenzt
//! und an die Wiedergabe geschrieben.
//!
//! Beide Schleifen warten nie auf Netz oder Handshakes. Jitter Buffer und
//! Decoder gehoeren exklusiv der Mixer-Stufe.

use bytes::Bytes;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use roguetalk_audio::{FrameCodec, Mixer, OpusDecoder, OpusEncoder, PcmQuelle, PcmSenke};
use roguetalk_core::types::ParticipantId;
use roguetalk_crypto::KeyManager;
use roguetalk_observability::VoiceMetrics;
use roguetalk_protocol::FRAME_DAUER_MS;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{VoiceError, VoiceResult};
use crate::jitter_buffer::{Ausspielen, Einfuegen, JitterBuffer, JitterBufferConfig};
use crate::session::AudibilityLeser;
use crate::transport::FrameSenke;

/// Befehle der Raum-Sitzung an die Mixer-Stufe
#[derive(Debug)]
pub enum MixerBefehl {
    /// Neuer Sender, Frames kommen ueber `quelle`
    Abonniert {
        sender: ParticipantId,
        quelle: mpsc::Receiver<Bytes>,
    },
    Abbestellt(ParticipantId),
    /// Alle Stroeme verwerfen (Raum-Abbau)
    Zuruecksetzen,
}

// ---------------------------------------------------------------------------
// Aufnahme
// ---------------------------------------------------------------------------

/// Was ein Aufnahme-Takt bewirkt hat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AufnahmeErgebnis {
    Gesendet { sequenz: u32 },
    /// Niemand hoert zu, nichts gesendet
    Unterdrueckt,
    /// Quelle hatte in diesem Takt nichts
    KeinFrame,
}

/// Aufnahme-Stufe eines Teilnehmers (Mensch oder Bot)
pub struct AufnahmeStufe {
    lokal: ParticipantId,
    quelle: Box<dyn PcmQuelle>,
    encoder: OpusEncoder,
    codec: FrameCodec,
    schluessel: Arc<Mutex<KeyManager>>,
    senke: Box<dyn FrameSenke>,
    hoerbarkeit: AudibilityLeser,
    metriken: VoiceMetrics,
    /// Laeuft ueber Epochen hinweg weiter; `None` nach Frame `u32::MAX`
    naechste_seq: Option<u32>,
}

impl AufnahmeStufe {
    pub fn new(
        lokal: ParticipantId,
        quelle: Box<dyn PcmQuelle>,
        codec: FrameCodec,
        schluessel: Arc<Mutex<KeyManager>>,
        senke: Box<dyn FrameSenke>,
        hoerbarkeit: AudibilityLeser,
        metriken: VoiceMetrics,
    ) -> VoiceResult<Self> {
        let encoder = codec.encoder()?;
        Ok(Self {
            lokal,
            quelle,
            encoder,
            codec,
            schluessel,
            senke,
            hoerbarkeit,
            metriken,
            naechste_seq: Some(0),
        })
    }

    /// Ein 20ms-Takt
    ///
    /// Ein Geraetefehler der Quelle wird als fataler Fehler zurueckgegeben,
    /// ebenso ein erschoepfter Sequenzraum (bei 50 Frames/s nach gut 2,7 Jahren).
    pub fn tick(&mut self) -> VoiceResult<AufnahmeErgebnis> {
        let Some(pcm) = self.quelle.naechster_frame()? else {
            return Ok(AufnahmeErgebnis::KeinFrame);
        };

        if !self.hoerbarkeit.snapshot().hat_zuhoerer(&self.lokal) {
            self.metriken.aufnahme_unterdrueckt.inc();
            return Ok(AufnahmeErgebnis::Unterdrueckt);
        }

        let sequenz = self.naechste_seq.ok_or(VoiceError::SequenzErschoepft)?;
        let opus = self.encoder.encode(&pcm)?;
        let frame = self.schluessel.lock().wrap_frame(&opus, &self.lokal, sequenz)?;
        let daten = self
            .codec
            .rahmen(frame.epoche, frame.sequenz, frame.ciphertext, frame.tag);
        self.senke.senden(daten)?;

        self.naechste_seq = sequenz.checked_add(1);
        self.metriken.frames_gesendet.inc();
        trace!(sender = %self.lokal, sequenz, epoche = frame.epoche, "Frame gesendet");
        Ok(AufnahmeErgebnis::Gesendet { sequenz })
    }

    pub fn bezeichnung(&self) -> &str {
        self.quelle.bezeichnung()
    }
}

// ---------------------------------------------------------------------------
// Empfang und Mischen
// ---------------------------------------------------------------------------

/// Empfangsstatistik pro Sender
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmpfangsStatistik {
    pub entschluesselt: u64,
    pub dekodiert: u64,
    /// Unlesbar, nicht entschluesselbar oder nicht dekodierbar
    pub verworfen: u64,
    /// Fehlende Sequenznummern zwischen zwei entschluesselten Frames
    pub luecken: u64,
    /// Sequenznummern, die nicht groesser als die vorige waren
    pub nicht_monoton: u64,
    pub letzte_sequenz: Option<u32>,
}

impl EmpfangsStatistik {
    fn sequenz_erfassen(&mut self, seq: u32) {
        match self.letzte_sequenz {
            Some(letzte) if seq <= letzte => self.nicht_monoton += 1,
            Some(letzte) => {
                self.luecken += u64::from(seq - letzte - 1);
                self.letzte_sequenz = Some(seq);
            }
            None => self.letzte_sequenz = Some(seq),
        }
    }
}

struct Strom {
    quelle: mpsc::Receiver<Bytes>,
    decoder: OpusDecoder,
    puffer: JitterBuffer<Vec<f32>>,
    statistik: EmpfangsStatistik,
}

/// Ergebnis eines Mixer-Takts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MixerErgebnis {
    /// Frames aus den Puffern
    pub abgespielt: usize,
    /// Per PLC ersetzte Frames
    pub verschleiert: usize,
}

/// Mixer-Stufe des lokalen Zuhoerers
pub struct MixerStufe {
    lokal: ParticipantId,
    codec: FrameCodec,
    schluessel: Arc<Mutex<KeyManager>>,
    befehle: Receiver<MixerBefehl>,
    senke: Box<dyn PcmSenke>,
    hoerbarkeit: AudibilityLeser,
    metriken: VoiceMetrics,
    jitter: JitterBufferConfig,
    stroeme: HashMap<ParticipantId, Strom>,
    mixer: Mixer,
}

impl MixerStufe {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lokal: ParticipantId,
        codec: FrameCodec,
        schluessel: Arc<Mutex<KeyManager>>,
        befehle: Receiver<MixerBefehl>,
        senke: Box<dyn PcmSenke>,
        hoerbarkeit: AudibilityLeser,
        metriken: VoiceMetrics,
        jitter: JitterBufferConfig,
    ) -> Self {
        let mixer = Mixer::new(codec.samples_pro_frame());
        Self {
            lokal,
            codec,
            schluessel,
            befehle,
            senke,
            hoerbarkeit,
            metriken,
            jitter,
            stroeme: HashMap::new(),
            mixer,
        }
    }

    pub fn statistik(&self, sender: &ParticipantId) -> Option<&EmpfangsStatistik> {
        self.stroeme.get(sender).map(|s| &s.statistik)
    }

    pub fn strom_anzahl(&self) -> usize {
        self.stroeme.len()
    }

    /// Ein 20ms-Takt mit der aktuellen Uhrzeit
    pub fn tick(&mut self) -> VoiceResult<MixerErgebnis> {
        self.tick_zum(Instant::now())
    }

    /// Ein 20ms-Takt; `jetzt` entscheidet ueber das Kulanzfenster
    pub fn tick_zum(&mut self, jetzt: Instant) -> VoiceResult<MixerErgebnis> {
        self.befehle_verarbeiten()?;
        self.empfangen(jetzt);
        self.mischen()
    }

    fn befehle_verarbeiten(&mut self) -> VoiceResult<()> {
        while let Ok(befehl) = self.befehle.try_recv() {
            match befehl {
                MixerBefehl::Abonniert { sender, quelle } => {
                    let strom = Strom {
                        quelle,
                        decoder: self.codec.decoder()?,
                        puffer: JitterBuffer::new(self.jitter),
                        statistik: EmpfangsStatistik::default(),
                    };
                    self.stroeme.insert(sender, strom);
                    debug!(sender = %sender, "Strom hinzugefuegt");
                }
                MixerBefehl::Abbestellt(sender) => {
                    if self.stroeme.remove(&sender).is_some() {
                        debug!(sender = %sender, "Strom entfernt");
                    }
                }
                MixerBefehl::Zuruecksetzen => {
                    self.stroeme.clear();
                    debug!("Alle Stroeme verworfen");
                }
            }
        }
        Ok(())
    }

    /// Liest alle wartenden Frames, entschluesselt, dekodiert, puffert
    fn empfangen(&mut self, jetzt: Instant) {
        for (sender, strom) in self.stroeme.iter_mut() {
            while let Ok(daten) = strom.quelle.try_recv() {
                let frame = match self.codec.rahmen_lesen(&daten) {
                    Ok(f) => f,
                    Err(e) => {
                        strom.statistik.verworfen += 1;
                        self.metriken.entschluesselung_fehlgeschlagen.inc();
                        trace!(sender = %sender, fehler = %e, "Rahmen verworfen");
                        continue;
                    }
                };

                let klartext = self.schluessel.lock().unwrap_frame_zum(
                    &frame.payload,
                    &frame.tag,
                    sender,
                    frame.epoch,
                    frame.sequence,
                    jetzt,
                );
                let klartext = match klartext {
                    Ok(k) => k,
                    Err(e) => {
                        strom.statistik.verworfen += 1;
                        self.metriken.entschluesselung_fehlgeschlagen.inc();
                        trace!(
                            sender = %sender,
                            epoche = frame.epoch,
                            sequenz = frame.sequence,
                            fehler = %e,
                            "Frame nicht entschluesselbar"
                        );
                        continue;
                    }
                };
                strom.statistik.entschluesselt += 1;
                strom.statistik.sequenz_erfassen(frame.sequence);

                let pcm = match strom.decoder.decode(Some(&klartext)) {
                    Ok(p) => p,
                    Err(e) => {
                        strom.statistik.verworfen += 1;
                        warn!(sender = %sender, fehler = %e, "Frame nicht dekodierbar");
                        continue;
                    }
                };
                strom.statistik.dekodiert += 1;
                self.metriken.frames_empfangen.inc();

                match strom.puffer.push(frame.sequence, pcm) {
                    Einfuegen::Uebergelaufen { .. } => self.metriken.jitter_ueberlauf.inc(),
                    Einfuegen::Verspaetet => self.metriken.frames_verspaetet.inc(),
                    Einfuegen::Angenommen | Einfuegen::Duplikat => {}
                }
            }
        }
    }

    /// Entnimmt pro Strom einen Frame und schreibt die Summe
    fn mischen(&mut self) -> VoiceResult<MixerErgebnis> {
        let snapshot = self.hoerbarkeit.snapshot();
        let mut ergebnis = MixerErgebnis::default();
        self.mixer.beginnen();

        for (sender, strom) in self.stroeme.iter_mut() {
            let gain = snapshot.lautstaerke(&self.lokal, sender);
            self.metriken
                .jitter_tiefe
                .observe(strom.puffer.fuellstand() as f64);

            match strom.puffer.pop() {
                Ausspielen::Frame(pcm) => {
                    self.mixer.hinzufuegen(&pcm, gain);
                    ergebnis.abgespielt += 1;
                }
                Ausspielen::Verlust => {
                    self.metriken.frames_verschleiert.inc();
                    ergebnis.verschleiert += 1;
                    match strom.decoder.decode_plc() {
                        Ok(pcm) => self.mixer.hinzufuegen(&pcm, gain),
                        Err(e) => trace!(sender = %sender, fehler = %e, "PLC fehlgeschlagen, Stille"),
                    }
                }
                Ausspielen::Puffern => {}
            }
        }

        let gemischt = self.mixer.abschliessen();
        self.senke.schreiben(gemischt)?;
        Ok(ergebnis)
    }
}

// ---------------------------------------------------------------------------
// Schleifen
// ---------------------------------------------------------------------------

/// Startet Aufnahme- und Mixer-Schleife als Tokio-Tasks
pub struct AudioPipeline;

impl AudioPipeline {
    /// Startet die vorhandenen Stufen; Bots haben keine Mixer-Stufe
    pub fn starten(aufnahme: Option<AufnahmeStufe>, mixer: Option<MixerStufe>) -> PipelineHandle {
        let stopp = Arc::new(watch::channel(false).0);
        let mut aufgaben = Vec::new();

        if let Some(mut stufe) = aufnahme {
            let schleife = takt_schleife("aufnahme", Arc::clone(&stopp), stopp.subscribe(), move || {
                stufe.tick().map(|_| ())
            });
            aufgaben.push(("aufnahme", tokio::spawn(schleife)));
        }
        if let Some(mut stufe) = mixer {
            let schleife = takt_schleife("mixer", Arc::clone(&stopp), stopp.subscribe(), move || {
                stufe.tick().map(|_| ())
            });
            aufgaben.push(("mixer", tokio::spawn(schleife)));
        }

        info!(schleifen = aufgaben.len(), "Audio-Pipeline gestartet");
        PipelineHandle { stopp, aufgaben }
    }
}

/// Fuehrt `schritt` alle 20ms aus bis zum Stopp-Signal oder einem fatalen Fehler
///
/// Ein fataler Fehler stoppt auch die uebrigen Schleifen.
async fn takt_schleife<F>(
    name: &'static str,
    stopp_tx: Arc<watch::Sender<bool>>,
    mut stopp: watch::Receiver<bool>,
    mut schritt: F,
) -> VoiceResult<()>
where
    F: FnMut() -> VoiceResult<()> + Send,
{
    let mut takt = tokio::time::interval(Duration::from_millis(FRAME_DAUER_MS as u64));
    takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = takt.tick() => {
                if let Err(e) = schritt() {
                    if e.ist_fatal() {
                        error!(schleife = name, fehler = %e, "Schleife beendet, stoppe Pipeline");
                        stopp_tx.send_replace(true);
                        return Err(e);
                    }
                    warn!(schleife = name, fehler = %e, "Takt fehlgeschlagen");
                }
            }
            geaendert = stopp.changed() => {
                if geaendert.is_err() || *stopp.borrow() {
                    debug!(schleife = name, "Schleife gestoppt");
                    return Ok(());
                }
            }
        }
    }
}

/// Handle auf die laufenden Audio-Schleifen
///
/// Beim Beenden werden die Stufen und damit die Geraete freigegeben.
pub struct PipelineHandle {
    stopp: Arc<watch::Sender<bool>>,
    aufgaben: Vec<(&'static str, JoinHandle<VoiceResult<()>>)>,
}

impl PipelineHandle {
    /// true solange mindestens eine Schleife laeuft
    pub fn laeuft(&self) -> bool {
        self.aufgaben.iter().any(|(_, a)| !a.is_finished())
    }

    /// Stopp-Signal fuer Aufgaben ausserhalb der Pipeline
    pub(crate) fn stopp_signal(&self) -> Arc<watch::Sender<bool>> {
        Arc::clone(&self.stopp)
    }

    /// Stoppt alle Schleifen und meldet den ersten Fehler
    pub async fn beenden(self) -> VoiceResult<()> {
        self.stopp.send_replace(true);
        let mut ergebnis = Ok(());
        for (name, aufgabe) in self.aufgaben {
            match aufgabe.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if ergebnis.is_ok() {
                        ergebnis = Err(e);
                    }
                }
                Err(e) => {
                    error!(schleife = name, fehler = %e, "Schleife abgestuerzt");
                    if ergebnis.is_ok() {
                        ergebnis = Err(VoiceError::Beendet);
                    }
                }
            }
        }
        info!("Audio-Pipeline beendet");
        ergebnis
    }
}
