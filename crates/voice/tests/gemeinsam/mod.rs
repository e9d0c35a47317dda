//! Gemeinsame Helfer der Integration-Tests: ein Raum auf einem lokalen
//! Relais, Spieler mit manuell getakteten Schleifen.

#![allow(dead_code)]

use roguetalk_audio::{AudioResult, FrameCodec, PcmQuelle, SpeicherSenke};
use roguetalk_core::types::{LevelId, ParticipantId, Position, RoomId};
use roguetalk_crypto::{Identity, KeyManager};
use roguetalk_observability::VoiceMetrics;
use roguetalk_voice::config::VoiceConfig;
use roguetalk_voice::level::SpeicherLevel;
use roguetalk_voice::pipeline::{AufnahmeStufe, MixerStufe};
use roguetalk_voice::relay::{LokalesRelais, RelaisVerbindung};
use roguetalk_voice::session::{RoomSession, SitzungsParameter};
use roguetalk_voice::transport::TransportEreignis;
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Sinuston als Mikrofon-Ersatz
pub struct TonQuelle {
    samples_pro_frame: usize,
    phase: f32,
}

impl TonQuelle {
    pub fn new(samples_pro_frame: usize) -> Self {
        Self {
            samples_pro_frame,
            phase: 0.0,
        }
    }
}

impl PcmQuelle for TonQuelle {
    fn naechster_frame(&mut self) -> AudioResult<Option<Vec<f32>>> {
        let schritt = 2.0 * PI * 440.0 / 48_000.0;
        let frame = (0..self.samples_pro_frame)
            .map(|_| {
                self.phase = (self.phase + schritt) % (2.0 * PI);
                0.5 * self.phase.sin()
            })
            .collect();
        Ok(Some(frame))
    }
}

pub struct Spieler {
    pub id: ParticipantId,
    pub sitzung: RoomSession,
    pub ereignisse: mpsc::Receiver<TransportEreignis>,
    pub verbindung: Arc<RelaisVerbindung>,
    pub aufnahme: AufnahmeStufe,
    pub mixer: Option<MixerStufe>,
    pub wiedergabe: SpeicherSenke,
    pub metriken: VoiceMetrics,
}

impl Spieler {
    pub fn schluessel(&self) -> Arc<parking_lot::Mutex<KeyManager>> {
        self.sitzung.schluessel()
    }

    pub fn mixer(&mut self) -> &mut MixerStufe {
        self.mixer.as_mut().expect("Spieler ohne Wiedergabe")
    }
}

pub struct Welt {
    pub relais: LokalesRelais,
    pub raum: RoomId,
    pub level: Arc<SpeicherLevel>,
    pub config: VoiceConfig,
}

impl Welt {
    pub fn new() -> Self {
        let config = VoiceConfig::default();
        config.logging_starten();
        Self {
            relais: LokalesRelais::new(),
            raum: RoomId::new(),
            level: Arc::new(SpeicherLevel::new()),
            config,
        }
    }

    pub fn samples_pro_frame(&self) -> usize {
        self.config.audio.opus_config().samples_pro_frame()
    }

    /// Spieler mit Sinuston und Wiedergabe
    pub async fn spieler(&self, position: Position) -> Spieler {
        let quelle = Box::new(TonQuelle::new(self.samples_pro_frame()));
        self.beitreten(ParticipantId::new(), position, quelle, true)
            .await
    }

    pub async fn beitreten(
        &self,
        id: ParticipantId,
        position: Position,
        quelle: Box<dyn PcmQuelle>,
        empfang: bool,
    ) -> Spieler {
        self.level.position_setzen(id, position);
        let verbindung = self.relais.verbinden(id);
        let metriken = VoiceMetrics::neu().unwrap();

        let b = RoomSession::beitreten(SitzungsParameter {
            raum: self.raum,
            lokal: id,
            identitaet: Identity::generate(),
            config: self.config.clone(),
            transport: verbindung.clone(),
            level: self.level.clone(),
            level_id: LevelId::new("main"),
            metriken: metriken.clone(),
            empfang,
        })
        .await
        .unwrap();

        let codec = FrameCodec::new(self.config.audio.opus_config()).unwrap();
        let aufnahme = AufnahmeStufe::new(
            id,
            quelle,
            codec.clone(),
            b.sitzung.schluessel(),
            b.senke,
            b.sitzung.leser(),
            metriken.clone(),
        )
        .unwrap();

        let wiedergabe = SpeicherSenke::new();
        let mixer = empfang.then(|| {
            MixerStufe::new(
                id,
                codec,
                b.sitzung.schluessel(),
                b.mixer_befehle,
                Box::new(wiedergabe.clone()),
                b.sitzung.leser(),
                metriken.clone(),
                self.config.audio.jitter_buffer_config(),
            )
        });

        Spieler {
            id,
            sitzung: b.sitzung,
            ereignisse: b.ereignisse,
            verbindung,
            aufnahme,
            mixer,
            wiedergabe,
            metriken,
        }
    }

    pub fn bewegen(&self, spieler: &Spieler, position: Position) {
        self.level.position_setzen(spieler.id, position);
    }
}

/// Verarbeitet Ereignisse, bis alle Handshake-Runden durch sind
pub async fn synchronisieren(spieler: &mut [&mut Spieler], jetzt: Instant) {
    for _ in 0..6 {
        for s in spieler.iter_mut() {
            s.sitzung
                .anstehende_verarbeiten(&mut s.ereignisse, jetzt)
                .await
                .unwrap();
        }
    }
}

/// Ein Naehe-Tick bei allen, danach Ereignisse abarbeiten
pub async fn takt(spieler: &mut [&mut Spieler], jetzt: Instant) {
    for s in spieler.iter_mut() {
        s.sitzung.proximity_tick(jetzt).await.unwrap();
    }
    synchronisieren(spieler, jetzt).await;
}

/// Groesster Betrag aller geschriebenen Samples
pub fn spitzenwert(senke: &SpeicherSenke) -> f32 {
    senke
        .frames()
        .iter()
        .flatten()
        .fold(0.0f32, |m, s| m.max(s.abs()))
}
