//! Einstieg fuer Spieler und Bots
//!
//! `VoiceRaum` tritt einem Raum bei und startet die drei Schleifen:
//! Naehe/Mitgliedschaft (Raum-Sitzung), Aufnahme und Mixer. Bots haben
//! keine Wiedergabe und damit keine Mixer-Schleife.

use roguetalk_audio::{BotHost, FrameCodec, PcmQuelle, PcmSenke};
use roguetalk_core::types::{LevelId, ParticipantId, RoomId};
use roguetalk_crypto::Identity;
use roguetalk_observability::VoiceMetrics;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::VoiceConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::level::LevelQuelle;
use crate::pipeline::{AudioPipeline, AufnahmeStufe, MixerStufe, PipelineHandle};
use crate::session::{AudibilityLeser, RoomSession, SessionBefehl, SitzungsParameter};
use crate::transport::Transport;

const BEFEHL_QUEUE_GROESSE: usize = 32;

/// Parameter fuer `VoiceRaum::beitreten`
pub struct RaumParameter {
    pub raum: RoomId,
    pub lokal: ParticipantId,
    pub identitaet: Identity,
    pub config: VoiceConfig,
    pub transport: Arc<dyn Transport>,
    pub level: Arc<dyn LevelQuelle>,
    pub level_id: LevelId,
    /// Mikrofon oder Bot-Quelle
    pub quelle: Box<dyn PcmQuelle>,
    /// `None` fuer Bots
    pub wiedergabe: Option<Box<dyn PcmSenke>>,
    pub metriken: VoiceMetrics,
}

/// Laufende Teilnahme an einem Raum
pub struct VoiceRaum {
    raum: RoomId,
    lokal: ParticipantId,
    leser: AudibilityLeser,
    metriken: VoiceMetrics,
    befehle: mpsc::Sender<SessionBefehl>,
    sitzung: JoinHandle<VoiceResult<()>>,
    pipeline: PipelineHandle,
}

impl VoiceRaum {
    pub async fn beitreten(p: RaumParameter) -> VoiceResult<Self> {
        let codec = FrameCodec::new(p.config.audio.opus_config())?;
        let jitter = p.config.audio.jitter_buffer_config();
        let empfang = p.wiedergabe.is_some();

        let beitritt = RoomSession::beitreten(SitzungsParameter {
            raum: p.raum,
            lokal: p.lokal,
            identitaet: p.identitaet,
            config: p.config,
            transport: p.transport,
            level: p.level,
            level_id: p.level_id,
            metriken: p.metriken.clone(),
            empfang,
        })
        .await?;
        let sitzung = beitritt.sitzung;
        let leser = sitzung.leser();

        let aufnahme = AufnahmeStufe::new(
            p.lokal,
            p.quelle,
            codec.clone(),
            sitzung.schluessel(),
            beitritt.senke,
            leser.clone(),
            p.metriken.clone(),
        )?;
        let mixer = p.wiedergabe.map(|senke| {
            MixerStufe::new(
                p.lokal,
                codec,
                sitzung.schluessel(),
                beitritt.mixer_befehle,
                senke,
                leser.clone(),
                p.metriken.clone(),
                jitter,
            )
        });

        let pipeline = AudioPipeline::starten(Some(aufnahme), mixer);

        // Endet die Sitzung (Verlassen oder Trennung), enden auch die Audio-Schleifen
        let stopp = pipeline.stopp_signal();
        let ereignisse = beitritt.ereignisse;
        let (befehle, befehl_rx) = mpsc::channel(BEFEHL_QUEUE_GROESSE);
        let sitzung = tokio::spawn(async move {
            let ergebnis = sitzung.ausfuehren(ereignisse, befehl_rx).await;
            stopp.send_replace(true);
            ergebnis
        });

        info!(raum = %p.raum, teilnehmer = %p.lokal, empfang, "Voice-Raum betreten");
        Ok(Self {
            raum: p.raum,
            lokal: p.lokal,
            leser,
            metriken: p.metriken,
            befehle,
            sitzung,
            pipeline,
        })
    }

    pub fn raum(&self) -> RoomId {
        self.raum
    }

    pub fn lokal(&self) -> ParticipantId {
        self.lokal
    }

    /// Sender, die `zuhoerer` laut dem letzten Naehe-Tick hoert
    pub fn current_audible_set(&self, zuhoerer: &ParticipantId) -> HashSet<ParticipantId> {
        self.leser.current_audible_set(zuhoerer)
    }

    pub fn leser(&self) -> AudibilityLeser {
        self.leser.clone()
    }

    pub fn metriken(&self) -> &VoiceMetrics {
        &self.metriken
    }

    /// Stummschaltung eines Teilnehmers (auch des eigenen)
    pub async fn stumm_setzen(&self, teilnehmer: ParticipantId, stumm: bool) -> VoiceResult<()> {
        self.befehle
            .send(SessionBefehl::Stumm { teilnehmer, stumm })
            .await
            .map_err(|_| VoiceError::Beendet)
    }

    /// true wenn die Sitzung nicht mehr laeuft (Trennung oder Verlassen)
    pub fn sitzung_beendet(&self) -> bool {
        self.sitzung.is_finished()
    }

    pub fn audio_laeuft(&self) -> bool {
        self.pipeline.laeuft()
    }

    /// Verlaesst den Raum und gibt alle Ressourcen frei
    ///
    /// Liefert den ersten Fehler aus Sitzung oder Pipeline.
    pub async fn verlassen(self) -> VoiceResult<()> {
        let _ = self.befehle.send(SessionBefehl::Verlassen).await;
        let sitzung = match self.sitzung.await {
            Ok(ergebnis) => ergebnis,
            Err(e) => {
                warn!(fehler = %e, "Sitzungs-Task abgestuerzt");
                Err(VoiceError::Beendet)
            }
        };
        let pipeline = self.pipeline.beenden().await;
        info!(raum = %self.raum, teilnehmer = %self.lokal, "Voice-Raum verlassen");
        sitzung.and(pipeline)
    }
}

/// Registriert einen Bot beim Host und liefert seine Quelle fuer `RaumParameter`
///
/// Audio kommt danach ueber `BotHost::push_bot_audio` hinein.
pub fn bot_quelle(host: &BotHost, bot: ParticipantId, config: &VoiceConfig) -> Box<dyn PcmQuelle> {
    let opus = config.audio.opus_config();
    Box::new(host.registrieren(
        bot,
        opus.samples_pro_frame(),
        opus.sample_rate.hz(),
        config.audio.bot_warteschlange,
    ))
}

impl std::fmt::Debug for VoiceRaum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceRaum")
            .field("raum", &self.raum)
            .field("lokal", &self.lokal)
            .finish()
    }
}
