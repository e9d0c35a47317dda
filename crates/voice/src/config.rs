//! Voice-Konfiguration
//!
//! Wird aus einer TOML-Datei geladen. Alle Felder haben Standardwerte,
//! eine fehlende Datei ergibt die Standardkonfiguration.

use roguetalk_crypto::{AeadAlgorithmus, KeyManagerConfig};
use roguetalk_protocol::{AudioPreset, OpusConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{VoiceError, VoiceResult};
use crate::jitter_buffer::JitterBufferConfig;
use crate::proximity::OkklusionsPolitik;

/// Vollstaendige Konfiguration eines Voice-Raums
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub naehe: NaeheConfig,
    pub schluessel: SchluesselEinstellungen,
    pub audio: AudioEinstellungen,
    pub logging: LoggingEinstellungen,
}

/// Hoerbarkeit nach Entfernung und Sichtlinie
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NaeheConfig {
    /// Ab diesem Abstand (inklusive) wird ein Paar hoerbar
    pub d_in: u32,
    /// Bis zu diesem Abstand (inklusive) bleibt ein hoerbares Paar hoerbar
    pub d_out: u32,
    /// Bis hierhin volle Lautstaerke, danach linear bis 0 bei `d_out`
    pub voll_lautstaerke_distanz: u32,
    pub okklusion: OkklusionsPolitik,
    /// Takt der Naehe-Schleife
    pub tick_ms: u64,
}

impl Default for NaeheConfig {
    fn default() -> Self {
        Self {
            d_in: 10,
            d_out: 12,
            voll_lautstaerke_distanz: 2,
            okklusion: OkklusionsPolitik::default(),
            tick_ms: 100,
        }
    }
}

/// Schluesselplan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchluesselEinstellungen {
    /// Kulanzfenster nach einer Rotation
    pub kulanz_ms: u64,
    pub handshake_timeout_ms: u64,
    pub algorithmus: AeadAlgorithmus,
    pub replay_fenster: u32,
}

impl Default for SchluesselEinstellungen {
    fn default() -> Self {
        Self {
            kulanz_ms: 2000,
            handshake_timeout_ms: 5000,
            algorithmus: AeadAlgorithmus::default(),
            replay_fenster: 64,
        }
    }
}

impl SchluesselEinstellungen {
    pub fn key_manager_config(&self) -> KeyManagerConfig {
        KeyManagerConfig {
            algorithmus: self.algorithmus,
            kulanz: Duration::from_millis(self.kulanz_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            replay_fenster: self.replay_fenster,
        }
    }
}

/// Codec und Wiedergabe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    pub preset: AudioPreset,
    /// Frames im Jitter-Buffer bevor die Wiedergabe startet
    pub playout_tiefe: usize,
    /// Obergrenze, darueber wird der aelteste Frame verworfen
    pub max_tiefe: usize,
    /// Verschleierte Frames in Folge bevor neu gepuffert wird
    pub max_verlust_folge: u32,
    /// Kapazitaet der Bot-Warteschlange in Frames
    pub bot_warteschlange: usize,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            preset: AudioPreset::default(),
            playout_tiefe: 3,
            max_tiefe: 16,
            max_verlust_folge: 3,
            bot_warteschlange: 250,
        }
    }
}

impl AudioEinstellungen {
    pub fn opus_config(&self) -> OpusConfig {
        self.preset.config()
    }

    pub fn jitter_buffer_config(&self) -> JitterBufferConfig {
        JitterBufferConfig {
            playout_tiefe: self.playout_tiefe,
            max_tiefe: self.max_tiefe,
            max_verlust_folge: self.max_verlust_folge,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl VoiceConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str::<Self>(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };
        config.validieren()?;
        Ok(config)
    }

    /// Prueft Schwellen und Puffertiefen auf Widersprueche
    pub fn validieren(&self) -> VoiceResult<()> {
        let n = &self.naehe;
        if n.d_out < n.d_in {
            return Err(VoiceError::Konfiguration(format!(
                "d_out ({}) muss mindestens d_in ({}) sein",
                n.d_out, n.d_in
            )));
        }
        if n.voll_lautstaerke_distanz > n.d_out {
            return Err(VoiceError::Konfiguration(format!(
                "voll_lautstaerke_distanz ({}) groesser als d_out ({})",
                n.voll_lautstaerke_distanz, n.d_out
            )));
        }
        if n.tick_ms == 0 {
            return Err(VoiceError::Konfiguration("tick_ms darf nicht 0 sein".into()));
        }
        let a = &self.audio;
        if a.playout_tiefe == 0 {
            return Err(VoiceError::Konfiguration(
                "playout_tiefe darf nicht 0 sein".into(),
            ));
        }
        if a.max_tiefe < a.playout_tiefe {
            return Err(VoiceError::Konfiguration(format!(
                "max_tiefe ({}) kleiner als playout_tiefe ({})",
                a.max_tiefe, a.playout_tiefe
            )));
        }
        if a.bot_warteschlange == 0 {
            return Err(VoiceError::Konfiguration(
                "bot_warteschlange darf nicht 0 sein".into(),
            ));
        }
        if !roguetalk_observability::logging::log_level_gueltig(&self.logging.level) {
            return Err(VoiceError::Konfiguration(format!(
                "Unbekanntes Log-Level '{}'",
                self.logging.level
            )));
        }
        if !roguetalk_observability::logging::log_format_gueltig(&self.logging.format) {
            return Err(VoiceError::Konfiguration(format!(
                "Unbekanntes Log-Format '{}'",
                self.logging.format
            )));
        }
        self.audio
            .opus_config()
            .validieren()
            .map_err(VoiceError::Konfiguration)
    }

    /// Initialisiert das Logging mit den Werten aus `[logging]`
    pub fn logging_starten(&self) {
        roguetalk_observability::logging_initialisieren(&self.logging.level, &self.logging.format);
    }

    /// Tick-Intervall der Naehe-Schleife
    pub fn naehe_takt(&self) -> Duration {
        Duration::from_millis(self.naehe.tick_ms)
    }
}
