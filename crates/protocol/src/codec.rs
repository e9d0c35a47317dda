//! Codec-Konfiguration fuer die Audio-Uebertragung
//!
//! Definiert die Opus-Konfigurationstypen und vordefinierte Presets.
//! Die Frame-Dauer ist fest auf 20ms, alle Schleifen laufen in diesem Takt.

use serde::{Deserialize, Serialize};

/// Feste Frame-Dauer in Millisekunden
pub const FRAME_DAUER_MS: u32 = 20;

// ---------------------------------------------------------------------------
// Opus-Konfiguration
// ---------------------------------------------------------------------------

/// Abtastrate fuer Opus
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleRate {
    /// 8 kHz – Schmalband
    Hz8000 = 8000,
    /// 16 kHz – Breitband
    Hz16000 = 16000,
    /// 24 kHz – Superbreitband
    Hz24000 = 24000,
    /// 48 kHz – Vollband
    #[default]
    Hz48000 = 48000,
}

impl SampleRate {
    pub fn hz(&self) -> u32 {
        *self as u32
    }
}

/// Anzahl der Audio-Kanaele
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCount {
    #[default]
    Mono = 1,
    Stereo = 2,
}

/// Opus-Anwendungsmodus
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpusApplication {
    /// Optimiert fuer Sprachverstaendlichkeit
    #[default]
    Voip,
    /// Optimiert fuer allgemeine Audio-Qualitaet
    Audio,
    /// Minimale Verarbeitungsverzoegerung
    RestrictedLowdelay,
}

/// Vollstaendige Opus-Codec-Konfiguration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpusConfig {
    /// Ziel-Bitrate in kbps (6–510)
    pub bitrate_kbps: u16,
    pub sample_rate: SampleRate,
    pub channels: ChannelCount,
    pub application: OpusApplication,
    /// Forward Error Correction aktivieren
    pub fec_enabled: bool,
    /// Komplexitaet (0–10, hoeher = bessere Qualitaet, mehr CPU)
    pub complexity: u8,
    pub vbr_enabled: bool,
}

impl OpusConfig {
    /// Samples pro 20ms-Frame (ueber alle Kanaele)
    pub fn samples_pro_frame(&self) -> usize {
        let pro_kanal = self.sample_rate.hz() * FRAME_DAUER_MS / 1000;
        pro_kanal as usize * self.channels as usize
    }

    /// Validiert die Konfiguration
    pub fn validieren(&self) -> Result<(), String> {
        if self.bitrate_kbps < 6 || self.bitrate_kbps > 510 {
            return Err(format!(
                "Bitrate muss zwischen 6 und 510 kbps liegen (war: {})",
                self.bitrate_kbps
            ));
        }
        if self.complexity > 10 {
            return Err(format!(
                "Komplexitaet muss zwischen 0 und 10 liegen (war: {})",
                self.complexity
            ));
        }
        Ok(())
    }
}

impl Default for OpusConfig {
    fn default() -> Self {
        AudioPreset::default().config()
    }
}

// ---------------------------------------------------------------------------
// Audio-Presets
// ---------------------------------------------------------------------------

/// Vordefinierte Audio-Konfigurationen
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioPreset {
    /// Sprache in Vollband, mittlere Bitrate
    #[default]
    Sprache,
    /// Breitband fuer schwache Verbindungen
    Sparsam,
    /// Hohe Bitrate, z.B. fuer Musik-Bots
    Hochwertig,
}

impl AudioPreset {
    /// Gibt die vordefinierte `OpusConfig` fuer dieses Preset zurueck
    pub fn config(&self) -> OpusConfig {
        match self {
            AudioPreset::Sprache => OpusConfig {
                bitrate_kbps: 32,
                sample_rate: SampleRate::Hz48000,
                channels: ChannelCount::Mono,
                application: OpusApplication::Voip,
                fec_enabled: true,
                complexity: 8,
                vbr_enabled: true,
            },
            AudioPreset::Sparsam => OpusConfig {
                bitrate_kbps: 16,
                sample_rate: SampleRate::Hz16000,
                channels: ChannelCount::Mono,
                application: OpusApplication::Voip,
                fec_enabled: true,
                complexity: 5,
                vbr_enabled: true,
            },
            AudioPreset::Hochwertig => OpusConfig {
                bitrate_kbps: 64,
                sample_rate: SampleRate::Hz48000,
                channels: ChannelCount::Mono,
                application: OpusApplication::Audio,
                fec_enabled: false,
                complexity: 10,
                vbr_enabled: true,
            },
        }
    }
}
