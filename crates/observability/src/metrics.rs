//! Prometheus-kompatible Metriken des Voice-Layers
//!
//! Registrierte Metriken:
//! - `roguetalk_frames_sent_total` – Counter: Veroeffentlichte Frames
//! - `roguetalk_frames_received_total` – Counter: Entschluesselte Frames
//! - `roguetalk_decrypt_failures_total` – Counter: Verworfene Frames (DecryptError)
//! - `roguetalk_concealed_frames_total` – Counter: Per PLC oder Stille ersetzte Frames
//! - `roguetalk_jitter_overflow_total` – Counter: Wegen Ueberlauf verworfene Frames
//! - `roguetalk_late_frames_total` – Counter: Zu spaet eingetroffene Frames
//! - `roguetalk_capture_suppressed_total` – Counter: Nicht gesendete Frames (niemand hoert zu)
//! - `roguetalk_handshakes_started_total` / `_completed_total` / `_timeouts_total`
//! - `roguetalk_key_rotations_total` – Counter: Epoch-Wechsel
//! - `roguetalk_subscriptions_active` – Gauge: Aktive Abonnements
//! - `roguetalk_participants` – Gauge: Teilnehmer im Raum
//! - `roguetalk_jitter_depth_frames` – Histogram: Puffertiefe beim Abspielen

use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Alle Voice-Metriken einer Instanz
///
/// Jede Instanz hat eine eigene Registry, mehrere Raeume oder Tests
/// kommen sich also nicht in die Quere. Klone teilen die Zaehler.
#[derive(Clone)]
pub struct VoiceMetrics {
    pub registry: Arc<Registry>,

    pub frames_gesendet: IntCounter,
    pub frames_empfangen: IntCounter,
    pub entschluesselung_fehlgeschlagen: IntCounter,
    pub frames_verschleiert: IntCounter,
    pub jitter_ueberlauf: IntCounter,
    pub frames_verspaetet: IntCounter,
    pub aufnahme_unterdrueckt: IntCounter,

    pub handshakes_gestartet: IntCounter,
    pub handshakes_abgeschlossen: IntCounter,
    pub handshake_timeouts: IntCounter,
    pub schluessel_rotationen: IntCounter,

    pub abonnements_aktiv: IntGauge,
    pub teilnehmer: IntGauge,

    pub jitter_tiefe: Histogram,
}

fn zaehler(registry: &Registry, name: &str, hilfe: &str) -> Result<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn messwert(registry: &Registry, name: &str, hilfe: &str) -> Result<IntGauge> {
    let g = IntGauge::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

impl VoiceMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();
        let r = &registry;

        let jitter_tiefe = Histogram::with_opts(
            HistogramOpts::new(
                "roguetalk_jitter_depth_frames",
                "Jitter-Buffer-Tiefe beim Abspielen in Frames",
            )
            .buckets(vec![0.0, 1.0, 2.0, 3.0, 4.0, 6.0, 8.0, 12.0, 16.0]),
        )?;
        registry.register(Box::new(jitter_tiefe.clone()))?;

        Ok(Self {
            frames_gesendet: zaehler(r, "roguetalk_frames_sent_total", "Veroeffentlichte Frames")?,
            frames_empfangen: zaehler(
                r,
                "roguetalk_frames_received_total",
                "Erfolgreich entschluesselte Frames",
            )?,
            entschluesselung_fehlgeschlagen: zaehler(
                r,
                "roguetalk_decrypt_failures_total",
                "Wegen DecryptError verworfene Frames",
            )?,
            frames_verschleiert: zaehler(
                r,
                "roguetalk_concealed_frames_total",
                "Per Verlustverschleierung oder Stille ersetzte Frames",
            )?,
            jitter_ueberlauf: zaehler(
                r,
                "roguetalk_jitter_overflow_total",
                "Wegen Ueberlauf verworfene Frames",
            )?,
            frames_verspaetet: zaehler(r, "roguetalk_late_frames_total", "Zu spaete Frames")?,
            aufnahme_unterdrueckt: zaehler(
                r,
                "roguetalk_capture_suppressed_total",
                "Nicht gesendete Frames ohne Zuhoerer",
            )?,
            handshakes_gestartet: zaehler(
                r,
                "roguetalk_handshakes_started_total",
                "Gestartete Paar-Handshakes",
            )?,
            handshakes_abgeschlossen: zaehler(
                r,
                "roguetalk_handshakes_completed_total",
                "Abgeschlossene Paar-Handshakes",
            )?,
            handshake_timeouts: zaehler(
                r,
                "roguetalk_handshake_timeouts_total",
                "Abgelaufene Paar-Handshakes",
            )?,
            schluessel_rotationen: zaehler(
                r,
                "roguetalk_key_rotations_total",
                "Epoch-Wechsel des Raum-Schluessels",
            )?,
            abonnements_aktiv: messwert(
                r,
                "roguetalk_subscriptions_active",
                "Aktive Abonnements beim Relais",
            )?,
            teilnehmer: messwert(r, "roguetalk_participants", "Teilnehmer im Raum")?,
            jitter_tiefe,
            registry: Arc::new(registry),
        })
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn export_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl std::fmt::Debug for VoiceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceMetrics")
            .field("frames_gesendet", &self.frames_gesendet.get())
            .field("frames_empfangen", &self.frames_empfangen.get())
            .finish_non_exhaustive()
    }
}
