//! Bot-Audio
//!
//! Bots liefern PCM in beliebig grossen Stuecken. `BotQuelle` schneidet
//! daraus 20ms-Frames, fuellt ein letztes Teilstueck mit Nullen auf und
//! liefert Stille, solange nichts ansteht. Die Warteschlange ist begrenzt:
//! ist sie voll, wird das aelteste Stueck verworfen.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use dashmap::DashMap;
use roguetalk_core::types::ParticipantId;
use tracing::{debug, trace};

use crate::error::{AudioError, AudioResult};
use crate::pcm::resample;
use crate::source::PcmQuelle;

/// Einspeise-Handle fuer einen Bot
#[derive(Debug, Clone)]
pub struct BotAudio {
    tx: Sender<Vec<f32>>,
    // Zweiter Empfaenger, um bei voller Warteschlange das aelteste Stueck zu verwerfen
    verwerfer: Receiver<Vec<f32>>,
    rate_hz: u32,
}

impl BotAudio {
    /// Reiht ein PCM-Stueck in Pipeline-Abtastrate ein
    ///
    /// Gibt die Anzahl verworfener alter Stuecke zurueck.
    pub fn senden(&self, pcm: Vec<f32>) -> AudioResult<usize> {
        let mut verworfen = 0;
        let mut stueck = pcm;
        loop {
            match self.tx.try_send(stueck) {
                Ok(()) => return Ok(verworfen),
                Err(TrySendError::Full(zurueck)) => {
                    if self.verwerfer.try_recv().is_ok() {
                        verworfen += 1;
                    }
                    stueck = zurueck;
                }
                Err(TrySendError::Disconnected(_)) => return Err(AudioError::QuelleGeschlossen),
            }
        }
    }

    /// Reiht ein PCM-Stueck mit abweichender Abtastrate ein
    pub fn senden_mit_rate(&self, pcm: &[f32], rate_hz: u32) -> AudioResult<usize> {
        self.senden(resample(pcm, rate_hz, self.rate_hz))
    }
}

/// Bot-Seite von `PcmQuelle`
pub struct BotQuelle {
    rx: Receiver<Vec<f32>>,
    rest: Vec<f32>,
    samples_pro_frame: usize,
}

impl BotQuelle {
    /// Erstellt Quelle und Einspeise-Handle
    ///
    /// `warteschlange` begrenzt die Anzahl wartender Stuecke.
    pub fn new(samples_pro_frame: usize, rate_hz: u32, warteschlange: usize) -> (BotAudio, Self) {
        let (tx, rx) = bounded(warteschlange.max(1));
        (
            BotAudio {
                tx,
                verwerfer: rx.clone(),
                rate_hz,
            },
            Self {
                rx,
                rest: Vec::new(),
                samples_pro_frame,
            },
        )
    }
}

impl PcmQuelle for BotQuelle {
    fn naechster_frame(&mut self) -> AudioResult<Option<Vec<f32>>> {
        let n = self.samples_pro_frame;
        while self.rest.len() < n {
            match self.rx.try_recv() {
                Ok(stueck) => self.rest.extend_from_slice(&stueck),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if self.rest.is_empty() {
            return Ok(Some(vec![0.0; n]));
        }
        if self.rest.len() < n {
            // Letztes Teilstueck auffuellen
            let mut frame = std::mem::take(&mut self.rest);
            frame.resize(n, 0.0);
            return Ok(Some(frame));
        }
        let frame: Vec<f32> = self.rest.drain(..n).collect();
        Ok(Some(frame))
    }

    fn bezeichnung(&self) -> &str {
        "bot"
    }
}

// ---------------------------------------------------------------------------
// BotHost
// ---------------------------------------------------------------------------

/// Verwaltet die Einspeise-Handles aller lokal gehosteten Bots
#[derive(Debug, Default)]
pub struct BotHost {
    bots: DashMap<ParticipantId, BotAudio>,
}

impl BotHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registriert einen Bot und gibt seine Quelle fuer die Pipeline zurueck
    pub fn registrieren(
        &self,
        bot: ParticipantId,
        samples_pro_frame: usize,
        rate_hz: u32,
        warteschlange: usize,
    ) -> BotQuelle {
        let (audio, quelle) = BotQuelle::new(samples_pro_frame, rate_hz, warteschlange);
        self.bots.insert(bot, audio);
        debug!(bot = %bot, "Bot registriert");
        quelle
    }

    /// Speist PCM eines Bots ein (Einstieg vor dem Encoder)
    pub fn push_bot_audio(&self, bot: &ParticipantId, pcm: Vec<f32>) -> AudioResult<()> {
        let audio = self
            .bots
            .get(bot)
            .ok_or_else(|| AudioError::UnbekannterBot(bot.to_string()))?;
        let verworfen = audio.senden(pcm)?;
        if verworfen > 0 {
            trace!(bot = %bot, verworfen, "Bot-Warteschlange voll, alte Stuecke verworfen");
        }
        Ok(())
    }

    /// Wie `push_bot_audio`, mit Resampling von `rate_hz`
    pub fn push_bot_audio_mit_rate(
        &self,
        bot: &ParticipantId,
        pcm: &[f32],
        rate_hz: u32,
    ) -> AudioResult<()> {
        let audio = self
            .bots
            .get(bot)
            .ok_or_else(|| AudioError::UnbekannterBot(bot.to_string()))?;
        audio.senden_mit_rate(pcm, rate_hz)?;
        Ok(())
    }

    pub fn entfernen(&self, bot: &ParticipantId) -> bool {
        self.bots.remove(bot).is_some()
    }

    pub fn anzahl(&self) -> usize {
        self.bots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leere_quelle_liefert_stille() {
        let (_audio, mut q) = BotQuelle::new(960, 48000, 8);
        let f = q.naechster_frame().unwrap().unwrap();
        assert_eq!(f.len(), 960);
        assert!(f.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn stuecke_werden_zu_frames_geschnitten() {
        let (audio, mut q) = BotQuelle::new(960, 48000, 8);
        audio.senden(vec![0.5; 600]).unwrap();
        audio.senden(vec![0.5; 600]).unwrap();

        let erster = q.naechster_frame().unwrap().unwrap();
        assert_eq!(erster.len(), 960);
        assert!(erster.iter().all(|&s| s == 0.5));

        // 240 Samples Rest, mit Nullen aufgefuellt
        let zweiter = q.naechster_frame().unwrap().unwrap();
        assert_eq!(zweiter.len(), 960);
        assert!(zweiter[..240].iter().all(|&s| s == 0.5));
        assert!(zweiter[240..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn volle_warteschlange_verwirft_aeltestes() {
        let (audio, mut q) = BotQuelle::new(4, 48000, 2);
        assert_eq!(audio.senden(vec![0.1; 4]).unwrap(), 0);
        assert_eq!(audio.senden(vec![0.2; 4]).unwrap(), 0);
        assert_eq!(audio.senden(vec![0.3; 4]).unwrap(), 1);

        assert_eq!(q.naechster_frame().unwrap().unwrap(), vec![0.2; 4]);
        assert_eq!(q.naechster_frame().unwrap().unwrap(), vec![0.3; 4]);
    }

    #[test]
    fn resampling_beim_einspeisen() {
        let (audio, mut q) = BotQuelle::new(960, 48000, 8);
        audio.senden_mit_rate(&[0.25; 480], 24000).unwrap();
        let f = q.naechster_frame().unwrap().unwrap();
        assert!(f.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn bothost_unbekannter_bot() {
        let host = BotHost::new();
        let bot = ParticipantId::new();
        assert!(matches!(
            host.push_bot_audio(&bot, vec![0.0; 960]),
            Err(AudioError::UnbekannterBot(_))
        ));
    }

    #[test]
    fn bothost_leitet_an_quelle_weiter() {
        let host = BotHost::new();
        let bot = ParticipantId::new();
        let mut q = host.registrieren(bot, 960, 48000, 16);
        host.push_bot_audio(&bot, vec![0.7; 960]).unwrap();
        assert_eq!(q.naechster_frame().unwrap().unwrap(), vec![0.7; 960]);
        assert!(host.entfernen(&bot));
        assert_eq!(host.anzahl(), 0);
    }
}
