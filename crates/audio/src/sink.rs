//! Wiedergabe-Senken
//!
//! Der Mixer schreibt pro Takt genau einen gemischten Frame in eine
//! `PcmSenke`. Echte Geraete haengen ueber einen Ring-Buffer dahinter.

use parking_lot::Mutex;
use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::Arc;
use tracing::trace;

use crate::error::AudioResult;
use crate::source::GeraeteZustand;

/// Ziel fuer gemischte Frames
pub trait PcmSenke: Send {
    /// Schreibt einen Frame; darf nicht blockieren
    fn schreiben(&mut self, frame: &[f32]) -> AudioResult<()>;
}

/// Sammelt alle Frames im Speicher (Tests, Aufzeichnung)
#[derive(Debug, Clone, Default)]
pub struct SpeicherSenke {
    frames: Arc<Mutex<Vec<Vec<f32>>>>,
}

impl SpeicherSenke {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kopie aller bisher geschriebenen Frames
    pub fn frames(&self) -> Vec<Vec<f32>> {
        self.frames.lock().clone()
    }

    pub fn anzahl(&self) -> usize {
        self.frames.lock().len()
    }
}

impl PcmSenke for SpeicherSenke {
    fn schreiben(&mut self, frame: &[f32]) -> AudioResult<()> {
        self.frames.lock().push(frame.to_vec());
        Ok(())
    }
}

/// Wiedergabe ueber einen lock-free Ring-Buffer
///
/// Der Consumer laeuft im Geraete-Callback.
pub struct RingPufferWiedergabe {
    producer: HeapProd<f32>,
    zustand: GeraeteZustand,
}

impl RingPufferWiedergabe {
    /// Erstellt Ring-Buffer und Wiedergabeseite; gibt den Consumer fuer
    /// den Geraete-Callback zurueck
    pub fn new(kapazitaet: usize, zustand: GeraeteZustand) -> (Self, HeapCons<f32>) {
        let rb = HeapRb::<f32>::new(kapazitaet);
        let (producer, consumer) = rb.split();
        (Self { producer, zustand }, consumer)
    }
}

impl PcmSenke for RingPufferWiedergabe {
    fn schreiben(&mut self, frame: &[f32]) -> AudioResult<()> {
        self.zustand.pruefen()?;
        let geschrieben = self.producer.push_slice(frame);
        if geschrieben < frame.len() {
            trace!(verworfen = frame.len() - geschrieben, "Wiedergabe-Puffer voll");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AudioError;
    use ringbuf::traits::{Consumer, Observer};

    #[test]
    fn speicher_senke_teilt_frames_mit_klonen() {
        let senke = SpeicherSenke::new();
        let mut schreiber = senke.clone();
        schreiber.schreiben(&[0.1, 0.2]).unwrap();
        schreiber.schreiben(&[0.3]).unwrap();
        assert_eq!(senke.anzahl(), 2);
        assert_eq!(senke.frames()[1], vec![0.3]);
    }

    #[test]
    fn ringpuffer_wiedergabe_schreibt_und_verwirft_ueberlauf() {
        let (mut senke, mut consumer) = RingPufferWiedergabe::new(4, GeraeteZustand::new());
        senke.schreiben(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]).unwrap();
        assert_eq!(consumer.occupied_len(), 4);
        let mut aus = [0.0f32; 4];
        consumer.pop_slice(&mut aus);
        assert_eq!(aus, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn ringpuffer_wiedergabe_meldet_geraeteausfall() {
        let zustand = GeraeteZustand::new();
        let (mut senke, _consumer) = RingPufferWiedergabe::new(16, zustand.clone());
        zustand.melden("Lautsprecher getrennt");
        assert!(matches!(senke.schreiben(&[0.0]), Err(AudioError::Geraet(_))));
    }
}
