//! Mixer: summiert alle aktiven Streams eines Takts
//!
//! Jeder Stream wird mit seiner Lautstaerke (aus der Entfernung) skaliert,
//! danach wird sample-weise addiert und auf -1.0..1.0 begrenzt.

use crate::pcm::clip;

/// Mischt Frames gleicher Laenge
#[derive(Debug, Clone)]
pub struct Mixer {
    samples_pro_frame: usize,
    puffer: Vec<f32>,
}

impl Mixer {
    pub fn new(samples_pro_frame: usize) -> Self {
        Self {
            samples_pro_frame,
            puffer: vec![0.0; samples_pro_frame],
        }
    }

    /// Beginnt einen neuen Takt (Stille)
    pub fn beginnen(&mut self) {
        self.puffer.clear();
        self.puffer.resize(self.samples_pro_frame, 0.0);
    }

    /// Addiert einen Stream mit Lautstaerke `gain`
    ///
    /// Kuerzere Frames werden als mit Stille aufgefuellt behandelt.
    pub fn hinzufuegen(&mut self, samples: &[f32], gain: f32) {
        for (out, s) in self.puffer.iter_mut().zip(samples.iter()) {
            *out += s * gain;
        }
    }

    /// Schliesst den Takt ab und gibt den begrenzten Frame zurueck
    pub fn abschliessen(&mut self) -> &[f32] {
        for s in self.puffer.iter_mut() {
            *s = clip(*s);
        }
        &self.puffer
    }

    /// Mischt eine Menge von (Samples, Gain)-Paaren in einem Schritt
    pub fn mischen<'a>(&mut self, streams: impl IntoIterator<Item = (&'a [f32], f32)>) -> &[f32] {
        self.beginnen();
        for (samples, gain) in streams {
            self.hinzufuegen(samples, gain);
        }
        self.abschliessen()
    }

    pub fn samples_pro_frame(&self) -> usize {
        self.samples_pro_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ohne_streams_stille() {
        let mut m = Mixer::new(4);
        assert_eq!(m.mischen(std::iter::empty()), &[0.0; 4]);
    }

    #[test]
    fn summe_mit_gain() {
        let mut m = Mixer::new(2);
        let a = [0.2f32, 0.4];
        let b = [0.1f32, -0.4];
        let aus = m.mischen([(&a[..], 1.0), (&b[..], 0.5)]).to_vec();
        assert!((aus[0] - 0.25).abs() < 1e-6);
        assert!((aus[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn summe_wird_geclippt() {
        let mut m = Mixer::new(3);
        let a = [0.8f32, -0.8, 0.3];
        let aus = m.mischen([(&a[..], 1.0), (&a[..], 1.0)]).to_vec();
        assert_eq!(aus, vec![1.0, -1.0, 0.6]);
    }

    #[test]
    fn kurzer_frame_zaehlt_als_stille() {
        let mut m = Mixer::new(4);
        let a = [0.5f32, 0.5];
        let aus = m.mischen([(&a[..], 1.0)]).to_vec();
        assert_eq!(aus, vec![0.5, 0.5, 0.0, 0.0]);
    }
}
