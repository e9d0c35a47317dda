//! PCM-Quellen (producesPCM)
//!
//! Alles, was Audio in die Pipeline einspeist, implementiert `PcmQuelle`:
//! das Mikrofon ueber einen Ring-Buffer ebenso wie Bots. Ab dem Encoder
//! ist eine Bot-Stimme nicht von einer menschlichen zu unterscheiden.

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::Arc;

use crate::error::{AudioError, AudioResult};

/// Gemeinsames Trait fuer alle Audio-Quellen
///
/// Wird einmal pro 20ms-Takt aufgerufen und darf nicht blockieren.
pub trait PcmQuelle: Send {
    /// Naechster Frame mit genau `samples_pro_frame` Samples
    ///
    /// `Ok(None)`: in diesem Takt liegt nichts vor. `Err` mit einem
    /// Geraete-Fehler beendet die Aufnahme.
    fn naechster_frame(&mut self) -> AudioResult<Option<Vec<f32>>>;

    /// Name fuer Logs
    fn bezeichnung(&self) -> &str {
        "quelle"
    }
}

/// Liefert ununterbrochen Stille
#[derive(Debug, Clone)]
pub struct StilleQuelle {
    samples_pro_frame: usize,
}

impl StilleQuelle {
    pub fn new(samples_pro_frame: usize) -> Self {
        Self { samples_pro_frame }
    }
}

impl PcmQuelle for StilleQuelle {
    fn naechster_frame(&mut self) -> AudioResult<Option<Vec<f32>>> {
        Ok(Some(vec![0.0; self.samples_pro_frame]))
    }

    fn bezeichnung(&self) -> &str {
        "stille"
    }
}

// ---------------------------------------------------------------------------
// Geraete-Zustand
// ---------------------------------------------------------------------------

/// Gemeinsamer Fehlerzustand zwischen Geraete-Callback und Pipeline
///
/// Der Callback-Thread meldet einen Ausfall, die Pipeline liest ihn im
/// naechsten Takt als `AudioError::Geraet`.
#[derive(Debug, Clone, Default)]
pub struct GeraeteZustand {
    fehler: Arc<Mutex<Option<String>>>,
}

impl GeraeteZustand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Meldet einen Ausfall (der erste gewinnt)
    pub fn melden(&self, grund: impl Into<String>) {
        let mut fehler = self.fehler.lock();
        if fehler.is_none() {
            *fehler = Some(grund.into());
        }
    }

    pub fn pruefen(&self) -> AudioResult<()> {
        match self.fehler.lock().as_ref() {
            Some(grund) => Err(AudioError::Geraet(grund.clone())),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Ring-Buffer Aufnahme
// ---------------------------------------------------------------------------

/// Aufnahme ueber einen lock-free Ring-Buffer
///
/// Der Producer laeuft im Geraete-Callback, diese Seite im Aufnahme-Takt.
pub struct RingPufferAufnahme {
    consumer: HeapCons<f32>,
    samples_pro_frame: usize,
    zustand: GeraeteZustand,
}

impl RingPufferAufnahme {
    /// Erstellt Ring-Buffer und Aufnahmeseite
    ///
    /// Gibt den Producer fuer den Geraete-Callback zurueck.
    pub fn new(
        kapazitaet: usize,
        samples_pro_frame: usize,
        zustand: GeraeteZustand,
    ) -> (HeapProd<f32>, Self) {
        let rb = HeapRb::<f32>::new(kapazitaet.max(samples_pro_frame));
        let (producer, consumer) = rb.split();
        (
            producer,
            Self {
                consumer,
                samples_pro_frame,
                zustand,
            },
        )
    }
}

impl PcmQuelle for RingPufferAufnahme {
    fn naechster_frame(&mut self) -> AudioResult<Option<Vec<f32>>> {
        self.zustand.pruefen()?;
        if self.consumer.occupied_len() < self.samples_pro_frame {
            return Ok(None);
        }
        let mut frame = vec![0.0f32; self.samples_pro_frame];
        let gelesen = self.consumer.pop_slice(&mut frame);
        frame.truncate(gelesen);
        Ok(Some(frame))
    }

    fn bezeichnung(&self) -> &str {
        "mikrofon"
    }
}
