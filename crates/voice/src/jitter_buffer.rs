//! Jitter Buffer pro (Zuhoerer, Sender)
//!
//! Ordnet dekodierte Frames nach Sequenznummer und spielt sie im festen
//! 20ms-Takt ab. Die Wiedergabe startet erst, wenn `playout_tiefe` Frames
//! vorliegen. Fehlt der erwartete Frame, meldet `pop` einen Verlust statt
//! zu warten; nach zu vielen Verlusten in Folge wird neu gepuffert.
//!
//! ## Eigenschaften
//! - O(log n) Einfuegen (BTreeMap nach Sequenz sortiert)
//! - Ueberlauf verwirft den aeltesten Frame und begrenzt so die Latenz
//! - Gehoert exklusiv der Mixer-Schleife, keine Locks

use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration fuer den Jitter Buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterBufferConfig {
    /// Frames im Puffer bevor die Wiedergabe startet
    pub playout_tiefe: usize,
    /// Maximale Frames im Puffer
    pub max_tiefe: usize,
    /// Verluste in Folge bevor neu gepuffert wird
    pub max_verlust_folge: u32,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self {
            playout_tiefe: 3,
            max_tiefe: 16,
            max_verlust_folge: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// Statistiken des Jitter Buffers (Snapshot)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitterBufferStatistik {
    pub empfangen: u64,
    pub abgespielt: u64,
    pub duplikate: u64,
    /// Frames, deren Abspielzeitpunkt schon vorbei war
    pub verspaetet: u64,
    /// Abspiel-Ticks ohne passenden Frame
    pub verloren: u64,
    /// Wegen Ueberlauf verworfene Frames
    pub uebergelaufen: u64,
    pub fuellstand: usize,
}

/// Ergebnis von `push`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Einfuegen {
    Angenommen,
    Duplikat,
    Verspaetet,
    /// Angenommen, dafuer wurde der aelteste Frame verworfen
    Uebergelaufen { verworfen: u32 },
}

/// Ergebnis von `pop`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ausspielen<T> {
    Frame(T),
    /// Erwarteter Frame fehlt, Verlust verschleiern
    Verlust,
    /// Puffer fuellt sich noch, nichts abspielen
    Puffern,
}

// ---------------------------------------------------------------------------
// JitterBuffer
// ---------------------------------------------------------------------------

/// Jitter Buffer fuer einen Sender
#[derive(Debug)]
pub struct JitterBuffer<T> {
    config: JitterBufferConfig,
    frames: BTreeMap<u32, T>,
    /// Abspiel-Cursor
    naechste_seq: Option<u32>,
    gestartet: bool,
    verlust_folge: u32,
    statistik: JitterBufferStatistik,
}

impl<T> JitterBuffer<T> {
    pub fn new(config: JitterBufferConfig) -> Self {
        Self {
            config,
            frames: BTreeMap::new(),
            naechste_seq: None,
            gestartet: false,
            verlust_folge: 0,
            statistik: JitterBufferStatistik::default(),
        }
    }

    /// Fuegt einen Frame ein
    pub fn push(&mut self, seq: u32, frame: T) -> Einfuegen {
        self.statistik.empfangen += 1;

        if let Some(naechste) = self.naechste_seq {
            if ist_sequence_alt(seq, naechste) {
                self.statistik.verspaetet += 1;
                tracing::trace!(sequence = seq, erwartet = naechste, "Verspaeteter Frame verworfen");
                return Einfuegen::Verspaetet;
            }
        }
        if self.frames.contains_key(&seq) {
            self.statistik.duplikate += 1;
            return Einfuegen::Duplikat;
        }

        self.frames.insert(seq, frame);

        let mut ergebnis = Einfuegen::Angenommen;
        if self.frames.len() > self.config.max_tiefe {
            if let Some((aelteste, _)) = self.frames.pop_first() {
                self.statistik.uebergelaufen += 1;
                self.naechste_seq = Some(aelteste.wrapping_add(1));
                tracing::debug!(sequence = aelteste, "Puffer-Ueberlauf: aeltester Frame verworfen");
                ergebnis = Einfuegen::Uebergelaufen { verworfen: aelteste };
            }
        }

        self.statistik.fuellstand = self.frames.len();
        ergebnis
    }

    /// Frame fuer den aktuellen Abspiel-Tick
    pub fn pop(&mut self) -> Ausspielen<T> {
        if !self.gestartet {
            if self.frames.len() < self.config.playout_tiefe {
                return Ausspielen::Puffern;
            }
            self.gestartet = true;
            self.naechste_seq = self.frames.keys().next().copied();
        }

        let Some(erwartet) = self.naechste_seq else {
            return Ausspielen::Puffern;
        };

        if let Some(frame) = self.frames.remove(&erwartet) {
            self.naechste_seq = Some(erwartet.wrapping_add(1));
            self.verlust_folge = 0;
            self.statistik.abgespielt += 1;
            self.statistik.fuellstand = self.frames.len();
            return Ausspielen::Frame(frame);
        }

        self.verlust_folge += 1;
        if self.verlust_folge > self.config.max_verlust_folge {
            self.gestartet = false;
            self.verlust_folge = 0;
            tracing::debug!(erwartet, "Zu viele Verluste, puffere neu");
            return Ausspielen::Puffern;
        }

        self.statistik.verloren += 1;
        // Nur weiterruecken wenn spaetere Frames warten; bei leerem Puffer
        // pausiert der Sender vermutlich.
        if !self.frames.is_empty() {
            self.naechste_seq = Some(erwartet.wrapping_add(1));
        }
        Ausspielen::Verlust
    }

    pub fn statistik(&self) -> &JitterBufferStatistik {
        &self.statistik
    }

    pub fn fuellstand(&self) -> usize {
        self.frames.len()
    }

    pub fn ist_gestartet(&self) -> bool {
        self.gestartet
    }

    pub fn config(&self) -> &JitterBufferConfig {
        &self.config
    }
}

/// Prueft ob `seq` aelter als `referenz` ist (mit Wrap-Around)
fn ist_sequence_alt(seq: u32, referenz: u32) -> bool {
    let diff = seq.wrapping_sub(referenz);
    diff > u32::MAX / 2
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
