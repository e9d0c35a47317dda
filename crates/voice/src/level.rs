//! Level-Anbindung: Positionen und Sichtbarkeit
//!
//! Das Spiel liefert Positionen und Karten in seinem eigenen Takt. Die
//! Voice-Schicht liest nur.

use dashmap::DashMap;
use roguetalk_core::types::{LevelId, ParticipantId, Position};
use std::sync::Arc;

/// Abfragbare Sichtbarkeitskarte eines Levels
pub trait Sichtbarkeitskarte: Send + Sync {
    /// true wenn zwischen den beiden Kacheln nichts den Schall blockiert
    fn sichtlinie_frei(&self, von: Position, nach: Position) -> bool;
}

/// Level-Kollaborateur
pub trait LevelQuelle: Send + Sync {
    fn occlusion(&self, level: &LevelId) -> Option<Arc<dyn Sichtbarkeitskarte>>;

    /// Aktuelle Position, `None` wenn der Teilnehmer nicht im Level steht
    fn position(&self, teilnehmer: &ParticipantId) -> Option<Position>;
}

// ---------------------------------------------------------------------------
// RasterKarte
// ---------------------------------------------------------------------------

/// Kachelraster mit schallblockierenden Feldern
///
/// Felder ausserhalb des Rasters blockieren nicht.
#[derive(Debug, Clone)]
pub struct RasterKarte {
    breite: u32,
    hoehe: u32,
    blockiert: Vec<bool>,
}

impl RasterKarte {
    /// Leeres Raster ohne Hindernisse
    pub fn new(breite: u32, hoehe: u32) -> Self {
        Self {
            breite,
            hoehe,
            blockiert: vec![false; breite as usize * hoehe as usize],
        }
    }

    /// Raster aus Textzeilen, `#` blockiert
    pub fn aus_text(text: &str) -> Self {
        let zeilen: Vec<&str> = text.lines().filter(|z| !z.trim().is_empty()).collect();
        let hoehe = zeilen.len() as u32;
        let breite = zeilen.iter().map(|z| z.chars().count()).max().unwrap_or(0) as u32;
        let mut karte = Self::new(breite, hoehe);
        for (y, zeile) in zeilen.iter().enumerate() {
            for (x, zeichen) in zeile.chars().enumerate() {
                if zeichen == '#' {
                    karte.blockieren(Position::new(x as i32, y as i32));
                }
            }
        }
        karte
    }

    pub fn breite(&self) -> u32 {
        self.breite
    }

    pub fn hoehe(&self) -> u32 {
        self.hoehe
    }

    fn index(&self, p: Position) -> Option<usize> {
        if p.x < 0 || p.y < 0 || p.x as u32 >= self.breite || p.y as u32 >= self.hoehe {
            return None;
        }
        Some(p.y as usize * self.breite as usize + p.x as usize)
    }

    /// Markiert eine Kachel als schallblockierend
    pub fn blockieren(&mut self, p: Position) {
        if let Some(i) = self.index(p) {
            self.blockiert[i] = true;
        }
    }

    pub fn ist_blockiert(&self, p: Position) -> bool {
        self.index(p).is_some_and(|i| self.blockiert[i])
    }
}

impl Sichtbarkeitskarte for RasterKarte {
    /// Bresenham-Linie; Start und Ziel zaehlen nicht als Hindernis.
    /// Gelaufen wird immer vom kleineren Endpunkt aus, damit beide Richtungen
    /// dieselben Kacheln pruefen.
    fn sichtlinie_frei(&self, von: Position, nach: Position) -> bool {
        let (von, nach) = if (von.x, von.y) <= (nach.x, nach.y) {
            (von, nach)
        } else {
            (nach, von)
        };
        let (mut x, mut y) = (von.x as i64, von.y as i64);
        let (zx, zy) = (nach.x as i64, nach.y as i64);
        let dx = (zx - x).abs();
        let dy = -(zy - y).abs();
        let sx = if x < zx { 1 } else { -1 };
        let sy = if y < zy { 1 } else { -1 };
        let mut fehler = dx + dy;

        loop {
            if x == zx && y == zy {
                return true;
            }
            let doppelt = 2 * fehler;
            if doppelt >= dy {
                fehler += dy;
                x += sx;
            }
            if doppelt <= dx {
                fehler += dx;
                y += sy;
            }
            if (x != zx || y != zy) && self.ist_blockiert(Position::new(x as i32, y as i32)) {
                return false;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SpeicherLevel
// ---------------------------------------------------------------------------

/// Level-Quelle im Speicher, vom Spiel-Loop beschrieben
#[derive(Default)]
pub struct SpeicherLevel {
    karten: DashMap<LevelId, Arc<dyn Sichtbarkeitskarte>>,
    positionen: DashMap<ParticipantId, Position>,
}

impl SpeicherLevel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn karte_setzen(&self, level: LevelId, karte: Arc<dyn Sichtbarkeitskarte>) {
        self.karten.insert(level, karte);
    }

    pub fn position_setzen(&self, teilnehmer: ParticipantId, position: Position) {
        self.positionen.insert(teilnehmer, position);
    }

    pub fn position_entfernen(&self, teilnehmer: &ParticipantId) {
        self.positionen.remove(teilnehmer);
    }
}

impl LevelQuelle for SpeicherLevel {
    fn occlusion(&self, level: &LevelId) -> Option<Arc<dyn Sichtbarkeitskarte>> {
        self.karten.get(level).map(|k| Arc::clone(k.value()))
    }

    fn position(&self, teilnehmer: &ParticipantId) -> Option<Position> {
        self.positionen.get(teilnehmer).map(|p| *p)
    }
}

impl std::fmt::Debug for SpeicherLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeicherLevel")
            .field("karten", &self.karten.len())
            .field("positionen", &self.positionen.len())
            .finish()
    }
}
