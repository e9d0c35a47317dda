//! Gemeinsame Identifikationstypen fuer RogueTalk
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Eindeutige Teilnehmer-ID (Spieler oder Bot)
///
/// `Ord` wird fuer deterministische Paar-Reihenfolgen gebraucht
/// (Handshake-Tie-Break, Schluesselableitung).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    /// Erstellt eine neue zufaellige ParticipantId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }

    /// Die 16 Bytes der UUID (fuer AAD und Nonce-Ableitung)
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "teilnehmer:{}", self.0)
    }
}

/// Eindeutige Raum-ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub Uuid);

impl RoomId {
    /// Erstellt eine neue zufaellige RoomId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn inner(&self) -> Uuid {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "raum:{}", self.0)
    }
}

/// Name eines Levels (z.B. "main" oder "keller")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LevelId(pub String);

impl LevelId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LevelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "level:{}", self.0)
    }
}

/// Vom Transport vergebenes Handle fuer einen veroeffentlichten Audio-Track
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackHandle(pub String);

impl std::fmt::Display for TrackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "track:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Kachel-Koordinate in einem Level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Quadrierter euklidischer Abstand (exakt, ohne Wurzel). Saettigt bei
    /// `u64::MAX` fuer Spannen nahe 2^32.
    pub fn abstand_quadrat(&self, andere: &Position) -> u64 {
        let dx = (self.x as i64 - andere.x as i64).unsigned_abs();
        let dy = (self.y as i64 - andere.y as i64).unsigned_abs();
        dx.saturating_mul(dx).saturating_add(dy.saturating_mul(dy))
    }

    /// Euklidischer Abstand in Kacheln
    pub fn abstand(&self, andere: &Position) -> f32 {
        (self.abstand_quadrat(andere) as f64).sqrt() as f32
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Schluesselmaterial
// ---------------------------------------------------------------------------

/// Oeffentliches Schluesselmaterial eines Teilnehmers
///
/// Wird vom Transport mit dem Beitritts-Ereignis verteilt. Der
/// Ed25519-Schluessel authentifiziert die Handshake-Nachrichten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchluesselMaterial {
    /// Ed25519 Verifying Key
    pub signatur: [u8; 32],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_sind_eindeutig() {
        assert_ne!(ParticipantId::new(), ParticipantId::new());
        assert_ne!(RoomId::new(), RoomId::new());
    }

    #[test]
    fn anzeige_hat_praefix() {
        let id = ParticipantId::new();
        assert!(id.to_string().starts_with("teilnehmer:"));
        assert_eq!(LevelId::new("main").to_string(), "level:main");
    }

    #[test]
    fn abstand_ist_symmetrisch() {
        let a = Position::new(0, 0);
        let b = Position::new(3, 4);
        assert_eq!(a.abstand_quadrat(&b), 25);
        assert_eq!(b.abstand_quadrat(&a), 25);
        assert!((a.abstand(&b) - 5.0).abs() < f32::EPSILON);
    }

    #[test]
    fn abstand_mit_negativen_koordinaten() {
        let a = Position::new(-5, -5);
        let b = Position::new(5, 5);
        assert_eq!(a.abstand_quadrat(&b), 200);
    }

    #[test]
    fn abstand_an_den_koordinatengrenzen() {
        let links = Position::new(i32::MIN, 0);
        let rechts = Position::new(i32::MAX, 0);
        let spanne = u32::MAX as u64;
        assert_eq!(links.abstand_quadrat(&rechts), spanne * spanne);

        let a = Position::new(i32::MIN, i32::MIN);
        let b = Position::new(i32::MAX, i32::MAX);
        assert_eq!(a.abstand_quadrat(&b), u64::MAX);
        assert_eq!(b.abstand_quadrat(&a), u64::MAX);
    }
}
