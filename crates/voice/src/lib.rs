//! roguetalk-voice – Proximity Voice fuer Multiplayer-Terminalspiele
//!
//! Wer wen hoert, entscheidet die Entfernung im Level. Audio ist Ende-zu-Ende
//! verschluesselt; das Relais leitet nur Ciphertext weiter.
//!
//! ## Module
//! - [`proximity`] – Hoerbarkeit mit Hysterese und Verdeckung
//! - [`level`] – Positionen und Sichtlinien aus dem Spiel
//! - [`session`] – Raum-Sitzung: Mitgliedschaft, Schluessel, Abonnements
//! - [`pipeline`] – Aufnahme- und Mixer-Schleife
//! - [`jitter_buffer`] – Jitter Buffer pro Sender
//! - [`raum`] – Einstieg fuer Spieler und Bots
//! - [`transport`] – Schnittstelle zum Relais
//! - [`relay`] – In-Process-Relais
//! - [`config`] – Konfiguration
//! - [`error`] – Fehlertypen

pub mod config;
pub mod error;
pub mod jitter_buffer;
pub mod level;
pub mod pipeline;
pub mod proximity;
pub mod raum;
pub mod relay;
pub mod session;
pub mod transport;

pub use config::VoiceConfig;
pub use error::{VoiceError, VoiceResult};
pub use jitter_buffer::{JitterBuffer, JitterBufferConfig};
pub use level::{LevelQuelle, RasterKarte, Sichtbarkeitskarte, SpeicherLevel};
pub use pipeline::{AudioPipeline, AufnahmeStufe, EmpfangsStatistik, MixerBefehl, MixerStufe};
pub use proximity::{AudibilitySnapshot, HoerbarkeitsDiff, OkklusionsPolitik, ProximityEngine};
pub use raum::{bot_quelle, RaumParameter, VoiceRaum};
pub use relay::LokalesRelais;
pub use session::{AudibilityLeser, RoomSession, TeilnehmerZustand};
pub use transport::{FrameSenke, Transport, TransportEreignis, TransportFehler};
