//! roguetalk-audio – Audio-Seite des Voice-Layers
//!
//! - Opus Encoding/Decoding im 20ms-Takt mit Verlustverschleierung
//! - `PcmQuelle` als gemeinsamer Einstieg fuer Mikrofon und Bots
//! - Bot-Warteschlangen (`BotQuelle`, `BotHost`)
//! - Wiedergabe-Senken und Mixer
//! - Mikrofon und Lautsprecher via cpal (Feature `cpal`)

pub mod bot;
pub mod codec;
#[cfg(feature = "cpal")]
pub mod device;
pub mod error;
pub mod mixer;
pub mod pcm;
pub mod sink;
pub mod source;

// Bequeme Re-Exporte der wichtigsten Typen
pub use bot::{BotAudio, BotHost, BotQuelle};
pub use codec::{FrameCodec, OpusDecoder, OpusEncoder};
pub use error::{AudioError, AudioResult};
pub use mixer::Mixer;
pub use sink::{PcmSenke, RingPufferWiedergabe, SpeicherSenke};
pub use source::{GeraeteZustand, PcmQuelle, RingPufferAufnahme, StilleQuelle};
