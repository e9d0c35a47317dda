//! Voice-Frame Wire-Format
//!
//! Jeder 20ms-Frame wird als ein Datagramm ueber das Relais verschickt.
//! Das Relais sieht nur diesen Rahmen, nie den Klartext.
//!
//! ## Paketformat (kein serde)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       4   Epoch (big-endian)
//!  4       4   Sequenznummer (big-endian)
//!  8       N   Verschluesselte Opus-Nutzdaten
//!  8+N    16   Authentifizierungs-Tag
//! ```
//!
//! Die Sender-ID steht nicht im Rahmen: sie ergibt sich aus dem
//! abonnierten Track und fliesst als AAD in die Authentifizierung ein.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;

/// Laenge des Kopfes (Epoch + Sequenz)
pub const KOPF_LAENGE: usize = 8;

/// Laenge des AEAD-Tags
pub const TAG_LAENGE: usize = 16;

/// Maximale Nutzdaten-Laenge (typisches Opus-MTU-Limit)
pub const MAX_NUTZDATEN_LAENGE: usize = 1280;

/// Ein Voice-Frame wie er ueber die Leitung geht
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceFrame {
    /// Schluessel-Epoch des Senders
    pub epoch: u32,
    /// Pro Sender und Epoch streng steigende Sequenznummer
    pub sequence: u32,
    /// Verschluesselte Opus-Bytes (ohne Tag)
    pub payload: Bytes,
    /// AEAD-Authentifizierungs-Tag
    pub tag: [u8; TAG_LAENGE],
}

impl VoiceFrame {
    /// Gesamtlaenge auf der Leitung
    pub fn laenge(&self) -> usize {
        KOPF_LAENGE + self.payload.len() + TAG_LAENGE
    }

    /// Serialisiert den Frame (big-endian)
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.laenge());
        buf.put_u32(self.epoch);
        buf.put_u32(self.sequence);
        buf.put_slice(&self.payload);
        buf.put_slice(&self.tag);
        buf.freeze()
    }

    /// Deserialisiert einen Frame
    ///
    /// # Fehler
    /// - `InvalidData` wenn der Puffer kuerzer als Kopf + Tag ist
    /// - `InvalidData` wenn die Nutzdaten `MAX_NUTZDATEN_LAENGE` ueberschreiten
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        let minimum = KOPF_LAENGE + TAG_LAENGE;
        if buf.len() < minimum {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Frame zu kurz: {} Bytes (mindestens {})", buf.len(), minimum),
            ));
        }

        let nutzdaten_laenge = buf.len() - minimum;
        if nutzdaten_laenge > MAX_NUTZDATEN_LAENGE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nutzdaten zu lang: {} Bytes (max {})",
                    nutzdaten_laenge, MAX_NUTZDATEN_LAENGE
                ),
            ));
        }

        let epoch = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let sequence = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let tag_start = buf.len() - TAG_LAENGE;

        let mut tag = [0u8; TAG_LAENGE];
        tag.copy_from_slice(&buf[tag_start..]);

        Ok(Self {
            epoch,
            sequence,
            payload: Bytes::copy_from_slice(&buf[KOPF_LAENGE..tag_start]),
            tag,
        })
    }
}
