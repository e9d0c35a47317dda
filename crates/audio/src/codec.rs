//! Opus Encoder/Decoder und Frame-Codec
//!
//! Kapselt audiopus und stellt eine f32-PCM basierte API bereit. Der Takt
//! ist fest auf 20ms; ein fehlender Frame wird ueber die eingebaute
//! Verlustverschleierung (PLC) des Decoders ersetzt.
//!
//! Der Codec haelt keinen kryptografischen Zustand.

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Channels, SampleRate,
};
use bytes::Bytes;
use tracing::debug;

use crate::error::{AudioError, AudioResult};
use roguetalk_protocol::codec::{
    ChannelCount, OpusApplication, OpusConfig, SampleRate as ProtocolSampleRate,
};
use roguetalk_protocol::frame::{VoiceFrame, TAG_LAENGE};

/// Obergrenze fuer einen kodierten Frame
const MAX_PAKET_LAENGE: usize = 4000;

/// Opus-Encoder: kodiert f32-PCM zu Opus-Bytes
pub struct OpusEncoder {
    encoder: Encoder,
    config: OpusConfig,
    frame_size: usize,
}

impl OpusEncoder {
    /// Erstellt einen neuen Encoder mit der gegebenen Konfiguration
    pub fn new(config: OpusConfig) -> AudioResult<Self> {
        config.validieren().map_err(AudioError::Konfiguration)?;

        let sample_rate = protocol_rate_to_audiopus(config.sample_rate);
        let channels = protocol_channels_to_audiopus(config.channels);
        let application = protocol_app_to_audiopus(config.application);

        let mut encoder = Encoder::new(sample_rate, channels, application)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_bitrate(audiopus::Bitrate::BitsPerSecond(
                (config.bitrate_kbps as i32) * 1000,
            ))
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        // audiopus 0.2 erwartet u8
        encoder
            .set_complexity(config.complexity)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_vbr(config.vbr_enabled)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_inband_fec(config.fec_enabled)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        let frame_size = config.samples_pro_frame();

        debug!(
            bitrate_kbps = config.bitrate_kbps,
            sample_rate = config.sample_rate.hz(),
            frame_size,
            "OpusEncoder erstellt"
        );

        Ok(Self {
            encoder,
            config,
            frame_size,
        })
    }

    /// Kodiert einen PCM-Frame (f32, normalisiert -1.0..1.0) zu Opus-Bytes
    ///
    /// Die Eingabe muss exakt `frame_size()` Samples lang sein.
    pub fn encode(&mut self, pcm: &[f32]) -> AudioResult<Vec<u8>> {
        if pcm.len() != self.frame_size {
            return Err(AudioError::Konfiguration(format!(
                "PCM-Frame muss {} Samples lang sein, war {}",
                self.frame_size,
                pcm.len()
            )));
        }

        let mut output = vec![0u8; MAX_PAKET_LAENGE];
        let written = self
            .encoder
            .encode_float(pcm, &mut output)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        output.truncate(written);
        Ok(output)
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn config(&self) -> &OpusConfig {
        &self.config
    }
}

/// Opus-Decoder: dekodiert Opus-Bytes zu f32-PCM
///
/// Ein Decoder pro empfangenem Stream, da Opus zustandsbehaftet dekodiert.
pub struct OpusDecoder {
    decoder: Decoder,
    channels: ChannelCount,
    frame_size: usize,
}

impl OpusDecoder {
    /// Erstellt einen Decoder aus einer OpusConfig
    pub fn new(config: &OpusConfig) -> AudioResult<Self> {
        let sr = protocol_rate_to_audiopus(config.sample_rate);
        let ch = protocol_channels_to_audiopus(config.channels);

        let decoder = Decoder::new(sr, ch).map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        Ok(Self {
            decoder,
            channels: config.channels,
            frame_size: config.samples_pro_frame(),
        })
    }

    /// Dekodiert einen Frame; `None` erzeugt einen verschleierten Frame (PLC)
    pub fn decode(&mut self, opus_data: Option<&[u8]>) -> AudioResult<Vec<f32>> {
        match opus_data {
            Some(daten) => self.decode_paket(daten),
            None => self.decode_plc(),
        }
    }

    fn decode_paket(&mut self, opus_data: &[u8]) -> AudioResult<Vec<f32>> {
        let mut output = vec![0.0f32; self.frame_size];
        let decoded = self
            .decoder
            .decode_float(Some(opus_data), &mut output, false)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        output.truncate(decoded * self.channels as usize);
        Ok(output)
    }

    /// Dekodiert mit PLC (Packet Loss Concealment) wenn kein Paket empfangen
    pub fn decode_plc(&mut self) -> AudioResult<Vec<f32>> {
        let mut output = vec![0.0f32; self.frame_size];
        let decoded = self
            .decoder
            .decode_float(None::<&[u8]>, &mut output, false)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        output.truncate(decoded * self.channels as usize);
        Ok(output)
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

// ---------------------------------------------------------------------------
// Frame-Codec
// ---------------------------------------------------------------------------

/// Kompression im 20ms-Takt plus Leitungsformat
///
/// `[epoch][sequenz][nutzdaten][tag]`. Erzeugt Encoder und Decoder mit
/// derselben Konfiguration fuer Aufnahme- und Wiedergabepfad.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    config: OpusConfig,
}

impl FrameCodec {
    pub fn new(config: OpusConfig) -> AudioResult<Self> {
        config.validieren().map_err(AudioError::Konfiguration)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &OpusConfig {
        &self.config
    }

    /// Samples pro 20ms-Frame
    pub fn samples_pro_frame(&self) -> usize {
        self.config.samples_pro_frame()
    }

    pub fn encoder(&self) -> AudioResult<OpusEncoder> {
        OpusEncoder::new(self.config.clone())
    }

    pub fn decoder(&self) -> AudioResult<OpusDecoder> {
        OpusDecoder::new(&self.config)
    }

    /// Setzt den Leitungsrahmen um bereits verschluesselte Nutzdaten
    pub fn rahmen(
        &self,
        epoch: u32,
        sequence: u32,
        payload: Vec<u8>,
        tag: [u8; TAG_LAENGE],
    ) -> Bytes {
        VoiceFrame {
            epoch,
            sequence,
            payload: Bytes::from(payload),
            tag,
        }
        .encode()
    }

    /// Liest einen Leitungsrahmen
    pub fn rahmen_lesen(&self, daten: &[u8]) -> AudioResult<VoiceFrame> {
        VoiceFrame::decode(daten).map_err(|e| AudioError::UngueltigerFrame(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Konvertierungs-Hilfsfunktionen
// ---------------------------------------------------------------------------

fn protocol_rate_to_audiopus(rate: ProtocolSampleRate) -> SampleRate {
    match rate {
        ProtocolSampleRate::Hz8000 => SampleRate::Hz8000,
        ProtocolSampleRate::Hz16000 => SampleRate::Hz16000,
        ProtocolSampleRate::Hz24000 => SampleRate::Hz24000,
        ProtocolSampleRate::Hz48000 => SampleRate::Hz48000,
    }
}

fn protocol_channels_to_audiopus(ch: ChannelCount) -> Channels {
    match ch {
        ChannelCount::Mono => Channels::Mono,
        ChannelCount::Stereo => Channels::Stereo,
    }
}

fn protocol_app_to_audiopus(app: OpusApplication) -> Application {
    match app {
        OpusApplication::Voip => Application::Voip,
        OpusApplication::Audio => Application::Audio,
        OpusApplication::RestrictedLowdelay => Application::LowDelay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm::rms;
    use roguetalk_protocol::codec::AudioPreset;

    fn sinus(frame: usize, frame_size: usize, rate: f32) -> Vec<f32> {
        (0..frame_size)
            .map(|i| {
                let t = (frame * frame_size + i) as f32 / rate;
                (t * 440.0 * std::f32::consts::TAU).sin() * 0.5
            })
            .collect()
    }

    #[test]
    fn encoder_konfiguration_sprache() {
        let enc = OpusEncoder::new(AudioPreset::Sprache.config()).unwrap();
        assert_eq!(enc.config().bitrate_kbps, 32);
        // 20ms bei 48kHz = 960 Samples
        assert_eq!(enc.frame_size(), 960);
    }

    #[test]
    fn encoder_konfiguration_sparsam() {
        let enc = OpusEncoder::new(AudioPreset::Sparsam.config()).unwrap();
        // 20ms bei 16kHz = 320 Samples
        assert_eq!(enc.frame_size(), 320);
    }

    #[test]
    fn encoder_falscher_frame_size_fehler() {
        let mut enc = OpusEncoder::new(AudioPreset::Sprache.config()).unwrap();
        assert!(enc.encode(&[0.0f32; 100]).is_err());
    }

    #[test]
    fn encoder_ungueltige_konfiguration() {
        let mut config = AudioPreset::Sprache.config();
        config.bitrate_kbps = 5;
        assert!(OpusEncoder::new(config).is_err());
        let mut config = AudioPreset::Sprache.config();
        config.complexity = 11;
        assert!(FrameCodec::new(config).is_err());
    }

    #[test]
    fn roundtrip_erhaelt_energie() {
        let codec = FrameCodec::new(AudioPreset::Sprache.config()).unwrap();
        let mut enc = codec.encoder().unwrap();
        let mut dec = codec.decoder().unwrap();
        let n = codec.samples_pro_frame();

        let mut energie_ein = Vec::new();
        let mut energie_aus = Vec::new();
        for frame in 0..20 {
            let pcm = sinus(frame, n, 48000.0);
            let paket = enc.encode(&pcm).unwrap();
            assert!(!paket.is_empty());
            let aus = dec.decode(Some(&paket)).unwrap();
            assert_eq!(aus.len(), n);
            // Einschwingen des Codecs ignorieren
            if frame >= 5 {
                energie_ein.push(rms(&pcm));
                energie_aus.push(rms(&aus));
            }
        }
        let ein: f32 = energie_ein.iter().sum::<f32>() / energie_ein.len() as f32;
        let aus: f32 = energie_aus.iter().sum::<f32>() / energie_aus.len() as f32;
        let verhaeltnis = aus / ein;
        assert!(
            (0.5..1.5).contains(&verhaeltnis),
            "Energieverhaeltnis {verhaeltnis} ausserhalb der Toleranz"
        );
    }

    #[test]
    fn fehlender_frame_wird_verschleiert() {
        let codec = FrameCodec::new(AudioPreset::Sprache.config()).unwrap();
        let mut enc = codec.encoder().unwrap();
        let mut dec = codec.decoder().unwrap();
        let n = codec.samples_pro_frame();

        for frame in 0..5 {
            let paket = enc.encode(&sinus(frame, n, 48000.0)).unwrap();
            dec.decode(Some(&paket)).unwrap();
        }
        let verschleiert = dec.decode(None).unwrap();
        assert_eq!(verschleiert.len(), n);
    }

    #[test]
    fn plc_ohne_vorgeschichte_liefert_frame() {
        let codec = FrameCodec::new(AudioPreset::Sparsam.config()).unwrap();
        let mut dec = codec.decoder().unwrap();
        assert_eq!(dec.decode_plc().unwrap().len(), 320);
    }

    #[test]
    fn rahmen_und_zuruecklesen() {
        let codec = FrameCodec::new(AudioPreset::Sprache.config()).unwrap();
        let bytes = codec.rahmen(3, 17, vec![1, 2, 3], [9u8; TAG_LAENGE]);
        let frame = codec.rahmen_lesen(&bytes).unwrap();
        assert_eq!(frame.epoch, 3);
        assert_eq!(frame.sequence, 17);
        assert_eq!(&frame.payload[..], &[1, 2, 3]);
        assert!(codec.rahmen_lesen(&bytes[..10]).is_err());
    }
}
