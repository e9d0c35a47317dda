//! Echte Audio-Geraete via cpal (Feature `cpal`)
//!
//! Oeffnet Ein- und Ausgabestreams und verbindet sie ueber lock-free
//! Ring-Buffer mit `RingPufferAufnahme` bzw. `RingPufferWiedergabe`.
//! Stream-Fehler aus dem Callback landen im `GeraeteZustand` und beenden
//! im naechsten Takt die betroffene Schleife.
//!
//! Der `GeraeteStream` ist nicht `Send` und bleibt beim Aufrufer; in die
//! Pipeline wandern nur die Ring-Buffer-Seiten.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Producer};
use tracing::{debug, error, warn};

use crate::error::{AudioError, AudioResult};
use crate::sink::RingPufferWiedergabe;
use crate::source::{GeraeteZustand, RingPufferAufnahme};

/// Haelt einen cpal-Stream am Leben; Drop stoppt das Geraet
pub struct GeraeteStream {
    _stream: Stream,
}

/// Sucht ein Eingabegeraet (None = Standard)
pub fn eingabegeraet_laden(name: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::GeraetNichtGefunden("Standard-Eingabe".to_string())),
        Some(n) => {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::Geraet(e.to_string()))?;
            for device in devices {
                if let Ok(dev_name) = device.name() {
                    if dev_name.contains(n) {
                        return Ok(device);
                    }
                }
            }
            Err(AudioError::GeraetNichtGefunden(n.to_string()))
        }
    }
}

/// Sucht ein Ausgabegeraet (None = Standard)
pub fn ausgabegeraet_laden(name: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::GeraetNichtGefunden("Standard-Ausgabe".to_string())),
        Some(n) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::Geraet(e.to_string()))?;
            for device in devices {
                if let Ok(dev_name) = device.name() {
                    if dev_name.contains(n) {
                        return Ok(device);
                    }
                }
            }
            Err(AudioError::GeraetNichtGefunden(n.to_string()))
        }
    }
}

fn stream_config(rate_hz: u32) -> StreamConfig {
    StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(rate_hz),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Oeffnet das Mikrofon (Mono, `rate_hz`)
pub fn mikrofon_oeffnen(
    device: &Device,
    rate_hz: u32,
    samples_pro_frame: usize,
) -> AudioResult<(GeraeteStream, RingPufferAufnahme)> {
    let zustand = GeraeteZustand::new();
    // 2 Sekunden Puffer
    let (mut producer, aufnahme) =
        RingPufferAufnahme::new(rate_hz as usize * 2, samples_pro_frame, zustand.clone());

    let sample_format = device
        .default_input_config()
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::F32);

    let fehler_zustand = zustand.clone();
    let err_fn = move |err: cpal::StreamError| {
        error!("Capture-Fehler: {}", err);
        fehler_zustand.melden(err.to_string());
    };

    let config = stream_config(rate_hz);
    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _| {
                let written = producer.push_slice(data);
                if written < data.len() {
                    warn!(verworfen = data.len() - written, "Capture Ring-Buffer voll");
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _| {
                let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                if producer.push_slice(&floats) < floats.len() {
                    warn!("Capture Ring-Buffer voll");
                }
            },
            err_fn,
            None,
        ),
        anderes => {
            return Err(AudioError::Geraet(format!(
                "Nicht unterstuetztes Sample-Format: {:?}",
                anderes
            )))
        }
    }
    .map_err(|e| AudioError::Geraet(e.to_string()))?;

    stream.play().map_err(|e| AudioError::Geraet(e.to_string()))?;
    debug!(rate_hz, "Capture-Stream geoeffnet");

    Ok((GeraeteStream { _stream: stream }, aufnahme))
}

/// Oeffnet den Lautsprecher (Mono, `rate_hz`)
pub fn lautsprecher_oeffnen(
    device: &Device,
    rate_hz: u32,
) -> AudioResult<(GeraeteStream, RingPufferWiedergabe)> {
    let zustand = GeraeteZustand::new();
    let (wiedergabe, mut consumer) = RingPufferWiedergabe::new(rate_hz as usize * 2, zustand.clone());

    let sample_format = device
        .default_output_config()
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::F32);

    let fehler_zustand = zustand.clone();
    let err_fn = move |err: cpal::StreamError| {
        error!("Playback-Fehler: {}", err);
        fehler_zustand.melden(err.to_string());
    };

    let config = stream_config(rate_hz);
    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _| {
                let read = consumer.pop_slice(data);
                // Stille fuer fehlende Samples
                data[read..].fill(0.0);
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _| {
                let mut float_buf = vec![0.0f32; data.len()];
                consumer.pop_slice(&mut float_buf);
                for (out, s) in data.iter_mut().zip(float_buf.iter()) {
                    *out = (*s * 32767.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                }
            },
            err_fn,
            None,
        ),
        anderes => {
            return Err(AudioError::Geraet(format!(
                "Nicht unterstuetztes Sample-Format: {:?}",
                anderes
            )))
        }
    }
    .map_err(|e| AudioError::Geraet(e.to_string()))?;

    stream.play().map_err(|e| AudioError::Geraet(e.to_string()))?;
    debug!(rate_hz, "Playback-Stream geoeffnet");

    Ok((GeraeteStream { _stream: stream }, wiedergabe))
}
