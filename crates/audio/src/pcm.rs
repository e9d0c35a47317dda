//! PCM-Hilfsfunktionen: Formatwandlung, Resampling, Pegel

/// f32 (-1.0..1.0) zu i16 mit Clipping
pub fn f32_zu_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// i16 zu f32 (-1.0..1.0)
pub fn i16_zu_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Begrenzt ein Sample auf den gueltigen Bereich
#[inline]
pub fn clip(s: f32) -> f32 {
    s.clamp(-1.0, 1.0)
}

/// Lineares Resampling von `von_hz` auf `nach_hz`
pub fn resample(samples: &[f32], von_hz: u32, nach_hz: u32) -> Vec<f32> {
    if von_hz == nach_hz || samples.is_empty() || von_hz == 0 {
        return samples.to_vec();
    }

    let neue_laenge = (samples.len() as u64 * nach_hz as u64 / von_hz as u64) as usize;
    if neue_laenge == 0 {
        return Vec::new();
    }
    if neue_laenge == 1 || samples.len() == 1 {
        return vec![samples[0]; neue_laenge];
    }

    let schritt = (samples.len() - 1) as f64 / (neue_laenge - 1) as f64;
    (0..neue_laenge)
        .map(|i| {
            let pos = i as f64 * schritt;
            let links = pos.floor() as usize;
            let rechts = (links + 1).min(samples.len() - 1);
            let anteil = (pos - links as f64) as f32;
            samples[links] * (1.0 - anteil) + samples[rechts] * anteil
        })
        .collect()
}

/// Effektivwert eines Frames
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let summe: f32 = samples.iter().map(|s| s * s).sum();
    (summe / samples.len() as f32).sqrt()
}
