#![allow(dead_code)]

use std::{f32::consts::PI, path::Path};

/// Writes a 16-bit WAV with a 220 Hz tone on every channel.
pub fn write_tone_wav(path: &Path, secs: f32, sample_rate: u32, channels: u16) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut w = hound::WavWriter::create(path, spec).unwrap();
    let frames = (secs * sample_rate as f32) as usize;
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let s = ((2.0 * PI * 220.0 * t).sin() * 0.3 * i16::MAX as f32) as i16;
        for _ in 0..channels {
            w.write_sample(s).unwrap();
        }
    }
    w.finalize().unwrap();
}
