use anyhow::{Context, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const SINC_LEN: usize = 256;

/// Splits interleaved audio into `(left, right)`.
///
/// Mono is duplicated onto both channels; anything past the first two
/// channels is dropped.
pub fn to_planar_stereo(interleaved: &[f32], channels: u16) -> (Vec<f32>, Vec<f32>) {
    match channels {
        0 => (Vec::new(), Vec::new()),
        1 => (interleaved.to_vec(), interleaved.to_vec()),
        n => {
            let n = n as usize;
            let frames = interleaved.len() / n;
            let mut left = Vec::with_capacity(frames);
            let mut right = Vec::with_capacity(frames);
            for frame in interleaved.chunks_exact(n) {
                left.push(frame[0]);
                right.push(frame[1]);
            }
            (left, right)
        }
    }
}

/// Truncates or zero-pads `v` to exactly `len` samples.
pub fn fit_length(mut v: Vec<f32>, len: usize) -> Vec<f32> {
    v.resize(len, 0.0);
    v
}

/// Resamples a planar stereo pair from `from_rate` to `to_rate`.
///
/// Output length is `ceil(frames * to_rate / from_rate)` and the output is
/// aligned with the input: the filter's latency is trimmed from the front.
pub fn resample_stereo(
    mut left: Vec<f32>,
    mut right: Vec<f32>,
    from_rate: u32,
    to_rate: u32,
) -> Result<(Vec<f32>, Vec<f32>)> {
    if from_rate == to_rate || left.is_empty() {
        return Ok((left, right));
    }
    if from_rate == 0 {
        anyhow::bail!("cannot resample from a sample rate of 0");
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let target = (left.len() as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize;

    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    // zero tail so the delayed output still covers the whole input
    let frames = left.len() + SINC_LEN;
    left.resize(frames, 0.0);
    right.resize(frames, 0.0);

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, frames, 2)
        .context("failed to build resampler")?;
    let delay = resampler.output_delay();

    let waves_in = vec![left, right];
    let mut waves_out = resampler
        .process(&waves_in, None)
        .context("resampling failed")?
        .into_iter();

    let align = |v: Vec<f32>| fit_length(v.into_iter().skip(delay).collect(), target);
    let l = waves_out.next().unwrap_or_default();
    let r = waves_out.next().unwrap_or_default();
    Ok((align(l), align(r)))
}

/// `amplitude * sin(2π·freq·t)` sampled at `sample_rate`.
pub fn sine(freq: f32, amplitude: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
    let sr = sample_rate.max(1) as f32;
    (0..frames)
        .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr).sin() * amplitude)
        .collect()
}
