mod common;

use approx::assert_abs_diff_eq;
use stem_live::{AudioData, SeparationEngine, ServiceConfig, StemRole};

fn engine() -> SeparationEngine {
    let mut e = SeparationEngine::new(&ServiceConfig::default());
    assert!(e.load_model("htdemucs_ft"));
    e
}

fn mono_input(frames: usize) -> AudioData {
    AudioData {
        samples: (0..frames).map(|i| (i as f32 * 0.05).sin() * 0.5).collect(),
        sample_rate: 44_100,
        channels: 1,
    }
}

/// Correlation of `signal` with a sine of `freq`, normalised by length.
fn tone_strength(signal: &[f32], freq: f32, sample_rate: u32) -> f32 {
    let (mut re, mut im) = (0.0f32, 0.0f32);
    for (i, s) in signal.iter().enumerate() {
        let ph = 2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32;
        re += s * ph.cos();
        im += s * ph.sin();
    }
    (re * re + im * im).sqrt() / signal.len() as f32
}

#[test]
fn unavailable_model_degrades_to_mock() {
    let e = engine();
    assert!(!e.is_real());
    assert_eq!(e.working_rate(), 44_100);
}

#[test]
fn mock_separation_is_deterministic() {
    let e = engine();
    let input = mono_input(8_820);
    let a = e.separate(&input).unwrap();
    let b = e.separate(&input).unwrap();

    assert_eq!(a.frames(), 8_820);
    assert_eq!(a.data().shape(), &[4, 2, 8_820]);
    assert_eq!(a.data(), b.data());
    assert_eq!(a.sample_rate(), 44_100);
}

#[test]
fn mock_vocals_carry_440hz_and_others_are_silent() {
    let e = engine();
    let stems = e.separate(&mono_input(44_100)).unwrap();

    let vocals = stems.stem(StemRole::Vocals);
    assert_abs_diff_eq!(vocals[(0, 0)], 0.0, epsilon = 1e-6);
    let left: Vec<f32> = vocals.row(0).to_vec();
    let at_440 = tone_strength(&left, 440.0, 44_100);
    let at_1000 = tone_strength(&left, 1000.0, 44_100);
    assert!(at_440 > 0.04, "440 Hz component too weak: {at_440}");
    assert!(at_1000 < 0.005, "unexpected 1 kHz energy: {at_1000}");
    assert!(left.iter().all(|s| s.abs() <= 0.1 + 1e-6));

    for role in [StemRole::Drums, StemRole::Bass, StemRole::Other] {
        assert!(stems.stem(role).iter().all(|&s| s == 0.0), "{role} not silent");
    }
}

#[test]
fn input_is_resampled_to_working_rate() {
    let e = engine();
    let input = AudioData {
        samples: vec![0.0; 2 * 24_000],
        sample_rate: 48_000,
        channels: 2,
    };
    let stems = e.separate(&input).unwrap();
    assert_eq!(stems.sample_rate(), 44_100);
    assert_eq!(stems.frames(), 22_050);
    assert_abs_diff_eq!(stems.duration_secs(), 0.5, epsilon = 1e-6);
}

#[test]
fn multichannel_input_yields_stereo_stems() {
    let e = engine();
    let input = AudioData {
        samples: vec![0.25; 6 * 1000],
        sample_rate: 44_100,
        channels: 6,
    };
    let stems = e.separate(&input).unwrap();
    assert_eq!(stems.data().shape(), &[4, 2, 1000]);
}

#[cfg(unix)]
mod external_runner {
    use super::*;
    use std::path::PathBuf;
    use stem_live::{DemucsProcess, ServiceError, StemModel};
    use tempfile::{tempdir, TempDir};

    const PARSE_ARGS: &str = r#"while [ $# -gt 0 ]; do
  case "$1" in
    --input) in="$2"; shift 2 ;;
    --output) out="$2"; shift 2 ;;
    --model) model="$2"; shift 2 ;;
    *) shift ;;
  esac
done
"#;

    fn runner(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("runner.sh");
        std::fs::write(&path, format!("{PARSE_ARGS}{body}")).unwrap();
        path
    }

    fn ramp(frames: usize) -> Vec<f32> {
        (0..frames).map(|i| (i as f32 / frames as f32) - 0.5).collect()
    }

    #[test]
    fn stems_come_back_from_runner() {
        let dir = tempdir().unwrap();
        let script = runner(
            &dir,
            r#"echo "Loading demucs model $model... 50%"
for s in vocals drums bass other; do cp "$in" "$out/$s.wav"; done
echo done
"#,
        );
        let model = DemucsProcess::new("sh", &script, "htdemucs");
        assert!(model.is_available());
        assert_eq!(model.name(), "htdemucs");

        let left = ramp(1_000);
        let right: Vec<f32> = left.iter().map(|s| -s).collect();
        let out = model.separate(&left, &right, 44_100).unwrap();

        assert_eq!(out.shape(), &[4, 2, 1_000]);
        for stem in 0..4 {
            for i in (0..1_000).step_by(97) {
                assert_abs_diff_eq!(out[(stem, 0, i)], left[i], epsilon = 1e-3);
                assert_abs_diff_eq!(out[(stem, 1, i)], right[i], epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn mono_and_short_stems_are_fitted() {
        let dir = tempdir().unwrap();
        let short = dir.path().join("short.wav");
        common::write_tone_wav(&short, 0.01, 44_100, 1);
        let script = runner(
            &dir,
            &format!(
                "for s in vocals drums bass other; do cp '{}' \"$out/$s.wav\"; done\n",
                short.display()
            ),
        );

        let model = DemucsProcess::new("sh", &script, "htdemucs");
        let out = model.separate(&ramp(2_000), &ramp(2_000), 44_100).unwrap();
        assert_eq!(out.shape(), &[4, 2, 2_000]);
        // 441 frames of tone on both channels, then zero padding
        assert_eq!(out[(0, 0, 50)], out[(0, 1, 50)]);
        assert!(out[(0, 0, 50)].abs() > 0.1);
        assert_eq!(out[(3, 1, 1_999)], 0.0);
    }

    #[test]
    fn failing_runner_is_a_separation_error() {
        let dir = tempdir().unwrap();
        let script = runner(&dir, "echo 'CUDA out of memory' >&2\nexit 3\n");
        let model = DemucsProcess::new("sh", &script, "htdemucs");

        let err = model.separate(&ramp(100), &ramp(100), 44_100).unwrap_err();
        assert!(matches!(err, ServiceError::Separation(_)), "{err:?}");
        let msg = err.to_string();
        assert!(msg.contains("CUDA out of memory"), "{msg}");
    }

    #[test]
    fn missing_stem_file_is_an_error() {
        let dir = tempdir().unwrap();
        let script = runner(
            &dir,
            r#"for s in vocals drums bass; do cp "$in" "$out/$s.wav"; done
"#,
        );
        let model = DemucsProcess::new("sh", &script, "htdemucs");
        let err = model.separate(&ramp(100), &ramp(100), 44_100).unwrap_err();
        assert!(err.to_string().contains("other"), "{err}");
    }

    #[test]
    fn engine_uses_runner_when_script_exists() {
        let dir = tempdir().unwrap();
        let script = runner(
            &dir,
            r#"for s in vocals drums bass other; do cp "$in" "$out/$s.wav"; done
"#,
        );
        let cfg = ServiceConfig {
            python: "sh".into(),
            demucs_script: Some(script),
            ..Default::default()
        };
        let mut engine = SeparationEngine::new(&cfg);
        assert!(engine.load_model("htdemucs"));
        assert!(engine.is_real());

        let stems = engine.separate(&mono_input(4_410)).unwrap();
        assert_eq!(stems.frames(), 4_410);
        assert!(stems.stem(StemRole::Drums).iter().any(|s| *s != 0.0));
    }
}
