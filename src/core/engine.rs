use crate::{
    config::ServiceConfig,
    core::{
        audio::{read_audio, write_audio},
        dsp::{fit_length, resample_stereo, sine, to_planar_stereo},
    },
    error::{Result, ServiceError},
    types::{AudioData, SeparatedStems, StemRole, STEM_COUNT},
};

use anyhow::Context;
use ndarray::Array3;
use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use tempfile::tempdir;
use tracing::{debug, info, warn};

/// Frequency of the synthetic tone the mock puts on the vocals stem.
pub const MOCK_TONE_HZ: f32 = 440.0;
pub const MOCK_TONE_AMPLITUDE: f32 = 0.1;

/// A separation backend: stereo in, `[4, 2, T]` stems out.
///
/// Implementations receive audio already forced to stereo and resampled to
/// the engine's working rate, and must return stems of the same length.
pub trait StemModel: Send + Sync {
    fn name(&self) -> &str;

    /// `true` for a real model, `false` for synthetic output.
    fn is_available(&self) -> bool;

    fn separate(&self, left: &[f32], right: &[f32], sample_rate: u32) -> Result<Array3<f32>>;
}

/// Deterministic stand-in: silence everywhere except a 440 Hz tone on vocals.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockModel;

impl StemModel for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn separate(&self, left: &[f32], right: &[f32], sample_rate: u32) -> Result<Array3<f32>> {
        if left.len() != right.len() {
            return Err(anyhow::anyhow!("L/R length mismatch").into());
        }
        let t = left.len();
        let mut out = Array3::<f32>::zeros((STEM_COUNT, 2, t));
        let tone = sine(MOCK_TONE_HZ, MOCK_TONE_AMPLITUDE, sample_rate, t);
        let vocals = StemRole::Vocals.index();
        for (i, s) in tone.iter().enumerate() {
            out[(vocals, 0, i)] = *s;
            out[(vocals, 1, i)] = *s;
        }
        Ok(out)
    }
}

/// Runs an external Demucs runner script, exchanging WAV files through a
/// temporary directory.
#[derive(Debug, Clone)]
pub struct DemucsProcess {
    python: String,
    script: PathBuf,
    model_name: String,
}

impl DemucsProcess {
    pub fn new(python: impl Into<String>, script: impl Into<PathBuf>, model_name: &str) -> Self {
        Self {
            python: python.into(),
            script: script.into(),
            model_name: model_name.to_string(),
        }
    }

    fn read_stem(dir: &Path, role: StemRole, t: usize) -> Result<(Vec<f32>, Vec<f32>)> {
        let path = dir.join(format!("{}.wav", role.name()));
        let audio = read_audio(&path)
            .with_context(|| format!("separation produced no {} stem", role.name()))?;
        let (l, r) = to_planar_stereo(&audio.samples, audio.channels);
        Ok((fit_length(l, t), fit_length(r, t)))
    }
}

impl StemModel for DemucsProcess {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn is_available(&self) -> bool {
        self.script.is_file()
    }

    fn separate(&self, left: &[f32], right: &[f32], sample_rate: u32) -> Result<Array3<f32>> {
        if left.len() != right.len() {
            return Err(anyhow::anyhow!("L/R length mismatch").into());
        }
        let t = left.len();

        let tmp = tempdir()?;
        let input_wav = tmp.path().join("input.wav");
        let out_dir = tmp.path().join("stems");
        fs::create_dir_all(&out_dir)?;

        let mut samples = Vec::with_capacity(t * 2);
        for (l, r) in left.iter().zip(right) {
            samples.push(*l);
            samples.push(*r);
        }
        write_audio(
            &input_wav,
            &AudioData {
                samples,
                sample_rate,
                channels: 2,
            },
        )?;

        debug!(
            "running {} {} on {}",
            self.python,
            self.script.display(),
            input_wav.display()
        );
        // stdout carries the protocol, so the runner must never inherit it
        let output = Command::new(&self.python)
            .arg(&self.script)
            .arg("--input")
            .arg(&input_wav)
            .arg("--output")
            .arg(&out_dir)
            .arg("--model")
            .arg(&self.model_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .context("Failed to run stem separation script")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stdout.lines().chain(stderr.lines()) {
            debug!("runner: {line}");
        }

        if !output.status.success() {
            let detail = stderr.trim();
            return Err(ServiceError::Separation(if detail.is_empty() {
                format!("separation script exited with {}", output.status)
            } else {
                format!("separation script exited with {}: {detail}", output.status)
            }));
        }

        let mut out = Array3::<f32>::zeros((STEM_COUNT, 2, t));
        for role in StemRole::ALL {
            let (l, r) = Self::read_stem(&out_dir, role, t)?;
            for i in 0..t {
                out[(role.index(), 0, i)] = l[i];
                out[(role.index(), 1, i)] = r[i];
            }
        }
        Ok(out)
    }
}

/// Wraps one separation backend, falling back to [`MockModel`] whenever the
/// requested model cannot be acquired.
pub struct SeparationEngine {
    python: String,
    script: Option<PathBuf>,
    working_rate: u32,
    loaded: Option<String>,
    backend: Box<dyn StemModel>,
}

impl SeparationEngine {
    /// Starts in mock mode; call [`load_model`](Self::load_model) to upgrade.
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            python: config.python.clone(),
            script: config.demucs_script.clone(),
            working_rate: config.working_sample_rate,
            loaded: None,
            backend: Box::new(MockModel),
        }
    }

    /// Uses an explicit backend instead of resolving one from configuration.
    pub fn with_backend(backend: Box<dyn StemModel>, working_rate: u32) -> Self {
        Self {
            python: String::new(),
            script: None,
            working_rate,
            loaded: Some(backend.name().to_string()),
            backend,
        }
    }

    /// Acquires the named model. Never fails: an unavailable model leaves the
    /// engine in mock mode, observable through [`is_real`](Self::is_real).
    pub fn load_model(&mut self, name: &str) -> bool {
        if self.loaded.as_deref() == Some(name) {
            return true;
        }

        match self.acquire(name) {
            Ok(model) => {
                info!("model {name} loaded");
                self.backend = model;
            }
            Err(e) => {
                warn!("{e}; falling back to mock separation");
                self.backend = Box::new(MockModel);
            }
        }
        self.loaded = Some(name.to_string());
        true
    }

    fn acquire(&self, name: &str) -> Result<Box<dyn StemModel>> {
        let script = self
            .script
            .as_ref()
            .ok_or_else(|| ServiceError::ModelUnavailable("no separation script configured".into()))?;
        let model = DemucsProcess::new(self.python.clone(), script.clone(), name);
        if !model.is_available() {
            return Err(ServiceError::ModelUnavailable(format!(
                "separation script not found: {}",
                script.display()
            )));
        }
        Ok(Box::new(model))
    }

    pub fn is_real(&self) -> bool {
        self.backend.is_available()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.loaded.as_deref()
    }

    pub fn working_rate(&self) -> u32 {
        self.working_rate
    }

    /// Forces stereo, resamples to the working rate and runs the backend.
    pub fn separate(&self, audio: &AudioData) -> Result<SeparatedStems> {
        let (left, right) = to_planar_stereo(&audio.samples, audio.channels);
        let (left, right) = resample_stereo(left, right, audio.sample_rate, self.working_rate)?;

        debug!(
            "separating {} frames with {} backend",
            left.len(),
            self.backend.name()
        );
        let out = self.backend.separate(&left, &right, self.working_rate)?;
        if out.shape()[2] != left.len() {
            return Err(ServiceError::Separation(format!(
                "backend returned {} frames, expected {}",
                out.shape()[2],
                left.len()
            )));
        }
        SeparatedStems::new(out, self.working_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_model_without_script_stays_mock() {
        let mut engine = SeparationEngine::new(&ServiceConfig::default());
        assert!(engine.load_model("htdemucs_ft"));
        assert!(!engine.is_real());
        assert_eq!(engine.model_name(), Some("htdemucs_ft"));
    }

    #[test]
    fn load_model_with_missing_script_stays_mock() {
        let cfg = ServiceConfig {
            demucs_script: Some(PathBuf::from("/nonexistent/demucs_runner.py")),
            ..Default::default()
        };
        let mut engine = SeparationEngine::new(&cfg);
        assert!(engine.load_model("htdemucs"));
        assert!(!engine.is_real());
    }

    #[test]
    fn mock_rejects_mismatched_channels() {
        assert!(MockModel.separate(&[0.0; 4], &[0.0; 3], 44_100).is_err());
    }
}
