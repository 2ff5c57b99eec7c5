use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};

pub const DEFAULT_MODEL: &str = "htdemucs_ft";
pub const WORKING_SAMPLE_RATE: u32 = 44_100;
/// Used when a source's length cannot be determined.
pub const DEFAULT_DURATION_SECS: f64 = 180.0;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub model_name: String,
    pub working_sample_rate: u32,
    pub default_duration_secs: f64,
    pub python: String,
    pub demucs_script: Option<PathBuf>,
    pub live_root: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.into(),
            working_sample_rate: WORKING_SAMPLE_RATE,
            default_duration_secs: DEFAULT_DURATION_SECS,
            python: "python3".into(),
            demucs_script: None,
            live_root: env::temp_dir(),
        }
    }
}

impl ServiceConfig {
    /// Defaults overlaid with `STEM_LIVE_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(model) = env::var("STEM_LIVE_MODEL") {
            cfg.model_name = model;
        }
        if let Ok(python) = env::var("STEM_LIVE_PYTHON") {
            cfg.python = python;
        }
        cfg.demucs_script = env::var("STEM_LIVE_DEMUCS_SCRIPT").ok().map(PathBuf::from);
        if let Ok(tmp) = env::var("STEM_LIVE_TMP_DIR") {
            cfg.live_root = PathBuf::from(tmp);
        }
        cfg
    }

    pub fn live_dir(&self, job_id: &str) -> PathBuf {
        self.live_root.join(format!("live_stems_{job_id}"))
    }
}
