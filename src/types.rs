use crate::error::{Result, ServiceError};
use ndarray::{Array3, ArrayView2};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, path::PathBuf};

/// Number of stems produced by every separation.
pub const STEM_COUNT: usize = 4;

/// Interleaved PCM audio.
#[derive(Clone, Debug)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioData {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// The four stem roles, in output order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemRole {
    Vocals,
    Drums,
    Bass,
    Other,
}

impl StemRole {
    pub const ALL: [StemRole; STEM_COUNT] =
        [StemRole::Vocals, StemRole::Drums, StemRole::Bass, StemRole::Other];

    pub fn name(self) -> &'static str {
        match self {
            StemRole::Vocals => "vocals",
            StemRole::Drums => "drums",
            StemRole::Bass => "bass",
            StemRole::Other => "other",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<StemRole> {
        Self::ALL.get(i).copied()
    }
}

impl fmt::Display for StemRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Four stereo stems of equal length at one sample rate.
///
/// Backed by a `[stem, channel, frame]` array of shape `[4, 2, T]`, so the
/// stems are always present together.
#[derive(Clone, Debug)]
pub struct SeparatedStems {
    data: Array3<f32>,
    sample_rate: u32,
}

impl SeparatedStems {
    pub fn new(data: Array3<f32>, sample_rate: u32) -> Result<Self> {
        let shape = data.shape();
        if shape[0] != STEM_COUNT || shape[1] != 2 {
            return Err(ServiceError::Separation(format!(
                "expected stems of shape [4, 2, T], got {:?}",
                shape
            )));
        }
        Ok(Self { data, sample_rate })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// `[channel, frame]` view of one stem.
    pub fn stem(&self, role: StemRole) -> ArrayView2<'_, f32> {
        self.data.index_axis(ndarray::Axis(0), role.index())
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Interleaved stereo copy of one stem, ready for `write_audio`.
    pub fn to_audio(&self, role: StemRole) -> AudioData {
        let stem = self.stem(role);
        let n = self.frames();
        let mut samples = Vec::with_capacity(n * 2);
        for i in 0..n {
            samples.push(stem[(0, i)]);
            samples.push(stem[(1, i)]);
        }
        AudioData {
            samples,
            sample_rate: self.sample_rate,
            channels: 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Offline,
    Live,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SplitOptions {
    pub output_dir: PathBuf,
    pub model_name: String,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            output_dir: ".".into(),
            model_name: "htdemucs_ft".into(),
        }
    }
}

/// Paths of the stem files written by an offline split, in role order.
#[derive(Clone, Debug)]
pub struct SplitResult {
    pub vocals_path: PathBuf,
    pub drums_path: PathBuf,
    pub bass_path: PathBuf,
    pub other_path: PathBuf,
}

impl SplitResult {
    pub fn path(&self, role: StemRole) -> &PathBuf {
        match role {
            StemRole::Vocals => &self.vocals_path,
            StemRole::Drums => &self.drums_path,
            StemRole::Bass => &self.bass_path,
            StemRole::Other => &self.other_path,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (StemRole, &PathBuf)> + '_ {
        StemRole::ALL.into_iter().map(move |r| (r, self.path(r)))
    }

    /// `stem name -> path` mapping used on the wire.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.iter()
            .map(|(r, p)| (r.name().to_string(), p.to_string_lossy().into_owned()))
            .collect()
    }
}
