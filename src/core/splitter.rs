use crate::{
    core::{audio::{read_audio, write_audio}, engine::SeparationEngine},
    error::{Result, ServiceError},
    io::progress::SplitProgress,
    types::{AudioData, SeparatedStems, SplitResult, StemRole},
};

use std::{
    fs,
    ops::ControlFlow,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Where an offline split puts one stem: `<output_dir>/<stem>.wav`.
pub fn stem_path(output_dir: &Path, role: StemRole) -> PathBuf {
    output_dir.join(format!("{}.wav", role.name()))
}

/// Separates `input_path` into four WAV files under `output_dir`.
///
/// `on_progress` is called at each checkpoint; returning
/// `ControlFlow::Break` abandons the split with [`ServiceError::Cancelled`]
/// before any further work.
pub fn split_file<F>(
    engine: &SeparationEngine,
    input_path: &Path,
    output_dir: &Path,
    mut on_progress: F,
) -> Result<SplitResult>
where
    F: FnMut(&SplitProgress) -> ControlFlow<()>,
{
    let mut report = |p: SplitProgress| -> Result<()> {
        match on_progress(&p) {
            ControlFlow::Continue(()) => Ok(()),
            ControlFlow::Break(()) => Err(ServiceError::Cancelled),
        }
    };

    if !input_path.exists() {
        return Err(ServiceError::NotFound(input_path.to_path_buf()));
    }
    fs::create_dir_all(output_dir)?;

    let audio = read_audio(input_path)?;
    if audio.frames() == 0 {
        return Err(anyhow::anyhow!("Empty audio").into());
    }
    report(SplitProgress::Loaded)?;

    let stems = engine.separate(&audio)?;
    report(SplitProgress::Separated)?;

    for (done, role) in StemRole::ALL.into_iter().enumerate() {
        let dest = write_stem(&stems, role, output_dir)?;
        report(SplitProgress::StemWritten {
            role,
            path: dest,
            done: done + 1,
        })?;
    }

    report(SplitProgress::Finished)?;
    info!(
        "split {} into {}",
        input_path.display(),
        output_dir.display()
    );

    Ok(SplitResult {
        vocals_path: stem_path(output_dir, StemRole::Vocals),
        drums_path: stem_path(output_dir, StemRole::Drums),
        bass_path: stem_path(output_dir, StemRole::Bass),
        other_path: stem_path(output_dir, StemRole::Other),
    })
}

/// Writes one stem to `<output_dir>/<stem>.wav` and returns its path.
pub fn write_stem(stems: &SeparatedStems, role: StemRole, output_dir: &Path) -> Result<PathBuf> {
    let dest = stem_path(output_dir, role);
    write_stem_atomically(&dest, &stems.to_audio(role))?;
    debug!("wrote {role}: {}", dest.display());
    Ok(dest)
}

/// Writes next to `dest` and renames into place, so a reader never sees a
/// half-written stem.
fn write_stem_atomically(dest: &Path, audio: &AudioData) -> Result<()> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let tmp = NamedTempFile::new_in(dir)?;
    write_audio(tmp.path(), audio)?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}
