use crate::{
    config::ServiceConfig,
    core::{
        audio::read_audio,
        engine::SeparationEngine,
        splitter::split_file,
    },
    error::{Result, ServiceError},
    jobs::registry::{JobRegistry, JobToken},
    protocol::Event,
    types::SeparatedStems,
};

use std::{
    fs,
    ops::ControlFlow,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
};
use tracing::{error, info, warn};

/// Spawns the background worker for a registered offline job.
///
/// The worker reports progress and its terminal event through the registry;
/// if the job is cancelled it stops at the next checkpoint and says nothing.
pub fn spawn_offline(
    registry: Arc<JobRegistry>,
    token: JobToken,
    config: ServiceConfig,
    source: PathBuf,
    output_dir: PathBuf,
) -> Result<JoinHandle<()>> {
    let name = format!("job-{}", token.job_id);
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || run_offline(&registry, &token, &config, &source, &output_dir))?;
    Ok(handle)
}

fn run_offline(
    registry: &JobRegistry,
    token: &JobToken,
    config: &ServiceConfig,
    source: &Path,
    output_dir: &Path,
) {
    let job_id = token.job_id.as_str();
    info!("offline separation {job_id}: {}", source.display());

    let mut engine = SeparationEngine::new(config);
    engine.load_model(&config.model_name);

    let result = split_file(&engine, source, output_dir, |p| {
        let event = Event::Progress {
            job_id: job_id.to_string(),
            percent: p.percent(),
        };
        if token.is_cancelled() || !registry.emit(token, &event) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });

    match result {
        Ok(res) => {
            registry.finish(
                token,
                &Event::Complete {
                    job_id: job_id.to_string(),
                    stems: res.to_map(),
                },
            );
        }
        Err(ServiceError::Cancelled) => {
            info!("offline separation {job_id} abandoned after cancel");
        }
        Err(e) => {
            error!("offline separation {job_id} failed: {e}");
            registry.finish(token, &Event::job_error(Some(job_id), e.to_string()));
        }
    }
}

/// Spawns the background worker that separates a registered live job's
/// source and hands the stems to its controller.
///
/// A live job that is cancelled before the stems are ready discards them.
pub fn spawn_live(
    registry: Arc<JobRegistry>,
    token: JobToken,
    config: ServiceConfig,
    source: PathBuf,
) -> Result<JoinHandle<()>> {
    let name = format!("job-{}", token.job_id);
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || run_live(&registry, &token, &config, &source))?;
    Ok(handle)
}

fn run_live(registry: &JobRegistry, token: &JobToken, config: &ServiceConfig, source: &Path) {
    let job_id = token.job_id.as_str();
    let progress = |percent| Event::Progress {
        job_id: job_id.to_string(),
        percent,
    };
    let checkpoint = |percent| {
        if token.is_cancelled() || !registry.emit(token, &progress(percent)) {
            Err(ServiceError::Cancelled)
        } else {
            Ok(())
        }
    };

    let stems = (|| -> Result<SeparatedStems> {
        let mut engine = SeparationEngine::new(config);
        engine.load_model(&config.model_name);
        if !engine.is_real() {
            info!("live session {job_id} using mock separation");
        }
        let audio = read_audio(source)?;
        checkpoint(25)?;
        let stems = engine.separate(&audio)?;
        checkpoint(75)?;
        Ok(stems)
    })();

    match stems {
        Ok(stems) => match registry.attach_live(token, stems, &progress(100)) {
            Ok(true) => info!("live separation {job_id} ready"),
            Ok(false) => info!("live separation {job_id} abandoned after cancel"),
            Err(e) => {
                error!("live separation {job_id} could not start: {e}");
                registry.finish(token, &Event::job_error(Some(job_id), e.to_string()));
            }
        },
        Err(ServiceError::Cancelled) => {
            info!("live separation {job_id} abandoned after cancel");
        }
        Err(e) => {
            error!("live separation {job_id} failed: {e}");
            registry.finish(token, &Event::job_error(Some(job_id), e.to_string()));
        }
    }
}

/// Creates the scratch directory of a live session.
pub fn prepare_live_dir(config: &ServiceConfig, job_id: &str) -> PathBuf {
    let live_dir = config.live_dir(job_id);
    if let Err(e) = fs::create_dir_all(&live_dir) {
        warn!("could not create {}: {e}", live_dir.display());
    }
    live_dir
}
