use crate::{
    core::playback::PlaybackController,
    error::{PlaybackError, Result, ServiceError},
    io::sink::LineSink,
    protocol::Event,
    types::{JobKind, SeparatedStems},
};

use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Instant,
};
use tracing::{info, warn};

/// Identifies one run of a job. A `job_id` reused after a cancel gets a new
/// generation, so stale workers cannot touch the new entry.
#[derive(Debug, Clone)]
pub struct JobToken {
    pub job_id: String,
    generation: u64,
    cancel: Arc<AtomicBool>,
}

impl JobToken {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

struct JobEntry {
    kind: JobKind,
    source_path: PathBuf,
    output_dir: Option<PathBuf>,
    started_at: Instant,
    generation: u64,
    cancel: Arc<AtomicBool>,
    controller: Option<PlaybackController>,
}

/// Read-only view of a tracked job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    pub job_id: String,
    pub kind: JobKind,
    pub source_path: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub started_at: Instant,
}

#[derive(Default)]
struct Table {
    jobs: HashMap<String, JobEntry>,
    next_generation: u64,
    /// Live jobs in start order; the last one is the active session.
    live_order: Vec<String>,
}

/// The job table: the only state shared between the command loop and the
/// workers.
///
/// Job events are written while the table lock is held, so once a job has
/// been removed (finished or cancelled) nothing more is emitted for it.
pub struct JobRegistry {
    table: Mutex<Table>,
    sink: LineSink,
}

impl JobRegistry {
    pub fn new(sink: LineSink) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn sink(&self) -> &LineSink {
        &self.sink
    }

    fn insert(
        &self,
        job_id: &str,
        kind: JobKind,
        source_path: PathBuf,
        output_dir: Option<PathBuf>,
        controller: Option<PlaybackController>,
    ) -> Result<JobToken> {
        let mut table = self.lock();
        if table.jobs.contains_key(job_id) {
            return Err(ServiceError::Validation(format!("Job already active: {job_id}")));
        }
        table.next_generation += 1;
        let generation = table.next_generation;
        let cancel = Arc::new(AtomicBool::new(false));
        table.jobs.insert(
            job_id.to_string(),
            JobEntry {
                kind,
                source_path,
                output_dir,
                started_at: Instant::now(),
                generation,
                cancel: cancel.clone(),
                controller,
            },
        );
        if kind == JobKind::Live {
            table.live_order.push(job_id.to_string());
        }
        info!("job {job_id} registered ({kind:?})");
        Ok(JobToken {
            job_id: job_id.to_string(),
            generation,
            cancel,
        })
    }

    pub fn insert_offline(
        &self,
        job_id: &str,
        source_path: PathBuf,
        output_dir: PathBuf,
    ) -> Result<JobToken> {
        self.insert(job_id, JobKind::Offline, source_path, Some(output_dir), None)
    }

    pub fn insert_live(
        &self,
        job_id: &str,
        source_path: PathBuf,
        output_dir: PathBuf,
        controller: PlaybackController,
    ) -> Result<JobToken> {
        self.insert(
            job_id,
            JobKind::Live,
            source_path,
            Some(output_dir),
            Some(controller),
        )
    }

    fn owns(table: &Table, token: &JobToken) -> bool {
        table
            .jobs
            .get(&token.job_id)
            .is_some_and(|e| e.generation == token.generation)
    }

    pub fn is_active(&self, token: &JobToken) -> bool {
        Self::owns(&self.lock(), token)
    }

    /// Emits a non-terminal event for the job if it is still tracked.
    /// Returns `false` once the job has been cancelled.
    pub fn emit(&self, token: &JobToken, event: &Event) -> bool {
        let table = self.lock();
        if !Self::owns(&table, token) {
            return false;
        }
        if let Err(e) = self.sink.emit(event) {
            warn!("failed to write event for {}: {e}", token.job_id);
        }
        true
    }

    /// Removes the job and emits its terminal event, unless it was already
    /// removed by a cancel.
    pub fn finish(&self, token: &JobToken, event: &Event) -> bool {
        let mut table = self.lock();
        if !Self::owns(&table, token) {
            return false;
        }
        Self::remove_entry(&mut table, &token.job_id);
        if let Err(e) = self.sink.emit(event) {
            warn!("failed to write event for {}: {e}", token.job_id);
        }
        info!("job {} finished", token.job_id);
        true
    }

    fn remove_entry(table: &mut Table, job_id: &str) -> Option<JobEntry> {
        let mut entry = table.jobs.remove(job_id)?;
        table.live_order.retain(|id| id != job_id);
        entry.cancel.store(true, Ordering::SeqCst);
        if let Some(c) = entry.controller.as_mut() {
            // stopping an opened controller cannot fail
            let _ = c.stop();
        }
        if entry.kind == JobKind::Live {
            if let Some(dir) = &entry.output_dir {
                match fs::remove_dir_all(dir) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => warn!("could not remove {}: {e}", dir.display()),
                }
            }
        }
        Some(entry)
    }

    /// Gives a live job its separated stems and starts playback, then emits
    /// `event`. Returns `Ok(false)` if the job was cancelled meanwhile, in
    /// which case the stems are dropped.
    pub fn attach_live(
        &self,
        token: &JobToken,
        stems: SeparatedStems,
        event: &Event,
    ) -> std::result::Result<bool, PlaybackError> {
        let mut table = self.lock();
        if !Self::owns(&table, token) {
            return Ok(false);
        }
        let controller = table
            .jobs
            .get_mut(&token.job_id)
            .and_then(|e| e.controller.as_mut())
            .ok_or(PlaybackError::NoActiveSource)?;
        controller.attach(stems);
        controller.play()?;
        if let Err(e) = self.sink.emit(event) {
            warn!("failed to write event for {}: {e}", token.job_id);
        }
        Ok(true)
    }

    /// Cancels the job whatever its kind. Returns its kind if it was tracked;
    /// cancelling an unknown job is not an error.
    pub fn cancel(&self, job_id: &str) -> Option<JobKind> {
        let mut table = self.lock();
        let kind = Self::remove_entry(&mut table, job_id).map(|e| e.kind);
        match kind {
            Some(k) => info!("job {job_id} cancelled ({k:?})"),
            None => info!("cancel for unknown job {job_id}"),
        }
        kind
    }

    /// Stops and forgets every live job. Returns their ids.
    pub fn stop_all_live(&self) -> Vec<String> {
        let mut table = self.lock();
        let ids = std::mem::take(&mut table.live_order);
        for id in &ids {
            Self::remove_entry(&mut table, id);
        }
        if !ids.is_empty() {
            info!("stopped {} live job(s)", ids.len());
        }
        ids
    }

    /// Cancels every job; used on shutdown.
    pub fn cancel_all(&self) -> usize {
        let mut table = self.lock();
        let ids: Vec<String> = table.jobs.keys().cloned().collect();
        for id in &ids {
            Self::remove_entry(&mut table, id);
        }
        ids.len()
    }

    /// Runs `f` on the most recently started live session, if any.
    pub fn with_active_live<R>(&self, f: impl FnOnce(&mut PlaybackController) -> R) -> Option<R> {
        let mut table = self.lock();
        let id = table.live_order.last()?.clone();
        let controller = table.jobs.get_mut(&id)?.controller.as_mut()?;
        Some(f(controller))
    }

    pub fn get(&self, job_id: &str) -> Option<JobInfo> {
        let table = self.lock();
        table.jobs.get(job_id).map(|e| JobInfo {
            job_id: job_id.to_string(),
            kind: e.kind,
            source_path: e.source_path.clone(),
            output_dir: e.output_dir.clone(),
            started_at: e.started_at,
        })
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.lock().jobs.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
