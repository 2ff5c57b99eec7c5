//! The command loop: one JSON request per input line, one JSON reply per
//! request, with job events interleaved by background workers.

use crate::{
    config::ServiceConfig,
    core::playback::{Clock, PlaybackController, SystemClock},
    error::{PlaybackError, Result},
    io::sink::LineSink,
    jobs::{worker, JobRegistry},
    protocol::{Event, Reply, Request, SessionCommand, StatusSnapshot},
};

use serde::Deserialize;
use std::{
    io::{BufRead, ErrorKind},
    path::PathBuf,
    sync::Arc,
    thread::JoinHandle,
};
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Running,
    ShuttingDown,
}

pub struct CommandServer {
    config: ServiceConfig,
    registry: Arc<JobRegistry>,
    sink: LineSink,
    clock: Arc<dyn Clock>,
    state: ServerState,
    workers: Vec<JoinHandle<()>>,
}

fn required(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

fn required_path(field: &Option<PathBuf>) -> Option<&PathBuf> {
    field.as_ref().filter(|p| !p.as_os_str().is_empty())
}

impl CommandServer {
    pub fn new(config: ServiceConfig, sink: LineSink) -> Self {
        Self::with_clock(config, sink, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ServiceConfig, sink: LineSink, clock: Arc<dyn Clock>) -> Self {
        let registry = Arc::new(JobRegistry::new(sink.clone()));
        Self {
            config,
            registry,
            sink,
            clock,
            state: ServerState::Running,
            workers: Vec::new(),
        }
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Announces the service, then serves `input` until `shutdown` or end of
    /// input.
    pub fn run<R: BufRead>(&mut self, input: R) -> Result<()> {
        info!("separation service started (model {})", self.config.model_name);
        self.reply(&Event::ServiceStarted.into());

        for line in input.lines() {
            match line {
                Ok(line) => self.handle_line(&line),
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    warn!("input line is not UTF-8");
                    self.reply(&Event::error("Invalid JSON").into());
                }
                Err(e) => {
                    error!("failed to read input: {e}");
                    break;
                }
            }
            if self.state == ServerState::ShuttingDown {
                break;
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Handles one input line, writing its reply before returning.
    pub fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!("invalid JSON: {e}");
                self.reply(&Event::error("Invalid JSON").into());
                return;
            }
        };
        let request = match Request::deserialize(value) {
            Ok(r) => r,
            Err(e) => {
                warn!("malformed request: {e}");
                self.reply(&Event::error(format!("Invalid request: {e}")).into());
                return;
            }
        };

        if let Some(reply) = self.dispatch(&request) {
            self.reply(&reply);
        }
    }

    fn reply(&self, reply: &Reply) {
        if let Err(e) = self.sink.emit(reply) {
            error!("failed to write reply: {e}");
        }
    }

    fn dispatch(&mut self, req: &Request) -> Option<Reply> {
        let Some(action) = req.action.as_deref() else {
            return Some(Event::error("Missing action").into());
        };
        info!("received command: {action}");

        match action {
            "separate_offline" => self.separate_offline(req),
            "start_live" => self.start_live(req),
            "stop_live" => {
                self.registry.stop_all_live();
                Some(Event::LiveStopped.into())
            }
            "cancel" => Some(self.cancel(req)),
            "heartbeat" => Some(Event::HeartbeatAck.into()),
            "shutdown" => {
                info!("shutdown requested");
                self.state = ServerState::ShuttingDown;
                None
            }
            other => Some(match SessionCommand::from_request(req) {
                Ok(Some(cmd)) => self.on_live(|c| cmd.apply(c)),
                Ok(None) => {
                    warn!("unknown action: {other}");
                    Event::error(format!("Unknown action: {other}")).into()
                }
                Err(msg) => Event::error(msg).into(),
            }),
        }
    }

    fn on_live<F>(&self, f: F) -> Reply
    where
        F: FnOnce(&mut PlaybackController) -> std::result::Result<StatusSnapshot, PlaybackError>,
    {
        match self.registry.with_active_live(f) {
            Some(Ok(snapshot)) => snapshot.into(),
            Some(Err(e)) => Event::error(e.to_string()).into(),
            None => Event::error(PlaybackError::NoActiveSource.to_string()).into(),
        }
    }

    /// Acknowledges before the worker starts, so `started` always precedes
    /// the job's progress events.
    fn separate_offline(&mut self, req: &Request) -> Option<Reply> {
        let job_id = required(&req.job_id);
        let (Some(id), Some(file), Some(output_dir)) = (
            job_id,
            required_path(&req.file).cloned(),
            required_path(&req.output_dir).cloned(),
        ) else {
            return Some(Event::job_error(job_id, "Missing parameters").into());
        };
        if !file.exists() {
            return Some(Event::job_error(Some(id), "Audio file not found").into());
        }

        let token = match self
            .registry
            .insert_offline(id, file.clone(), output_dir.clone())
        {
            Ok(t) => t,
            Err(e) => return Some(Event::job_error(Some(id), e.to_string()).into()),
        };
        self.reply(&Event::Started { job_id: id.to_string() }.into());

        self.workers.retain(|h| !h.is_finished());
        match worker::spawn_offline(
            Arc::clone(&self.registry),
            token.clone(),
            self.config.clone(),
            file,
            output_dir,
        ) {
            Ok(handle) => self.workers.push(handle),
            Err(e) => {
                error!("could not start worker for {id}: {e}");
                self.registry
                    .finish(&token, &Event::job_error(Some(id), e.to_string()));
            }
        }
        None
    }

    /// Registers the session with a pending controller and acknowledges;
    /// separation runs on a worker that starts playback once the stems are
    /// ready.
    fn start_live(&mut self, req: &Request) -> Option<Reply> {
        let job_id = required(&req.job_id);
        let (Some(id), Some(file)) = (job_id, required_path(&req.file)) else {
            return Some(Event::job_error(job_id, "Missing parameters").into());
        };
        if !file.exists() {
            return Some(Event::job_error(Some(id), "Audio file not found").into());
        }
        if self.registry.contains(id) {
            return Some(Event::job_error(Some(id), format!("Job already active: {id}")).into());
        }

        let mut controller =
            PlaybackController::new(Arc::clone(&self.clock), self.config.default_duration_secs);
        controller.open(file);
        let live_dir = worker::prepare_live_dir(&self.config, id);

        let token = match self
            .registry
            .insert_live(id, file.clone(), live_dir, controller)
        {
            Ok(t) => t,
            Err(e) => return Some(Event::job_error(Some(id), e.to_string()).into()),
        };
        self.reply(&Event::Started { job_id: id.to_string() }.into());
        info!("live separation {id} started");

        self.workers.retain(|h| !h.is_finished());
        match worker::spawn_live(
            Arc::clone(&self.registry),
            token.clone(),
            self.config.clone(),
            file.clone(),
        ) {
            Ok(handle) => self.workers.push(handle),
            Err(e) => {
                error!("could not start worker for {id}: {e}");
                self.registry
                    .finish(&token, &Event::job_error(Some(id), e.to_string()));
            }
        }
        None
    }

    fn cancel(&mut self, req: &Request) -> Reply {
        let Some(id) = required(&req.job_id) else {
            return Event::error("Missing job_id").into();
        };
        self.registry.cancel(id);
        Event::Cancelled { job_id: id.to_string() }.into()
    }

    /// Stops live sessions and abandons running jobs.
    pub fn shutdown(&mut self) {
        self.state = ServerState::ShuttingDown;
        let abandoned = self.registry.cancel_all();
        if abandoned > 0 {
            info!("abandoned {abandoned} job(s) on shutdown");
        }
        info!("separation service stopped");
    }

    /// Waits for every job worker spawned so far.
    pub fn join_workers(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("job worker panicked");
            }
        }
    }
}
