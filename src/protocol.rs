//! Wire types for the line-delimited JSON control channel.

use crate::{
    core::playback::PlaybackController, error::PlaybackError, types::STEM_COUNT,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, path::PathBuf};
use tracing::debug;

/// One command line. Every field except `action` is action-specific.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Request {
    pub action: Option<String>,
    pub job_id: Option<String>,
    pub file: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub stem: Option<i64>,
    #[serde(rename = "type")]
    pub control_type: Option<String>,
    pub value: Option<Value>,
    pub position: Option<f64>,
}

/// Mixer control carried by `stem_control`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StemControl {
    Volume(f32),
    Mute(bool),
    Solo(bool),
}

impl StemControl {
    pub fn parse(control_type: &str, value: &Value) -> Result<Self, String> {
        match control_type {
            "volume" => value
                .as_f64()
                .map(|v| StemControl::Volume(v as f32))
                .ok_or_else(|| "volume value must be a number".to_string()),
            "mute" => as_flag(value)
                .map(StemControl::Mute)
                .ok_or_else(|| "mute value must be a boolean".to_string()),
            "solo" => as_flag(value)
                .map(StemControl::Solo)
                .ok_or_else(|| "solo value must be a boolean".to_string()),
            other => Err(format!("Unknown control type: {other}")),
        }
    }
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

/// A command aimed at the active playback session. Each one replies with a
/// status snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionCommand {
    Play,
    Pause,
    Stop,
    Seek(f64),
    Status,
    Stem(usize, StemControl),
}

impl SessionCommand {
    /// Reads a session command out of a request. `Ok(None)` means the
    /// action is not a session action.
    pub fn from_request(req: &Request) -> Result<Option<Self>, String> {
        let cmd = match req.action.as_deref() {
            Some("play") => SessionCommand::Play,
            Some("pause") => SessionCommand::Pause,
            Some("stop") => SessionCommand::Stop,
            Some("status") => SessionCommand::Status,
            Some("seek") => match req.position {
                Some(pos) => SessionCommand::Seek(pos),
                None => return Err("Missing parameters".into()),
            },
            Some("stem_control") => {
                let (Some(stem), Some(kind), Some(value)) =
                    (req.stem, req.control_type.as_deref(), req.value.as_ref())
                else {
                    return Err("Missing parameters".into());
                };
                SessionCommand::Stem(stem_index(stem)?, StemControl::parse(kind, value)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(cmd))
    }

    /// Runs the command. A `pause` that finds nothing playing still
    /// reports the current state.
    pub fn apply(&self, c: &mut PlaybackController) -> Result<StatusSnapshot, PlaybackError> {
        match *self {
            SessionCommand::Play => c.play()?,
            SessionCommand::Pause => {
                if let Err(e) = c.pause() {
                    if e != PlaybackError::NotPlaying {
                        return Err(e);
                    }
                    debug!("pause ignored: {e}");
                }
            }
            SessionCommand::Stop => c.stop()?,
            SessionCommand::Seek(pos) => {
                c.seek(pos)?;
            }
            SessionCommand::Status => {}
            SessionCommand::Stem(i, StemControl::Volume(v)) => c.set_volume(i, v)?,
            SessionCommand::Stem(i, StemControl::Mute(m)) => c.set_mute(i, m)?,
            SessionCommand::Stem(i, StemControl::Solo(on)) => c.set_solo(i, on)?,
        }
        c.snapshot()
    }
}

/// Checks a wire stem index against the four stems.
pub fn stem_index(stem: i64) -> Result<usize, String> {
    if (0..STEM_COUNT as i64).contains(&stem) {
        Ok(stem as usize)
    } else {
        Err(format!("Invalid stem index: {stem}"))
    }
}

/// Status and job events, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Event {
    ServiceStarted,
    Started {
        job_id: String,
    },
    Progress {
        job_id: String,
        percent: u8,
    },
    Complete {
        job_id: String,
        stems: BTreeMap<String, String>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
        message: String,
    },
    Cancelled {
        job_id: String,
    },
    LiveStopped,
    HeartbeatAck,
}

impl Event {
    pub fn error(message: impl Into<String>) -> Self {
        Event::Error {
            job_id: None,
            message: message.into(),
        }
    }

    pub fn job_error(job_id: Option<&str>, message: impl Into<String>) -> Self {
        Event::Error {
            job_id: job_id.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Playback and mixer state of the active live session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub is_playing: bool,
    pub position: f64,
    pub duration: f64,
    pub stem_volumes: [f32; STEM_COUNT],
    pub stem_mutes: [bool; STEM_COUNT],
    pub stem_solos: [bool; STEM_COUNT],
}

/// Anything the server writes back for one command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Event(Event),
    Status(StatusSnapshot),
}

impl From<Event> for Reply {
    fn from(e: Event) -> Self {
        Reply::Event(e)
    }
}

impl From<StatusSnapshot> for Reply {
    fn from(s: StatusSnapshot) -> Self {
        Reply::Status(s)
    }
}
