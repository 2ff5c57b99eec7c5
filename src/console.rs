//! Control surface for a single live session run outside the service: the
//! stems are separated up front, then playback and the mixer are driven by
//! JSON lines or by short text commands.

use crate::{
    core::playback::PlaybackController,
    error::Result,
    io::sink::LineSink,
    protocol::{stem_index, Event, Reply, Request, SessionCommand, StemControl},
};

use serde_json::Value;
use std::{
    io::{BufRead, ErrorKind},
    ops::ControlFlow,
};
use tracing::{error, info, warn};

/// How input lines are read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleMode {
    /// `{"action": "play"}`, `{"action": "stem_control", ...}` and so on.
    Json,
    /// `play`, `volume 1 0.5`, `mute 0 yes`, `quit`.
    Interactive,
}

pub struct LiveConsole {
    controller: PlaybackController,
    sink: LineSink,
    mode: ConsoleMode,
}

impl LiveConsole {
    pub fn new(controller: PlaybackController, sink: LineSink, mode: ConsoleMode) -> Self {
        Self {
            controller,
            sink,
            mode,
        }
    }

    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    /// Prints `READY`, then serves `input` until `quit` or end of input.
    pub fn run<R: BufRead>(&mut self, input: R) -> Result<()> {
        self.sink.emit_line("READY")?;
        for line in input.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    self.reply(&Event::error("Invalid JSON").into());
                    continue;
                }
                Err(e) => {
                    error!("failed to read input: {e}");
                    break;
                }
            };
            if self.handle_line(&line).is_break() {
                break;
            }
        }
        if let Err(e) = self.controller.stop() {
            warn!("could not stop playback: {e}");
        }
        info!("live session ended");
        Ok(())
    }

    /// Handles one line. `Break` means the user asked to quit.
    pub fn handle_line(&mut self, line: &str) -> ControlFlow<()> {
        let line = line.trim();
        if line.is_empty() {
            return ControlFlow::Continue(());
        }
        let parsed = match self.mode {
            ConsoleMode::Json => parse_json(line),
            ConsoleMode::Interactive => match parse_text(line) {
                Ok(None) => return ControlFlow::Break(()),
                other => other,
            },
        };
        let reply = match parsed {
            Ok(Some(cmd)) => match cmd.apply(&mut self.controller) {
                Ok(snapshot) => snapshot.into(),
                Err(e) => Event::error(e.to_string()).into(),
            },
            Ok(None) => return ControlFlow::Continue(()),
            Err(msg) => Event::error(msg).into(),
        };
        self.reply(&reply);
        ControlFlow::Continue(())
    }

    fn reply(&self, reply: &Reply) {
        if let Err(e) = self.sink.emit(reply) {
            error!("failed to write reply: {e}");
        }
    }
}

fn parse_json(line: &str) -> std::result::Result<Option<SessionCommand>, String> {
    let req: Request = serde_json::from_str::<Value>(line)
        .map_err(|_| "Invalid JSON".to_string())
        .and_then(|v| serde_json::from_value(v).map_err(|e| format!("Invalid request: {e}")))?;
    match SessionCommand::from_request(&req)? {
        Some(cmd) => Ok(Some(cmd)),
        None => Err(match req.action {
            Some(a) => format!("Unknown action: {a}"),
            None => "Missing action".to_string(),
        }),
    }
}

/// `Ok(None)` is `quit`.
fn parse_text(line: &str) -> std::result::Result<Option<SessionCommand>, String> {
    let lower = line.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    let cmd = match words.as_slice() {
        ["quit"] | ["exit"] => return Ok(None),
        ["play"] => SessionCommand::Play,
        ["pause"] => SessionCommand::Pause,
        ["stop"] => SessionCommand::Stop,
        ["status"] => SessionCommand::Status,
        ["seek", pos] => SessionCommand::Seek(
            pos.parse()
                .map_err(|_| format!("Invalid position: {pos}"))?,
        ),
        [kind @ ("volume" | "mute" | "solo"), stem, value] => {
            let stem: i64 = stem
                .parse()
                .map_err(|_| format!("Invalid stem index: {stem}"))?;
            let value = match *kind {
                "volume" => value
                    .parse::<f64>()
                    .map(Value::from)
                    .map_err(|_| format!("Invalid volume: {value}"))?,
                _ => Value::Bool(matches!(*value, "true" | "1" | "yes")),
            };
            SessionCommand::Stem(stem_index(stem)?, StemControl::parse(kind, &value)?)
        }
        _ => return Err("Unknown command".to_string()),
    };
    Ok(Some(cmd))
}
