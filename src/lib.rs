//! # stem-live
//!
//! Control service for AI audio stem separation: reads line-delimited JSON
//! commands, runs offline separations on background workers, and keeps a
//! live per-stem mixer (volume/mute/solo) tracked against playback position.

pub mod config;
pub mod console;
pub mod core;
pub mod error;
pub mod io;
pub mod jobs;
pub mod protocol;
pub mod server;
pub mod types;

pub use crate::{
    config::ServiceConfig,
    console::{ConsoleMode, LiveConsole},
    core::{
        audio::{read_audio, write_audio},
        engine::{DemucsProcess, MockModel, SeparationEngine, StemModel},
        mixer::{MixerState, StemSet},
        playback::{Clock, ManualClock, PlaybackController, SystemClock, TransportState},
        splitter::{split_file, write_stem},
    },
    error::{PlaybackError, Result, ServiceError},
    io::{
        progress::SplitProgress,
        sink::{CaptureBuffer, LineSink},
    },
    jobs::JobRegistry,
    protocol::{Event, Request, SessionCommand, StatusSnapshot, StemControl},
    server::{CommandServer, ServerState},
    types::{AudioData, JobKind, SeparatedStems, SplitOptions, SplitResult, StemRole},
};
