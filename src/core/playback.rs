use crate::{
    core::mixer::{mix_into, StemSet},
    error::PlaybackError,
    protocol::StatusSnapshot,
    types::SeparatedStems,
};

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tracing::{debug, info};

/// Source of "now" for position tracking.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, d: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += d;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

#[derive(Clone, Debug)]
pub struct PlaybackSession {
    pub source_path: PathBuf,
    pub state: TransportState,
    pub duration: f64,
    /// Position at the last pause, seek or resume.
    anchor: f64,
    /// Set while playing.
    resumed_at: Option<Instant>,
}

/// Transport and mixer for one loaded source.
///
/// Position while playing is derived from the clock on every read; nothing
/// runs in the background.
pub struct PlaybackController {
    clock: Arc<dyn Clock>,
    default_duration: f64,
    session: Option<PlaybackSession>,
    stem_set: StemSet,
}

impl PlaybackController {
    pub fn new(clock: Arc<dyn Clock>, default_duration: f64) -> Self {
        Self {
            clock,
            default_duration,
            session: None,
            stem_set: StemSet::empty(),
        }
    }

    pub fn with_system_clock(default_duration: f64) -> Self {
        Self::new(Arc::new(SystemClock), default_duration)
    }

    /// Replaces the current source and its stems, resetting the transport.
    pub fn load(&mut self, source_path: &Path, stems: SeparatedStems) {
        self.open(source_path);
        self.attach(stems);
    }

    /// Starts a session for `source_path` whose stems are still being
    /// separated. The transport stays stopped until [`attach`](Self::attach).
    pub fn open(&mut self, source_path: &Path) {
        self.stem_set = StemSet::empty();
        self.session = Some(PlaybackSession {
            source_path: source_path.to_path_buf(),
            state: TransportState::Stopped,
            duration: self.default_duration,
            anchor: 0.0,
            resumed_at: None,
        });
        debug!("opened {}", source_path.display());
    }

    /// Hands the separated stems to the open session and fixes its duration.
    pub fn attach(&mut self, stems: SeparatedStems) {
        let measured = stems.duration_secs();
        let duration = if measured.is_finite() && measured > 0.0 {
            measured
        } else {
            self.default_duration
        };
        if let Some(s) = self.session.as_mut() {
            s.duration = duration;
            s.anchor = s.anchor.min(duration);
            info!("loaded {} ({duration:.2}s)", s.source_path.display());
        }
        self.stem_set.populate(stems);
    }

    /// `true` once the stems are in place and playback can start.
    pub fn is_ready(&self) -> bool {
        self.session.is_some() && self.stem_set.is_populated()
    }

    pub fn has_source(&self) -> bool {
        self.session.is_some()
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.source_path.as_path())
    }

    pub fn stem_set(&self) -> &StemSet {
        &self.stem_set
    }

    fn session_mut(&mut self) -> Result<&mut PlaybackSession, PlaybackError> {
        self.session.as_mut().ok_or(PlaybackError::NoActiveSource)
    }

    pub fn state(&self) -> TransportState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(TransportState::Stopped)
    }

    pub fn is_playing(&self) -> bool {
        self.state() == TransportState::Playing
    }

    /// Starts from `Stopped` or resumes from `Paused`; a no-op while playing.
    pub fn play(&mut self) -> Result<(), PlaybackError> {
        if !self.stem_set.is_populated() {
            return Err(PlaybackError::NoActiveSource);
        }
        let now = self.clock.now();
        let s = self.session_mut()?;
        if s.state != TransportState::Playing {
            s.state = TransportState::Playing;
            s.resumed_at = Some(now);
            info!("playback started at {:.2}s", s.anchor);
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), PlaybackError> {
        let position = self.position()?;
        let s = self.session_mut()?;
        if s.state != TransportState::Playing {
            return Err(PlaybackError::NotPlaying);
        }
        s.state = TransportState::Paused;
        s.anchor = position;
        s.resumed_at = None;
        info!("playback paused at {position:.2}s");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), PlaybackError> {
        let s = self.session_mut()?;
        s.state = TransportState::Stopped;
        s.anchor = 0.0;
        s.resumed_at = None;
        info!("playback stopped");
        Ok(())
    }

    /// Clamps to `[0, duration]` and keeps the transport state.
    pub fn seek(&mut self, position: f64) -> Result<f64, PlaybackError> {
        let now = self.clock.now();
        let s = self.session_mut()?;
        let target = if position.is_nan() {
            0.0
        } else {
            position.clamp(0.0, s.duration)
        };
        s.anchor = target;
        if s.state == TransportState::Playing {
            s.resumed_at = Some(now);
        }
        debug!("seek to {target:.2}s");
        Ok(target)
    }

    /// Current position, capped at the duration.
    ///
    /// The read that reaches the end returns the duration and stops the
    /// transport, which rewinds to 0.
    pub fn position(&mut self) -> Result<f64, PlaybackError> {
        let now = self.clock.now();
        let s = self.session_mut()?;
        let Some(resumed_at) = s.resumed_at else {
            return Ok(s.anchor);
        };
        let elapsed = now.saturating_duration_since(resumed_at).as_secs_f64();
        let pos = s.anchor + elapsed;
        if pos >= s.duration {
            let duration = s.duration;
            info!("end of stream");
            self.stop()?;
            return Ok(duration);
        }
        Ok(pos)
    }

    pub fn duration(&self) -> Result<f64, PlaybackError> {
        self.session
            .as_ref()
            .map(|s| s.duration)
            .ok_or(PlaybackError::NoActiveSource)
    }

    pub fn set_volume(&mut self, i: usize, v: f32) -> Result<(), PlaybackError> {
        self.session_mut()?;
        self.stem_set.mixer.set_volume(i, v)?;
        info!("stem {i} volume: {:.2}", self.stem_set.mixer.volumes()[i]);
        Ok(())
    }

    pub fn set_mute(&mut self, i: usize, mute: bool) -> Result<(), PlaybackError> {
        self.session_mut()?;
        self.stem_set.mixer.set_mute(i, mute)?;
        info!("stem {i} mute: {mute}");
        Ok(())
    }

    pub fn set_solo(&mut self, i: usize, solo: bool) -> Result<(), PlaybackError> {
        self.session_mut()?;
        self.stem_set.mixer.set_solo(i, solo)?;
        info!("stem {i} solo: {solo}");
        Ok(())
    }

    /// Mixes `frames` frames from `start_frame` with the current settings.
    pub fn mix(&self, start_frame: usize, frames: usize) -> Result<Vec<[f32; 2]>, PlaybackError> {
        let stems = self.stem_set.stems().ok_or(PlaybackError::NoActiveSource)?;
        let mut out = vec![[0.0f32; 2]; frames];
        mix_into(stems, &self.stem_set.mixer, start_frame, &mut out);
        Ok(out)
    }

    pub fn snapshot(&mut self) -> Result<StatusSnapshot, PlaybackError> {
        let position = self.position()?;
        let duration = self.duration()?;
        let mixer = &self.stem_set.mixer;
        Ok(StatusSnapshot {
            is_playing: self.is_playing(),
            position,
            duration,
            stem_volumes: mixer.volumes(),
            stem_mutes: mixer.mutes(),
            stem_solos: mixer.solos(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StemRole, STEM_COUNT};
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    fn controller(secs: usize) -> (PlaybackController, ManualClock) {
        let clock = ManualClock::new();
        let mut c = PlaybackController::new(Arc::new(clock.clone()), 180.0);
        let frames = secs * 100;
        let stems = SeparatedStems::new(Array3::zeros((STEM_COUNT, 2, frames)), 100).unwrap();
        c.load(Path::new("song.wav"), stems);
        (c, clock)
    }

    #[test]
    fn no_source_reports_no_active_source() {
        let mut c = PlaybackController::with_system_clock(180.0);
        assert_eq!(c.play(), Err(PlaybackError::NoActiveSource));
        assert_eq!(c.pause(), Err(PlaybackError::NoActiveSource));
        assert_eq!(c.stop(), Err(PlaybackError::NoActiveSource));
        assert_eq!(c.seek(1.0), Err(PlaybackError::NoActiveSource));
        assert_eq!(c.position(), Err(PlaybackError::NoActiveSource));
        assert_eq!(c.set_mute(0, true), Err(PlaybackError::NoActiveSource));
        assert!(c.snapshot().is_err());
    }

    #[test]
    fn pending_session_waits_for_stems() {
        let clock = ManualClock::new();
        let mut c = PlaybackController::new(Arc::new(clock.clone()), 180.0);
        c.open(Path::new("song.wav"));
        assert!(!c.is_ready());
        assert_eq!(c.play(), Err(PlaybackError::NoActiveSource));
        c.set_mute(1, true).unwrap();

        let snap = c.snapshot().unwrap();
        assert!(!snap.is_playing);
        assert_eq!(snap.duration, 180.0);

        let stems = SeparatedStems::new(Array3::zeros((STEM_COUNT, 2, 300)), 100).unwrap();
        c.attach(stems);
        assert!(c.is_ready());
        c.play().unwrap();
        let snap = c.snapshot().unwrap();
        assert_eq!(snap.duration, 3.0);
        assert_eq!(snap.stem_mutes, [false, true, false, false]);
    }

    #[test]
    fn pause_from_stopped_fails() {
        let (mut c, _) = controller(5);
        assert_eq!(c.pause(), Err(PlaybackError::NotPlaying));
        assert_eq!(c.state(), TransportState::Stopped);
    }

    #[test]
    fn play_while_playing_is_noop() {
        let (mut c, clock) = controller(5);
        c.play().unwrap();
        clock.advance(Duration::from_secs(1));
        c.play().unwrap();
        assert_eq!(c.state(), TransportState::Playing);
        assert_abs_diff_eq!(c.position().unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn stop_from_any_state_rewinds() {
        let (mut c, clock) = controller(5);
        c.stop().unwrap();
        assert_eq!(c.state(), TransportState::Stopped);

        c.play().unwrap();
        clock.advance(Duration::from_secs(2));
        c.stop().unwrap();
        assert_eq!(c.state(), TransportState::Stopped);
        assert_eq!(c.position().unwrap(), 0.0);

        c.play().unwrap();
        clock.advance(Duration::from_secs(1));
        c.pause().unwrap();
        c.stop().unwrap();
        assert_eq!(c.position().unwrap(), 0.0);
    }

    #[test]
    fn pause_freezes_and_resume_continues() {
        let (mut c, clock) = controller(10);
        c.play().unwrap();
        clock.advance(Duration::from_millis(1500));
        c.pause().unwrap();
        clock.advance(Duration::from_secs(3));
        assert_abs_diff_eq!(c.position().unwrap(), 1.5, epsilon = 1e-9);
        c.play().unwrap();
        clock.advance(Duration::from_millis(500));
        assert_abs_diff_eq!(c.position().unwrap(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn seek_clamps_and_keeps_state() {
        let (mut c, clock) = controller(5);
        assert_eq!(c.seek(-3.0).unwrap(), 0.0);
        assert_eq!(c.seek(99.0).unwrap(), 5.0);
        assert_eq!(c.state(), TransportState::Stopped);

        c.play().unwrap();
        c.seek(2.0).unwrap();
        assert_eq!(c.state(), TransportState::Playing);
        clock.advance(Duration::from_secs(1));
        assert_abs_diff_eq!(c.position().unwrap(), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn position_is_monotonic_and_stops_at_end() {
        let (mut c, clock) = controller(5);
        c.play().unwrap();
        let mut last = 0.0;
        for _ in 0..9 {
            clock.advance(Duration::from_millis(500));
            let p = c.position().unwrap();
            assert!(p >= last && p <= 5.0);
            last = p;
        }
        assert!(c.is_playing());

        clock.advance(Duration::from_secs(1));
        assert_eq!(c.position().unwrap(), 5.0);
        assert_eq!(c.state(), TransportState::Stopped);
        assert_eq!(c.position().unwrap(), 0.0);
    }

    #[test]
    fn snapshot_reflects_mixer() {
        let (mut c, _) = controller(5);
        c.set_mute(StemRole::Vocals.index(), true).unwrap();
        c.set_solo(2, true).unwrap();
        c.set_volume(1, 0.25).unwrap();
        let snap = c.snapshot().unwrap();
        assert!(!snap.is_playing);
        assert_eq!(snap.duration, 5.0);
        assert_eq!(snap.stem_mutes, [true, false, false, false]);
        assert_eq!(snap.stem_solos, [false, false, true, false]);
        assert_eq!(snap.stem_volumes, [1.0, 0.25, 1.0, 1.0]);
    }

    #[test]
    fn empty_stems_use_default_duration() {
        let mut c = PlaybackController::with_system_clock(180.0);
        let stems = SeparatedStems::new(Array3::zeros((STEM_COUNT, 2, 0)), 44_100).unwrap();
        c.load(Path::new("x.wav"), stems);
        assert_eq!(c.duration().unwrap(), 180.0);
    }
}
