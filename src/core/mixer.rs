use crate::{
    error::PlaybackError,
    types::{SeparatedStems, StemRole, STEM_COUNT},
};

/// Per-stem volume, mute and solo.
///
/// At most one stem is soloed at any time: soloing a stem clears every
/// other solo in the same update.
#[derive(Clone, Debug, PartialEq)]
pub struct MixerState {
    volumes: [f32; STEM_COUNT],
    mutes: [bool; STEM_COUNT],
    solos: [bool; STEM_COUNT],
}

impl Default for MixerState {
    fn default() -> Self {
        Self {
            volumes: [1.0; STEM_COUNT],
            mutes: [false; STEM_COUNT],
            solos: [false; STEM_COUNT],
        }
    }
}

fn check_index(i: usize) -> Result<(), PlaybackError> {
    if i < STEM_COUNT {
        Ok(())
    } else {
        Err(PlaybackError::InvalidStem(i))
    }
}

impl MixerState {
    pub fn volumes(&self) -> [f32; STEM_COUNT] {
        self.volumes
    }

    pub fn mutes(&self) -> [bool; STEM_COUNT] {
        self.mutes
    }

    pub fn solos(&self) -> [bool; STEM_COUNT] {
        self.solos
    }

    /// Clamped to `[0, 1]`; NaN is treated as silence.
    pub fn set_volume(&mut self, i: usize, v: f32) -> Result<(), PlaybackError> {
        check_index(i)?;
        self.volumes[i] = if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        Ok(())
    }

    pub fn set_mute(&mut self, i: usize, mute: bool) -> Result<(), PlaybackError> {
        check_index(i)?;
        self.mutes[i] = mute;
        Ok(())
    }

    pub fn set_solo(&mut self, i: usize, solo: bool) -> Result<(), PlaybackError> {
        check_index(i)?;
        if solo {
            for (j, s) in self.solos.iter_mut().enumerate() {
                *s = j == i;
            }
        } else {
            self.solos[i] = false;
        }
        Ok(())
    }

    pub fn any_solo(&self) -> bool {
        self.solos.iter().any(|&s| s)
    }

    /// A soloed stem overrides every mute; without a solo, unmuted stems play.
    pub fn is_audible(&self, i: usize) -> bool {
        if i >= STEM_COUNT {
            return false;
        }
        if self.any_solo() {
            self.solos[i]
        } else {
            !self.mutes[i]
        }
    }

    pub fn audible(&self) -> [bool; STEM_COUNT] {
        std::array::from_fn(|i| self.is_audible(i))
    }

    /// Effective gain per stem: its volume if audible, else zero.
    pub fn gains(&self) -> [f32; STEM_COUNT] {
        std::array::from_fn(|i| if self.is_audible(i) { self.volumes[i] } else { 0.0 })
    }
}

/// Sums `out.len()` frames of the audible stems, starting at `start_frame`.
///
/// Frames past the end of the stems are written as silence. Returns the
/// number of frames that came from the stems.
pub fn mix_into(
    stems: &SeparatedStems,
    mixer: &MixerState,
    start_frame: usize,
    out: &mut [[f32; 2]],
) -> usize {
    out.fill([0.0; 2]);
    let total = stems.frames();
    if start_frame >= total {
        return 0;
    }
    let n = out.len().min(total - start_frame);
    let gains = mixer.gains();

    for role in StemRole::ALL {
        let g = gains[role.index()];
        if g == 0.0 {
            continue;
        }
        let stem = stems.stem(role);
        for (k, frame) in out.iter_mut().take(n).enumerate() {
            frame[0] += stem[(0, start_frame + k)] * g;
            frame[1] += stem[(1, start_frame + k)] * g;
        }
    }
    n
}

/// Decoded stems plus their mixer settings for one loaded source.
///
/// The stems are populated at most once per source and replaced wholesale
/// when a new source is loaded.
#[derive(Clone, Debug, Default)]
pub struct StemSet {
    stems: Option<SeparatedStems>,
    pub mixer: MixerState,
}

impl StemSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn populated(stems: SeparatedStems) -> Self {
        Self {
            stems: Some(stems),
            mixer: MixerState::default(),
        }
    }

    /// Fills an empty set, keeping any mixer settings made while waiting.
    pub fn populate(&mut self, stems: SeparatedStems) {
        self.stems = Some(stems);
    }

    pub fn is_populated(&self) -> bool {
        self.stems.is_some()
    }

    pub fn stems(&self) -> Option<&SeparatedStems> {
        self.stems.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn constant_stems(frames: usize) -> SeparatedStems {
        // stem i carries the constant value i + 1 on both channels
        let data = Array3::from_shape_fn((4, 2, frames), |(s, _, _)| (s + 1) as f32);
        SeparatedStems::new(data, 44_100).unwrap()
    }

    #[test]
    fn solo_is_exclusive() {
        let mut m = MixerState::default();
        let seq = [(0, true), (2, true), (2, false), (3, true), (1, true), (1, false)];
        for (i, on) in seq {
            m.set_solo(i, on).unwrap();
            assert!(m.solos().iter().filter(|&&s| s).count() <= 1);
        }
        assert!(!m.any_solo());
    }

    #[test]
    fn unsolo_clears_only_that_stem() {
        let mut m = MixerState::default();
        m.set_solo(1, true).unwrap();
        m.set_solo(2, false).unwrap();
        assert_eq!(m.solos(), [false, true, false, false]);
    }

    #[test]
    fn volume_is_clamped() {
        let mut m = MixerState::default();
        m.set_volume(0, 1.7).unwrap();
        m.set_volume(1, -0.3).unwrap();
        m.set_volume(2, f32::NAN).unwrap();
        assert_eq!(m.volumes(), [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut m = MixerState::default();
        assert_eq!(m.set_volume(4, 0.5), Err(PlaybackError::InvalidStem(4)));
        assert_eq!(m.set_mute(9, true), Err(PlaybackError::InvalidStem(9)));
        assert_eq!(m.set_solo(4, true), Err(PlaybackError::InvalidStem(4)));
        assert_eq!(m, MixerState::default());
    }

    #[test]
    fn audibility_covers_every_mute_solo_combination() {
        // stem 0 under test, stem 3 optionally soloed by someone else
        for mute in [false, true] {
            for solo in [false, true] {
                for other_solo in [false, true] {
                    for other_mute in [false, true] {
                        let mut m = MixerState::default();
                        m.set_mute(0, mute).unwrap();
                        m.set_mute(3, other_mute).unwrap();
                        if other_solo {
                            m.set_solo(3, true).unwrap();
                        }
                        if solo {
                            m.set_solo(0, true).unwrap();
                        }
                        let solos = m.solos();
                        let mutes = m.mutes();
                        let any = solos.iter().any(|&s| s);
                        let expected: [bool; 4] = std::array::from_fn(|i| {
                            (!any && !mutes[i]) || (any && solos[i])
                        });
                        assert_eq!(m.audible(), expected, "mute={mute} solo={solo} other_solo={other_solo}");
                    }
                }
            }
        }
    }

    #[test]
    fn chunked_mix_matches_whole_buffer() {
        let stems = constant_stems(1000);
        let mut m = MixerState::default();
        m.set_volume(1, 0.5).unwrap();
        m.set_mute(2, true).unwrap();

        let mut whole = vec![[0.0f32; 2]; 1000];
        assert_eq!(mix_into(&stems, &m, 0, &mut whole), 1000);

        let mut chunked = Vec::new();
        let mut pos = 0;
        while pos < 1000 {
            let mut chunk = vec![[0.0f32; 2]; 128];
            let n = mix_into(&stems, &m, pos, &mut chunk);
            chunked.extend_from_slice(&chunk[..n]);
            pos += n;
        }
        assert_eq!(whole, chunked);
        // 1*1 + 2*0.5 + muted 3 + 4*1
        assert_eq!(whole[0], [6.0, 6.0]);
    }

    #[test]
    fn solo_overrides_mute_in_mix() {
        let stems = constant_stems(4);
        let mut m = MixerState::default();
        m.set_mute(3, true).unwrap();
        m.set_solo(3, true).unwrap();
        let mut out = [[0.0f32; 2]; 4];
        mix_into(&stems, &m, 0, &mut out);
        assert_eq!(out[0], [4.0, 4.0]);
    }

    #[test]
    fn mix_past_end_is_silent() {
        let stems = constant_stems(10);
        let mut out = [[1.0f32; 2]; 8];
        assert_eq!(mix_into(&stems, &MixerState::default(), 6, &mut out), 4);
        assert_eq!(out[4], [0.0, 0.0]);
        assert_eq!(mix_into(&stems, &MixerState::default(), 10, &mut out), 0);
    }
}
