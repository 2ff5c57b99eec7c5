use crate::types::StemRole;
use std::path::PathBuf;

/// Checkpoints reported while an offline split runs.
#[derive(Clone, Debug, PartialEq)]
pub enum SplitProgress {
    /// Model acquired and source decoded.
    Loaded,
    Separated,
    /// One stem file is in place; `done` counts stems written so far.
    StemWritten {
        role: StemRole,
        path: PathBuf,
        done: usize,
    },
    Finished,
}

impl SplitProgress {
    pub fn percent(&self) -> u8 {
        match self {
            SplitProgress::Loaded => 25,
            SplitProgress::Separated => 75,
            SplitProgress::StemWritten { done, .. } => 75 + 6 * (*done).min(4) as u8,
            SplitProgress::Finished => 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percents_are_monotonic() {
        let steps = [
            SplitProgress::Loaded,
            SplitProgress::Separated,
            SplitProgress::StemWritten {
                role: StemRole::Vocals,
                path: PathBuf::new(),
                done: 1,
            },
            SplitProgress::StemWritten {
                role: StemRole::Other,
                path: PathBuf::new(),
                done: 4,
            },
            SplitProgress::Finished,
        ];
        let pcts: Vec<u8> = steps.iter().map(|s| s.percent()).collect();
        assert_eq!(pcts, vec![25, 75, 81, 99, 100]);
    }
}
