pub mod audio;
pub mod dsp;
pub mod engine;
pub mod mixer;
pub mod playback;
pub mod splitter;
