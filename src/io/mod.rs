pub mod progress;
pub mod sink;
