pub mod registry;
pub mod worker;

pub use registry::{JobInfo, JobRegistry, JobToken};
