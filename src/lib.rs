//! filedo: local storage-integrity toolkit. Fake-capacity detection, fill/secure-wipe,
//! damage scanning, and duplicate-file finding over a shared cancellation/progress/history
//! infrastructure.

pub mod calibrate;
pub mod cancel;
pub mod cli;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod fs_util;
pub mod history;
pub mod logging;
pub mod progress;
pub mod target;
pub mod types;
pub mod volume;

pub use error::FiledoError;
pub use types::{CapacityTestResult, DuplicateGroup, TargetRoot, VolumeInfo};
