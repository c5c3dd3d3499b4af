pub mod builtins;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod input;
pub mod options;
pub mod pack;
pub mod params;
pub mod results;
pub mod spec;
pub mod storage;

#[cfg(test)]
mod testing;

pub use context::{ExecContext, Func};
pub use error::{CodecError, JobError, Result};
pub use options::{JobFile, JobOptions, RequiredFiles, Scheduler, SchedulerOptions};
pub use params::Params;
pub use spec::JobSpec;
