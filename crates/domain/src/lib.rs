pub mod config;
pub mod diagnostics;
pub mod error;
pub mod run;

pub use error::{Error, Result};
pub use run::{Run, RunCreate, RunEventRecord, RunStatus, RunType, RunUpdate, UpsertInput};
