//! Student records and course recommendations backed by a grade classifier.
//!
//! The [`pipeline::Pipeline`] owns training, persistence and inference;
//! [`db`] is the SQLite store for student records used by the CLI.

pub mod bundle;
pub mod catalog;
pub mod dataset;
pub mod db;
pub mod error;
pub mod evaluation;
pub mod forest;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod recommend;
pub mod report;
pub mod trainer;

#[cfg(test)]
mod test_support;

pub use error::{PipelineError, Result};
