pub mod etl;
pub mod generator;
pub mod header;
pub mod inputs;
pub mod lint;
pub mod merge;
pub mod use_cases;

pub use crate::domain::ports::{LogRepository, Pipeline, Storage};
pub use crate::utils::error::Result;
pub use etl::PipelineEngine;
