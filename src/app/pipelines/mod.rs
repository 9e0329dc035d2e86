pub mod merge_pipeline;
pub mod notebook_pipeline;

pub use merge_pipeline::{MergePipeline, OutputFormat};
pub use notebook_pipeline::{lint_notebook_file, NotebookArtifact, NotebookPaths, NotebookPipeline};
