pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::{ExportBundleRepository, ExportBundleSettings, LocalStorage, LogCache};
pub use app::pipelines::{MergePipeline, NotebookPaths, NotebookPipeline, OutputFormat};
pub use config::NotebookConfig;
pub use core::generator::{GeneratorOptions, NotebookGenerator};
pub use core::header::{CellHeader, HeaderLanguage};
pub use core::inputs::{render_unresolved, resolve_inputs, InputDocuments, UnresolvedItem};
pub use core::lint::{lint_notebook, LintViolation};
pub use core::PipelineEngine;
pub use utils::error::{NotebookError, Result};
