pub mod cache;
pub mod dbml;
pub mod export_bundle;
pub mod notebook_json;
pub mod plan_markdown;
pub mod storage;

pub use cache::LogCache;
pub use dbml::parse_dbml;
pub use export_bundle::{ExportBundleRepository, ExportBundleSettings};
pub use notebook_json::{assign_cell_ids, read_notebook, write_notebook};
pub use plan_markdown::parse_plan;
pub use storage::LocalStorage;
