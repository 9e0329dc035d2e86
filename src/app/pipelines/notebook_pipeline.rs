use crate::adapters::notebook_json::{read_notebook, write_notebook};
use crate::core::generator::{GeneratorOptions, NotebookGenerator};
use crate::core::header::HeaderLanguage;
use crate::core::inputs::{resolve_inputs, InputDocuments, ResolvedInputs};
use crate::core::lint::{lint_notebook, LintViolation};
use crate::domain::notebook::Notebook;
use crate::domain::ports::{Pipeline, Storage};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Input and output locations, relative to the storage root.
#[derive(Debug, Clone)]
pub struct NotebookPaths {
    pub schema: String,
    pub plan: String,
    pub output: String,
}

impl Default for NotebookPaths {
    fn default() -> Self {
        Self {
            schema: "data/schema.dbml".to_string(),
            plan: "PLAN.md".to_string(),
            output: "PoC.ipynb".to_string(),
        }
    }
}

pub struct NotebookArtifact {
    pub notebook: Notebook,
    pub bytes: Vec<u8>,
}

/// Schema + plan → `PoC.ipynb`. Any unresolved input stops the run before
/// anything is written.
pub struct NotebookPipeline<S: Storage> {
    storage: S,
    paths: NotebookPaths,
    generator: NotebookGenerator,
    dry_run: bool,
}

impl<S: Storage> NotebookPipeline<S> {
    pub fn new(storage: S, paths: NotebookPaths, options: GeneratorOptions) -> Self {
        Self {
            storage,
            paths,
            generator: NotebookGenerator::new(options),
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn paths(&self) -> &NotebookPaths {
        &self.paths
    }

    async fn read_optional(&self, path: &str) -> Result<Option<Vec<u8>>> {
        if self.storage.exists(path).await {
            Ok(Some(self.storage.read_file(path).await?))
        } else {
            Ok(None)
        }
    }

    /// Resolves the inputs without generating anything.
    pub async fn check(&self) -> Result<ResolvedInputs> {
        let documents = self.extract().await?;
        resolve_inputs(documents)
    }
}

#[async_trait]
impl<S: Storage> Pipeline for NotebookPipeline<S> {
    type Source = InputDocuments;
    type Artifact = NotebookArtifact;

    async fn extract(&self) -> Result<InputDocuments> {
        tracing::info!(
            "📥 Reading schema {} and plan {}",
            self.paths.schema,
            self.paths.plan
        );
        Ok(InputDocuments {
            schema_path: self.paths.schema.clone(),
            schema: self.read_optional(&self.paths.schema).await?,
            plan_path: self.paths.plan.clone(),
            plan: self.read_optional(&self.paths.plan).await?,
        })
    }

    async fn transform(&self, source: InputDocuments) -> Result<NotebookArtifact> {
        let inputs = resolve_inputs(source)?;
        tracing::info!(
            "🔄 Generating notebook for {} dataset(s): {}",
            inputs.datasets.len(),
            inputs
                .datasets
                .iter()
                .map(|t| t.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let notebook = self.generator.generate(&inputs)?;
        let bytes = write_notebook(&notebook)?;
        Ok(NotebookArtifact { notebook, bytes })
    }

    async fn load(&self, artifact: NotebookArtifact) -> Result<String> {
        if self.dry_run {
            tracing::info!(
                "🧪 Dry run: {} cell(s), {} byte(s) not written to {}",
                artifact.notebook.cells.len(),
                artifact.bytes.len(),
                self.paths.output
            );
        } else {
            self.storage
                .write_file(&self.paths.output, &artifact.bytes)
                .await?;
            tracing::info!(
                "💾 Wrote {} cell(s) to {}",
                artifact.notebook.cells.len(),
                self.paths.output
            );
        }
        Ok(self.paths.output.clone())
    }
}

/// Lints a notebook file; with a baseline file only new cells are checked.
pub async fn lint_notebook_file<S: Storage>(
    storage: &S,
    path: &str,
    baseline: Option<&str>,
    language: HeaderLanguage,
) -> Result<Vec<LintViolation>> {
    let notebook = read_notebook(&storage.read_file(path).await?)?;
    let baseline = match baseline {
        Some(baseline_path) => Some(read_notebook(&storage.read_file(baseline_path).await?)?),
        None => None,
    };
    Ok(lint_notebook(&notebook, language, baseline.as_ref()))
}
