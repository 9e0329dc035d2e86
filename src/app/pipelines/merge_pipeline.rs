use crate::core::use_cases::LoadLogsUseCase;
use crate::domain::logs::{LogQuery, MergedLogDataset};
use crate::domain::ports::{LogRepository, Pipeline, Storage};
use crate::utils::error::{NotebookError, Result};
use async_trait::async_trait;
use std::io::Write;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl FromStr for OutputFormat {
    type Err = NotebookError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => Err(NotebookError::InvalidConfigValueError {
                field: "format".to_string(),
                value: s.to_string(),
                reason: "expected 'csv' or 'json'".to_string(),
            }),
        }
    }
}

/// Matched logs for one query, written as CSV or JSON. Without an output
/// path the result goes to stdout.
pub struct MergePipeline<R: LogRepository, S: Storage> {
    use_case: LoadLogsUseCase<R>,
    storage: S,
    query: LogQuery,
    format: OutputFormat,
    output: Option<String>,
}

impl<R: LogRepository, S: Storage> MergePipeline<R, S> {
    pub fn new(repository: R, storage: S, query: LogQuery) -> Self {
        Self {
            use_case: LoadLogsUseCase::new(repository),
            storage,
            query,
            format: OutputFormat::default(),
            output: None,
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: Option<String>) -> Self {
        self.output = output;
        self
    }
}

#[async_trait]
impl<R: LogRepository, S: Storage> Pipeline for MergePipeline<R, S> {
    type Source = MergedLogDataset;
    type Artifact = Vec<u8>;

    async fn extract(&self) -> Result<MergedLogDataset> {
        tracing::info!(
            "📥 Loading logs for {} contract(s) from {}",
            self.query.contract_ids.len(),
            self.query.start
        );
        self.use_case.execute(&self.query).await
    }

    async fn transform(&self, dataset: MergedLogDataset) -> Result<Vec<u8>> {
        tracing::info!(
            "🔄 {} state change(s), {} matched to a remote operation",
            dataset.records.len(),
            dataset.matched_count()
        );
        match self.format {
            OutputFormat::Csv => dataset.to_csv(),
            OutputFormat::Json => dataset.to_json(),
        }
    }

    async fn load(&self, bytes: Vec<u8>) -> Result<String> {
        match &self.output {
            Some(path) => {
                self.storage.write_file(path, &bytes).await?;
                tracing::info!("💾 Wrote {} byte(s) to {}", bytes.len(), path);
                Ok(path.clone())
            }
            None => {
                write_stdout(&bytes)?;
                Ok("stdout".to_string())
            }
        }
    }
}

fn write_stdout(bytes: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(bytes)?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::LocalStorage;
    use crate::domain::logs::{parse_timestamp, LogSnapshot, LogTable};
    use chrono::Duration;
    use tempfile::TempDir;

    struct FixedRepository;

    #[async_trait]
    impl LogRepository for FixedRepository {
        async fn fetch_latest(&self) -> Result<LogSnapshot> {
            let mut operations =
                LogTable::new(vec!["ContractId".into(), "OrderReceiptDate".into()]);
            operations
                .rows
                .push(vec![Some("C1".into()), Some("2024-05-01 10:00:00".into())]);
            let mut states = LogTable::new(vec!["ContractId".into(), "ReportedDate".into()]);
            states
                .rows
                .push(vec![Some("C1".into()), Some("2024-05-01 10:02:00".into())]);
            Ok(LogSnapshot { operations, states })
        }

        fn tolerance(&self) -> Duration {
            Duration::minutes(5)
        }
    }

    #[tokio::test]
    async fn test_merge_pipeline_writes_json() {
        let temp_dir = TempDir::new().unwrap();
        let query = LogQuery {
            contract_ids: vec!["C1".to_string()],
            start: parse_timestamp("2024-05-01").unwrap(),
            end: None,
        };
        let pipeline = MergePipeline::new(FixedRepository, LocalStorage::new(temp_dir.path()), query)
            .with_format(OutputFormat::Json)
            .with_output(Some("out/merged.json".to_string()));

        let dataset = pipeline.extract().await.unwrap();
        let bytes = pipeline.transform(dataset).await.unwrap();
        assert_eq!(pipeline.load(bytes).await.unwrap(), "out/merged.json");

        let written = std::fs::read(temp_dir.path().join("out/merged.json")).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&written).unwrap();
        assert_eq!(json[0]["time_diff_seconds"], 120.0);
        assert_eq!(json[0]["is_remote_operation"], true);
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xlsx".parse::<OutputFormat>().is_err());
    }
}
