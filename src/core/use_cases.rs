use crate::domain::logs::{LogQuery, MergedLogDataset};
use crate::domain::ports::LogRepository;
use crate::utils::error::{NotebookError, Result};

/// Above this many contracts a query is still allowed but logged.
pub const CONTRACT_WARNING_THRESHOLD: usize = 10_000;

/// Fetches matched logs for a bounded set of contracts.
pub struct LoadLogsUseCase<R: LogRepository> {
    repository: R,
}

impl<R: LogRepository> LoadLogsUseCase<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub async fn execute(&self, query: &LogQuery) -> Result<MergedLogDataset> {
        if query.contract_ids.is_empty() {
            return Err(NotebookError::ValidationError {
                message: "contract_ids is required; fetching every contract is not allowed"
                    .to_string(),
            });
        }
        if let Some(end) = query.end {
            if end < query.start {
                return Err(NotebookError::ValidationError {
                    message: format!("end {} is before start {}", end, query.start),
                });
            }
        }
        if query.contract_ids.len() > CONTRACT_WARNING_THRESHOLD {
            tracing::warn!(
                "⚠️ Querying {} contracts; consider narrowing the selection",
                query.contract_ids.len()
            );
        }

        self.repository.fetch_range(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::logs::{parse_timestamp, LogSnapshot, LogTable};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::{Arc, Mutex};

    struct InMemoryRepository {
        snapshot: LogSnapshot,
    }

    #[async_trait]
    impl LogRepository for InMemoryRepository {
        async fn fetch_latest(&self) -> Result<LogSnapshot> {
            Ok(self.snapshot.clone())
        }

        fn tolerance(&self) -> Duration {
            Duration::minutes(5)
        }
    }

    fn repository() -> InMemoryRepository {
        let mut operations = LogTable::new(vec![
            "ContractId".into(),
            "OrderReceiptDate".into(),
            "PropertyValue".into(),
        ]);
        operations.rows = vec![
            vec![Some("C1".into()), Some("2024-05-01 08:57:00".into()), Some("on".into())],
            vec![Some("C2".into()), Some("2024-05-01 09:10:00".into()), Some("off".into())],
        ];
        let mut states = LogTable::new(vec![
            "MessageName".into(),
            "ContractId".into(),
            "ReportedDate".into(),
        ]);
        states.rows = vec![
            vec![Some("power".into()), Some("C1".into()), Some("2024-05-01 09:00:00".into())],
            vec![Some("power".into()), Some("C1".into()), Some("2024-05-01 08:00:00".into())],
            vec![Some("power".into()), Some("C2".into()), Some("2024-05-01 09:11:00".into())],
        ];
        InMemoryRepository {
            snapshot: LogSnapshot { operations, states },
        }
    }

    fn query(ids: &[&str]) -> LogQuery {
        LogQuery {
            contract_ids: ids.iter().map(|s| s.to_string()).collect(),
            start: parse_timestamp("2024-05-01 09:00:00").unwrap(),
            end: None,
        }
    }

    #[tokio::test]
    async fn test_execute_filters_and_matches() {
        let use_case = LoadLogsUseCase::new(repository());
        let merged = use_case.execute(&query(&["C1"])).await.unwrap();

        assert_eq!(merged.records.len(), 1);
        let record = &merged.records[0];
        assert!(record.is_remote_operation);
        assert_eq!(record.time_diff_seconds, Some(180.0));
        assert_eq!(record.operation_payload, vec![Some("on".to_string())]);
    }

    #[tokio::test]
    async fn test_empty_contract_ids_rejected() {
        let use_case = LoadLogsUseCase::new(repository());
        assert!(matches!(
            use_case.execute(&query(&[])).await,
            Err(NotebookError::ValidationError { .. })
        ));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_large_contract_list_is_warned_about() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let use_case = LoadLogsUseCase::new(repository());
        let mut ids: Vec<String> = (0..CONTRACT_WARNING_THRESHOLD)
            .map(|i| format!("X{}", i))
            .collect();
        ids.push("C1".to_string());

        let mut q = query(&[]);
        q.contract_ids = ids[..CONTRACT_WARNING_THRESHOLD].to_vec();
        use_case.execute(&q).await.unwrap();
        assert!(!logs.text().contains("consider narrowing"));

        q.contract_ids = ids;
        let merged = use_case.execute(&q).await.unwrap();
        assert_eq!(merged.records.len(), 1);
        assert!(logs
            .text()
            .contains("Querying 10001 contracts; consider narrowing the selection"));
    }

    #[tokio::test]
    async fn test_end_before_start_rejected() {
        let use_case = LoadLogsUseCase::new(repository());
        let mut q = query(&["C1"]);
        q.end = parse_timestamp("2024-05-01 08:00:00");
        assert!(use_case.execute(&q).await.is_err());
    }
}
