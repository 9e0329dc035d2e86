use crate::core::merge::merge_logs;
use crate::domain::logs::{LogQuery, LogSnapshot, MergedLogDataset};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::Duration;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn exists(&self, path: &str) -> impl std::future::Future<Output = bool> + Send;
}

/// Extract → transform → load, with the intermediate shapes chosen per pipeline.
#[async_trait]
pub trait Pipeline: Send + Sync {
    type Source: Send;
    type Artifact: Send;

    async fn extract(&self) -> Result<Self::Source>;
    async fn transform(&self, source: Self::Source) -> Result<Self::Artifact>;
    /// Returns the location the artifact was written to.
    async fn load(&self, artifact: Self::Artifact) -> Result<String>;
}

/// Source of operation and state-change logs. Swapping the implementation
/// moves the data from local exports to any other store.
#[async_trait]
pub trait LogRepository: Send + Sync {
    async fn fetch_latest(&self) -> Result<LogSnapshot>;

    fn tolerance(&self) -> Duration;

    /// State changes inside the query window, matched against operations.
    async fn fetch_range(&self, query: &LogQuery) -> Result<MergedLogDataset> {
        let snapshot = self.fetch_latest().await?;
        let tolerance = self.tolerance();
        let filtered = snapshot.filter(query, tolerance)?;
        merge_logs(&filtered.operations, &filtered.states, tolerance)
    }
}
