use crate::domain::ports::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;
use std::time::Instant;

/// Runs a pipeline's extract, transform and load phases in order.
pub struct PipelineEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> PipelineEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(false),
        }
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub async fn run(&self) -> Result<String> {
        let started = Instant::now();
        self.monitor.log_stats("start");

        tracing::info!("📥 Extract");
        let source = self.pipeline.extract().await?;
        self.monitor.log_stats("extract");

        tracing::info!("🔄 Transform");
        let artifact = self.pipeline.transform(source).await?;
        self.monitor.log_stats("transform");

        tracing::info!("💾 Load");
        let output = self.pipeline.load(artifact).await?;
        self.monitor.log_stats("load");

        tracing::info!("✅ Done in {:.2?}: {}", started.elapsed(), output);
        self.monitor.log_final_stats();
        Ok(output)
    }
}
