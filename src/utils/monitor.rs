//! Optional per-phase resource reporting for pipeline runs.
//!
//! Sampling needs `sysinfo`, which only ships with the `cli` feature; the
//! library build gets a monitor that never reports anything.

#[cfg(feature = "cli")]
mod sampling {
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

    #[derive(Debug, Clone, Copy)]
    pub struct PhaseStats {
        pub cpu_percent: f32,
        pub rss_mb: u64,
        pub peak_rss_mb: u64,
        pub elapsed: Duration,
    }

    struct Sampler {
        system: System,
        pid: Pid,
        peak_rss_mb: u64,
    }

    pub struct SystemMonitor {
        sampler: Option<Mutex<Sampler>>,
        started: Instant,
    }

    impl SystemMonitor {
        pub fn new(enabled: bool) -> Self {
            let sampler = enabled
                .then(sysinfo::get_current_pid)
                .and_then(|pid| {
                    pid.map_err(|e| tracing::warn!("⚠️ Resource monitoring unavailable: {}", e))
                        .ok()
                })
                .map(|pid| {
                    Mutex::new(Sampler {
                        system: System::new(),
                        pid,
                        peak_rss_mb: 0,
                    })
                });

            Self {
                sampler,
                started: Instant::now(),
            }
        }

        pub fn is_enabled(&self) -> bool {
            self.sampler.is_some()
        }

        pub fn sample(&self) -> Option<PhaseStats> {
            let mut sampler = self.sampler.as_ref()?.lock().ok()?;
            let pid = sampler.pid;
            sampler.system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing().with_cpu().with_memory(),
            );

            let process = sampler.system.process(pid)?;
            let cpu_percent = process.cpu_usage();
            let rss_mb = process.memory() / 1024 / 1024;
            sampler.peak_rss_mb = sampler.peak_rss_mb.max(rss_mb);

            Some(PhaseStats {
                cpu_percent,
                rss_mb,
                peak_rss_mb: sampler.peak_rss_mb,
                elapsed: self.started.elapsed(),
            })
        }

        pub fn log_stats(&self, phase: &str) {
            if let Some(stats) = self.sample() {
                tracing::info!(
                    "📊 {}: cpu {:.1}%, rss {}MB (peak {}MB), {:.2?}",
                    phase,
                    stats.cpu_percent,
                    stats.rss_mb,
                    stats.peak_rss_mb,
                    stats.elapsed
                );
            }
        }

        pub fn log_final_stats(&self) {
            if let Some(stats) = self.sample() {
                tracing::info!(
                    "📊 Run finished in {:.2?}, peak rss {}MB",
                    stats.elapsed,
                    stats.peak_rss_mb
                );
            }
        }
    }
}

#[cfg(feature = "cli")]
pub use sampling::{PhaseStats, SystemMonitor};

#[cfg(not(feature = "cli"))]
pub struct SystemMonitor;

#[cfg(not(feature = "cli"))]
impl SystemMonitor {
    pub fn new(_enabled: bool) -> Self {
        Self
    }

    pub fn is_enabled(&self) -> bool {
        false
    }

    pub fn log_stats(&self, _phase: &str) {}

    pub fn log_final_stats(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_monitor_is_silent() {
        let monitor = SystemMonitor::new(false);
        assert!(!monitor.is_enabled());
        monitor.log_stats("extract");
        monitor.log_final_stats();
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_enabled_monitor_tracks_peak() {
        let monitor = SystemMonitor::new(true);
        if let (Some(first), Some(second)) = (monitor.sample(), monitor.sample()) {
            assert!(second.peak_rss_mb >= first.rss_mb);
            assert!(second.elapsed >= first.elapsed);
        }
    }
}
