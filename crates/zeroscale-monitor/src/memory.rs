//! Memory usage monitor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use zeroscale_metrics::LogTables;
use zeroscale_runtime::ContainerInfo;
use zeroscale_state::{IntentSink, ScaleIntent};

use crate::cgroup::CgroupReader;
use crate::monitor::{determine_direction, ResourceMonitor};

/// Samples the container's current memory counter every collection period.
/// Thresholds are in MiB; the config layer resolves the GiB overrides
/// before this monitor is built.
pub struct MemoryMonitor {
    reader: CgroupReader,
    sink: Arc<dyn IntentSink>,
    tables: Arc<LogTables>,
    lower_mib: i64,
    upper_mib: i64,
    period: Duration,
}

impl MemoryMonitor {
    pub fn new(
        reader: CgroupReader,
        sink: Arc<dyn IntentSink>,
        tables: Arc<LogTables>,
        lower_mib: i64,
        upper_mib: i64,
        period: Duration,
    ) -> Self {
        Self {
            reader,
            sink,
            tables,
            lower_mib,
            upper_mib,
            period,
        }
    }
}

#[async_trait]
impl ResourceMonitor for MemoryMonitor {
    async fn run(&self, container: ContainerInfo, cancel: CancellationToken) {
        let Some(service_id) = container.service_id.clone() else {
            warn!(container_id = %container.id, "container has no service label, not monitoring");
            return;
        };

        info!(container_id = %container.id, period = ?self.period, "monitoring memory");
        let mut ticker = tokio::time::interval(self.period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(container_id = %container.id, "stopped monitoring container");
                    self.tables.remove_container(&container.id);
                    return;
                }
                _ = ticker.tick() => {
                    let used_mib = match self.reader.memory_current_mib(&container.id) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(container_id = %container.id, error = %e, "memory counter read failed");
                            continue;
                        }
                    };
                    self.tables.set_container_utilization(&container.id, used_mib as f64);

                    let direction = determine_direction(
                        used_mib as f64,
                        self.lower_mib as f64,
                        self.upper_mib as f64,
                    );
                    if let Some(direction) = direction {
                        let intent = ScaleIntent::from_container(
                            service_id.clone(),
                            direction,
                            container.id.clone(),
                        );
                        if let Err(e) = self.sink.submit(intent).await {
                            warn!(
                                container_id = %container.id,
                                error = %e,
                                "failed to deliver memory scale intent"
                            );
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::write_counters;
    use crate::testing::RecordingSink;
    use zeroscale_state::ScaleDirection;

    fn container() -> ContainerInfo {
        ContainerInfo {
            id: "c1".to_string(),
            service_id: Some("svc".to_string()),
            owner_host_label: None,
            task_name: Some("svc.1.x".to_string()),
            pid: None,
        }
    }

    fn spawn_monitor(
        dir: &std::path::Path,
        sink: Arc<RecordingSink>,
        lower: i64,
        upper: i64,
    ) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let monitor = MemoryMonitor::new(
            CgroupReader::new(dir),
            sink,
            Arc::new(LogTables::new()),
            lower,
            upper,
            Duration::from_millis(50),
        );
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(container(), cancel).await })
        };
        (cancel, handle)
    }

    #[tokio::test]
    async fn low_usage_scales_down() {
        let dir = tempfile::tempdir().unwrap();
        // 5 MiB used, band is [10, 50].
        write_counters(dir.path(), "c1", 0, 5 * 1024 * 1024);

        let sink = RecordingSink::new();
        let (cancel, handle) = spawn_monitor(dir.path(), sink.clone(), 10, 50);

        tokio::time::sleep(Duration::from_millis(180)).await;
        let intents = sink.intents();
        assert!(intents.len() >= 2, "one intent per tick, got {}", intents.len());
        assert!(intents.iter().all(|i| i.direction == ScaleDirection::Down));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn high_usage_scales_up() {
        let dir = tempfile::tempdir().unwrap();
        write_counters(dir.path(), "c1", 0, 100 * 1024 * 1024);

        let sink = RecordingSink::new();
        let (cancel, handle) = spawn_monitor(dir.path(), sink.clone(), 10, 50);

        tokio::time::sleep(Duration::from_millis(120)).await;
        let intents = sink.intents();
        assert!(!intents.is_empty());
        assert!(intents.iter().all(|i| i.direction == ScaleDirection::Up));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn in_band_usage_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        write_counters(dir.path(), "c1", 0, 30 * 1024 * 1024);

        let sink = RecordingSink::new();
        let (cancel, handle) = spawn_monitor(dir.path(), sink.clone(), 10, 50);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(sink.intents().is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
