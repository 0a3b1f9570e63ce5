//! CPU utilization monitor.

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

/// Samples the container's cumulative CPU counter every collection period
/// and emits an intent when utilization over the interval leaves the
/// configured band.
pub struct CpuMonitor {
    reader: CgroupReader,
    sink: Arc<dyn IntentSink>,
    tables: Arc<LogTables>,
    lower: f64,
    upper: f64,
    period: Duration,
}

impl CpuMonitor {
    pub fn new(
        reader: CgroupReader,
        sink: Arc<dyn IntentSink>,
        tables: Arc<LogTables>,
        lower: f64,
        upper: f64,
        period: Duration,
    ) -> Self {
        Self {
            reader,
            sink,
            tables,
            lower,
            upper,
            period,
        }
    }
}

#[async_trait]
impl ResourceMonitor for CpuMonitor {
    async fn run(&self, container: ContainerInfo, cancel: CancellationToken) {
        let Some(service_id) = container.service_id.clone() else {
            warn!(container_id = %container.id, "container has no service label, not monitoring");
            return;
        };

        info!(container_id = %container.id, period = ?self.period, "monitoring cpu");

        let mut ticker = tokio::time::interval(self.period);
        // The first tick establishes the baseline and never emits.
        let mut last_usage_usec: Option<u64> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(container_id = %container.id, "stopped monitoring container");
                    self.tables.remove_container(&container.id);
                    return;
                }
                _ = ticker.tick() => {
                    let current = match self.reader.cpu_usage_usec(&container.id) {
                        Ok(v) => v,
                        Err(e) => {
                            // Skip the tick; the baseline is preserved.
                            warn!(container_id = %container.id, error = %e, "cpu counter read failed");
                            continue;
                        }
                    };

                    if let Some(previous) = last_usage_usec {
                        let delta_usec = current.saturating_sub(previous);
                        let utilization =
                            delta_usec as f64 / (self.period.as_secs_f64() * 1e6) * 100.0;
                        self.tables.set_container_utilization(&container.id, utilization);

                        if let Some(direction) = determine_direction(utilization, self.lower, self.upper) {
                            let intent = ScaleIntent::from_container(
                                service_id.clone(),
                                direction,
                                container.id.clone(),
                            );
                            if let Err(e) = self.sink.submit(intent).await {
                                warn!(
                                    container_id = %container.id,
                                    error = %e,
                                    "failed to deliver cpu scale intent"
                                );
                            }
                        }
                    }
                    last_usage_usec = Some(current);
                }
            }
        }
    }
}
