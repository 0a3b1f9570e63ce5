//! The monitor contract and shared threshold logic.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use zeroscale_runtime::ContainerInfo;
use zeroscale_state::ScaleDirection;

/// One long-lived monitoring loop per owned container.
///
/// Implementations run until cancelled; cancellation is not an error and
/// produces a single "stopped monitoring" log line.
#[async_trait]
pub trait ResourceMonitor: Send + Sync {
    async fn run(&self, container: ContainerInfo, cancel: CancellationToken);
}

/// Threshold comparison shared by the CPU and memory monitors. Strict
/// inequality on both bounds; a negative threshold is disabled and never
/// matches.
pub(crate) fn determine_direction(value: f64, lower: f64, upper: f64) -> Option<ScaleDirection> {
    if upper >= 0.0 && value > upper {
        Some(ScaleDirection::Up)
    } else if lower >= 0.0 && value < lower {
        Some(ScaleDirection::Down)
    } else {
        None
    }
}
