//! Concurrent-request monitor.
//!
//! Unlike the samplers, this monitor is event-driven: the kernel probe
//! signals threshold crossings, the monitor translates them into intents
//! and quiesces its kernel scaling slot for a cool-down before re-arming,
//! so the actuator can converge without oscillation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use zeroscale_probe::ConcReqProbe;
use zeroscale_runtime::{netns, ContainerInfo, ContainerRuntime};
use zeroscale_state::{IntentSink, ScaleDirection, ScaleIntent};

use crate::monitor::ResourceMonitor;

/// How connection counts are keyed in the kernel maps. Chosen once per
/// agent at startup: per published port when the service has exactly one,
/// per network namespace when ports are unstable or containers of one
/// service must be counted independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    Port,
    Netns,
}

/// Forwards kernel threshold signals as scale intents.
pub struct ConcReqMonitor {
    probe: Arc<ConcReqProbe>,
    runtime: Arc<dyn ContainerRuntime>,
    sink: Arc<dyn IntentSink>,
    keying: KeyMode,
    cooldown: Duration,
}

impl ConcReqMonitor {
    pub fn new(
        probe: Arc<ConcReqProbe>,
        runtime: Arc<dyn ContainerRuntime>,
        sink: Arc<dyn IntentSink>,
        keying: KeyMode,
        cooldown: Duration,
    ) -> Self {
        Self {
            probe,
            runtime,
            sink,
            keying,
            cooldown,
        }
    }

    async fn resolve_key(&self, container: &ContainerInfo, service_id: &str) -> Option<u32> {
        match self.keying {
            KeyMode::Port => match self.runtime.inspect_service(service_id).await {
                Ok(service) if service.published_port > 0 => Some(service.published_port),
                Ok(_) => {
                    warn!(service_id, "service has no published port to key on");
                    None
                }
                Err(e) => {
                    warn!(service_id, error = %e, "failed to resolve published port");
                    None
                }
            },
            KeyMode::Netns => {
                let Some(pid) = container.pid else {
                    warn!(container_id = %container.id, "container has no pid for netns lookup");
                    return None;
                };
                match netns::netns_inode(pid) {
                    Ok(inode) => Some(inode),
                    Err(e) => {
                        warn!(container_id = %container.id, error = %e, "netns lookup failed");
                        None
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ResourceMonitor for ConcReqMonitor {
    async fn run(&self, container: ContainerInfo, cancel: CancellationToken) {
        let Some(service_id) = container.service_id.clone() else {
            warn!(container_id = %container.id, "container has no service label, not monitoring");
            return;
        };
        let Some(key) = self.resolve_key(&container, &service_id).await else {
            return;
        };

        let mut signals = match self.probe.add_key(key) {
            Ok(rx) => rx,
            Err(e) => {
                warn!(container_id = %container.id, key, error = %e, "failed to register probe key");
                return;
            }
        };

        info!(container_id = %container.id, key, keying = ?self.keying, "monitoring concurrent requests");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Best-effort: the agent may be shutting the probe down too.
                    if let Err(e) = self.probe.remove_key(key) {
                        warn!(key, error = %e, "failed to release probe key");
                    }
                    info!(container_id = %container.id, "stopped monitoring container");
                    return;
                }
                signal = signals.recv() => {
                    let Some(raw) = signal else {
                        warn!(container_id = %container.id, "probe signal channel closed");
                        return;
                    };
                    let direction = match raw.as_str() {
                        "Upper" => ScaleDirection::Up,
                        "Lower" => ScaleDirection::Down,
                        other => {
                            warn!(signal = other, "invalid scaling direction, dropping");
                            continue;
                        }
                    };

                    let intent = ScaleIntent::from_container(
                        service_id.clone(),
                        direction,
                        container.id.clone(),
                    );
                    if let Err(e) = self.sink.submit(intent).await {
                        warn!(
                            container_id = %container.id,
                            error = %e,
                            "failed to deliver concurrent-request intent"
                        );
                    }

                    // Quiesce while the actuator converges, then re-arm the
                    // kernel scaling slot.
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            if let Err(e) = self.probe.remove_key(key) {
                                warn!(key, error = %e, "failed to release probe key");
                            }
                            info!(container_id = %container.id, "stopped monitoring container");
                            return;
                        }
                        _ = tokio::time::sleep(self.cooldown) => {}
                    }
                    if let Err(e) = self.probe.rearm(key) {
                        warn!(key, error = %e, "failed to re-arm probe key");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;
    use zeroscale_probe::{MemoryConcReq, Thresholds};
    use zeroscale_runtime::MemoryRuntime;

    fn container() -> ContainerInfo {
        ContainerInfo {
            id: "c1".to_string(),
            service_id: Some("svc".to_string()),
            owner_host_label: None,
            task_name: Some("svc.1.x".to_string()),
            pid: Some(std::process::id()),
        }
    }

    struct Setup {
        backend: Arc<MemoryConcReq>,
        sink: Arc<RecordingSink>,
        cancel: CancellationToken,
        monitor: tokio::task::JoinHandle<()>,
        router: tokio::task::JoinHandle<()>,
    }

    async fn setup(cooldown: Duration) -> Setup {
        let (backend, events) = MemoryConcReq::new(Thresholds {
            lower: 0,
            upper: 3,
            buffer_length: 1,
        });
        let probe = Arc::new(ConcReqProbe::new(backend.clone()));
        let runtime = MemoryRuntime::new();
        runtime.add_service("svc", 1, 8080, None);

        let sink = RecordingSink::new();
        let cancel = CancellationToken::new();

        let router = tokio::spawn(probe.clone().run_router(events, cancel.clone()));
        let monitor = ConcReqMonitor::new(
            probe,
            runtime,
            sink.clone(),
            KeyMode::Port,
            cooldown,
        );
        let monitor = {
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(container(), cancel).await })
        };

        // Let the monitor register its key.
        tokio::time::sleep(Duration::from_millis(20)).await;

        Setup {
            backend,
            sink,
            cancel,
            monitor,
            router,
        }
    }

    async fn teardown(setup: Setup) {
        setup.cancel.cancel();
        setup.monitor.await.unwrap();
        setup.router.await.unwrap();
    }

    #[tokio::test]
    async fn upper_signal_becomes_up_intent() {
        let s = setup(Duration::from_millis(50)).await;

        for _ in 0..3 {
            s.backend.connection_opened(8080);
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let intents = s.sink.intents();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].direction, ScaleDirection::Up);
        assert_eq!(intents[0].service_id, "svc");

        teardown(s).await;
    }

    #[tokio::test]
    async fn cooldown_suppresses_then_rearms() {
        let s = setup(Duration::from_millis(150)).await;

        // First crossing fires and clears the kernel flag.
        for _ in 0..3 {
            s.backend.connection_opened(8080);
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(s.sink.intents().len(), 1);
        assert!(!s.backend.is_flag_armed(8080));

        // A crossing during the cool-down must not fire.
        s.backend.connection_opened(8080);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(s.sink.intents().len(), 1);

        // After the cool-down the flag is re-armed and the next crossing
        // fires again.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(s.backend.is_flag_armed(8080));
        s.backend.connection_opened(8080);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(s.sink.intents().len(), 2);

        teardown(s).await;
    }

    #[tokio::test]
    async fn cancellation_releases_the_key() {
        let s = setup(Duration::from_millis(50)).await;
        assert!(s.backend.count(8080).is_some());

        s.cancel.cancel();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(s.backend.count(8080).is_none());

        s.monitor.await.unwrap();
        s.router.await.unwrap();
    }
}
