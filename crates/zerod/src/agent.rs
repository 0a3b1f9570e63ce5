//! The agent orchestrator.
//!
//! Owns every component's lifetime: resolves the metric mode, builds the
//! probes and the intent sink for this node's role, starts the control
//! plane, scans the initial inventory, and then dispatches container
//! lifecycle events into per-container monitor tasks. Cancellation is
//! hierarchical — cancelling the root token tears the whole tree down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use zeroscale_cluster::{probe_router, scale_router, serve, PeerClient, RemoteSink, WakeRouter};
use zeroscale_cluster::{PROBE_PORT, SCALE_PORT};
use zeroscale_metrics::{run_writer, LogTables};
use zeroscale_monitor::{
    CgroupReader, ConcReqMonitor, CpuMonitor, KeyMode, MemoryMonitor, ResourceMonitor,
};
use zeroscale_probe::{ConcReqProbe, PortWakeProbe, Thresholds};
use zeroscale_runtime::{owned_by, ContainerInfo, ContainerRuntime, EventSubscriber};
use zeroscale_scale::{run_reconciler, ScaleActuator};
use zeroscale_scale::reconcile::RECONCILE_INTERVAL;
use zeroscale_state::{ContainerId, IntentSink, NodeInfo, ServiceRegistry};

use crate::config::{Config, MetricMode};

/// Quiesce window after a concurrent-request intent before the kernel
/// scaling slot is re-armed.
const CONC_REQ_COOLDOWN: Duration = Duration::from_secs(5);

/// Dispatch channel depth, matching the event notifier.
const EVENT_CHANNEL_DEPTH: usize = 10;

/// Run the agent until the root token is cancelled.
pub async fn run(
    config: Config,
    node: Arc<NodeInfo>,
    runtime: Arc<dyn ContainerRuntime>,
    cgroup: CgroupReader,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mode = config.metric_mode()?;
    info!(mode = ?mode, hostname = %node.hostname, is_manager = node.is_manager, "agent starting");

    let tables = Arc::new(LogTables::new());
    let registry = Arc::new(ServiceRegistry::new());
    let client = PeerClient::new();
    let mut background: Vec<JoinHandle<()>> = Vec::new();

    // ── Probes ─────────────────────────────────────────────────────
    let (port_backend, port_events) = build_port_wake(&config)?;
    let probe = Arc::new(PortWakeProbe::new(port_backend, tables.clone()));

    let conc_probe = if let MetricMode::ConcReq {
        lower,
        upper,
        tolerance,
    } = mode
    {
        let thresholds = Thresholds {
            lower: lower.max(0) as u32,
            upper: upper.max(0) as u32,
            buffer_length: tolerance.max(0) as u32,
        };
        let (backend, events) = build_conc_req(thresholds)?;
        let conc_probe = Arc::new(ConcReqProbe::new(backend));
        background.push(tokio::spawn(
            conc_probe.clone().run_router(events, cancel.child_token()),
        ));
        Some(conc_probe)
    } else {
        None
    };

    // ── Intent sink: local actuator on the manager, RPC elsewhere ──
    let sink: Arc<dyn IntentSink> = if node.is_manager {
        Arc::new(ScaleActuator::new(
            runtime.clone(),
            registry.clone(),
            probe.clone(),
            client.clone(),
            node.clone(),
            tables.clone(),
        ))
    } else {
        Arc::new(RemoteSink::new(client.clone(), &node)?)
    };

    // ── Monitor variant ────────────────────────────────────────────
    let monitor: Arc<dyn ResourceMonitor> = match mode {
        MetricMode::Cpu { lower, upper } => Arc::new(CpuMonitor::new(
            cgroup.clone(),
            sink.clone(),
            tables.clone(),
            lower,
            upper,
            config.collection_period,
        )),
        MetricMode::Memory {
            lower_mib,
            upper_mib,
        } => Arc::new(MemoryMonitor::new(
            cgroup,
            sink.clone(),
            tables.clone(),
            lower_mib,
            upper_mib,
            config.collection_period,
        )),
        MetricMode::ConcReq { .. } => Arc::new(ConcReqMonitor::new(
            conc_probe.clone().expect("conc-req mode constructs its probe"),
            runtime.clone(),
            sink.clone(),
            KeyMode::Port,
            CONC_REQ_COOLDOWN,
        )),
    };

    // ── Control plane ──────────────────────────────────────────────
    let scale = scale_router(node.clone(), sink.clone());
    let scale_cancel = cancel.child_token();
    background.push(tokio::spawn(async move {
        if let Err(e) = serve(scale, SCALE_PORT, scale_cancel).await {
            warn!(error = %e, "scale service failed");
        }
    }));

    let arming = probe_router(probe.clone());
    let arming_cancel = cancel.child_token();
    background.push(tokio::spawn(async move {
        if let Err(e) = serve(arming, PROBE_PORT, arming_cancel).await {
            warn!(error = %e, "probe-arming service failed");
        }
    }));

    // ── Wake path ──────────────────────────────────────────────────
    let wake_router = Arc::new(WakeRouter::new(client.clone(), node.clone(), sink.clone()));
    background.push(tokio::spawn(zeroscale_probe::run_wake_reader(
        probe.clone(),
        port_events,
        wake_router,
        cancel.child_token(),
    )));

    // ── Manager-only reconciliation sweep ──────────────────────────
    if node.is_manager {
        background.push(tokio::spawn(run_reconciler(
            registry.clone(),
            probe.clone(),
            client.clone(),
            node.clone(),
            RECONCILE_INTERVAL,
            cancel.child_token(),
        )));
    }

    // ── Log tables ─────────────────────────────────────────────────
    if config.logging.enable {
        background.push(tokio::spawn(run_writer(
            tables.clone(),
            PathBuf::from("logging"),
            config.logging.events,
            cancel.child_token(),
        )));
    }

    // ── Lifecycle events and dispatch ──────────────────────────────
    let (start_tx, mut start_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
    let (stop_tx, mut stop_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
    let subscriber = EventSubscriber::new(runtime.clone(), node.hostname.clone(), start_tx, stop_tx);
    background.push(tokio::spawn(subscriber.run(cancel.child_token())));

    let handles: DashMap<ContainerId, CancellationToken> = DashMap::new();

    let inventory = runtime.list_containers().await?;
    info!(count = inventory.len(), "found running containers");
    for container in inventory {
        if owned_by(&container, &node.hostname) {
            start_monitor(&handles, &tables, monitor.clone(), container, &cancel);
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = start_rx.recv() => match event {
                Some(container) => {
                    start_monitor(&handles, &tables, monitor.clone(), container, &cancel);
                }
                None => break,
            },
            event = stop_rx.recv() => match event {
                Some(container) => {
                    if let Some((_, token)) = handles.remove(&container.id) {
                        token.cancel();
                        tables.add_event(format!("stopped monitoring container {}", container.id));
                    }
                }
                None => break,
            },
        }
    }

    // Root cancellation has already reached every child token; wait for
    // the long-lived tasks to drain.
    info!("agent shutting down");
    for token in handles.iter() {
        token.value().cancel();
    }
    for handle in background {
        let _ = handle.await;
    }
    info!("agent stopped");
    Ok(())
}

fn start_monitor(
    handles: &DashMap<ContainerId, CancellationToken>,
    tables: &LogTables,
    monitor: Arc<dyn ResourceMonitor>,
    container: ContainerInfo,
    root: &CancellationToken,
) {
    if handles.contains_key(&container.id) {
        return;
    }
    let token = root.child_token();
    handles.insert(container.id.clone(), token.clone());
    tables.add_event(format!("monitoring container {}", container.id));
    tokio::spawn(async move {
        monitor.run(container, token).await;
    });
}

#[cfg(feature = "bpf")]
fn build_port_wake(
    config: &Config,
) -> anyhow::Result<(
    Arc<dyn zeroscale_probe::PortWakeBackend>,
    mpsc::Receiver<u32>,
)> {
    let (backend, events) =
        zeroscale_probe::bpf::BpfPortWake::load(zeroscale_probe::bpf::PORT_WAKE_OBJECT, &config.iface)?;
    Ok((backend, events))
}

#[cfg(not(feature = "bpf"))]
fn build_port_wake(
    config: &Config,
) -> anyhow::Result<(
    Arc<dyn zeroscale_probe::PortWakeBackend>,
    mpsc::Receiver<u32>,
)> {
    let _ = &config.iface;
    warn!("built without the bpf feature; wake probes observe no real traffic");
    let (backend, events) = zeroscale_probe::MemoryPortWake::new();
    Ok((backend, events))
}

#[cfg(feature = "bpf")]
fn build_conc_req(
    thresholds: Thresholds,
) -> anyhow::Result<(
    Arc<dyn zeroscale_probe::ConcReqBackend>,
    mpsc::Receiver<zeroscale_probe::ThresholdSignal>,
)> {
    let (backend, events) =
        zeroscale_probe::bpf::BpfConcReq::load(zeroscale_probe::bpf::CONC_REQ_OBJECT, thresholds)?;
    Ok((backend, events))
}

#[cfg(not(feature = "bpf"))]
fn build_conc_req(
    thresholds: Thresholds,
) -> anyhow::Result<(
    Arc<dyn zeroscale_probe::ConcReqBackend>,
    mpsc::Receiver<zeroscale_probe::ThresholdSignal>,
)> {
    let (backend, events) = zeroscale_probe::MemoryConcReq::new(thresholds);
    Ok((backend, events))
}
