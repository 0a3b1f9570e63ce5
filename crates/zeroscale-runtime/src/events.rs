//! Container event subscriber.
//!
//! Long-lived task that drives the runtime's lifecycle stream, filters
//! events through the ownership resolver, and forwards owned containers to
//! the orchestrator's start/stop channels. The stream is re-established on
//! transport error with capped exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ownership::owned_by;
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerEvent, ContainerInfo, EventKind};

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Subscribes to runtime lifecycle events and dispatches owned containers.
pub struct EventSubscriber {
    runtime: Arc<dyn ContainerRuntime>,
    hostname: String,
    start_tx: mpsc::Sender<ContainerInfo>,
    stop_tx: mpsc::Sender<ContainerInfo>,
}

impl EventSubscriber {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        hostname: impl Into<String>,
        start_tx: mpsc::Sender<ContainerInfo>,
        stop_tx: mpsc::Sender<ContainerInfo>,
    ) -> Self {
        Self {
            runtime,
            hostname: hostname.into(),
            start_tx,
            stop_tx,
        }
    }

    /// Run until cancelled. Each subscription failure or broken stream waits
    /// out the current backoff (100 ms doubling to a 30 s cap, reset on the
    /// first event) before re-subscribing.
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.runtime.events().await {
                Ok(mut stream) => {
                    debug!("subscribed to container events");
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                info!("event subscriber stopped");
                                return;
                            }
                            item = stream.next() => match item {
                                Some(Ok(event)) => {
                                    backoff = INITIAL_BACKOFF;
                                    self.dispatch(event).await;
                                }
                                Some(Err(e)) => {
                                    warn!(error = %e, "container event stream error");
                                    break;
                                }
                                None => {
                                    warn!("container event stream closed");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to subscribe to container events");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("event subscriber stopped");
                    return;
                }
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn dispatch(&self, event: ContainerEvent) {
        if !owned_by(&event.container, &self.hostname) {
            return;
        }

        let channel = match event.kind {
            EventKind::Start => &self.start_tx,
            EventKind::Die => &self.stop_tx,
        };
        if channel.send(event.container).await.is_err() {
            warn!("orchestrator dispatch channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRuntime;

    fn owned_container(id: &str) -> ContainerInfo {
        ContainerInfo {
            id: id.to_string(),
            service_id: Some("svc".to_string()),
            owner_host_label: Some("hostA".to_string()),
            task_name: None,
            pid: None,
        }
    }

    fn foreign_container(id: &str) -> ContainerInfo {
        ContainerInfo {
            owner_host_label: Some("hostB".to_string()),
            ..owned_container(id)
        }
    }

    #[tokio::test]
    async fn owned_events_are_forwarded() {
        let runtime = MemoryRuntime::new();
        let (start_tx, mut start_rx) = mpsc::channel(10);
        let (stop_tx, mut stop_rx) = mpsc::channel(10);

        let subscriber = EventSubscriber::new(
            runtime.clone(),
            "hostA",
            start_tx,
            stop_tx,
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(subscriber.run(cancel.clone()));

        // Give the subscriber a beat to open the stream.
        tokio::time::sleep(Duration::from_millis(20)).await;

        runtime.push_event(ContainerEvent {
            kind: EventKind::Start,
            container: owned_container("c-1"),
        });
        runtime.push_event(ContainerEvent {
            kind: EventKind::Die,
            container: owned_container("c-1"),
        });

        assert_eq!(start_rx.recv().await.unwrap().id, "c-1");
        assert_eq!(stop_rx.recv().await.unwrap().id, "c-1");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn foreign_events_are_dropped() {
        let runtime = MemoryRuntime::new();
        let (start_tx, mut start_rx) = mpsc::channel(10);
        let (stop_tx, _stop_rx) = mpsc::channel(10);

        let subscriber = EventSubscriber::new(
            runtime.clone(),
            "hostA",
            start_tx,
            stop_tx,
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(subscriber.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        runtime.push_event(ContainerEvent {
            kind: EventKind::Start,
            container: foreign_container("c-2"),
        });
        runtime.push_event(ContainerEvent {
            kind: EventKind::Start,
            container: owned_container("c-3"),
        });

        // Only the owned container arrives.
        assert_eq!(start_rx.recv().await.unwrap().id, "c-3");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn resubscribes_after_stream_error() {
        let runtime = MemoryRuntime::new();
        let (start_tx, mut start_rx) = mpsc::channel(10);
        let (stop_tx, _stop_rx) = mpsc::channel(10);

        let subscriber = EventSubscriber::new(
            runtime.clone(),
            "hostA",
            start_tx,
            stop_tx,
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(subscriber.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        runtime.push_stream_error();

        // After the initial backoff the subscriber opens a new stream.
        tokio::time::sleep(Duration::from_millis(300)).await;
        runtime.push_event(ContainerEvent {
            kind: EventKind::Start,
            container: owned_container("c-4"),
        });

        assert_eq!(start_rx.recv().await.unwrap().id, "c-4");

        cancel.cancel();
        handle.await.unwrap();
    }
}
