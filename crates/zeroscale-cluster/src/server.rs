//! Control-plane HTTP services.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use zeroscale_probe::PortWakeProbe;
use zeroscale_state::{IntentSink, NodeInfo, ScaleIntent};

use crate::client::{ListenRequest, RemoveRequest, ScaleRequest};

/// Shared state of the scale service.
#[derive(Clone)]
pub struct ScaleState {
    pub node: Arc<NodeInfo>,
    pub sink: Arc<dyn IntentSink>,
}

/// Router for the scale-intent service (`:4567`).
///
/// The legacy path `/` is kept alongside `/scale`; both carry the same
/// body. Non-POST methods get 405 from the method router, malformed JSON
/// 400 from the extractor.
pub fn scale_router(node: Arc<NodeInfo>, sink: Arc<dyn IntentSink>) -> Router {
    let state = ScaleState { node, sink };
    Router::new()
        .route("/", post(handle_scale))
        .route("/scale", post(handle_scale))
        .with_state(state)
}

async fn handle_scale(
    State(state): State<ScaleState>,
    Json(request): Json<ScaleRequest>,
) -> impl IntoResponse {
    if !state.node.is_manager {
        warn!(
            service_id = %request.service_id,
            "scale request received on non-manager node"
        );
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "not the autoscaler manager".to_string(),
        );
    }

    let intent = ScaleIntent::new(request.service_id, request.direction);
    match state.sink.submit(intent).await {
        Ok(()) => (StatusCode::OK, "scaling successful".to_string()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Router for the probe-arming service (`:4568`).
pub fn probe_router(probe: Arc<PortWakeProbe>) -> Router {
    Router::new()
        .route("/listen", post(handle_listen))
        .route("/remove", post(handle_remove))
        .with_state(probe)
}

async fn handle_listen(
    State(probe): State<Arc<PortWakeProbe>>,
    Json(request): Json<ListenRequest>,
) -> impl IntoResponse {
    match probe.listen(request.port, &request.service_id) {
        Ok(()) => (StatusCode::OK, "listening".to_string()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn handle_remove(
    State(probe): State<Arc<PortWakeProbe>>,
    Json(request): Json<RemoveRequest>,
) -> impl IntoResponse {
    // Removing an unarmed port succeeds, so re-broadcasts stay idempotent.
    match probe.remove(request.port) {
        Ok(()) => (StatusCode::OK, "removed".to_string()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Serve a router on `0.0.0.0:<port>` until the token is cancelled.
pub async fn serve(router: Router, port: u16, cancel: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control-plane listener started");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            info!(port, "control-plane listener stopping");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;
    use zeroscale_metrics::LogTables;
    use zeroscale_probe::MemoryPortWake;
    use zeroscale_state::ScaleDirection;

    struct RecordingSink {
        intents: Mutex<Vec<ScaleIntent>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                intents: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl IntentSink for RecordingSink {
        async fn submit(&self, intent: ScaleIntent) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("actuator unavailable");
            }
            self.intents.lock().unwrap().push(intent);
            Ok(())
        }
    }

    fn node(is_manager: bool) -> Arc<NodeInfo> {
        Arc::new(NodeInfo {
            hostname: "m1".to_string(),
            is_manager,
            peers: Vec::new(),
            keep_alive: Duration::from_secs(5),
        })
    }

    fn scale_body() -> Body {
        Body::from(r#"{"serviceId":"svc-1","direction":"over"}"#)
    }

    fn post(uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn manager_accepts_scale_requests() {
        let sink = RecordingSink::new(false);
        let router = scale_router(node(true), sink.clone());

        let resp = router.oneshot(post("/scale", scale_body())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let intents = sink.intents.lock().unwrap();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].service_id, "svc-1");
        assert_eq!(intents[0].direction, ScaleDirection::Up);
        assert_eq!(intents[0].origin, None);
    }

    #[tokio::test]
    async fn root_path_is_an_alias() {
        let sink = RecordingSink::new(false);
        let router = scale_router(node(true), sink.clone());

        let resp = router.oneshot(post("/", scale_body())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(sink.intents.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn non_manager_rejects_with_500() {
        let sink = RecordingSink::new(false);
        let router = scale_router(node(false), sink.clone());

        let resp = router.oneshot(post("/scale", scale_body())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(sink.intents.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sink_failure_is_500() {
        let router = scale_router(node(true), RecordingSink::new(true));
        let resp = router.oneshot(post("/scale", scale_body())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let router = scale_router(node(true), RecordingSink::new(false));
        let resp = router
            .oneshot(post("/scale", Body::from("{not json")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_direction_is_rejected() {
        let router = scale_router(node(true), RecordingSink::new(false));
        let resp = router
            .oneshot(post(
                "/scale",
                Body::from(r#"{"serviceId":"svc","direction":"sideways"}"#),
            ))
            .await
            .unwrap();
        // Well-formed JSON with an unknown direction fails the typed
        // extractor.
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn non_post_is_405() {
        let router = scale_router(node(true), RecordingSink::new(false));
        let resp = router
            .oneshot(Request::builder().uri("/scale").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn worker_forwards_scale_to_manager_over_http() {
        use crate::sink::RemoteSink;
        use crate::{PeerClient, SCALE_PORT};
        use zeroscale_state::{NodeRole, Peer};

        // Manager side: a real listener on the fixed scale port.
        let sink = RecordingSink::new(false);
        let router = scale_router(node(true), sink.clone());
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(router, SCALE_PORT, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Worker side: the remote sink resolves the manager peer and posts
        // the intent.
        let worker = NodeInfo {
            hostname: "w1".to_string(),
            is_manager: false,
            peers: vec![Peer {
                hostname: "m1".to_string(),
                ip: "127.0.0.1".to_string(),
                role: NodeRole::Manager,
            }],
            keep_alive: Duration::from_secs(5),
        };
        let remote = RemoteSink::new(PeerClient::new(), &worker).unwrap();
        remote
            .submit(ScaleIntent::new("svc-9", ScaleDirection::Up))
            .await
            .unwrap();

        {
            let intents = sink.intents.lock().unwrap();
            assert_eq!(intents.len(), 1);
            assert_eq!(intents[0].service_id, "svc-9");
            assert_eq!(intents[0].direction, ScaleDirection::Up);
        }

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    fn test_probe() -> (Arc<PortWakeProbe>, Arc<MemoryPortWake>) {
        let (backend, _events) = MemoryPortWake::new();
        let probe = Arc::new(PortWakeProbe::new(
            backend.clone(),
            Arc::new(LogTables::new()),
        ));
        (probe, backend)
    }

    #[tokio::test]
    async fn listen_arms_the_local_probe() {
        let (probe, backend) = test_probe();
        let router = probe_router(probe.clone());

        let resp = router
            .oneshot(post(
                "/listen",
                Body::from(r#"{"port":8080,"serviceId":"svc-1"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(backend.is_armed(8080));
        assert_eq!(probe.service_for(8080).as_deref(), Some("svc-1"));
    }

    #[tokio::test]
    async fn remove_disarms_and_tolerates_absent_ports() {
        let (probe, backend) = test_probe();
        probe.listen(8080, "svc-1").unwrap();
        let router = probe_router(probe.clone());

        let resp = router
            .clone()
            .oneshot(post("/remove", Body::from(r#"{"port":8080}"#)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!backend.is_armed(8080));

        // Removing again still succeeds.
        let resp = router
            .oneshot(post("/remove", Body::from(r#"{"port":8080}"#)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
