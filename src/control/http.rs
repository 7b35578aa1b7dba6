use super::{ControlSurface, StatusReport};
use crate::error::{Result, VmWatchError};
use crate::events::ControlAction;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) control: Arc<ControlSurface>,
}

/// Routes of the HTTP control surface
pub fn router(control: Arc<ControlSurface>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/pause", post(pause_handler))
        .route("/resume", post(resume_handler))
        .route("/stop", post(stop_handler))
        .with_state(ServerState { control })
}

async fn status_handler(State(state): State<ServerState>) -> Json<StatusReport> {
    Json(state.control.report())
}

async fn pause_handler(State(state): State<ServerState>) -> Json<StatusReport> {
    apply(&state, ControlAction::Pause)
}

async fn resume_handler(State(state): State<ServerState>) -> Json<StatusReport> {
    apply(&state, ControlAction::Resume)
}

async fn stop_handler(State(state): State<ServerState>) -> Json<StatusReport> {
    apply(&state, ControlAction::Stop)
}

fn apply(state: &ServerState, action: ControlAction) -> Json<StatusReport> {
    info!("HTTP control request: {:?}", action);
    state.control.dispatch(action);
    Json(state.control.report())
}

/// HTTP front-end for the control surface
pub struct ControlServer {
    bind: String,
    control: Arc<ControlSurface>,
    cancellation_token: CancellationToken,
}

impl ControlServer {
    pub fn new(bind: impl Into<String>, control: Arc<ControlSurface>, cancellation_token: CancellationToken) -> Self {
        Self {
            bind: bind.into(),
            control,
            cancellation_token,
        }
    }

    /// Bind the configured address so failures surface before anything else starts
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.bind).await.map_err(|e| {
            VmWatchError::component("http_control".to_string(), format!("bind {} failed: {}", self.bind, e))
        })?;

        info!("HTTP control surface listening on {}", self.bind);
        Ok(listener)
    }

    /// Serve on `listener` until the cancellation token fires
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let token = self.cancellation_token.clone();
        axum::serve(listener, router(Arc::clone(&self.control)))
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;

        info!("HTTP control surface stopped");
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::indicator::Indicator;
    use crate::state::{Status, StatusStore};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use tower::ServiceExt;

    fn control() -> (Arc<ControlSurface>, Arc<StatusStore>) {
        let store = Arc::new(StatusStore::new());
        let control = Arc::new(ControlSurface::new(
            "HomeAssistant",
            Arc::clone(&store),
            Arc::new(EventBus::new(8)),
        ));
        (control, store)
    }

    async fn call(control: Arc<ControlSurface>, method: Method, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(control)
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (control, store) = control();
        store.transition(Status::Online).unwrap();

        let (code, body) = call(control, Method::GET, "/status").await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["vm"], "HomeAssistant");
        assert_eq!(body["status"], "online");
        assert_eq!(body["indicator"], serde_json::to_value(Indicator::Ok).unwrap());
        assert_eq!(body["affordances"]["pause"], true);
        assert_eq!(body["affordances"]["resume"], false);
    }

    #[tokio::test]
    async fn test_pause_and_resume_endpoints() {
        let (control, store) = control();

        let (code, body) = call(Arc::clone(&control), Method::POST, "/pause").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["checking_enabled"], false);
        assert!(!store.checking_enabled());

        let (_, body) = call(control, Method::POST, "/resume").await;
        assert_eq!(body["checking_enabled"], true);
        assert!(store.checking_enabled());
    }

    #[tokio::test]
    async fn test_stop_endpoint() {
        let (control, store) = control();

        let (_, body) = call(control, Method::POST, "/stop").await;
        assert_eq!(body["running"], false);
        assert_eq!(body["affordances"]["stop"], false);
        assert!(!store.is_running());
    }

    #[tokio::test]
    async fn test_actions_require_post() {
        let (control, store) = control();

        let (code, _) = call(control, Method::GET, "/stop").await;
        assert_eq!(code, StatusCode::METHOD_NOT_ALLOWED);
        assert!(store.is_running());
    }

    #[tokio::test]
    async fn test_server_shuts_down_on_cancel() {
        let (control, _store) = control();
        let token = CancellationToken::new();
        let server = ControlServer::new("127.0.0.1:0", control, token.clone());

        let task = tokio::spawn(async move { server.start().await });
        token.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_bind_reports_occupied_address() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = occupied.local_addr().unwrap().to_string();
        let (control, _store) = control();

        let server = ControlServer::new(addr, control, CancellationToken::new());
        let err = server.bind().await.unwrap_err();

        assert!(matches!(err, VmWatchError::Component { ref component, .. } if component == "http_control"));
    }
}
