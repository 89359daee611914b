use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt as TokioStreamExt};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{Result, TxgraphError};
use crate::graph::GraphStore;
use crate::hierarchy::HierarchyAssembler;
use crate::oracle::ReasoningOracle;
use crate::report::{build_report, RecommendationReport};
use crate::server::events::StreamEvent;
use crate::traversal::{Resolution, TraversalEngine};

pub type SharedGraph = Arc<dyn GraphStore>;
pub type SharedOracle = Arc<dyn ReasoningOracle>;
pub type SharedEngine = TraversalEngine<SharedGraph, SharedOracle>;

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveRequest {
    pub considerations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveResponse {
    pub considerations: Resolution,
    pub report: RecommendationReport,
    pub text: String,
}

/// HTTP front end over one shared engine
pub struct HttpServer {
    state: AppState,
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    engine: Arc<SharedEngine>,
    assembler: Arc<HierarchyAssembler<SharedGraph>>,
    allowed_origins: Arc<Vec<String>>,
    started_at: DateTime<Utc>,
}

impl HttpServer {
    pub fn new(engine: SharedEngine, allowed_origins: Vec<String>) -> Self {
        let assembler = HierarchyAssembler::new(Arc::clone(engine.graph()));
        Self {
            state: AppState {
                engine: Arc::new(engine),
                assembler: Arc::new(assembler),
                allowed_origins: Arc::new(allowed_origins),
                started_at: Utc::now(),
            },
        }
    }

    /// Run the HTTP server
    pub async fn run(&self, port: u16) -> Result<()> {
        let addr = format!("127.0.0.1:{}", port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            TxgraphError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to bind to {}: {}. Set http_server.port in config.toml to use another port.",
                    addr, e
                ),
            ))
        })?;

        log::info!("Starting txgraph HTTP server on http://{}", addr);
        axum::serve(listener, self.router()).await.map_err(|e| {
            TxgraphError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("HTTP server error: {}", e),
            ))
        })?;

        Ok(())
    }

    /// Create the axum router
    pub fn router(&self) -> Router {
        // No configured origins means local use; allow any.
        let cors = if self.state.allowed_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = self
                .state
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .route("/health", get(handle_health))
            .route("/resolve", post(handle_resolve))
            .route("/resolve/stream", post(handle_resolve_stream))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors),
            )
            .with_state(self.state.clone())
    }
}

/// HTTP status for a failed resolve
pub fn error_status(error: &TxgraphError) -> StatusCode {
    match error {
        TxgraphError::OracleProtocol(_) | TxgraphError::Oracle(_) => StatusCode::BAD_GATEWAY,
        TxgraphError::GraphUnavailable(_) | TxgraphError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
        TxgraphError::TurnLimitExceeded(_) | TxgraphError::DeadlineExceeded(_) => {
            StatusCode::GATEWAY_TIMEOUT
        }
        TxgraphError::InvalidInput(_) | TxgraphError::Parse(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: TxgraphError) -> Response {
    let status = error_status(&error);
    log::error!("Resolve failed ({}): {}", status, error);
    (
        status,
        Json(serde_json::json!({
            "error": error.to_string()
        })),
    )
        .into_response()
}

async fn resolve_and_report(state: &AppState, considerations: &[String]) -> Result<ResolveResponse> {
    let resolution = state.engine.resolve(considerations).await?;
    let report = build_report(&state.assembler, &resolution).await?;
    let text = report.render_text();
    Ok(ResolveResponse {
        considerations: resolution,
        report,
        text,
    })
}

async fn handle_resolve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ResolveRequest>,
) -> Response {
    if let Err(response) = validate_origin(&headers, &state.allowed_origins) {
        return response;
    }

    match resolve_and_report(&state, &request.considerations).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Stream engine diagnostics while resolving, then suggestions and text.
async fn handle_resolve_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ResolveRequest>,
) -> Response {
    if let Err(response) = validate_origin(&headers, &state.allowed_origins) {
        return response;
    }

    let (tx, rx) = mpsc::unbounded_channel::<StreamEvent>();
    tokio::spawn(stream_resolve(state, request.considerations, tx));

    let stream = UnboundedReceiverStream::new(rx)
        .map(|event| std::result::Result::<Event, Infallible>::Ok(event.to_sse()));

    let keepalive = KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("ping");

    Sse::new(stream).keep_alive(keepalive).into_response()
}

async fn stream_resolve(
    state: AppState,
    considerations: Vec<String>,
    tx: mpsc::UnboundedSender<StreamEvent>,
) {
    let cancel = Arc::new(AtomicBool::new(false));
    let (diag_tx, mut diag_rx) = mpsc::unbounded_channel();

    let forwarder = {
        let tx = tx.clone();
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            while let Some(diagnostic) = diag_rx.recv().await {
                if tx.send(StreamEvent::diagnostic(diagnostic)).is_err() {
                    // Client disconnected; stop the session at the next turn.
                    cancel.store(true, Ordering::SeqCst);
                }
            }
        })
    };

    let resolved = state
        .engine
        .resolve_with(&considerations, &cancel, Some(&diag_tx))
        .await;
    drop(diag_tx);
    let _ = forwarder.await;

    let outcome = match resolved {
        Ok(resolution) => build_report(&state.assembler, &resolution)
            .await
            .map(|report| (resolution, report)),
        Err(e) => Err(e),
    };

    match outcome {
        Ok((resolution, report)) => {
            for (consideration, treatments) in resolution {
                let _ = tx.send(StreamEvent::Suggestion {
                    consideration,
                    treatments,
                });
            }
            let _ = tx.send(StreamEvent::text(report.render_text()));
        }
        Err(e) => {
            let status = error_status(&e);
            log::error!("Streamed resolve failed ({}): {}", status, e);
            let _ = tx.send(StreamEvent::Error {
                status: status.as_u16(),
                message: e.to_string(),
            });
        }
    }
    let _ = tx.send(StreamEvent::Done);
}

/// Handle health check endpoint
async fn handle_health(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "txgraph",
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at.to_rfc3339(),
            "roots": state.engine.roots(),
        })),
    )
        .into_response()
}

/// Validate Origin header (prevents DNS rebinding attacks)
fn validate_origin(headers: &HeaderMap, allowed_origins: &[String]) -> std::result::Result<(), Response> {
    // If no origins are configured, allow all (for local development)
    if allowed_origins.is_empty() {
        return Ok(());
    }

    // Non-browser clients send no Origin
    let origin = match headers.get("origin").and_then(|h| h.to_str().ok()) {
        Some(o) => o,
        None => return Ok(()),
    };

    if allowed_origins.iter().any(|allowed| origin == allowed) {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({
                "error": "Origin not allowed",
                "message": format!("Origin '{}' is not in the allowed origins list", origin)
            })),
        )
            .into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::seeded_store;
    use crate::oracle::{
        ActionInvocation, ActionSpec, Decision, DecideContext, SelectContext,
    };
    use crate::traversal::EXPAND_ACTION;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Expands `target` once, then picks every candidate offered.
    struct PickAllOracle {
        target: &'static str,
    }

    #[async_trait]
    impl ReasoningOracle for PickAllOracle {
        async fn decide(&self, context: DecideContext<'_>, _actions: &[ActionSpec]) -> Result<Decision> {
            if context.history.len() > 1 {
                return Ok(Decision::Terminal {
                    message: Some("done".to_string()),
                });
            }
            Ok(Decision::Invoke {
                message: None,
                calls: vec![ActionInvocation {
                    id: "call_0".to_string(),
                    action: EXPAND_ACTION.to_string(),
                    args: serde_json::json!({ "target_node": self.target }),
                }],
            })
        }

        async fn select(&self, context: SelectContext<'_>) -> Result<Vec<String>> {
            Ok(context.candidates.to_vec())
        }
    }

    async fn test_server(target: &'static str, allowed_origins: Vec<String>) -> (HttpServer, TempDir) {
        let (store, temp_dir) = seeded_store().await;
        let graph: SharedGraph = Arc::new(store);
        let oracle: SharedOracle = Arc::new(PickAllOracle { target });
        let engine = TraversalEngine::new(
            graph,
            oracle,
            vec!["SYMPTOM PROFILE".to_string(), "PROSTATE SIZE / VOLUME".to_string()],
        );
        (HttpServer::new(engine, allowed_origins), temp_dir)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (server, _temp) = test_server("SYMPTOM PROFILE", vec![]).await;
        let response = server
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["roots"][0], "SYMPTOM PROFILE");
    }

    #[tokio::test]
    async fn test_resolve_returns_mapping_report_and_text() {
        let (server, _temp) = test_server("SYMPTOM PROFILE", vec![]).await;
        let response = server
            .router()
            .oneshot(post_json(
                "/resolve",
                serde_json::json!({"considerations": ["urgency and frequency"]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(
            json["considerations"]["Bothersome storage symptoms"],
            serde_json::json!(["Finasteride", "Tamsulosin"])
        );
        assert_eq!(
            json["considerations"]["Mild symptoms"],
            serde_json::json!(["Watchful Waiting"])
        );
        assert_eq!(json["report"]["considerations"][0]["groups"][0]["type"], "MEDICAL");
        assert!(json["text"]
            .as_str()
            .unwrap()
            .starts_with("1. Bothersome storage symptoms"));
    }

    #[tokio::test]
    async fn test_resolve_empty_input() {
        let (server, _temp) = test_server("SYMPTOM PROFILE", vec![]).await;
        let response = server
            .router()
            .oneshot(post_json("/resolve", serde_json::json!({"considerations": []})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["considerations"], serde_json::json!({}));
        assert_eq!(json["text"], "No considerations apply.");
    }

    #[tokio::test]
    async fn test_resolve_protocol_error_is_bad_gateway() {
        let (server, _temp) = test_server("Nocturia", vec![]).await;
        let response = server
            .router()
            .oneshot(post_json(
                "/resolve",
                serde_json::json!({"considerations": ["nocturia"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_resolve_rejects_foreign_origin() {
        let (server, _temp) =
            test_server("SYMPTOM PROFILE", vec!["https://app.example.org".to_string()]).await;
        let mut request = post_json("/resolve", serde_json::json!({"considerations": ["x"]}));
        request
            .headers_mut()
            .insert("origin", HeaderValue::from_static("https://evil.example.com"));

        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_resolve_stream_event_sequence() {
        let (server, _temp) = test_server("SYMPTOM PROFILE", vec![]).await;
        let response = server
            .router()
            .oneshot(post_json(
                "/resolve/stream",
                serde_json::json!({"considerations": ["urgency and frequency"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_text(response).await;
        let events: Vec<&str> = body
            .lines()
            .filter_map(|line| line.strip_prefix("event:"))
            .map(str::trim)
            .collect();

        let first_suggestion = events.iter().position(|e| *e == "suggestion").unwrap();
        assert!(events[..first_suggestion].iter().all(|e| *e == "tool_call_end"));
        assert_eq!(events.iter().filter(|e| **e == "suggestion").count(), 2);
        assert_eq!(&events[events.len() - 2..], &["text", "done"]);
        assert!(body.contains("\"producer\":\"considerations\""));
    }

    #[tokio::test]
    async fn test_resolve_stream_reports_errors_in_band() {
        let (server, _temp) = test_server("Nocturia", vec![]).await;
        let response = server
            .router()
            .oneshot(post_json(
                "/resolve/stream",
                serde_json::json!({"considerations": ["nocturia"]}),
            ))
            .await
            .unwrap();

        let body = body_text(response).await;
        assert!(body.lines().any(|line| line.starts_with("event:") && line.ends_with("error")));
        assert!(body.contains("\"status\":502"));
        assert!(body.trim_end().ends_with("{\"type\":\"done\"}"));
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_status(&TxgraphError::OracleProtocol("x".to_string())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_status(&TxgraphError::GraphUnavailable("x".to_string())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            error_status(&TxgraphError::TurnLimitExceeded(3)),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            error_status(&TxgraphError::DeadlineExceeded(Duration::from_secs(1))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            error_status(&TxgraphError::InvalidInput("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(error_status(&TxgraphError::Cancelled), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
