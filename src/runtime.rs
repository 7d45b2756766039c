// src/runtime.rs

//! HTTP runtime for the surrounding UI process.
//!
//! The UI (out of scope here) owns the graph; it posts fully built run
//! requests, reads back results, and asks for discovery or cancellation.

use crate::{auth::api_key_auth, engine::Executor};

use axum::{
    body::Body,
    extract::{Path, State},
    http::Request,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::engine::{ExecutionResult, RunHandle, RunRequest};
use crate::resolver::{CompilerPaths, InterpreterPaths};

#[derive(Clone)]
pub struct AppState {
    executor: Arc<Executor>,
}

/* ---------------- server ---------------- */

pub fn router(executor: Arc<Executor>) -> Router {
    let protected = Router::new()
        .route("/run", post(run_cell))
        .route("/interpreters", get(interpreters))
        .route("/compilers", get(compilers))
        .route("/runs", get(running))
        .route("/runs/:node_id", get(run_status))
        .route("/runs/:node_id/cancel", post(cancel))
        .layer(middleware::from_fn(api_key_auth));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(AppState { executor })
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<Body>| {
                    tracing::info_span!(
                        "http_request",
                        method = %req.method(),
                        path = %req.uri().path(),
                    )
                })
                .on_response(|res: &Response, latency: Duration, _span: &Span| {
                    tracing::info!(
                        status = res.status().as_u16(),
                        latency_ms = latency.as_millis(),
                        "request completed"
                    );
                }),
        )
}

pub async fn serve(addr: &str, executor: Arc<Executor>) -> anyhow::Result<()> {
    let socket: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(socket).await?;

    tracing::info!("flowboard runtime listening on http://{}", socket);

    axum::serve(listener, router(executor)).await?;
    Ok(())
}

/* ---------------- response models ---------------- */

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    node_id: String,
    running: bool,
}

#[derive(Debug, Serialize)]
pub struct Cancelled {
    cancelled: usize,
}

/* ---------------- endpoints ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn run_cell(State(state): State<AppState>, Json(req): Json<RunRequest>) -> Json<ExecutionResult> {
    Json(state.executor.run(req).await)
}

async fn interpreters(State(state): State<AppState>) -> Json<InterpreterPaths> {
    Json(state.executor.resolver().detect_interpreters().await)
}

async fn compilers(State(state): State<AppState>) -> Json<CompilerPaths> {
    Json(state.executor.resolver().detect_compilers().await)
}

async fn running(State(state): State<AppState>) -> Json<Vec<RunHandle>> {
    Json(state.executor.registry().running())
}

async fn run_status(State(state): State<AppState>, Path(node_id): Path<String>) -> impl IntoResponse {
    let running = state.executor.registry().is_running(&node_id);
    Json(RunStatus { node_id, running })
}

async fn cancel(State(state): State<AppState>, Path(node_id): Path<String>) -> impl IntoResponse {
    let cancelled = state.executor.registry().cancel(&node_id);
    Json(Cancelled { cancelled })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutorSettings;
    use crate::language::Language;
    use crate::resolver::InterpreterResolver;
    use async_trait::async_trait;
    use std::path::Path as FsPath;

    struct Fixed;

    #[async_trait]
    impl InterpreterResolver for Fixed {
        fn cached(&self, _language: Language) -> Option<String> {
            None
        }

        async fn resolve(&self, language: Language) -> Option<String> {
            (language == Language::Python).then(|| "python3".to_string())
        }

        async fn detect_compilers(&self) -> CompilerPaths {
            CompilerPaths {
                gxx: Some("g++".into()),
                ..CompilerPaths::default()
            }
        }
    }

    fn state(root: &FsPath) -> AppState {
        let settings = ExecutorSettings {
            workspace_root: root.to_path_buf(),
            ..ExecutorSettings::default()
        };
        AppState {
            executor: Arc::new(Executor::new(Arc::new(Fixed), settings)),
        }
    }

    #[tokio::test]
    async fn discovery_endpoints_report_resolver_results() {
        let root = tempfile::tempdir().unwrap();
        let st = state(root.path());

        let Json(found) = interpreters(State(st.clone())).await;
        assert_eq!(found.python.as_deref(), Some("python3"));
        assert_eq!(found.julia, None);

        let Json(found) = compilers(State(st)).await;
        assert_eq!(found.gxx.as_deref(), Some("g++"));
    }

    #[tokio::test]
    async fn run_endpoint_returns_tagged_failure() {
        let root = tempfile::tempdir().unwrap();
        let st = state(root.path());

        let req = RunRequest::new(Language::Julia, "println(1)");
        let Json(result) = run_cell(State(st), Json(req)).await;

        assert_eq!(
            serde_json::to_value(result).unwrap(),
            serde_json::json!({ "ok": false, "error": "No julia interpreter found" })
        );
    }

    #[tokio::test]
    async fn cancel_unknown_node_is_zero() {
        let root = tempfile::tempdir().unwrap();
        let st = state(root.path());

        let Json(running) = running(State(st.clone())).await;
        assert!(running.is_empty());

        let resp = cancel(State(st), Path("nope".to_string())).await.into_response();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"cancelled":0}"#);
    }
}
