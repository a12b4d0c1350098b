use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{ws::WebSocketUpgrade, DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use weft_core::{ClassRegistry, RecoveredError};

use crate::collaborators::{
    AssetHandle, AssetRegistry, AssetService, PageRouter, Services, UploadBroker, UploadId,
    UploadedFile,
};
use crate::config::ServerConfig;
use crate::error::CollaboratorError;
use crate::host::{Application, SessionHost};
use crate::lifecycle::LifecycleState;
use crate::registry::SessionRegistry;
use crate::transport::{Transport, WebSocketTransport};

/// Recovered errors listed by `/api/sessions`.
const RECENT_ERRORS: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub host: Arc<SessionHost>,
    pub assets: Arc<AssetRegistry>,
    pub uploads: Arc<UploadBroker>,
}

impl AppState {
    pub fn new(config: ServerConfig, registry: ClassRegistry, router: Arc<dyn PageRouter>) -> Self {
        let assets = AssetRegistry::new(config.asset_grace);
        let uploads = UploadBroker::new();
        let app = Application {
            registry: Arc::new(registry),
            router,
            services: Services {
                assets: assets.clone(),
                uploads: uploads.clone(),
            },
        };
        let sessions = SessionRegistry::new(config.session_lifetime);
        let host = SessionHost::new(
            app,
            sessions,
            config.session.clone(),
            config.handshake_timeout,
        );
        Self {
            config: Arc::new(config),
            host: Arc::new(host),
            assets,
            uploads,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/sessions", get(sessions_summary))
        .route("/api/uploads/{id}", post(complete_upload))
        .route("/assets/{handle}", get(get_asset))
        .route("/ws", get(ws_connect))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    config: ServerConfig,
    registry: ClassRegistry,
    page_router: Arc<dyn PageRouter>,
) -> Result<()> {
    let state = AppState::new(config, registry, page_router);
    let sessions = state.host.sessions().clone();
    let sweeper = sessions.spawn_sweeper(state.config.sweep_interval);
    let purger = {
        let assets = Arc::downgrade(&state.assets);
        let interval = state.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(assets) = assets.upgrade() else { return };
                let purged = assets.purge(std::time::Instant::now());
                if purged > 0 {
                    debug!(purged, "expired unleased assets");
                }
            }
        })
    };

    let addr = state.config.listen_addr;
    let app = router(state);

    info!(%addr, "weft listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down; closing sessions");
    sessions.close_all();
    sweeper.abort();
    purger.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        debug!(?err, "ctrl-c handler unavailable; running until killed");
        std::future::pending::<()>().await;
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(Debug, Serialize)]
pub struct SessionErrorEntry {
    pub session: String,
    #[serde(flatten)]
    pub error: RecoveredError,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsSummary {
    pub total: usize,
    pub states: BTreeMap<LifecycleState, usize>,
    pub recent_errors: Vec<SessionErrorEntry>,
}

pub async fn sessions_summary(State(state): State<AppState>) -> Json<SessionsSummary> {
    let sessions = state.host.sessions();
    let mut recent_errors: Vec<SessionErrorEntry> = sessions
        .sessions()
        .iter()
        .flat_map(|handle| {
            let session = handle.token().prefix().to_string();
            handle.errors().into_iter().map(move |error| SessionErrorEntry {
                session: session.clone(),
                error,
            })
        })
        .collect();
    recent_errors.sort_by_key(|entry| entry.error.at);
    let skip = recent_errors.len().saturating_sub(RECENT_ERRORS);
    recent_errors.drain(..skip);

    Json(SessionsSummary {
        total: sessions.len(),
        states: sessions.counts(),
        recent_errors,
    })
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

async fn ws_connect(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let transport: Arc<dyn Transport> = Arc::new(WebSocketTransport::new(socket));
        if let Err(err) = state.host.connect(transport, params.token.as_deref()).await {
            debug!(%err, "connection not attached to a session");
        }
    })
}

async fn get_asset(Path(handle): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    match state.assets.open(&AssetHandle::from(handle.as_str())).await {
        Ok(asset) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, asset.content_type)],
            asset.bytes.to_vec(),
        )
            .into_response(),
        Err(err) => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    }
}

async fn complete_upload(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let header_str = |name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let file = UploadedFile {
        name: header_str(header::CONTENT_DISPOSITION).and_then(|d| disposition_filename(&d)),
        content_type: header_str(header::CONTENT_TYPE),
        bytes: Arc::from(body.as_ref()),
    };
    match state.uploads.complete(&UploadId::from(id.as_str()), file) {
        Ok(()) => (StatusCode::NO_CONTENT, String::new()),
        Err(err @ CollaboratorError::UploadCompleted(_)) => (StatusCode::CONFLICT, err.to_string()),
        Err(err) => (StatusCode::NOT_FOUND, err.to_string()),
    }
}

/// `filename` from a Content-Disposition header value.
fn disposition_filename(value: &str) -> Option<String> {
    value
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{RouteTable, UploadService};
    use crate::config::ServerConfig;
    use crate::cli::Cli;
    use clap::Parser;

    fn state() -> AppState {
        let config = ServerConfig::from_cli(&Cli::parse_from(["weft"])).unwrap();
        AppState::new(config, ClassRegistry::with_builtins(), Arc::new(RouteTable::new()))
    }

    #[tokio::test]
    async fn test_empty_summary_lists_every_state() {
        let Json(summary) = sessions_summary(State(state())).await;
        assert_eq!(summary.total, 0);
        assert_eq!(summary.states.len(), LifecycleState::ALL.len());
        assert!(summary.recent_errors.is_empty());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["states"]["active"], 0);
    }

    #[tokio::test]
    async fn test_upload_endpoint_completes_pending_upload() {
        let state = state();
        let id = state.uploads.expect();
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        headers.insert(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"notes.txt\"".parse().unwrap(),
        );

        let response = complete_upload(
            Path(id.to_string()),
            State(state.clone()),
            headers,
            Bytes::from_static(b"hello"),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let file = state.uploads.wait_for(&id).await.unwrap();
        assert_eq!(file.name.as_deref(), Some("notes.txt"));
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        assert_eq!(&*file.bytes, b"hello");
    }

    #[tokio::test]
    async fn test_unknown_asset_is_not_found() {
        let response = get_asset(Path("nope".into()), State(state())).await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_disposition_filename() {
        assert_eq!(
            disposition_filename("form-data; name=\"f\"; filename=\"a b.png\""),
            Some("a b.png".to_string())
        );
        assert_eq!(disposition_filename("inline"), None);
    }
}
