//! Gateway HTTP server (single port).

use crate::channels::LineClient;
use crate::config::{self, Config};
use crate::context::RequestContext;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::gateway::register::{confirmation_html, REGISTER_FORM};
use crate::llm::CozeClient;
use crate::registry::{self, TenantRegistry};
use crate::storage::{AttachmentStaging, GcsClient};
use crate::tenant::{RegistrationForm, TenantRecord};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path as UrlPath, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Header carrying the base64 HMAC of the webhook body.
pub const LINE_SIGNATURE_HEADER: &str = "x-line-signature";

/// Shared state for the gateway (config, registry, dispatcher).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// Resolved public root; None means derive from each request's Host header.
    pub public_url: Option<String>,
    pub registry: Arc<dyn TenantRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub staging: AttachmentStaging,
    /// Cancelled on shutdown; every request context is a child of it.
    pub shutdown: CancellationToken,
}

/// Build the production state: registry from config and the LINE, Coze, and Cloud Storage clients.
pub async fn build_state(config: Config, config_path: &Path) -> Result<GatewayState> {
    let registry = registry::open_registry(&config, config_path)
        .await
        .context("opening tenant registry")?;
    let staging = AttachmentStaging::new(config.storage.attachments_dir.clone());
    let line = LineClient::new(
        Some(config.messaging.api_base.clone()),
        Some(config.messaging.data_api_base.clone()),
    )
    .with_timeout(Duration::from_secs(config.messaging.timeout_secs));
    let coze = CozeClient::new(
        Some(config.ai.base_url.clone()),
        config.ai.fallback_reply.clone(),
    );
    let gcs = GcsClient::new(
        Some(config.storage.gcs_base_url.clone()),
        config.storage.metadata_url.clone(),
        config::resolve_gcs_token(&config),
    )
    .with_timeout(Duration::from_secs(config.storage.timeout_secs));
    let dispatcher = Dispatcher::new(
        registry.clone(),
        Arc::new(line),
        Arc::new(coze),
        Arc::new(gcs),
        staging.clone(),
    )
    .with_image_prompt(config.ai.image_prompt.clone())
    .with_fallback_reply(config.ai.fallback_reply.clone())
    .with_reply_timeout(Duration::from_secs(config.messaging.timeout_secs));
    Ok(GatewayState {
        public_url: config::resolve_public_url(&config),
        config: Arc::new(config),
        registry,
        dispatcher: Arc::new(dispatcher),
        staging,
        shutdown: CancellationToken::new(),
    })
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/api/:channel_id", post(line_webhook))
        .route("/register", get(register_form).post(register_submit))
        .route("/static/:file_name", get(static_file))
        .with_state(state)
}

/// Run the gateway server; binds to server.bind:server.port.
/// Blocks until shutdown (e.g. Ctrl+C); in-flight AI calls are cancelled on shutdown.
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let state = build_state(config, &config_path).await?;
    let bind_addr = format!("{}:{}", state.config.server.bind, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);
    match state.public_url {
        Some(ref url) => log::info!("public url: {}", url),
        None => log::info!("public url: derived from request Host header"),
    }

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Completes on SIGINT or SIGTERM, after cancelling all request contexts.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => {},
    }
    log::info!("shutdown signal received, cancelling in-flight requests");
    shutdown.cancel();
}

/// Public root for this request: configured URL, else `{X-Forwarded-Proto or http}://{Host}`.
fn server_root(state: &GatewayState, headers: &HeaderMap) -> String {
    if let Some(ref url) = state.public_url {
        return url.clone();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("http");
    format!("{}://{}", scheme, host)
}

fn dispatch_status(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::NotFound => StatusCode::NOT_FOUND,
        DispatchError::InvalidSignature | DispatchError::Decode(_) => StatusCode::BAD_REQUEST,
        DispatchError::AttachmentFetch(_)
        | DispatchError::AttachmentStore(_)
        | DispatchError::Interrupted(_)
        | DispatchError::Reply(_)
        | DispatchError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /api/:channel_id: LINE webhook for one tenant.
async fn line_webhook(
    State(state): State<GatewayState>,
    UrlPath(channel_id): UrlPath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let ctx = RequestContext::new(
        server_root(&state, &headers),
        Duration::from_secs(state.config.ai.timeout_secs),
        state.shutdown.child_token(),
    );
    log::debug!(
        "webhook: {} channel {} ({} bytes)",
        ctx.request_id(),
        channel_id,
        body.len()
    );
    let signature = headers
        .get(LINE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    match state
        .dispatcher
        .handle(&ctx, &channel_id, &body, signature)
        .await
    {
        Ok(handled) => {
            log::debug!("webhook: {} handled {} event(s)", ctx.request_id(), handled);
            (StatusCode::OK, "OK".to_string())
        }
        Err(e) => {
            let status = dispatch_status(&e);
            if status.is_server_error() {
                log::error!("webhook: {} failed: {}", ctx.request_id(), e);
                (status, "Internal Server Error".to_string())
            } else {
                (status, e.to_string())
            }
        }
    }
}

/// GET /register: the registration form.
async fn register_form() -> Html<&'static str> {
    Html(REGISTER_FORM)
}

/// POST /register: store the submitted credentials and show the callback URL.
async fn register_submit(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Form(form): Form<RegistrationForm>,
) -> Response {
    let record = TenantRecord::new(form.into(), &server_root(&state, &headers));
    log::info!(
        "register: channel {} -> {}",
        record.channel_id(),
        record.callback_url
    );
    let html = confirmation_html(&record);
    if let Err(e) = state.registry.put(record).await {
        log::error!("register: failed to store tenant: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to store registration").into_response();
    }
    Html(html).into_response()
}

/// GET /static/:file_name: staged attachment, fetched by the AI backend.
async fn static_file(
    State(state): State<GatewayState>,
    UrlPath(file_name): UrlPath<String>,
) -> Response {
    let Some(path) = state.staging.resolve(&file_name) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET / returns a simple health JSON (for health checks).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.server.port,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryBackend;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn memory_state(public_url: Option<&str>) -> GatewayState {
        let mut config = Config::default();
        config.registry.backend = RegistryBackend::Memory;
        config.server.public_url = public_url.map(str::to_string);
        let mut state = build_state(config, Path::new("/nonexistent/config.json"))
            .await
            .unwrap();
        // resolve_public_url also reads RELAY_PUBLIC_URL; pin it for the test.
        state.public_url = public_url.map(str::to_string);
        state
    }

    #[tokio::test]
    async fn root_derived_from_forwarded_headers() {
        let state = memory_state(None).await;
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "relay.example.com".parse().unwrap());
        assert_eq!(server_root(&state, &headers), "http://relay.example.com");
        headers.insert("x-forwarded-proto", "https, http".parse().unwrap());
        assert_eq!(server_root(&state, &headers), "https://relay.example.com");
    }

    #[tokio::test]
    async fn configured_root_wins() {
        let state = memory_state(Some("https://public.example.com")).await;
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "internal:8080".parse().unwrap());
        assert_eq!(server_root(&state, &headers), "https://public.example.com");
    }

    #[tokio::test]
    async fn register_then_lookup_round_trip() {
        let state = memory_state(None).await;
        let registry = state.registry.clone();
        let app = router(state);
        let body = "line_channel_id=1650000000&line_channel_secret=s3cret&line_channel_access_token=tok\
                    &coze_bot_id=bot-1&coze_api_key=pat_key&cloud_storage_bucket_name=tenant-bucket";
        let res = app
            .oneshot(
                Request::post("/register")
                    .header(header::HOST, "relay.example.com")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let record = registry.get("1650000000").await.unwrap().unwrap();
        assert_eq!(record.callback_url, "http://relay.example.com/api/1650000000");
        assert_eq!(record.credentials.coze_bot_id, "bot-1");
        assert_eq!(record.credentials.cloud_storage_bucket_name, "tenant-bucket");
    }

    #[tokio::test]
    async fn unknown_channel_webhook_is_404() {
        let app = router(memory_state(None).await);
        let res = app
            .oneshot(
                Request::post("/api/nobody")
                    .header(LINE_SIGNATURE_HEADER, "AAAA")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"Bot info not found");
    }

    #[tokio::test]
    async fn static_rejects_unknown_files() {
        let app = router(memory_state(None).await);
        let res = app
            .oneshot(
                Request::get("/static/missing.jpg")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
